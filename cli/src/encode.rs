use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use flate2::read::MultiGzDecoder;
use tracing::info;

use shelflist_common::{CancelFlag, ShelflistResult};
use shelflist_index::zipnum::{write_zipnum, ZipNumParams};

const INPUT_BUFFER: usize = 64 * 1024;

#[derive(clap::Args, Debug)]
pub(crate) struct EncodeArgs {
    #[arg(short, long, help = "Input CDXJ file, '-' for stdin; .gz is decompressed")]
    input: String,
    #[arg(short, long, help = "Output directory for shards, idx and loc")]
    output: PathBuf,
    #[arg(
        short = 's',
        long,
        default_value_t = 100,
        help = "Target shard size in MiB (ignored with --single-shard)"
    )]
    shard_size: u64,
    #[arg(long, help = "Write one shard regardless of size")]
    single_shard: bool,
    #[arg(short = 'c', long, default_value_t = 3000, help = "Lines per compressed chunk")]
    chunk_size: usize,
    #[arg(long, default_value_t = 6, help = "Gzip level 1-9")]
    compress_level: u32,
    #[arg(long, default_value_t = 4, help = "Parallel compression workers")]
    workers: usize,
    #[arg(long, help = "Base name for output files (default: output dir basename)")]
    base: Option<String>,
    #[arg(long, help = "Custom idx filename inside the output dir")]
    idx_file: Option<String>,
    #[arg(long, help = "Custom loc filename inside the output dir")]
    loc_file: Option<String>,
}

pub(crate) fn run(args: EncodeArgs, cancel: &CancelFlag) -> ShelflistResult<()> {
    let base = args.base.clone().unwrap_or_else(|| {
        args.output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| String::from("index"))
    });

    let params = ZipNumParams {
        chunk_size: args.chunk_size,
        shard_size: if args.single_shard {
            u64::MAX
        } else {
            args.shard_size * 1024 * 1024
        },
        compress_level: args.compress_level,
        workers: args.workers,
        base,
        idx_name: args.idx_file.clone(),
        loc_name: args.loc_file.clone(),
    };

    let input = open_input(&args.input)?;
    let summary = write_zipnum(input, &args.output, &params, cancel)?;

    info!(
        "encoded {} lines into {} chunk(s) / {} shard(s)",
        summary.lines,
        summary.chunks,
        summary.shards.len()
    );
    Ok(())
}

fn open_input(path: &str) -> ShelflistResult<Box<dyn BufRead>> {
    if path == "-" {
        return Ok(Box::new(std::io::stdin().lock()));
    }

    let file = File::open(path)?;
    if path.ends_with(".gz") {
        Ok(Box::new(BufReader::with_capacity(
            INPUT_BUFFER,
            MultiGzDecoder::new(BufReader::new(file)),
        )))
    } else {
        Ok(Box::new(BufReader::with_capacity(INPUT_BUFFER, file)))
    }
}

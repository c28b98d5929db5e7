use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use shelflist_common::{loc_for_index, CancelFlag, ShelflistResult};
use shelflist_index::zipnum::{decode_zipnum, decode_zipnum_file, DecodeOptions};

#[derive(clap::Args, Debug)]
pub(crate) struct DecodeArgs {
    #[arg(short, long, help = "Input .idx file, or '-' for idx rows on stdin")]
    input: String,
    #[arg(long, help = "Base directory for shard files (default: the idx's directory)")]
    base_dir: Option<PathBuf>,
    #[arg(long, help = "Explicit .loc path (default: the idx's .loc sibling)")]
    loc: Option<PathBuf>,
    #[arg(long, default_value_t = 4, help = "Parallel decompression workers")]
    workers: usize,
}

pub(crate) fn run(args: DecodeArgs, cancel: &CancelFlag) -> ShelflistResult<()> {
    let mut stdout = BufWriter::new(io::stdout().lock());

    let summary = if args.input == "-" {
        let opts = DecodeOptions {
            base_dir: args.base_dir.clone().unwrap_or_else(|| PathBuf::from(".")),
            loc: args.loc.clone(),
            workers: args.workers,
        };
        decode_zipnum(io::stdin().lock(), &opts, &mut stdout, cancel)?
    } else {
        let idx_path = Path::new(&args.input);
        let opts = DecodeOptions {
            base_dir: args.base_dir.clone().unwrap_or_else(|| {
                idx_path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or(Path::new("."))
                    .to_path_buf()
            }),
            loc: args.loc.clone().or_else(|| loc_for_index(idx_path)),
            workers: args.workers,
        };
        decode_zipnum_file(idx_path, &opts, &mut stdout, cancel)?
    };

    stdout.flush()?;
    info!(
        "decoded {} chunk(s) from {} shard(s)",
        summary.chunks, summary.shards
    );
    Ok(())
}

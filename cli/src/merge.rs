use std::fs::File;
use std::io::{self, BufWriter, Write};

use tracing::info;

use shelflist_common::{compile_excludes, discover_files, CancelFlag, ShelflistError, ShelflistResult};
use shelflist_index::KwayMerger;

#[derive(clap::Args, Debug)]
pub(crate) struct MergeArgs {
    #[arg(help = "Output file, or '-' for stdout")]
    output: String,
    #[arg(help = "Sorted input files, directories, or glob patterns", required = true)]
    inputs: Vec<String>,
    #[arg(
        long,
        help = "Exclude files whose basename matches a glob pattern (repeatable)"
    )]
    exclude: Vec<String>,
}

pub(crate) fn run(args: MergeArgs, cancel: &CancelFlag) -> ShelflistResult<()> {
    let excludes = compile_excludes(&args.exclude)?;
    let files = discover_files(&args.inputs, &excludes)?;

    if files.is_empty() {
        return Err(ShelflistError::InvalidParam(
            "no input files left after exclusions".into(),
        ));
    }

    info!("merging {} file(s)", files.len());

    let sources = files
        .iter()
        .map(|path| KwayMerger::open_source(path))
        .collect::<ShelflistResult<Vec<_>>>()?;
    let merger = KwayMerger::new(sources);

    let written = if args.output == "-" {
        merger.run(&mut BufWriter::new(io::stdout().lock()), cancel)?
    } else {
        let mut out = BufWriter::with_capacity(1 << 20, File::create(&args.output)?);
        let written = merger.run(&mut out, cancel)?;
        out.flush()?;
        written
    };

    info!("{written} lines written to {}", args.output);
    Ok(())
}

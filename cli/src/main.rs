use std::process::ExitCode;

use clap::builder::TypedValueParser;
use clap::{Parser, Subcommand};
use tracing::{error, metadata::LevelFilter};
use tracing_subscriber::{filter::Targets, prelude::*};

use shelflist_common::{CancelFlag, ShelflistError};

mod decode;
mod encode;
mod merge;
mod search;

#[derive(clap::Parser, Debug)]
#[command(version, about = "Indexing and lookup tools for CDXJ / ZipNum web-archive indexes")]
struct Args {
    #[arg(
        long,
        default_value_t = LevelFilter::INFO,
        value_parser = clap::builder::PossibleValuesParser::new(["off", "error", "warn", "info", "debug", "trace"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
    )]
    log_level: LevelFilter,
    #[command(subcommand)]
    subcommand: ShelflistSubcommand,
}

#[derive(Subcommand, Debug)]
enum ShelflistSubcommand {
    /// Merge sorted CDXJ files into one sorted stream
    Merge(merge::MergeArgs),
    /// Rewrite a sorted CDXJ stream into compressed ZipNum shards
    Encode(encode::EncodeArgs),
    /// Restore the flat CDXJ stream from a ZipNum dataset
    Decode(decode::DecodeArgs),
    /// Binary-search flat CDXJ and ZipNum indexes
    Search(search::SearchArgs),
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(Targets::new().with_default(args.log_level))
        .init();

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || cancel.cancel()) {
            error!("could not install interrupt handler: {e}");
        }
    }

    let result = match args.subcommand {
        ShelflistSubcommand::Merge(merge_args) => merge::run(merge_args, &cancel),
        ShelflistSubcommand::Encode(encode_args) => encode::run(encode_args, &cancel),
        ShelflistSubcommand::Decode(decode_args) => decode::run(decode_args, &cancel),
        ShelflistSubcommand::Search(search_args) => search::run(search_args, &cancel),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(ShelflistError::Cancelled) => {
            error!("interrupted");
            ExitCode::from(130)
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

use std::io::{self, BufWriter, Write};

use clap::builder::TypedValueParser;
use tracing::{debug, info, warn};
use url::Url;

use shelflist_common::{discover_files, surt, CancelFlag, ShelflistError, ShelflistResult};
use shelflist_search::{
    filters::finish_results, search_file, LineFilter, MatchType, SearchKey,
};

#[derive(clap::Args, Debug)]
pub(crate) struct SearchArgs {
    #[arg(
        long,
        help = "URL to search for (converted to SURT)",
        conflicts_with = "surt",
        required_unless_present = "surt"
    )]
    url: Option<String>,
    #[arg(long, help = "SURT key to search for")]
    surt: Option<String>,
    #[arg(
        long = "matchType",
        default_value_t = MatchType::Exact,
        value_parser = clap::builder::PossibleValuesParser::new(["exact", "prefix", "host", "domain"])
            .map(|s| s.parse::<MatchType>().unwrap()),
        help = "Key comparison: exact, prefix, host, or domain"
    )]
    match_type: MatchType,
    #[arg(long = "from", help = "Start timestamp, 1-14 digits")]
    from_ts: Option<String>,
    #[arg(long = "to", help = "End timestamp, 1-14 digits")]
    to_ts: Option<String>,
    #[arg(
        long = "filter",
        help = "Field predicate: F=V, F!=V, F~R or F!~R (repeatable)"
    )]
    filters: Vec<String>,
    #[arg(long, help = "Keep only the first N results")]
    limit: Option<usize>,
    #[arg(long, help = "Sort results by (SURT, timestamp)")]
    sort: bool,
    #[arg(long, help = "Collapse results sharing a (SURT, timestamp) pair")]
    dedupe: bool,
    #[arg(long, help = "Report unreadable files on stderr and continue")]
    skip_errors: bool,
    #[arg(
        help = "CDXJ/ZipNum files, directories, or glob patterns",
        required = true
    )]
    files: Vec<String>,
}

pub(crate) fn run(args: SearchArgs, cancel: &CancelFlag) -> ShelflistResult<()> {
    let surt_key = match &args.url {
        Some(raw) => {
            let url = Url::parse(raw)
                .map_err(|e| ShelflistError::InvalidParam(format!("bad url {raw:?}: {e}")))?;
            let converted = surt(&url);
            debug!("converted {raw} -> {converted}");
            converted
        }
        None => args.surt.clone().expect("clap enforces url|surt"),
    };

    let key = SearchKey::new(surt_key, args.match_type);

    // bad filters and regexes are fatal before any file is touched
    let filter = LineFilter::new(args.from_ts.as_deref(), args.to_ts.as_deref(), &args.filters)?;

    let files = discover_files(&args.files, &[])?;
    if files.is_empty() {
        return Err(ShelflistError::InvalidParam(
            "no files found matching the given patterns".into(),
        ));
    }

    let mut results = Vec::new();
    for (i, path) in files.iter().enumerate() {
        cancel.check()?;
        debug!("searching file {}/{}: {}", i + 1, files.len(), path.display());

        match search_file(path, &key) {
            Ok(hits) => results.extend(hits),
            Err(e) if args.skip_errors => {
                warn!("skipping {}: {e}", path.display());
            }
            Err(e) => return Err(e),
        }
    }

    let found = results.len();

    if !filter.is_empty() {
        results.retain(|line| filter.accepts(line));
    }

    let results = finish_results(results, args.sort, args.dedupe, args.limit);

    let mut stdout = BufWriter::new(io::stdout().lock());
    for line in &results {
        stdout.write_all(line)?;
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;

    info!(
        "{} result(s) ({found} matched before filtering) across {} file(s)",
        results.len(),
        files.len()
    );
    Ok(())
}

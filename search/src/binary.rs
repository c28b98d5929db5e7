use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use tracing::debug;

use shelflist_common::{sort_key, surt_key, ShelflistResult};

use crate::SearchKey;

/// How far before the bisection hit the backward scan reopens, to catch a
/// run of equal keys extending above the hit.
const BACKSCAN_WINDOW: u64 = 10 * 1024;

/// Find every line of a sorted CDXJ file matching `key`, in file order,
/// without loading the file.
pub fn search_flat_file(path: &Path, key: &SearchKey) -> ShelflistResult<Vec<Vec<u8>>> {
    debug!("binary search in {}", path.display());
    binary_search_lines(File::open(path)?, key)
}

/// Byte-offset bisection over any seekable line source.
///
/// Seek targets land mid-line, so each probe discards the partial line it
/// landed in and reads the next whole one. A truncated terminal line is
/// tolerated; an unsorted source yields undefined results but never an
/// error.
pub fn binary_search_lines<R: Read + Seek>(
    source: R,
    key: &SearchKey,
) -> ShelflistResult<Vec<Vec<u8>>> {
    let mut reader = BufReader::new(source);
    let size = reader.seek(SeekFrom::End(0))?;

    if size == 0 {
        return Ok(Vec::new());
    }

    let mut lo = 0u64;
    let mut hi = size;
    let mut candidate: Option<u64> = None;
    let mut line = Vec::new();

    while lo < hi {
        let mid = (lo + hi) / 2;
        reader.seek(SeekFrom::Start(mid))?;

        if mid > 0 {
            line.clear();
            reader.read_until(b'\n', &mut line)?;
        }

        let pos = reader.stream_position()?;
        if pos >= size {
            hi = mid;
            continue;
        }

        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            hi = mid;
            continue;
        }

        let line_key = surt_key(&line);
        if line_key.is_empty() {
            hi = mid;
            continue;
        }

        if line_key < key.key.as_bytes() {
            // everything through this line sorts below the query
            lo = pos + n as u64;
        } else {
            if key.matches(line_key) {
                candidate = Some(pos);
            }
            hi = mid;
        }
    }

    let start = match candidate {
        Some(hit) => first_match_before(&mut reader, hit, key)?,
        None if key.prefix => lo.min(size),
        None => return Ok(Vec::new()),
    };

    collect_from(&mut reader, start, key)
}

/// Reopen a window before the bisection hit and walk forward to the first
/// matching line. Equal-key runs longer than the window start wherever the
/// window does.
fn first_match_before<R: Read + Seek>(
    reader: &mut BufReader<R>,
    hit: u64,
    key: &SearchKey,
) -> ShelflistResult<u64> {
    let window_start = hit.saturating_sub(BACKSCAN_WINDOW);
    reader.seek(SeekFrom::Start(window_start))?;

    let mut line = Vec::new();
    if window_start > 0 {
        reader.read_until(b'\n', &mut line)?;
    }

    loop {
        let pos = reader.stream_position()?;
        if pos > hit {
            return Ok(hit);
        }

        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(hit);
        }

        let line_key = surt_key(&line);
        if !line_key.is_empty() && key.matches(line_key) {
            return Ok(pos);
        }
    }
}

/// Emit matching lines from a line boundary until the keys sort past the
/// query.
fn collect_from<R: Read + Seek>(
    reader: &mut BufReader<R>,
    start: u64,
    key: &SearchKey,
) -> ShelflistResult<Vec<Vec<u8>>> {
    reader.seek(SeekFrom::Start(start))?;

    let mut results = Vec::new();
    let mut line = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }

        let line_key = surt_key(&line);
        if line_key.is_empty() {
            continue;
        }

        if key.matches(line_key) {
            results.push(sort_key(&line).to_vec());
        } else if key.passed(line_key) {
            break;
        }
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use crate::MatchType;

    use super::*;

    const FILE: &str = concat!(
        "com,example)/       20200101000000 {\"s\":\"200\"}\n",
        "com,example)/about  20200101000000 {}\n",
        "com,example)/page   20200101000000 {}\n",
        "com,example)/page   20200102000000 {}\n",
        "com,test)/          20200101000000 {}\n",
    );

    fn search(content: &str, key: &str, match_type: MatchType) -> Vec<String> {
        binary_search_lines(
            Cursor::new(content.as_bytes().to_vec()),
            &SearchKey::new(key, match_type),
        )
        .unwrap()
        .into_iter()
        .map(|l| String::from_utf8(l).unwrap())
        .collect()
    }

    #[test]
    fn exact_match_returns_all_duplicates_in_order() {
        let hits = search(FILE, "com,example)/page", MatchType::Exact);
        assert_eq!(
            hits,
            [
                "com,example)/page   20200101000000 {}",
                "com,example)/page   20200102000000 {}",
            ]
        );
    }

    #[test]
    fn exact_match_on_first_and_last_lines() {
        let hits = search(FILE, "com,example)/", MatchType::Exact);
        assert_eq!(hits, ["com,example)/       20200101000000 {\"s\":\"200\"}"]);

        let hits = search(FILE, "com,test)/", MatchType::Exact);
        assert_eq!(hits, ["com,test)/          20200101000000 {}"]);
    }

    #[test]
    fn query_between_lines_matches_nothing() {
        assert!(search(FILE, "com,example)/zzz", MatchType::Exact).is_empty());
        assert!(search(FILE, "com,aaa)/", MatchType::Exact).is_empty());
        assert!(search(FILE, "org,zzz)/", MatchType::Exact).is_empty());
    }

    #[test]
    fn prefix_match_spans_the_host() {
        let hits = search(FILE, "com,example)/", MatchType::Prefix);
        assert_eq!(hits.len(), 4);
        assert!(hits.iter().all(|l| l.starts_with("com,example)/")));
    }

    #[test]
    fn host_match_stops_at_other_hosts() {
        let content = "com,example)/x 20200101000000 {}\ncom,example,www)/y 20200101000000 {}\n";

        let hits = search(content, "com,example)/z", MatchType::Host);
        assert_eq!(hits, ["com,example)/x 20200101000000 {}"]);

        let hits = search(content, "com,example,www)/z", MatchType::Host);
        assert_eq!(hits, ["com,example,www)/y 20200101000000 {}"]);
    }

    #[test]
    fn empty_and_single_line_files() {
        assert!(search("", "com,example)/", MatchType::Exact).is_empty());

        let single = "com,example)/ 20200101000000 {}\n";
        let hits = search(single, "com,example)/", MatchType::Exact);
        assert_eq!(hits, ["com,example)/ 20200101000000 {}"]);
        assert!(search(single, "com,b)/", MatchType::Exact).is_empty());
    }

    #[test]
    fn tolerates_one_very_long_line() {
        let long_json = format!("{{\"payload\":\"{}\"}}", "x".repeat(12 * 1024));
        let content = format!(
            "com,example)/big 20200101000000 {long_json}\ncom,example)/tiny 20200101000000 {{}}\n"
        );

        let hits = search(&content, "com,example)/big", MatchType::Exact);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].len() > 12 * 1024);

        let hits = search(&content, "com,example)/tiny", MatchType::Exact);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn tolerates_truncated_terminal_line() {
        let content = "com,example)/a 20200101000000 {}\ncom,example)/b 2020";
        let hits = search(content, "com,example)/a", MatchType::Exact);
        assert_eq!(hits, ["com,example)/a 20200101000000 {}"]);

        let hits = search(content, "com,example)/b", MatchType::Exact);
        assert_eq!(hits, ["com,example)/b 2020"]);
    }

    #[test]
    fn long_run_of_equal_keys_is_collected_from_its_start() {
        let mut content = String::from("com,a)/ 20200101000000 {}\n");
        for i in 0..200u32 {
            content.push_str(&format!("com,dup)/ 2020{:04}000000 {{}}\n", 101 + i));
        }
        content.push_str("com,z)/ 20200101000000 {}\n");

        let hits = search(&content, "com,dup)/", MatchType::Exact);
        assert_eq!(hits.len(), 200);
    }
}

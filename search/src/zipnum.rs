use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::debug;

use shelflist_common::{
    loc_for_index, sort_key, surt_key, zipnum_data_for_index, ShelflistError, ShelflistResult,
};
use shelflist_index::zipnum::{read_idx, IdxEntry, LocMap};

use crate::SearchKey;

/// Find every line of a ZipNum dataset matching `key`, in global sort
/// order, by scanning only the candidate chunks the `.idx` admits.
pub fn search_zipnum_index(idx_path: &Path, key: &SearchKey) -> ShelflistResult<Vec<Vec<u8>>> {
    let entries = read_idx(BufReader::new(File::open(idx_path)?))?;
    if entries.is_empty() {
        return Ok(Vec::new());
    }

    let base_dir = idx_path.parent().unwrap_or(Path::new(".")).to_path_buf();
    let loc = match loc_for_index(idx_path) {
        Some(path) => LocMap::read(&path)?,
        None => LocMap::default(),
    };

    let candidates = select_chunks(&entries, key);
    debug!(
        "{}: {} candidate chunk(s) of {}",
        idx_path.display(),
        candidates.len(),
        entries.len()
    );

    let mut results = Vec::new();
    for entry in candidates {
        let shard_path = resolve_shard(entry, &loc, &base_dir, idx_path)?;
        scan_chunk(&shard_path, entry, key, &mut results)?;
    }

    Ok(results)
}

/// Chunks that can hold matches: the chunk covers keys from its FIRST_KEY up
/// to its successor's, so it is a candidate when that span intersects the
/// query's span. Comparison uses the SURT component of FIRST_KEY, which
/// keeps a run of equal keys straddling a chunk boundary selectable.
fn select_chunks<'a>(entries: &'a [IdxEntry], key: &SearchKey) -> Vec<&'a IdxEntry> {
    let query = key.key.as_bytes();
    let upper = if key.prefix {
        prefix_upper_bound(query)
    } else {
        None
    };

    let mut selected = Vec::new();

    for (i, entry) in entries.iter().enumerate() {
        let first = entry.key_surt().as_bytes();

        let starts_in_range = if key.prefix {
            match &upper {
                Some(bound) => first < bound.as_slice(),
                None => true,
            }
        } else {
            first <= query
        };

        if !starts_in_range {
            break;
        }

        let next_covers = entries
            .get(i + 1)
            .map_or(true, |next| next.key_surt().as_bytes() >= query);

        if next_covers {
            selected.push(entry);
        }
    }

    selected
}

/// The smallest key no prefix match can reach: the query with its last byte
/// incremented (trailing 0xff bytes carry). `None` means unbounded.
fn prefix_upper_bound(query: &[u8]) -> Option<Vec<u8>> {
    let mut bound = query.to_vec();

    while let Some(last) = bound.last_mut() {
        if *last == 0xff {
            bound.pop();
        } else {
            *last += 1;
            return Some(bound);
        }
    }

    None
}

fn resolve_shard(
    entry: &IdxEntry,
    loc: &LocMap,
    base_dir: &Path,
    idx_path: &Path,
) -> ShelflistResult<PathBuf> {
    let path = loc.resolve(&entry.shard, base_dir);
    if path.is_file() {
        return Ok(path);
    }

    // final fallback: the .cdxj.gz sibling paired with the index itself
    if let Some(paired) = zipnum_data_for_index(idx_path) {
        return Ok(paired);
    }

    Err(ShelflistError::MissingFile(format!(
        "shard {} (looked for {})",
        entry.shard,
        path.display()
    )))
}

/// Decompress exactly one chunk (`length` bytes at `offset`, one gzip
/// member) and scan its lines with the query predicate. The slice read is
/// exact so a reader that would auto-chain members never sees the next one.
fn scan_chunk(
    shard_path: &Path,
    entry: &IdxEntry,
    key: &SearchKey,
    results: &mut Vec<Vec<u8>>,
) -> ShelflistResult<()> {
    let mut file = File::open(shard_path)?;
    file.seek(SeekFrom::Start(entry.offset))?;

    let mut member = vec![0u8; entry.length as usize];
    file.read_exact(&mut member).map_err(|_| bad_chunk(entry))?;

    let mut payload = Vec::with_capacity(member.len() * 3);
    GzDecoder::new(&member[..])
        .read_to_end(&mut payload)
        .map_err(|_| bad_chunk(entry))?;

    for line in payload.split_inclusive(|&b| b == b'\n') {
        let line_key = surt_key(line);
        if line_key.is_empty() {
            continue;
        }

        if key.matches(line_key) {
            results.push(sort_key(line).to_vec());
        } else if key.passed(line_key) {
            break;
        }
    }

    Ok(())
}

fn bad_chunk(entry: &IdxEntry) -> ShelflistError {
    ShelflistError::BadShard {
        shard: entry.shard.clone(),
        offset: entry.offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MatchType;

    fn entry(key: &str, offset: u64) -> IdxEntry {
        IdxEntry {
            key: key.to_owned(),
            shard: "part-01".to_owned(),
            offset,
            length: 10,
            shard_num: 1,
        }
    }

    #[test]
    fn exact_selection_covers_boundary_runs() {
        let entries = vec![
            entry("com,a)/ 20200101000000", 0),
            entry("com,example)/page 20200101000000", 10),
            entry("com,example)/page 20200301000000", 20),
            entry("com,z)/ 20200101000000", 30),
        ];

        let key = SearchKey::new("com,example)/page", MatchType::Exact);
        let selected: Vec<u64> = select_chunks(&entries, &key).iter().map(|e| e.offset).collect();

        // the run straddles chunks 2 and 3; chunk 1 may end with the key too
        assert_eq!(selected, [0, 10, 20]);
    }

    #[test]
    fn exact_selection_skips_chunks_past_the_key() {
        let entries = vec![
            entry("com,a)/ 20200101000000", 0),
            entry("com,b)/ 20200101000000", 10),
            entry("com,c)/ 20200101000000", 20),
        ];

        let key = SearchKey::new("com,b)/", MatchType::Exact);
        let selected: Vec<u64> = select_chunks(&entries, &key).iter().map(|e| e.offset).collect();
        assert_eq!(selected, [0, 10]);
    }

    #[test]
    fn prefix_selection_stops_at_the_upper_bound() {
        let entries = vec![
            entry("com,example)/a 20200101000000", 0),
            entry("com,example)/m 20200101000000", 10),
            entry("com,example,www)/ 20200101000000", 20),
            entry("com,zebra)/ 20200101000000", 30),
        ];

        let key = SearchKey::new("com,example)/", MatchType::Prefix);
        let selected: Vec<u64> = select_chunks(&entries, &key).iter().map(|e| e.offset).collect();
        assert_eq!(selected, [0, 10]);
    }

    #[test]
    fn upper_bound_increments_and_carries() {
        assert_eq!(prefix_upper_bound(b"abc"), Some(b"abd".to_vec()));
        assert_eq!(prefix_upper_bound(b"ab\xff"), Some(b"ac".to_vec()));
        assert_eq!(prefix_upper_bound(b"\xff\xff"), None);
    }
}

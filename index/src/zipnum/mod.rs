use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use tracing::warn;

use shelflist_common::{ShelflistError, ShelflistResult};

pub mod decode;
pub mod encode;

pub use decode::{decode_zipnum, decode_zipnum_file, DecodeOptions, DecodeSummary};
pub use encode::{write_zipnum, EncodeSummary, ZipNumParams};

/// Extension shared by all data shards.
pub const SHARD_SUFFIX: &str = ".cdx.gz";

/// Shard basename (without extension) for a 1-based shard ordinal.
pub fn shard_name(base: &str, shard_num: u32) -> String {
    format!("{base}-{shard_num:02}")
}

/// One `.idx` row: the first key of a chunk plus the location of its gzip
/// member inside a shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdxEntry {
    pub key: String,
    pub shard: String,
    pub offset: u64,
    pub length: u64,
    pub shard_num: u32,
}

impl IdxEntry {
    /// Parse a TAB-separated five-field row. The first field may contain a
    /// space (it holds `SURT SP TIMESTAMP`).
    pub fn parse(line: &str) -> ShelflistResult<IdxEntry> {
        let mut fields = line.trim_end_matches(['\r', '\n']).split('\t');

        let (Some(key), Some(shard), Some(offset), Some(length), Some(shard_num)) = (
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
        ) else {
            return Err(bad_row(line));
        };

        Ok(IdxEntry {
            key: key.to_owned(),
            shard: shard.to_owned(),
            offset: offset.parse().map_err(|_| bad_row(line))?,
            length: length.parse().map_err(|_| bad_row(line))?,
            shard_num: shard_num.parse().map_err(|_| bad_row(line))?,
        })
    }

    pub fn to_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\n",
            self.key, self.shard, self.offset, self.length, self.shard_num
        )
    }

    /// The SURT component of the chunk's first key (everything before the
    /// embedded space).
    pub fn key_surt(&self) -> &str {
        match self.key.find(' ') {
            Some(pos) => &self.key[..pos],
            None => &self.key,
        }
    }
}

fn bad_row(line: &str) -> ShelflistError {
    ShelflistError::MalformedRecord(format!("invalid .idx row: {line:?}"))
}

/// Read a whole `.idx`, preserving file order. Blank lines and `#` comments
/// are ignored; rows that do not parse are skipped with a warning.
pub fn read_idx(reader: impl BufRead) -> ShelflistResult<Vec<IdxEntry>> {
    let mut entries = Vec::new();

    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();

        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        match IdxEntry::parse(trimmed) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!("{e}"),
        }
    }

    Ok(entries)
}

/// The `.loc` mapping from shard names to shard file paths.
#[derive(Debug, Default)]
pub struct LocMap {
    shards: HashMap<String, String>,
}

impl LocMap {
    pub fn read(path: &Path) -> ShelflistResult<LocMap> {
        let content = std::fs::read_to_string(path)?;
        let mut shards = HashMap::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((name, location)) = line.split_once('\t') else {
                warn!("invalid .loc row: {line:?}");
                continue;
            };

            shards.insert(name.to_owned(), location.to_owned());
        }

        Ok(LocMap { shards })
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Resolve a shard name to a path: the `.loc` entry when present
    /// (relative entries are taken against `base_dir`), otherwise
    /// `base_dir/<shard_name>.cdx.gz`.
    pub fn resolve(&self, shard: &str, base_dir: &Path) -> PathBuf {
        match self.shards.get(shard) {
            Some(location) => {
                let location = Path::new(location);
                if location.is_absolute() {
                    location.to_path_buf()
                } else {
                    base_dir.join(location)
                }
            }
            None => base_dir.join(format!("{shard}{SHARD_SUFFIX}")),
        }
    }
}

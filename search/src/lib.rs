use std::fmt;
use std::path::Path;
use std::str::FromStr;

use shelflist_common::{
    detect_file_kind, zipnum_index_for_data, FileKind, ShelflistError, ShelflistResult,
};

pub mod binary;
pub mod filters;
pub mod zipnum;

pub use binary::search_flat_file;
pub use filters::LineFilter;
pub use zipnum::search_zipnum_index;

/// How a query key is compared against record keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchType {
    #[default]
    Exact,
    Prefix,
    /// All paths under the query's host.
    Host,
    /// The host and its subdomains. SURT encodes subdomains as extra
    /// comma-separated labels before `)`, so the host prefix already covers
    /// them; this behaves like `Host`.
    Domain,
}

impl FromStr for MatchType {
    type Err = ShelflistError;

    fn from_str(s: &str) -> Result<MatchType, Self::Err> {
        match s {
            "exact" => Ok(MatchType::Exact),
            "prefix" => Ok(MatchType::Prefix),
            "host" => Ok(MatchType::Host),
            "domain" => Ok(MatchType::Domain),
            other => Err(ShelflistError::InvalidParam(format!(
                "unknown match type {other:?}"
            ))),
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MatchType::Exact => "exact",
            MatchType::Prefix => "prefix",
            MatchType::Host => "host",
            MatchType::Domain => "domain",
        })
    }
}

/// A resolved search key: the (possibly truncated) SURT plus the predicate
/// family it is compared under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchKey {
    pub key: String,
    pub prefix: bool,
}

impl SearchKey {
    pub fn new(key: impl Into<String>, match_type: MatchType) -> SearchKey {
        let key = key.into();

        match match_type {
            MatchType::Exact => SearchKey { key, prefix: false },
            MatchType::Prefix => SearchKey { key, prefix: true },
            MatchType::Host | MatchType::Domain => match key.find(')') {
                Some(pos) => SearchKey {
                    key: key[..=pos].to_owned(),
                    prefix: true,
                },
                None => SearchKey { key, prefix: true },
            },
        }
    }

    /// Does a record's SURT satisfy this key?
    pub fn matches(&self, line_key: &[u8]) -> bool {
        if self.prefix {
            line_key.starts_with(self.key.as_bytes())
        } else {
            line_key == self.key.as_bytes()
        }
    }

    /// Is a record's SURT sorted past every possible match? Used to cut
    /// forward scans short.
    pub fn passed(&self, line_key: &[u8]) -> bool {
        !self.matches(line_key) && line_key > self.key.as_bytes()
    }
}

/// Search one file, dispatching on its detected kind. A bare data shard is
/// searched through its paired index.
pub fn search_file(path: &Path, key: &SearchKey) -> ShelflistResult<Vec<Vec<u8>>> {
    match detect_file_kind(path) {
        FileKind::FlatCdxj => search_flat_file(path, key),
        FileKind::ZipnumIndex => search_zipnum_index(path, key),
        FileKind::ZipnumData => {
            let idx = zipnum_index_for_data(path).ok_or_else(|| {
                ShelflistError::MissingFile(format!(
                    "no .idx alongside data shard {}",
                    path.display()
                ))
            })?;
            search_zipnum_index(&idx, key)
        }
    }
}

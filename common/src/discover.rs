use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use glob::Pattern;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::{ShelflistError, ShelflistResult};

/// Extensions accepted when recursing into a directory. Explicitly named
/// files are always taken as-is.
const INDEX_EXTENSIONS: [&str; 3] = [".cdxj", ".idx", ".cdxj.gz"];

/// What a discovered path holds, judged by its extension suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// A flat sorted CDXJ file (also the best-effort fallback).
    FlatCdxj,
    /// A ZipNum secondary index (`.idx`).
    ZipnumIndex,
    /// A ZipNum compressed data shard (`.cdxj.gz`).
    ZipnumData,
}

pub fn detect_file_kind(path: &Path) -> FileKind {
    let name = path.to_string_lossy();

    if name.ends_with(".idx") {
        FileKind::ZipnumIndex
    } else if name.ends_with(".cdxj.gz") {
        FileKind::ZipnumData
    } else {
        FileKind::FlatCdxj
    }
}

/// Compile `--exclude` glob patterns. A pattern that does not parse is fatal.
pub fn compile_excludes(patterns: &[String]) -> ShelflistResult<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p)
                .map_err(|e| ShelflistError::InvalidParam(format!("exclude pattern {p:?}: {e}")))
        })
        .collect()
}

fn is_excluded(path: &Path, excludes: &[Pattern]) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
        return false;
    };

    for pattern in excludes {
        if pattern.matches(&name) {
            debug!("excluding {} (matches {})", name, pattern);
            return true;
        }
    }

    false
}

fn has_index_extension(path: &Path) -> bool {
    let name = path.to_string_lossy();
    INDEX_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// Expand files, directories, and glob patterns into a deduplicated, sorted
/// file list. Directories are recursed with the extension filter; exclusion
/// patterns are matched against basenames only.
pub fn discover_files(patterns: &[String], excludes: &[Pattern]) -> ShelflistResult<Vec<PathBuf>> {
    let mut found = BTreeSet::new();

    for pattern in patterns {
        let path = Path::new(pattern);

        if path.is_dir() {
            debug!("scanning directory {}", path.display());

            for entry in WalkDir::new(path) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("skipping unreadable entry under {}: {e}", path.display());
                        continue;
                    }
                };

                if entry.file_type().is_file()
                    && has_index_extension(entry.path())
                    && !is_excluded(entry.path(), excludes)
                {
                    found.insert(absolute(entry.path()));
                }
            }
        } else if path.is_file() {
            if !is_excluded(path, excludes) {
                found.insert(absolute(path));
            }
        } else {
            match glob::glob(pattern) {
                Ok(matches) => {
                    let mut matched_any = false;
                    for hit in matches.flatten() {
                        if hit.is_file() && !is_excluded(&hit, excludes) {
                            found.insert(absolute(&hit));
                            matched_any = true;
                        }
                    }
                    if !matched_any {
                        warn!("pattern {pattern:?} matched no files");
                    }
                }
                Err(e) => warn!("pattern {pattern:?} is not a valid glob: {e}"),
            }
        }
    }

    Ok(found.into_iter().collect())
}

fn absolute(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Default data shard for an index: `P.idx` pairs with `P.cdxj.gz`.
pub fn zipnum_data_for_index(idx: &Path) -> Option<PathBuf> {
    let paired = replace_suffix(idx, ".idx", ".cdxj.gz")?;
    paired.is_file().then_some(paired)
}

/// Default index for a data shard: `P.cdxj.gz` pairs with `P.idx`.
pub fn zipnum_index_for_data(data: &Path) -> Option<PathBuf> {
    let paired = replace_suffix(data, ".cdxj.gz", ".idx")?;
    paired.is_file().then_some(paired)
}

/// A `.loc` sitting alongside `P.idx` overrides default shard pairing.
pub fn loc_for_index(idx: &Path) -> Option<PathBuf> {
    let paired = replace_suffix(idx, ".idx", ".loc")?;
    paired.is_file().then_some(paired)
}

fn replace_suffix(path: &Path, suffix: &str, replacement: &str) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(suffix)?;
    Some(path.with_file_name(format!("{stem}{replacement}")))
}

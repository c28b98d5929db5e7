use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use flate2::read::{GzDecoder, MultiGzDecoder};
use itertools::Itertools;
use tracing::{debug, info, warn};

use shelflist_common::{CancelFlag, ShelflistError, ShelflistResult};

use super::{read_idx, IdxEntry, LocMap};

#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Directory shard paths are resolved against.
    pub base_dir: PathBuf,
    /// Explicit `.loc` path; `None` means no mapping (default shard paths).
    pub loc: Option<PathBuf>,
    /// Parallel decompression workers.
    pub workers: usize,
}

#[derive(Debug, Default)]
pub struct DecodeSummary {
    pub shards: u64,
    pub chunks: u64,
    pub bytes: u64,
}

struct InflateJob {
    data: Vec<u8>,
    done: Sender<io::Result<Vec<u8>>>,
}

struct PendingBlock {
    done: Receiver<io::Result<Vec<u8>>>,
    shard: String,
    offset: u64,
}

/// Restore the flat CDXJ stream from a ZipNum dataset. Output is written to
/// `sink` strictly in shard order and, within a shard, in chunk order; the
/// result is byte-identical to what the encoder consumed.
pub fn decode_zipnum(
    idx: impl BufRead,
    opts: &DecodeOptions,
    sink: &mut impl Write,
    cancel: &CancelFlag,
) -> ShelflistResult<DecodeSummary> {
    let entries = read_idx(idx)?;
    if entries.is_empty() {
        warn!("idx holds no chunk entries; nothing to decode");
        return Ok(DecodeSummary::default());
    }

    let loc = match &opts.loc {
        Some(path) => LocMap::read(path)?,
        None => LocMap::default(),
    };

    let workers = opts.workers.max(1);
    let depth = workers * 2;
    let mut summary = DecodeSummary::default();

    thread::scope(|scope| -> ShelflistResult<()> {
        let (job_tx, job_rx) = bounded::<InflateJob>(depth);

        for _ in 0..workers {
            let job_rx = job_rx.clone();
            scope.spawn(move || {
                for job in job_rx {
                    let result = gunzip_member(&job.data);
                    let _ = job.done.send(result);
                }
            });
        }
        drop(job_rx);

        // idx rows arrive sorted, so grouping adjacent rows by shard keeps
        // both the shard order and the chunk order within each shard
        for (shard, group) in &entries.iter().group_by(|e| e.shard.as_str()) {
            cancel.check()?;

            let group: Vec<&IdxEntry> = group.collect();
            let path = loc.resolve(shard, &opts.base_dir);

            if !path.is_file() {
                return Err(ShelflistError::MissingFile(format!(
                    "shard {shard} (looked for {})",
                    path.display()
                )));
            }

            summary.shards += 1;
            summary.chunks += group.len() as u64;

            let mut file = File::open(&path)?;

            if covers_whole_file(&group, &file)? {
                debug!("decoding {} in one pass", path.display());
                summary.bytes +=
                    io::copy(&mut MultiGzDecoder::new(BufReader::new(file)), sink)?;
                continue;
            }

            // sparse or reordered coverage: decompress each referenced
            // range as an independent gzip member
            let mut pending: VecDeque<PendingBlock> = VecDeque::with_capacity(depth);

            for entry in group {
                cancel.check()?;

                let mut data = vec![0u8; entry.length as usize];
                file.seek(SeekFrom::Start(entry.offset))?;
                file.read_exact(&mut data).map_err(|e| bad_block(shard, entry.offset, e))?;

                let (done_tx, done_rx) = bounded(1);
                job_tx
                    .send(InflateJob {
                        data,
                        done: done_tx,
                    })
                    .map_err(|_| pool_gone())?;
                pending.push_back(PendingBlock {
                    done: done_rx,
                    shard: shard.to_owned(),
                    offset: entry.offset,
                });

                while pending.len() >= depth {
                    summary.bytes += drain_block(&mut pending, sink)?;
                }
            }

            while !pending.is_empty() {
                summary.bytes += drain_block(&mut pending, sink)?;
            }
        }

        Ok(())
    })?;

    sink.flush()?;
    info!(
        "decoded {} chunk(s) from {} shard(s), {} bytes",
        summary.chunks, summary.shards, summary.bytes
    );

    Ok(summary)
}

/// True when the entries reference the shard contiguously from offset zero
/// through its final byte, which lets the shard stream through a chained
/// gzip reader instead of per-range seeks.
fn covers_whole_file(entries: &[&IdxEntry], file: &File) -> io::Result<bool> {
    let mut expected = 0u64;

    for entry in entries {
        if entry.offset != expected {
            return Ok(false);
        }
        expected += entry.length;
    }

    Ok(expected == file.metadata()?.len())
}

fn gunzip_member(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 3);
    GzDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

fn drain_block(pending: &mut VecDeque<PendingBlock>, sink: &mut impl Write) -> ShelflistResult<u64> {
    let block = pending.pop_front().expect("pending block");
    let bytes = block
        .done
        .recv()
        .map_err(|_| pool_gone())?
        .map_err(|e| bad_block(&block.shard, block.offset, e))?;

    sink.write_all(&bytes)?;
    Ok(bytes.len() as u64)
}

fn bad_block(shard: &str, offset: u64, source: io::Error) -> ShelflistError {
    debug!("shard {shard} block at {offset}: {source}");
    ShelflistError::BadShard {
        shard: shard.to_owned(),
        offset,
    }
}

fn pool_gone() -> ShelflistError {
    ShelflistError::Io(io::Error::new(
        io::ErrorKind::Other,
        "decompression worker exited unexpectedly",
    ))
}

/// Convenience entry point: decode from an `.idx` path, resolving shards
/// against the idx's own directory unless overridden.
pub fn decode_zipnum_file(
    idx_path: &Path,
    opts: &DecodeOptions,
    sink: &mut impl Write,
    cancel: &CancelFlag,
) -> ShelflistResult<DecodeSummary> {
    let idx = BufReader::new(File::open(idx_path)?);
    decode_zipnum(idx, opts, sink, cancel)
}

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use flate2::{write::GzEncoder, Compression};
use tracing::{debug, info};

use shelflist_common::{key_prefix, CancelFlag, ShelflistError, ShelflistResult};

use super::{shard_name, IdxEntry, SHARD_SUFFIX};

/// `.idx` rows are buffered and written in batches to keep syscalls down.
const IDX_BATCH: usize = 100;

const SHARD_WRITE_BUFFER: usize = 64 * 1024;

/// Encoder parameters. `shard_size` is a soft target: the chunk that crosses
/// it stays in the shard it was appended to, so shards are bounded above by
/// `shard_size + max_compressed_chunk_size`.
#[derive(Debug, Clone)]
pub struct ZipNumParams {
    /// Lines per compressed chunk.
    pub chunk_size: usize,
    /// Target shard size in bytes. `u64::MAX` keeps everything in one shard.
    pub shard_size: u64,
    /// Gzip level, 1..=9.
    pub compress_level: u32,
    /// Parallel compression workers.
    pub workers: usize,
    /// Base name for shards and the default `.idx`/`.loc` names.
    pub base: String,
    /// Override for the `.idx` filename inside the output directory.
    pub idx_name: Option<String>,
    /// Override for the `.loc` filename inside the output directory.
    pub loc_name: Option<String>,
}

impl Default for ZipNumParams {
    fn default() -> ZipNumParams {
        ZipNumParams {
            chunk_size: 3000,
            shard_size: 100 * 1024 * 1024,
            compress_level: 6,
            workers: 4,
            base: String::from("index"),
            idx_name: None,
            loc_name: None,
        }
    }
}

impl ZipNumParams {
    fn validate(&self) -> ShelflistResult<()> {
        if self.chunk_size == 0 {
            return Err(ShelflistError::InvalidParam("chunk_size must be positive".into()));
        }
        if !(1..=9).contains(&self.compress_level) {
            return Err(ShelflistError::InvalidParam(format!(
                "compress_level {} outside 1..=9",
                self.compress_level
            )));
        }
        if self.workers == 0 {
            return Err(ShelflistError::InvalidParam("workers must be positive".into()));
        }
        if self.shard_size == 0 {
            return Err(ShelflistError::InvalidParam("shard_size must be positive".into()));
        }
        if self.base.is_empty() {
            return Err(ShelflistError::InvalidParam("base name must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct EncodeSummary {
    pub lines: u64,
    pub chunks: u64,
    pub shards: Vec<PathBuf>,
    pub idx_path: PathBuf,
    pub loc_path: PathBuf,
}

struct CompressJob {
    data: Vec<u8>,
    done: Sender<io::Result<Vec<u8>>>,
}

/// One chunk handed to the compression pool, awaiting its compressed bytes.
/// Completions are drained strictly in submission order so on-disk chunk
/// order equals input order.
struct PendingChunk {
    done: Receiver<io::Result<Vec<u8>>>,
    first_key: String,
}

/// Rewrite a sorted CDXJ stream into compressed shards plus the `.idx` and
/// `.loc` files that make them searchable.
pub fn write_zipnum(
    mut input: impl BufRead,
    out_dir: &Path,
    params: &ZipNumParams,
    cancel: &CancelFlag,
) -> ShelflistResult<EncodeSummary> {
    params.validate()?;
    fs::create_dir_all(out_dir)?;

    let idx_path = out_dir.join(
        params
            .idx_name
            .clone()
            .unwrap_or_else(|| format!("{}.idx", params.base)),
    );
    let loc_path = out_dir.join(
        params
            .loc_name
            .clone()
            .unwrap_or_else(|| format!("{}.loc", params.base)),
    );

    let mut idx_out = BufWriter::with_capacity(SHARD_WRITE_BUFFER, File::create(&idx_path)?);
    let mut idx_buffer: Vec<String> = Vec::with_capacity(IDX_BATCH);
    let mut shards = ShardSet::create(out_dir, &params.base, params.shard_size)?;

    let depth = params.workers * 2;
    let mut lines = 0u64;
    let mut chunks = 0u64;

    thread::scope(|scope| -> ShelflistResult<()> {
        let (job_tx, job_rx) = bounded::<CompressJob>(depth);

        for _ in 0..params.workers {
            let job_rx = job_rx.clone();
            let level = params.compress_level;

            scope.spawn(move || {
                for job in job_rx {
                    let result = gzip_chunk(&job.data, level);
                    let _ = job.done.send(result);
                }
            });
        }
        drop(job_rx);

        let mut pending: VecDeque<PendingChunk> = VecDeque::with_capacity(depth);

        while let Some(chunk) = next_chunk(&mut input, params.chunk_size)? {
            cancel.check()?;

            lines += chunk.lines;
            chunks += 1;

            let (done_tx, done_rx) = bounded(1);
            job_tx
                .send(CompressJob {
                    data: chunk.data,
                    done: done_tx,
                })
                .map_err(|_| pool_gone())?;
            pending.push_back(PendingChunk {
                done: done_rx,
                first_key: chunk.first_key,
            });

            // keep in-flight depth bounded, and opportunistically drain
            // whatever has already finished at the front of the queue
            while pending.len() > depth
                || pending.front().is_some_and(|c| !c.done.is_empty())
            {
                let chunk = pending.pop_front().unwrap();
                drain_chunk(chunk, &mut shards, &mut idx_buffer, &mut idx_out)?;
            }
        }

        drop(job_tx);

        while let Some(chunk) = pending.pop_front() {
            cancel.check()?;
            drain_chunk(chunk, &mut shards, &mut idx_buffer, &mut idx_out)?;
        }

        Ok(())
    })?;

    flush_idx(&mut idx_buffer, &mut idx_out)?;
    idx_out.flush()?;

    let shard_files = shards.finish()?;

    let mut loc_out = BufWriter::new(File::create(&loc_path)?);
    for shard in &shard_files {
        loc_out.write_all(format!("{}\t{}\n", shard.name, shard.file_name).as_bytes())?;
    }
    loc_out.flush()?;

    let shard_paths: Vec<PathBuf> = shard_files
        .iter()
        .map(|s| out_dir.join(&s.file_name))
        .collect();

    info!(
        "wrote {chunks} chunks ({lines} lines) across {} shard(s), idx: {}, loc: {}",
        shard_paths.len(),
        idx_path.display(),
        loc_path.display()
    );

    Ok(EncodeSummary {
        lines,
        chunks,
        shards: shard_paths,
        idx_path,
        loc_path,
    })
}

struct Chunk {
    data: Vec<u8>,
    first_key: String,
    lines: u64,
}

/// Accumulate up to `chunk_size` lines; the terminal chunk may be shorter.
fn next_chunk(input: &mut impl BufRead, chunk_size: usize) -> ShelflistResult<Option<Chunk>> {
    let mut data = Vec::new();
    let mut first_key = String::new();
    let mut lines = 0u64;

    while lines < chunk_size as u64 {
        let start = data.len();
        let n = input.read_until(b'\n', &mut data)?;
        if n == 0 {
            break;
        }

        if lines == 0 {
            first_key = String::from_utf8_lossy(key_prefix(&data[start..start + n])).into_owned();
        }
        lines += 1;
    }

    if lines == 0 {
        return Ok(None);
    }

    Ok(Some(Chunk {
        data,
        first_key,
        lines,
    }))
}

fn gzip_chunk(data: &[u8], level: u32) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(
        Vec::with_capacity(data.len() / 3 + 64),
        Compression::new(level),
    );
    encoder.write_all(data)?;
    encoder.finish()
}

fn drain_chunk(
    chunk: PendingChunk,
    shards: &mut ShardSet,
    idx_buffer: &mut Vec<String>,
    idx_out: &mut BufWriter<File>,
) -> ShelflistResult<()> {
    let blob = chunk.done.recv().map_err(|_| pool_gone())??;
    let placed = shards.append(&blob)?;

    idx_buffer.push(
        IdxEntry {
            key: chunk.first_key,
            shard: placed.shard,
            offset: placed.offset,
            length: blob.len() as u64,
            shard_num: placed.shard_num,
        }
        .to_line(),
    );

    if idx_buffer.len() >= IDX_BATCH {
        flush_idx(idx_buffer, idx_out)?;
    }

    if shards.is_full() {
        // whole rows only: the idx must never trail a closed shard
        flush_idx(idx_buffer, idx_out)?;
        shards.roll()?;
    }

    Ok(())
}

fn flush_idx(idx_buffer: &mut Vec<String>, idx_out: &mut BufWriter<File>) -> io::Result<()> {
    for row in idx_buffer.drain(..) {
        idx_out.write_all(row.as_bytes())?;
    }
    Ok(())
}

fn pool_gone() -> ShelflistError {
    ShelflistError::Io(io::Error::new(
        io::ErrorKind::Other,
        "compression worker exited unexpectedly",
    ))
}

struct PlacedChunk {
    shard: String,
    offset: u64,
    shard_num: u32,
}

struct ShardFile {
    name: String,
    file_name: String,
}

/// Owns the current shard file handle and the shard-boundary decision.
/// Appends and rolls are serialized on the caller, so offsets are exact.
struct ShardSet {
    out_dir: PathBuf,
    base: String,
    target: u64,
    out: BufWriter<File>,
    size: u64,
    shard_num: u32,
    created: Vec<ShardFile>,
}

impl ShardSet {
    fn create(out_dir: &Path, base: &str, target: u64) -> io::Result<ShardSet> {
        let mut created = Vec::new();
        let out = open_shard(out_dir, base, 1, &mut created)?;

        Ok(ShardSet {
            out_dir: out_dir.to_path_buf(),
            base: base.to_owned(),
            target,
            out,
            size: 0,
            shard_num: 1,
            created,
        })
    }

    fn append(&mut self, blob: &[u8]) -> io::Result<PlacedChunk> {
        let offset = self.size;
        self.out.write_all(blob)?;
        self.size += blob.len() as u64;

        Ok(PlacedChunk {
            shard: self.created.last().expect("shard open").name.clone(),
            offset,
            shard_num: self.shard_num,
        })
    }

    fn is_full(&self) -> bool {
        self.size >= self.target
    }

    fn roll(&mut self) -> io::Result<()> {
        self.out.flush()?;
        self.shard_num += 1;
        self.out = open_shard(&self.out_dir, &self.base, self.shard_num, &mut self.created)?;
        self.size = 0;

        debug!("opened shard {}", self.shard_num);
        Ok(())
    }

    /// Flush the final shard. When only one shard exists it is renamed from
    /// `base-01.cdx.gz` to `base.cdx.gz`; the `.loc` then maps the `base-01`
    /// name (already written into the idx rows) to the renamed file.
    fn finish(mut self) -> io::Result<Vec<ShardFile>> {
        self.out.flush()?;
        drop(self.out);

        if self.created.len() == 1 {
            let simple = format!("{}{SHARD_SUFFIX}", self.base);
            fs::rename(
                self.out_dir.join(&self.created[0].file_name),
                self.out_dir.join(&simple),
            )?;
            self.created[0].file_name = simple;
        }

        Ok(self.created)
    }
}

fn open_shard(
    out_dir: &Path,
    base: &str,
    shard_num: u32,
    created: &mut Vec<ShardFile>,
) -> io::Result<BufWriter<File>> {
    let name = shard_name(base, shard_num);
    let file_name = format!("{name}{SHARD_SUFFIX}");
    let file = File::create(out_dir.join(&file_name))?;

    created.push(ShardFile { name, file_name });
    Ok(BufWriter::with_capacity(SHARD_WRITE_BUFFER, file))
}

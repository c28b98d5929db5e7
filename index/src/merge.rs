use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use tracing::info;

use shelflist_common::{CancelFlag, ShelflistResult};

/// Per-source read buffer. Sources are consumed one line at a time, so a
/// large buffer keeps the syscall count down.
const SOURCE_BUFFER: usize = 64 * 1024;

/// How many lines to emit between cancellation checks.
const CANCEL_STRIDE: u64 = 4096;

/// A heap entry: the source's current line plus the source index. The `Ord`
/// impl is inverted so `BinaryHeap` (a max-heap) pops the smallest line, and
/// ties on identical lines go to the lower-indexed source.
struct PendingLine {
    line: Vec<u8>,
    source: usize,
}

impl PartialEq for PendingLine {
    fn eq(&self, other: &Self) -> bool {
        self.line == other.line && self.source == other.source
    }
}

impl Eq for PendingLine {}

impl PartialOrd for PendingLine {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingLine {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .line
            .cmp(&self.line)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Streaming K-way merge over sorted line sources.
///
/// At steady state the heap holds one line per non-exhausted source, so
/// memory stays at O(sources) lines regardless of input size. Sources are
/// not validated: an out-of-order line is emitted wherever its bytes land.
pub struct KwayMerger {
    sources: Vec<Box<dyn BufRead>>,
}

impl KwayMerger {
    pub fn new(sources: Vec<Box<dyn BufRead>>) -> KwayMerger {
        KwayMerger { sources }
    }

    /// Open a merge input, decompressing `.gz` sources transparently.
    pub fn open_source(path: &Path) -> ShelflistResult<Box<dyn BufRead>> {
        let file = File::open(path)?;

        if path.to_string_lossy().ends_with(".gz") {
            Ok(Box::new(BufReader::with_capacity(
                SOURCE_BUFFER,
                MultiGzDecoder::new(BufReader::new(file)),
            )))
        } else {
            Ok(Box::new(BufReader::with_capacity(SOURCE_BUFFER, file)))
        }
    }

    /// Drain all sources into `sink` in ascending line order. Returns the
    /// number of lines written.
    pub fn run(mut self, sink: &mut impl Write, cancel: &CancelFlag) -> ShelflistResult<u64> {
        let mut heap = BinaryHeap::with_capacity(self.sources.len());

        for (source, reader) in self.sources.iter_mut().enumerate() {
            if let Some(line) = read_line(reader)? {
                heap.push(PendingLine { line, source });
            }
        }

        let mut written = 0u64;

        while let Some(PendingLine { line, source }) = heap.pop() {
            sink.write_all(&line)?;
            written += 1;

            if written % CANCEL_STRIDE == 0 {
                cancel.check()?;
            }

            if let Some(line) = read_line(&mut self.sources[source])? {
                heap.push(PendingLine { line, source });
            }
        }

        sink.flush()?;
        info!("merge complete: {written} lines from {} sources", self.sources.len());

        Ok(written)
    }
}

/// Read one line including its terminator; a terminal line without `\n` is
/// returned as-is. `None` at end of source.
fn read_line(reader: &mut impl BufRead) -> ShelflistResult<Option<Vec<u8>>> {
    let mut line = Vec::new();
    let n = reader.read_until(b'\n', &mut line)?;
    Ok((n > 0).then_some(line))
}

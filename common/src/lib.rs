use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use thiserror::Error;

pub mod discover;
pub mod line;
pub mod surt;
pub mod timestamp;

pub use discover::*;
pub use line::*;
pub use surt::surt;

#[derive(Error, Debug)]
pub enum ShelflistError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("malformed record: {0}")]
    MalformedRecord(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    BadRegex(#[from] regex::Error),
    #[error("corrupt gzip member in {shard} at offset {offset}")]
    BadShard { shard: String, offset: u64 },
    #[error("cannot resolve file: {0}")]
    MissingFile(String),
    #[error("invalid parameter: {0}")]
    InvalidParam(String),
    #[error("interrupted")]
    Cancelled,
}

pub type ShelflistResult<T> = Result<T, ShelflistError>;

/// Cooperative cancellation shared between the CLI's signal handler and the
/// long-running encode/decode/merge loops, which poll it at chunk boundaries.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> CancelFlag {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn check(&self) -> ShelflistResult<()> {
        if self.is_cancelled() {
            Err(ShelflistError::Cancelled)
        } else {
            Ok(())
        }
    }
}

//! Parallel chunked copy of remote files into local storage.
//!
//! The [`CopyScheduler`] partitions a [`RemoteFile`](wsfs_remote_file::RemoteFile)
//! into fixed-size chunks and drains them with a bounded pool of workers,
//! each reading one chunk from the peer and writing it at the matching
//! offset of a [`DestinationStore`].

mod checksum;
mod progress;
mod scheduler;
mod store;
mod validation;

pub use checksum::{calculate_file_checksum, checksum_bytes};
pub use progress::{SpeedCalculator, TransferProgress};
pub use scheduler::{ChunkRange, CopyOptions, CopyReport, CopyScheduler, plan_chunks};
pub use store::{DestinationStore, LocalFileStore, MemoryStore, StoreFuture};
pub use validation::{destination_path, validate_file_name};

use wsfs_remote_file::RemoteFileError;

/// Default number of concurrent chunk workers.
pub const DEFAULT_WORKERS: usize = 4;

/// Default attempts per chunk (first try included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("store error: {0}")]
    Store(#[from] std::io::Error),

    #[error(transparent)]
    Remote(#[from] RemoteFileError),

    #[error("short read at offset {offset}: expected {expected} bytes, got {received}")]
    ShortRead {
        offset: u64,
        expected: u64,
        received: u64,
    },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid copy options: {0}")]
    InvalidOptions(String),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("worker failed: {0}")]
    Worker(String),
}

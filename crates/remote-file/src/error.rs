//! Error types for remote file access.

use std::time::Duration;

use wsfs_protocol::FileId;

use crate::session::SendError;

/// Errors produced while addressing a remote file.
#[derive(Debug, thiserror::Error)]
pub enum RemoteFileError {
    #[error("file not found: {0}")]
    NotFound(FileId),

    #[error("read of {length} bytes at offset {offset} exceeds file size {size}")]
    InvalidRange { offset: u64, length: u64, size: u64 },

    #[error("invalid offset {0}: cannot seek before start of file")]
    InvalidOffset(i128),

    #[error("a request at offset {0} is already pending")]
    DuplicateRequest(u64),

    #[error("session closed")]
    SessionClosed,

    #[error(transparent)]
    Send(#[from] SendError),

    #[error("no response for offset {offset} within {timeout:?}")]
    Timeout { offset: u64, timeout: Duration },

    #[error("cancelled")]
    Cancelled,
}

impl RemoteFileError {
    /// Returns `true` if repeating the same request may succeed.
    ///
    /// Only a timed-out request qualifies: the session is still up and the
    /// slot has been released, so the offset can be requested again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteFileError::Timeout { .. })
    }
}

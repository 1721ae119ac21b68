//! A file whose bytes live with a remote peer, read on demand.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use wsfs_protocol::constants::DEFAULT_REQUEST_TIMEOUT;
use wsfs_protocol::{FileAnnounce, FileId, ReadRequest};

use crate::RemoteFileError;
use crate::pending::PendingTable;
use crate::session::Session;

/// Reference point for [`RemoteFile::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// `delta` is an absolute offset.
    Start,
    /// `delta` is added to the cursor.
    Current,
    /// `delta` is subtracted from the file size.
    End,
}

/// Randomly-addressable view of a file held by a peer.
///
/// Every read turns into a `readRequest` sent over the peer's session and a
/// wait on the pending-request table until the matching `readResponse` is
/// [delivered](Self::deliver). Requests are correlated by offset only, so
/// at most one read per offset may be in flight at a time.
pub struct RemoteFile {
    id: FileId,
    name: String,
    size: u64,
    mime_type: Option<String>,
    last_modified: Option<i64>,
    session: Arc<dyn Session>,
    pending: PendingTable,
    cursor: AtomicU64,
    bytes_received: AtomicU64,
    request_timeout: Duration,
    cancel: CancellationToken,
}

impl RemoteFile {
    /// Creates a file with a freshly generated id.
    pub fn new(name: impl Into<String>, size: u64, session: Arc<dyn Session>) -> Self {
        Self {
            id: FileId::generate(),
            name: name.into(),
            size,
            mime_type: None,
            last_modified: None,
            session,
            pending: PendingTable::new(),
            cursor: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }

    /// Creates a file from a peer announcement.
    pub fn from_announce(announce: &FileAnnounce, session: Arc<dyn Session>) -> Self {
        let mut file = Self::new(announce.name.clone(), announce.size, session);
        file.mime_type = announce.mime_type.clone();
        file.last_modified = announce.last_modified;
        file
    }

    /// Sets how long a single chunk request may wait for its response.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Ties the file to an outer cancellation scope (typically the
    /// connection it was announced on).
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn id(&self) -> &FileId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn last_modified(&self) -> Option<i64> {
        self.last_modified
    }

    /// Current cursor used by [`read`](Self::read).
    pub fn position(&self) -> u64 {
        self.cursor.load(Ordering::Acquire)
    }

    /// Total payload bytes handed to readers so far.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Number of chunk requests currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` once the file has been abandoned or its scope cancelled.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.pending.is_closed()
    }

    /// Reads `buf.len()` bytes starting at `offset`.
    ///
    /// Returns `Ok(0)` at or past the end of the file. A range reaching past
    /// the end is rejected with [`RemoteFileError::InvalidRange`] before
    /// anything is sent. The cursor is not affected.
    pub async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, RemoteFileError> {
        if offset >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let length = buf.len() as u64;
        if offset
            .checked_add(length)
            .is_none_or(|end| end > self.size)
        {
            return Err(RemoteFileError::InvalidRange {
                offset,
                length,
                size: self.size,
            });
        }
        if self.cancel.is_cancelled() {
            return Err(RemoteFileError::Cancelled);
        }

        // Open the slot before sending so a fast response cannot race us.
        let mut slot = self.pending.open(offset)?;

        let request = ReadRequest {
            file_id: self.id.clone(),
            offset,
            length,
        };
        trace!(file_id = %self.id, offset, length, "requesting chunk");
        self.session.send_read_request(request).await?;

        let payload = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(RemoteFileError::Cancelled),
            result = tokio::time::timeout(self.request_timeout, slot.wait()) => match result {
                Ok(payload) => payload?,
                Err(_) => {
                    debug!(file_id = %self.id, offset, "chunk request timed out");
                    return Err(RemoteFileError::Timeout {
                        offset,
                        timeout: self.request_timeout,
                    });
                }
            },
        };
        drop(slot);

        let n = payload.len().min(buf.len());
        buf[..n].copy_from_slice(&payload[..n]);
        self.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
        if payload.len() != buf.len() {
            debug!(
                file_id = %self.id,
                offset,
                requested = buf.len(),
                received = payload.len(),
                "chunk size mismatch"
            );
        }
        Ok(n)
    }

    /// Reads from the cursor and advances it by the number of bytes read.
    ///
    /// Intended for a single sequential caller; the request is clamped to
    /// the bytes remaining in the file.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, RemoteFileError> {
        let pos = self.position();
        if pos >= self.size {
            return Ok(0);
        }
        let remaining = (self.size - pos).min(buf.len() as u64) as usize;
        let n = self.read_at(&mut buf[..remaining], pos).await?;
        self.cursor.store(pos + n as u64, Ordering::Release);
        Ok(n)
    }

    /// Moves the cursor.
    ///
    /// `End` subtracts `delta` from the size, so `seek(d, Whence::End)`
    /// lands on `size - d`. A negative result is rejected with
    /// [`RemoteFileError::InvalidOffset`] and leaves the cursor untouched.
    pub fn seek(&self, delta: i64, whence: Whence) -> Result<u64, RemoteFileError> {
        let base: i128 = match whence {
            Whence::Start => 0,
            Whence::Current => i128::from(self.position()),
            Whence::End => i128::from(self.size),
        };
        let target = match whence {
            Whence::End => base - i128::from(delta),
            Whence::Start | Whence::Current => base + i128::from(delta),
        };
        let pos = u64::try_from(target).map_err(|_| RemoteFileError::InvalidOffset(target))?;
        self.cursor.store(pos, Ordering::Release);
        Ok(pos)
    }

    /// Hands a peer's payload to the reader waiting at `offset`.
    ///
    /// Returns `false` if nobody was waiting; the payload is dropped.
    pub fn deliver(&self, offset: u64, payload: Vec<u8>) -> bool {
        let len = payload.len();
        let matched = self.pending.fulfil(offset, payload);
        if !matched {
            debug!(file_id = %self.id, offset, len, "dropping unmatched chunk response");
        }
        matched
    }

    /// Aborts every suspended read and refuses new ones.
    ///
    /// Called when the peer's connection goes away.
    pub fn abandon(&self) {
        self.cancel.cancel();
        let woken = self.pending.abandon_all();
        if woken > 0 {
            debug!(file_id = %self.id, woken, "abandoned pending chunk requests");
        }
    }
}

impl std::fmt::Debug for RemoteFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFile")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("size", &self.size)
            .field("position", &self.position())
            .field("pending", &self.pending_count())
            .finish()
    }
}

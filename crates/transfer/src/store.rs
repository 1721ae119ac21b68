//! Random-access destinations for reassembled files.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

/// A boxed future returned by store methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = io::Result<T>> + Send + 'a>>;

/// Destination that accepts positional writes.
///
/// Workers write disjoint ranges concurrently; implementations only need to
/// make each individual write atomic with respect to its own range.
pub trait DestinationStore: Send + Sync + 'static {
    /// Writes all of `data` at `offset`, returning the byte count.
    fn write_at(&self, data: Vec<u8>, offset: u64) -> StoreFuture<'_, usize>;

    /// Flushes and releases the destination.
    fn close(&self) -> StoreFuture<'_, ()>;
}

// ---------------------------------------------------------------------------
// LocalFileStore
// ---------------------------------------------------------------------------

/// A local file written with positional I/O on the blocking pool.
pub struct LocalFileStore {
    path: PathBuf,
    file: Arc<std::fs::File>,
}

impl LocalFileStore {
    /// Creates (or truncates) `path` and sizes it to `size` bytes.
    pub async fn create(path: &Path, size: u64) -> io::Result<Self> {
        let target = path.to_path_buf();
        let file = tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&target)?;
            file.set_len(size)?;
            Ok::<_, io::Error>(file)
        })
        .await
        .map_err(io::Error::other)??;

        debug!(path = %path.display(), size, "destination created");
        Ok(Self {
            path: path.to_path_buf(),
            file: Arc::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DestinationStore for LocalFileStore {
    fn write_at(&self, data: Vec<u8>, offset: u64) -> StoreFuture<'_, usize> {
        let file = Arc::clone(&self.file);
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                write_all_at(&file, &data, offset)?;
                Ok::<_, io::Error>(data.len())
            })
            .await
            .map_err(io::Error::other)?
        })
    }

    fn close(&self) -> StoreFuture<'_, ()> {
        let file = Arc::clone(&self.file);
        Box::pin(async move {
            tokio::task::spawn_blocking(move || file.sync_all())
                .await
                .map_err(io::Error::other)?
        })
    }
}

#[cfg(unix)]
fn write_all_at(file: &std::fs::File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn write_all_at(file: &std::fs::File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut written = 0usize;
    while written < buf.len() {
        let n = file.seek_write(&buf[written..], offset + written as u64)?;
        if n == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
        written += n;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory destination, grown on demand.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    data: Vec<u8>,
    closed: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the bytes written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .data
            .clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }
}

impl DestinationStore for MemoryStore {
    fn write_at(&self, data: Vec<u8>, offset: u64) -> StoreFuture<'_, usize> {
        let result = (|| {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if inner.closed {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "store closed"));
            }
            let start = usize::try_from(offset).map_err(io::Error::other)?;
            let end = start + data.len();
            if inner.data.len() < end {
                inner.data.resize(end, 0);
            }
            inner.data[start..end].copy_from_slice(&data);
            Ok(data.len())
        })();
        Box::pin(async move { result })
    }

    fn close(&self) -> StoreFuture<'_, ()> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed = true;
        Box::pin(async { Ok(()) })
    }
}

//! Parallel chunked copy from a remote file into a destination store.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wsfs_protocol::constants::DEFAULT_CHUNK_SIZE;
use wsfs_remote_file::RemoteFile;

use crate::progress::TransferProgress;
use crate::store::DestinationStore;
use crate::{DEFAULT_MAX_ATTEMPTS, DEFAULT_WORKERS, TransferError};

/// Tuning knobs for a copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOptions {
    /// Bytes requested per chunk.
    pub chunk_size: u64,
    /// Concurrent chunk workers.
    pub workers: usize,
    /// Attempts per chunk, first try included.
    pub max_attempts: u32,
    /// Base delay before a retry; multiplied by the attempt number.
    pub retry_backoff: Duration,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers: DEFAULT_WORKERS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

impl CopyOptions {
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.chunk_size == 0 {
            return Err(TransferError::InvalidOptions(
                "chunk_size must be greater than zero".into(),
            ));
        }
        if usize::try_from(self.chunk_size).is_err() {
            return Err(TransferError::InvalidOptions(format!(
                "chunk_size {} does not fit in memory",
                self.chunk_size
            )));
        }
        if self.workers == 0 {
            return Err(TransferError::InvalidOptions(
                "workers must be greater than zero".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(TransferError::InvalidOptions(
                "max_attempts must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// One unit of copy work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub index: usize,
    pub offset: u64,
    pub length: u64,
}

/// Splits `[0, size)` into consecutive chunks of `chunk_size` bytes; the
/// last one holds the remainder.
///
/// Returns no chunks for an empty file or a zero chunk size.
pub fn plan_chunks(size: u64, chunk_size: u64) -> Vec<ChunkRange> {
    if size == 0 || chunk_size == 0 {
        return Vec::new();
    }
    let count = size.div_ceil(chunk_size);
    (0..count)
        .map(|i| {
            let offset = i * chunk_size;
            ChunkRange {
                index: i as usize,
                offset,
                length: chunk_size.min(size - offset),
            }
        })
        .collect()
}

/// Outcome of a successful copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyReport {
    pub bytes_copied: u64,
    pub chunks: usize,
    pub elapsed: Duration,
}

/// Drains a file's chunks through a bounded pool of workers.
pub struct CopyScheduler {
    options: CopyOptions,
    progress: Option<Arc<TransferProgress>>,
    cancel: CancellationToken,
}

impl CopyScheduler {
    pub fn new(options: CopyOptions) -> Self {
        Self {
            options,
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Reports every finished chunk to `progress`.
    pub fn with_progress(mut self, progress: Arc<TransferProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Stops the copy when `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &CopyOptions {
        &self.options
    }

    /// Copies all of `file` into `store`, each chunk landing at its own
    /// offset.
    ///
    /// The store is closed on every path. After the first failed chunk no
    /// new chunks are started; chunks already in flight are allowed to
    /// finish and the first error is returned.
    pub async fn copy_to_store(
        &self,
        file: Arc<RemoteFile>,
        store: Arc<dyn DestinationStore>,
    ) -> Result<CopyReport, TransferError> {
        self.options.validate()?;

        let started = Instant::now();
        let chunks = plan_chunks(file.size(), self.options.chunk_size);
        let total = chunks.len();
        info!(
            file_id = %file.id(),
            name = file.name(),
            size = file.size(),
            chunks = total,
            workers = self.options.workers.min(total),
            "copy started"
        );

        let outcome = self.run_workers(&file, &store, chunks).await;
        let closed = store.close().await;

        match outcome {
            Ok(bytes_copied) => {
                closed?;
                let report = CopyReport {
                    bytes_copied,
                    chunks: total,
                    elapsed: started.elapsed(),
                };
                info!(
                    file_id = %file.id(),
                    bytes = report.bytes_copied,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "copy finished"
                );
                Ok(report)
            }
            Err(e) => {
                if let Err(close_err) = closed {
                    warn!(file_id = %file.id(), error = %close_err, "failed to close destination");
                }
                warn!(file_id = %file.id(), error = %e, "copy failed");
                Err(e)
            }
        }
    }

    async fn run_workers(
        &self,
        file: &Arc<RemoteFile>,
        store: &Arc<dyn DestinationStore>,
        chunks: Vec<ChunkRange>,
    ) -> Result<u64, TransferError> {
        let total = chunks.len();
        if total == 0 {
            return Ok(0);
        }

        let (results_tx, mut results_rx) = mpsc::channel(total);
        let shared = Arc::new(WorkerShared {
            file: Arc::clone(file),
            store: Arc::clone(store),
            options: self.options.clone(),
            progress: self.progress.clone(),
            cancel: self.cancel.clone(),
            queue: Mutex::new(VecDeque::from(chunks)),
            failed: AtomicBool::new(false),
        });

        let mut workers = JoinSet::new();
        for worker in 0..self.options.workers.min(total) {
            workers.spawn(run_worker(worker, Arc::clone(&shared), results_tx.clone()));
        }
        drop(results_tx);

        let mut bytes_copied = 0u64;
        let mut completed = 0usize;
        let mut first_error = None;
        while let Some(result) = results_rx.recv().await {
            match result {
                Ok(written) => {
                    bytes_copied += written;
                    completed += 1;
                }
                Err(e) => {
                    shared.failed.store(true, Ordering::Release);
                    first_error.get_or_insert(e);
                }
            }
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                shared.failed.store(true, Ordering::Release);
                first_error.get_or_insert(TransferError::Worker(e.to_string()));
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        if completed < total {
            return Err(TransferError::Cancelled);
        }
        Ok(bytes_copied)
    }
}

struct WorkerShared {
    file: Arc<RemoteFile>,
    store: Arc<dyn DestinationStore>,
    options: CopyOptions,
    progress: Option<Arc<TransferProgress>>,
    cancel: CancellationToken,
    queue: Mutex<VecDeque<ChunkRange>>,
    failed: AtomicBool,
}

impl WorkerShared {
    fn next_chunk(&self) -> Option<ChunkRange> {
        if self.failed.load(Ordering::Acquire) || self.cancel.is_cancelled() {
            return None;
        }
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

async fn run_worker(
    worker: usize,
    shared: Arc<WorkerShared>,
    results: mpsc::Sender<Result<u64, TransferError>>,
) {
    while let Some(chunk) = shared.next_chunk() {
        let result = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => Err(TransferError::Cancelled),
            result = copy_chunk(&shared, chunk) => result,
        };

        match &result {
            Ok(written) => {
                if let Some(progress) = &shared.progress {
                    progress.record_chunk(*written);
                }
            }
            Err(e) => {
                debug!(worker, index = chunk.index, offset = chunk.offset, error = %e, "chunk failed");
                shared.failed.store(true, Ordering::Release);
            }
        }

        if results.send(result).await.is_err() {
            break;
        }
    }
    debug!(worker, "worker done");
}

async fn copy_chunk(shared: &WorkerShared, chunk: ChunkRange) -> Result<u64, TransferError> {
    let len = usize::try_from(chunk.length).map_err(|_| {
        TransferError::InvalidOptions(format!("chunk of {} bytes does not fit", chunk.length))
    })?;
    let mut buf = vec![0u8; len];

    let mut attempt = 1u32;
    let received = loop {
        match shared.file.read_at(&mut buf, chunk.offset).await {
            Ok(n) => break n,
            Err(e) if e.is_retryable() && attempt < shared.options.max_attempts => {
                warn!(
                    file_id = %shared.file.id(),
                    offset = chunk.offset,
                    attempt,
                    error = %e,
                    "chunk read failed, retrying"
                );
                tokio::time::sleep(shared.options.retry_backoff * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    };

    if received < len {
        return Err(TransferError::ShortRead {
            offset: chunk.offset,
            expected: chunk.length,
            received: received as u64,
        });
    }

    let written = shared.store.write_at(buf, chunk.offset).await?;
    Ok(written as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{calculate_file_checksum, checksum_bytes};
    use crate::store::{LocalFileStore, MemoryStore, StoreFuture};
    use std::io;
    use wsfs_protocol::ReadRequest;
    use wsfs_remote_file::{RemoteFileError, SendError, SendFuture, Session};

    struct ChannelSession {
        tx: mpsc::UnboundedSender<ReadRequest>,
    }

    impl Session for ChannelSession {
        fn send_read_request(&self, request: ReadRequest) -> SendFuture<'_> {
            let result = self.tx.send(request).map_err(|_| SendError);
            Box::pin(async move { result })
        }
    }

    type Requests = Arc<Mutex<Vec<ReadRequest>>>;

    /// Builds a file backed by a fake peer. `answer` decides the payload
    /// for each request; `None` leaves it unanswered.
    fn remote_file<F>(size: u64, timeout: Duration, mut answer: F) -> (Arc<RemoteFile>, Requests)
    where
        F: FnMut(&ReadRequest) -> Option<Vec<u8>> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<ReadRequest>();
        let file = Arc::new(
            RemoteFile::new("data.bin", size, Arc::new(ChannelSession { tx }))
                .with_request_timeout(timeout),
        );
        let requests: Requests = Arc::default();

        let peer_file = Arc::clone(&file);
        let seen = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                seen.lock().unwrap().push(req.clone());
                if let Some(payload) = answer(&req) {
                    peer_file.deliver(req.offset, payload);
                }
            }
        });
        (file, requests)
    }

    fn serve(data: Vec<u8>) -> impl FnMut(&ReadRequest) -> Option<Vec<u8>> + Send + 'static {
        move |req| {
            let start = req.offset as usize;
            let end = start + req.length as usize;
            Some(data[start..end].to_vec())
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn options(chunk_size: u64, workers: usize) -> CopyOptions {
        CopyOptions {
            chunk_size,
            workers,
            ..CopyOptions::default()
        }
    }

    /// Store that fails every write at one offset.
    struct FailingStore {
        inner: MemoryStore,
        fail_at: u64,
    }

    impl DestinationStore for FailingStore {
        fn write_at(&self, data: Vec<u8>, offset: u64) -> StoreFuture<'_, usize> {
            if offset == self.fail_at {
                return Box::pin(async { Err(io::Error::other("disk full")) });
            }
            self.inner.write_at(data, offset)
        }

        fn close(&self) -> StoreFuture<'_, ()> {
            self.inner.close()
        }
    }

    #[test]
    fn plan_even_split() {
        let chunks = plan_chunks(1_048_576, 262_144);
        let offsets: Vec<u64> = chunks.iter().map(|c| c.offset).collect();
        assert_eq!(offsets, vec![0, 262_144, 524_288, 786_432]);
        assert!(chunks.iter().all(|c| c.length == 262_144));
    }

    #[test]
    fn plan_remainder_chunk() {
        let lengths: Vec<u64> = plan_chunks(10, 3).iter().map(|c| c.length).collect();
        assert_eq!(lengths, vec![3, 3, 3, 1]);
    }

    #[test]
    fn plan_covers_range_exactly() {
        for (size, chunk) in [(1u64, 1u64), (7, 2), (100, 7), (4096, 4096), (4097, 4096), (5, 10)] {
            let chunks = plan_chunks(size, chunk);
            let mut expected = 0;
            for (i, c) in chunks.iter().enumerate() {
                assert_eq!(c.index, i);
                assert_eq!(c.offset, expected);
                assert!(c.length > 0 && c.length <= chunk);
                expected += c.length;
            }
            assert_eq!(expected, size, "size={size} chunk={chunk}");
        }
    }

    #[test]
    fn plan_empty_inputs() {
        assert!(plan_chunks(0, 10).is_empty());
        assert!(plan_chunks(10, 0).is_empty());
    }

    #[test]
    fn options_validation() {
        assert!(CopyOptions::default().validate().is_ok());
        for bad in [
            CopyOptions { chunk_size: 0, ..CopyOptions::default() },
            CopyOptions { workers: 0, ..CopyOptions::default() },
            CopyOptions { max_attempts: 0, ..CopyOptions::default() },
        ] {
            assert!(matches!(bad.validate(), Err(TransferError::InvalidOptions(_))));
        }
    }

    #[tokio::test]
    async fn copies_one_mebibyte_in_four_chunks() {
        let data = pattern(1_048_576);
        let (file, requests) = remote_file(1_048_576, Duration::from_secs(5), serve(data.clone()));
        let store = Arc::new(MemoryStore::new());

        let report = CopyScheduler::new(options(262_144, 4))
            .copy_to_store(file.clone(), store.clone())
            .await
            .unwrap();

        assert_eq!(report.bytes_copied, 1_048_576);
        assert_eq!(report.chunks, 4);
        assert_eq!(store.contents().len(), 1_048_576);
        assert_eq!(store.contents(), data);
        assert!(store.is_closed());
        assert_eq!(file.pending_count(), 0);

        let mut offsets: Vec<u64> = requests.lock().unwrap().iter().map(|r| r.offset).collect();
        offsets.sort_unstable();
        assert_eq!(offsets, vec![0, 262_144, 524_288, 786_432]);
        assert!(requests.lock().unwrap().iter().all(|r| r.length == 262_144));
    }

    #[tokio::test]
    async fn remainder_chunk_is_requested_exactly() {
        let (file, requests) = remote_file(10, Duration::from_secs(5), serve(b"0123456789".to_vec()));
        let store = Arc::new(MemoryStore::new());

        let report = CopyScheduler::new(options(3, 2))
            .copy_to_store(file, store.clone())
            .await
            .unwrap();

        assert_eq!(report.bytes_copied, 10);
        assert_eq!(store.contents(), b"0123456789");

        let mut seen: Vec<(u64, u64)> = requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| (r.offset, r.length))
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![(0, 3), (3, 3), (6, 3), (9, 1)]);
    }

    #[tokio::test]
    async fn out_of_order_responses_land_at_their_offsets() {
        let data = pattern(64 * 1024 + 17);
        let (tx, mut rx) = mpsc::unbounded_channel::<ReadRequest>();
        let file = Arc::new(RemoteFile::new(
            "data.bin",
            data.len() as u64,
            Arc::new(ChannelSession { tx }),
        ));

        // Answer in batches, newest first.
        let peer_file = Arc::clone(&file);
        let peer_data = data.clone();
        tokio::spawn(async move {
            let mut batch = Vec::new();
            while let Some(req) = rx.recv().await {
                batch.push(req);
                if batch.len() == 4 || rx.is_empty() {
                    tokio::task::yield_now().await;
                    for req in batch.drain(..).rev() {
                        let start = req.offset as usize;
                        let end = start + req.length as usize;
                        peer_file.deliver(req.offset, peer_data[start..end].to_vec());
                    }
                }
            }
        });

        let store = Arc::new(MemoryStore::new());
        CopyScheduler::new(options(4096, 4))
            .copy_to_store(file, store.clone())
            .await
            .unwrap();
        assert_eq!(checksum_bytes(&store.contents()), checksum_bytes(&data));
    }

    #[tokio::test]
    async fn unanswered_chunk_times_out_without_corrupting_others() {
        tokio::time::pause();

        let data = pattern(1_048_576);
        let mut serve_all = serve(data.clone());
        let (file, _requests) = remote_file(1_048_576, Duration::from_secs(5), move |req| {
            if req.offset == 262_144 { None } else { serve_all(req) }
        });
        let store = Arc::new(MemoryStore::new());

        let opts = CopyOptions {
            max_attempts: 1,
            ..options(262_144, 4)
        };
        let err = CopyScheduler::new(opts)
            .copy_to_store(file.clone(), store.clone())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TransferError::Remote(RemoteFileError::Timeout { offset: 262_144, .. })
        ));
        assert!(store.is_closed());
        assert_eq!(file.pending_count(), 0);

        let contents = store.contents();
        assert_eq!(&contents[..262_144], &data[..262_144]);
        assert!(contents[262_144..524_288].iter().all(|b| *b == 0));
        assert_eq!(&contents[524_288..], &data[524_288..]);
    }

    #[tokio::test]
    async fn timed_out_chunk_is_retried() {
        tokio::time::pause();

        let mut ignored_once = false;
        let mut serve_all = serve(b"0123456789".to_vec());
        let (file, requests) = remote_file(10, Duration::from_secs(5), move |req| {
            if req.offset == 3 && !ignored_once {
                ignored_once = true;
                return None;
            }
            serve_all(req)
        });
        let store = Arc::new(MemoryStore::new());

        let opts = CopyOptions {
            max_attempts: 2,
            ..options(3, 2)
        };
        let report = CopyScheduler::new(opts)
            .copy_to_store(file, store.clone())
            .await
            .unwrap();

        assert_eq!(report.bytes_copied, 10);
        assert_eq!(store.contents(), b"0123456789");
        let retries = requests.lock().unwrap().iter().filter(|r| r.offset == 3).count();
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn short_payload_is_rejected() {
        let (file, _requests) = remote_file(10, Duration::from_secs(5), |req| {
            Some(vec![b'x'; req.length as usize - 1])
        });
        let store = Arc::new(MemoryStore::new());

        let err = CopyScheduler::new(options(5, 1))
            .copy_to_store(file, store.clone())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::ShortRead {
                offset: 0,
                expected: 5,
                received: 4
            }
        ));
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn store_failure_stops_new_chunks() {
        let (file, requests) = remote_file(12, Duration::from_secs(5), serve(pattern(12)));
        let store = Arc::new(FailingStore {
            inner: MemoryStore::new(),
            fail_at: 0,
        });

        let err = CopyScheduler::new(options(3, 1))
            .copy_to_store(file, store.clone())
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Store(_)));
        assert!(store.inner.is_closed());
        // A single worker never picks up a job after the failure.
        assert_eq!(requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_file_copies_nothing() {
        let (file, requests) = remote_file(0, Duration::from_secs(5), |_| None);
        let store = Arc::new(MemoryStore::new());

        let report = CopyScheduler::new(CopyOptions::default())
            .copy_to_store(file, store.clone())
            .await
            .unwrap();

        assert_eq!(report.bytes_copied, 0);
        assert_eq!(report.chunks, 0);
        assert!(store.is_closed());
        assert!(requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_options_fail_before_any_request() {
        let (file, requests) = remote_file(10, Duration::from_secs(5), |_| None);
        let store = Arc::new(MemoryStore::new());

        let err = CopyScheduler::new(options(0, 4))
            .copy_to_store(file, store)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidOptions(_)));
        assert!(requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancellation_aborts_inflight_reads() {
        let (file, _requests) = remote_file(10, Duration::from_secs(60), |_| None);
        let store = Arc::new(MemoryStore::new());
        let cancel = CancellationToken::new();

        let copy = {
            let file = Arc::clone(&file);
            let store = Arc::clone(&store);
            let scheduler = CopyScheduler::new(options(5, 2)).with_cancel(cancel.clone());
            tokio::spawn(async move { scheduler.copy_to_store(file, store).await })
        };

        while file.pending_count() < 2 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        cancel.cancel();

        let err = copy.await.unwrap().unwrap_err();
        assert!(matches!(err, TransferError::Cancelled));
        assert!(store.is_closed());
        assert_eq!(file.pending_count(), 0);
    }

    #[tokio::test]
    async fn progress_tracks_every_chunk() {
        let (file, _requests) = remote_file(10, Duration::from_secs(5), serve(pattern(10)));
        let progress = Arc::new(TransferProgress::new(10));

        CopyScheduler::new(options(3, 3))
            .with_progress(Arc::clone(&progress))
            .copy_to_store(file, Arc::new(MemoryStore::new()))
            .await
            .unwrap();

        assert_eq!(progress.bytes_done(), 10);
        assert_eq!(progress.chunks_done(), 4);
        assert_eq!(progress.percentage(), 100.0);
    }

    #[tokio::test]
    async fn local_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("copy.bin");
        let data = pattern(300_000);
        let (file, _requests) =
            remote_file(data.len() as u64, Duration::from_secs(5), serve(data.clone()));

        let store = Arc::new(LocalFileStore::create(&path, data.len() as u64).await.unwrap());
        let report = CopyScheduler::new(options(65_536, 4))
            .copy_to_store(file, store)
            .await
            .unwrap();

        assert_eq!(report.bytes_copied, 300_000);
        assert_eq!(report.chunks, 5);
        assert_eq!(std::fs::read(&path).unwrap(), data);
        assert_eq!(calculate_file_checksum(&path).unwrap(), checksum_bytes(&data));
    }
}

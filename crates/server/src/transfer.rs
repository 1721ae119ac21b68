//! Handler that reassembles announced files into a local directory.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wsfs_protocol::constants::DEFAULT_REQUEST_TIMEOUT;
use wsfs_protocol::{
    FileAccepted, FileAnnounce, FileId, ReadResponse, ServerMessage, TransferComplete,
    TransferFailed,
};
use wsfs_remote_file::{FileRegistry, RemoteFile};
use wsfs_transfer::{
    CopyOptions, CopyReport, CopyScheduler, LocalFileStore, TransferError, TransferProgress,
    calculate_file_checksum, destination_path,
};

use crate::connection::{ConnectionId, Sender};
use crate::handler::{Handler, HandlerFuture};

const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Where and how announced files are copied.
#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub output_dir: PathBuf,
    pub copy: CopyOptions,
    pub request_timeout: Duration,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            copy: CopyOptions::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Files announced on one connection, cancelled together.
#[derive(Default)]
struct ConnectionFiles {
    cancel: CancellationToken,
    files: Vec<FileId>,
}

/// Pulls every announced file back from its peer and writes it to
/// `output_dir`.
///
/// Files stay in the registry until their connection closes, at which
/// point any unfinished reads are abandoned and the copies fail.
pub struct TransferHandler {
    registry: Arc<FileRegistry>,
    settings: TransferSettings,
    connections: Mutex<HashMap<ConnectionId, ConnectionFiles>>,
    busy: Arc<Mutex<HashSet<PathBuf>>>,
}

impl TransferHandler {
    pub fn new(settings: TransferSettings) -> Self {
        Self::with_registry(settings, Arc::new(FileRegistry::new()))
    }

    pub fn with_registry(settings: TransferSettings, registry: Arc<FileRegistry>) -> Self {
        Self {
            registry,
            settings,
            connections: Mutex::new(HashMap::new()),
            busy: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn registry(&self) -> &Arc<FileRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    /// Records `file_id` under `conn` and returns the token its copy runs
    /// under.
    fn track(&self, conn: ConnectionId, file_id: FileId) -> CancellationToken {
        let mut connections = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = connections.entry(conn).or_default();
        entry.files.push(file_id);
        entry.cancel.child_token()
    }

    fn owns(&self, conn: ConnectionId, file_id: &FileId) -> bool {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&conn)
            .is_some_and(|entry| entry.files.contains(file_id))
    }

    /// Reserves `dest` for one copy at a time.
    fn claim(&self, dest: &Path) -> Option<DestinationLease> {
        let mut busy = self.busy.lock().unwrap_or_else(PoisonError::into_inner);
        if !busy.insert(dest.to_path_buf()) {
            return None;
        }
        Some(DestinationLease {
            busy: Arc::clone(&self.busy),
            path: dest.to_path_buf(),
        })
    }

    /// Registers the announced file and starts its copy.
    ///
    /// Never waits on the connection: replies go out from spawned tasks so
    /// the read pump keeps draining responses.
    fn accept_file(&self, conn: ConnectionId, sender: Sender, announce: FileAnnounce) {
        let claimed = destination_path(&self.settings.output_dir, &announce.name).and_then(|dest| {
            self.claim(&dest).map(|lease| (dest, lease)).ok_or_else(|| {
                TransferError::InvalidPath(format!("destination already in use: {}", announce.name))
            })
        });
        let (dest, lease) = match claimed {
            Ok(claimed) => claimed,
            Err(e) => {
                warn!(conn = %conn, name = %announce.name, "rejecting announced file: {e}");
                let reply = ServerMessage::TransferFailed(TransferFailed {
                    file_id: None,
                    name: announce.name,
                    error: e.to_string(),
                });
                tokio::spawn(async move {
                    if sender.send_msg(&reply).await.is_err() {
                        debug!(conn = %conn, "peer gone before rejection");
                    }
                });
                return;
            }
        };

        let session = Arc::new(sender.clone());
        let file = RemoteFile::from_announce(&announce, session)
            .with_request_timeout(self.settings.request_timeout);
        let cancel = self.track(conn, file.id().clone());
        let file = Arc::new(file.with_cancel_token(cancel.clone()));
        let file_id = self.registry.register(Arc::clone(&file));

        info!(
            conn = %conn,
            file_id = %file_id,
            name = %announce.name,
            size = announce.size,
            dest = %dest.display(),
            "file accepted"
        );

        let progress = Arc::new(TransferProgress::new(file.size()));
        let scheduler = CopyScheduler::new(self.settings.copy.clone())
            .with_cancel(cancel)
            .with_progress(Arc::clone(&progress));
        tokio::spawn(run_copy(
            file,
            Destination { path: dest, lease },
            scheduler,
            progress,
            sender,
        ));
    }
}

/// Keeps a destination path reserved until dropped.
struct DestinationLease {
    busy: Arc<Mutex<HashSet<PathBuf>>>,
    path: PathBuf,
}

impl Drop for DestinationLease {
    fn drop(&mut self) {
        self.busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.path);
    }
}

struct Destination {
    path: PathBuf,
    lease: DestinationLease,
}

impl Handler for TransferHandler {
    fn on_peer_connected(&self, conn: ConnectionId, _sender: Sender) -> HandlerFuture<'_> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(conn)
            .or_default();
        Box::pin(async {})
    }

    fn on_file_announce(
        &self,
        conn: ConnectionId,
        sender: Sender,
        announce: FileAnnounce,
    ) -> HandlerFuture<'_> {
        self.accept_file(conn, sender, announce);
        Box::pin(async {})
    }

    fn on_read_response(&self, conn: ConnectionId, response: ReadResponse) -> HandlerFuture<'_> {
        let ReadResponse {
            file_id,
            offset,
            data,
        } = response;

        match self.registry.lookup(&file_id) {
            Ok(_) if !self.owns(conn, &file_id) => {
                warn!(conn = %conn, file_id = %file_id, offset, "dropping response for a file announced elsewhere");
            }
            Ok(file) => {
                file.deliver(offset, data);
            }
            Err(e) => {
                warn!(conn = %conn, offset, "dropping read response: {e}");
            }
        }
        Box::pin(async {})
    }

    fn on_peer_disconnected(&self, conn: ConnectionId) -> HandlerFuture<'_> {
        let entry = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&conn);

        if let Some(entry) = entry {
            entry.cancel.cancel();
            for file_id in &entry.files {
                if let Some(file) = self.registry.remove(file_id) {
                    file.abandon();
                }
            }
            if !entry.files.is_empty() {
                debug!(conn = %conn, files = entry.files.len(), "released files of closed connection");
            }
        }
        Box::pin(async {})
    }
}

/// Acknowledges the file, copies it and reports the outcome to its peer.
async fn run_copy(
    file: Arc<RemoteFile>,
    dest: Destination,
    scheduler: CopyScheduler,
    progress: Arc<TransferProgress>,
    sender: Sender,
) {
    let accepted = ServerMessage::FileAccepted(FileAccepted {
        file_id: file.id().clone(),
        name: file.name().to_string(),
        size: file.size(),
    });
    if sender.send_msg(&accepted).await.is_err() {
        debug!(file_id = %file.id(), "peer gone before the file was accepted");
        return;
    }

    let Destination { path, lease } = dest;
    let outcome = copy_file(&file, &path, &scheduler, &progress).await;
    drop(lease);

    let reply = match outcome {
        Ok((report, sha256)) => {
            info!(
                file_id = %file.id(),
                bytes = report.bytes_copied,
                elapsed_ms = report.elapsed.as_millis() as u64,
                sha256 = %sha256,
                "transfer complete"
            );
            ServerMessage::TransferComplete(TransferComplete {
                file_id: file.id().clone(),
                bytes_copied: report.bytes_copied,
                sha256,
            })
        }
        Err(e) => {
            warn!(file_id = %file.id(), dest = %path.display(), "transfer failed: {e}");
            ServerMessage::TransferFailed(TransferFailed {
                file_id: Some(file.id().clone()),
                name: file.name().to_string(),
                error: e.to_string(),
            })
        }
    };

    if sender.send_msg(&reply).await.is_err() {
        debug!(file_id = %file.id(), kind = reply.kind(), "peer gone before transfer result");
    }
}

async fn copy_file(
    file: &Arc<RemoteFile>,
    dest: &Path,
    scheduler: &CopyScheduler,
    progress: &TransferProgress,
) -> Result<(CopyReport, String), TransferError> {
    let store = Arc::new(LocalFileStore::create(dest, file.size()).await?);

    let copy = scheduler.copy_to_store(Arc::clone(file), store);
    tokio::pin!(copy);

    let mut ticker = tokio::time::interval(PROGRESS_LOG_INTERVAL);
    ticker.tick().await;
    let report = loop {
        tokio::select! {
            result = &mut copy => break result?,
            _ = ticker.tick() => {
                debug!(
                    file_id = %file.id(),
                    percent = progress.percentage(),
                    bytes_per_sec = progress.bytes_per_second() as u64,
                    eta_secs = progress.eta().map(|eta| eta.as_secs()),
                    "transfer progress"
                );
            }
        }
    };

    let path = dest.to_path_buf();
    let sha256 = tokio::task::spawn_blocking(move || calculate_file_checksum(&path))
        .await
        .map_err(|e| TransferError::Worker(e.to_string()))??;
    Ok((report, sha256))
}

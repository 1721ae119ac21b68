//! Process-wide lookup from file id to remote file.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use wsfs_protocol::FileId;

use crate::RemoteFileError;
use crate::file::RemoteFile;

/// Joins the announcement path to the read-response path.
///
/// Entries live until explicitly [removed](Self::remove); a finished
/// transfer's file stays resolvable while its connection is open.
#[derive(Default)]
pub struct FileRegistry {
    files: RwLock<HashMap<FileId, Arc<RemoteFile>>>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `file` and returns its id.
    pub fn register(&self, file: Arc<RemoteFile>) -> FileId {
        let id = file.id().clone();
        debug!(file_id = %id, name = file.name(), size = file.size(), "file registered");
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), file);
        id
    }

    /// Resolves `id`, or fails with [`RemoteFileError::NotFound`].
    pub fn lookup(&self, id: &FileId) -> Result<Arc<RemoteFile>, RemoteFileError> {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| RemoteFileError::NotFound(id.clone()))
    }

    /// Removes `id`, returning the file if it was present.
    pub fn remove(&self, id: &FileId) -> Option<Arc<RemoteFile>> {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn len(&self) -> usize {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

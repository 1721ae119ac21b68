use std::path::{Component, Path, PathBuf};

use crate::TransferError;

/// Validates a peer-announced file name before it touches the filesystem.
///
/// The name must be a single plain path component. Rejects:
/// - Empty names and `.`
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`)
/// - Directory components (`sub/file.bin`)
pub fn validate_file_name(name: &str) -> Result<(), TransferError> {
    if name.is_empty() {
        return Err(TransferError::InvalidPath("empty name".into()));
    }

    let path = Path::new(name);
    if path.is_absolute() {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {name}"
        )));
    }

    let mut normal = 0usize;
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {name}"
                )));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(TransferError::InvalidPath(format!(
                    "absolute path not allowed: {name}"
                )));
            }
            Component::CurDir => {}
            Component::Normal(_) => normal += 1,
        }
    }

    match normal {
        0 => Err(TransferError::InvalidPath(format!("not a file name: {name}"))),
        1 => Ok(()),
        _ => Err(TransferError::InvalidPath(format!(
            "directory components not allowed: {name}"
        ))),
    }
}

/// Resolves where an announced file is reassembled inside `output_dir`.
pub fn destination_path(output_dir: &Path, name: &str) -> Result<PathBuf, TransferError> {
    validate_file_name(name)?;
    let file_name = Path::new(name)
        .file_name()
        .ok_or_else(|| TransferError::InvalidPath(format!("not a file name: {name}")))?;
    Ok(output_dir.join(file_name))
}

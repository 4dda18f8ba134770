//! Filesystem primitives shared by the snapshot, export and restore paths
//!
//! New files are always written to a temporary name in the target directory
//! and renamed into place, so a reader never sees a partially-written file.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{IoContext, VaultResult};

/// Write data to a file atomically
///
/// 1. Write to a temporary file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the temp file to the target path
pub fn atomic_write(path: &Path, data: &[u8]) -> VaultResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).at(parent)?;
    }

    let temp_path = temp_path_for(path);

    let result = (|| -> VaultResult<()> {
        let mut file = File::create(&temp_path).at(&temp_path)?;
        file.write_all(data).at(&temp_path)?;
        file.sync_all().at(&temp_path)?;
        fs::rename(&temp_path, path).at(path)
    })();

    if result.is_err() {
        remove_if_exists(&temp_path);
    }
    result
}

/// Unique hidden temp path next to `path`
///
/// Same directory, so a later rename stays on one volume.
pub fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()))
}

/// Remove a file, ignoring "not found"; other failures are logged
pub fn remove_if_exists(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove {:?}: {}", path, e);
        }
    }
}

/// Flush a file's contents to disk
pub fn sync_file(path: &Path) -> VaultResult<()> {
    File::open(path).and_then(|f| f.sync_all()).at(path)
}

/// Flush directory entries (renames) to disk
///
/// Directories cannot be opened for syncing on every platform; failures
/// there are not errors.
pub fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
    #[cfg(not(unix))]
    let _ = dir;
}

/// Copy `from` to `to`, syncing the destination
pub fn copy_synced(from: &Path, to: &Path) -> VaultResult<u64> {
    let bytes = fs::copy(from, to).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound && !from.exists() {
            crate::error::VaultError::from_io(e, from)
        } else {
            crate::error::VaultError::from_io(e, to)
        }
    })?;
    sync_file(to)?;
    Ok(bytes)
}

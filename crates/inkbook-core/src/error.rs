//! Error handling for the storage lifecycle
//!
//! Every failure carries enough context (path, snapshot id, underlying OS
//! error) for an operator to act on it. `ErrorKind` gives callers a stable,
//! serializable name for each failure class.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::backup::RestorePhase;

/// Errors that can occur while initializing, snapshotting, exporting or
/// restoring the studio database
#[derive(Error, Debug)]
pub enum VaultError {
    /// Existing database schema cannot be used by this version
    #[error("Schema conflict in '{path}': {details}")]
    SchemaConflict { path: PathBuf, details: String },

    /// Permission denied accessing path
    #[error("Permission denied: cannot access '{path}'. Check file permissions.")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Disk is full or quota exceeded
    #[error(
        "Disk full or quota exceeded while writing to '{path}'. Free up disk space and try again."
    )]
    DiskFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Path expected to exist is missing
    #[error("File not found: '{path}'")]
    NotFound { path: PathBuf },

    /// Any other filesystem failure
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A snapshot with the same timestamp id already exists
    #[error("Snapshot '{id}' already exists at '{path}'")]
    DuplicateSnapshot { id: String, path: PathBuf },

    /// Snapshot file missing or checksum mismatch
    #[error("Snapshot '{id}' is corrupt: {reason}")]
    CorruptSnapshot { id: String, reason: String },

    /// No snapshot with the given id
    #[error("Snapshot not found: '{id}'")]
    SnapshotNotFound { id: String },

    /// Every candidate snapshot failed validation
    #[error("Archive would be empty: none of {requested} snapshot(s) passed validation")]
    EmptyArchive { requested: usize },

    /// Restore aborted; `rolled_back` tells whether the previous database is in place
    #[error("Restore failed while {phase}: {reason} (rolled back: {rolled_back})")]
    RestoreFailed {
        phase: RestorePhase,
        reason: String,
        rolled_back: bool,
    },

    /// Could not acquire a lock within the configured timeout
    #[error("Timed out after {waited:?} waiting for the {lock} lock")]
    LockTimeout { lock: &'static str, waited: Duration },

    /// Operation cancelled by the caller
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Principal is not allowed to perform the action
    #[error("'{principal}' is not allowed to {action}: {reason}")]
    Unauthorized {
        principal: String,
        action: String,
        reason: String,
    },

    /// Extension registration failed
    #[error("Extension error: {0}")]
    Extension(String),

    /// Live database is closed (shut down, or mid-restore)
    #[error("Database '{path}' is not open")]
    DatabaseClosed { path: PathBuf },

    /// Seeding the default administrator failed
    #[error("Failed to seed administrator account: {0}")]
    Seed(String),

    /// SQLite database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Zip container error
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Manifest or sidecar (de)serialization error
    #[error("Manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// Stable name of each failure class, used in structured output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SchemaConflict,
    Io,
    DuplicateSnapshot,
    CorruptSnapshot,
    SnapshotNotFound,
    EmptyArchive,
    RestoreFailed,
    LockTimeout,
    Cancelled,
    Unauthorized,
    Extension,
    Unavailable,
    Database,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SchemaConflict => "schema_conflict",
            ErrorKind::Io => "io",
            ErrorKind::DuplicateSnapshot => "duplicate_snapshot",
            ErrorKind::CorruptSnapshot => "corrupt_snapshot",
            ErrorKind::SnapshotNotFound => "snapshot_not_found",
            ErrorKind::EmptyArchive => "empty_archive",
            ErrorKind::RestoreFailed => "restore_failed",
            ErrorKind::LockTimeout => "lock_timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Extension => "extension",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Database => "database",
        }
    }
}

impl VaultError {
    /// Create an error from an I/O error with path context
    ///
    /// Classifies the error based on its kind (permission, disk full, etc.)
    pub fn from_io(error: io::Error, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match error.kind() {
            io::ErrorKind::PermissionDenied => VaultError::PermissionDenied {
                path,
                source: error,
            },
            io::ErrorKind::NotFound => VaultError::NotFound { path },
            _ if is_disk_full_error(&error) => VaultError::DiskFull {
                path,
                source: error,
            },
            _ => VaultError::Io {
                path,
                source: error,
            },
        }
    }

    /// Failure class of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::SchemaConflict { .. } => ErrorKind::SchemaConflict,
            VaultError::PermissionDenied { .. }
            | VaultError::DiskFull { .. }
            | VaultError::NotFound { .. }
            | VaultError::Io { .. }
            | VaultError::Archive(_)
            | VaultError::Manifest(_) => ErrorKind::Io,
            VaultError::DuplicateSnapshot { .. } => ErrorKind::DuplicateSnapshot,
            VaultError::CorruptSnapshot { .. } => ErrorKind::CorruptSnapshot,
            VaultError::SnapshotNotFound { .. } => ErrorKind::SnapshotNotFound,
            VaultError::EmptyArchive { .. } => ErrorKind::EmptyArchive,
            VaultError::RestoreFailed { .. } => ErrorKind::RestoreFailed,
            VaultError::LockTimeout { .. } => ErrorKind::LockTimeout,
            VaultError::Cancelled(_) => ErrorKind::Cancelled,
            VaultError::Unauthorized { .. } => ErrorKind::Unauthorized,
            VaultError::Extension(_) => ErrorKind::Extension,
            VaultError::DatabaseClosed { .. } => ErrorKind::Unavailable,
            VaultError::Database(_) | VaultError::Seed(_) => ErrorKind::Database,
        }
    }

    /// Create a corrupt-snapshot error
    pub fn corrupt(id: impl Into<String>, reason: impl Into<String>) -> Self {
        VaultError::CorruptSnapshot {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            VaultError::DiskFull { .. } => Some("Free up disk space and try again."),
            VaultError::PermissionDenied { .. } => {
                Some("Check file and directory permissions of the data directory.")
            }
            VaultError::DuplicateSnapshot { .. } => {
                Some("A snapshot was taken this second already. Wait a moment and retry.")
            }
            VaultError::LockTimeout { .. } => {
                Some("Another snapshot or restore is running. Retry once it has finished.")
            }
            VaultError::SchemaConflict { .. } => Some(
                "The database was created by an incompatible version. Restore a compatible snapshot.",
            ),
            VaultError::CorruptSnapshot { .. } => Some("Pick an older snapshot to restore from."),
            _ => None,
        }
    }
}

/// Check if an I/O error indicates disk full condition
fn is_disk_full_error(error: &io::Error) -> bool {
    let msg = error.to_string().to_lowercase();
    msg.contains("no space left")
        || msg.contains("disk full")
        || msg.contains("quota exceeded")
        || msg.contains("not enough space")
}

/// Result type for vault operations
pub type VaultResult<T> = Result<T, VaultError>;

/// Attach path context to `io::Result` values
pub(crate) trait IoContext<T> {
    fn at(self, path: &std::path::Path) -> VaultResult<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: &std::path::Path) -> VaultResult<T> {
        self.map_err(|e| VaultError::from_io(e, path))
    }
}

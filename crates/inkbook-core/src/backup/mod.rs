//! Backup subsystem
//!
//! Everything here reads the live database only through
//! `StorageEngine::consistent_copy` and otherwise writes new files:
//!
//! - `snapshot`: checksum-verified point-in-time copies
//! - `retention`: which snapshots to keep
//! - `archive`: zip bundles of validated snapshots for external media
//! - `restore`: validate, stage and swap a snapshot in as the live database
//! - `lease`: keeps retention from deleting a snapshot someone is reading

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{VaultError, VaultResult};

pub mod archive;
pub mod checksum;
pub mod lease;
pub mod restore;
pub mod retention;
pub mod snapshot;

pub use archive::{
    read_manifest, ArchiveExporter, ArchiveReport, ExcludedSnapshot, Manifest, ManifestEntry,
};
pub use lease::SnapshotLeases;
pub use restore::{
    OsFs, RestoreCoordinator, RestorePhase, RestoreReport, RestoreRequest, RestoreSource,
    RestoreTarget, SwapFs,
};
pub use retention::{
    apply_retention, plan_retention, DeletionFailure, RetentionPlan, RetentionPolicy,
    RetentionReport,
};
pub use snapshot::{Snapshot, SnapshotManager};

/// Cooperative cancellation flag for long-running exports
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Cancelled` once `cancel` has been called
    pub fn check(&self, stage: &str) -> VaultResult<()> {
        if self.is_cancelled() {
            return Err(VaultError::Cancelled(stage.to_string()));
        }
        Ok(())
    }
}

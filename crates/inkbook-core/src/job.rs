//! Daily backup job: snapshot, then prune with the configured policy

use serde::Serialize;
use tracing::{info, warn};

use crate::auth::Principal;
use crate::backup::{RetentionReport, Snapshot};
use crate::error::VaultResult;
use crate::vault::Vault;

#[derive(Debug, Clone, Serialize)]
pub struct BackupJobReport {
    pub snapshot: Snapshot,
    pub retention: RetentionReport,
}

/// Take a snapshot and apply the configured retention policy
///
/// Retention only runs once the snapshot has succeeded, so a failing
/// snapshot never costs an older one.
pub fn run_backup_job(vault: &Vault, principal: &Principal) -> VaultResult<BackupJobReport> {
    let snapshot = vault.create_snapshot(principal)?;
    let retention = vault.apply_retention(principal, None)?;

    if !retention.failed.is_empty() {
        warn!(
            "Backup job: {} snapshot(s) could not be pruned",
            retention.failed.len()
        );
    }
    info!(
        "Backup job complete: snapshot {}, {} deleted",
        snapshot.id,
        retention.deleted.len()
    );

    Ok(BackupJobReport {
        snapshot,
        retention,
    })
}

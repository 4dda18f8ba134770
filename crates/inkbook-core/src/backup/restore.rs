//! Restore a snapshot (or an archived snapshot) as the live database
//!
//! Phases:
//!
//! ```text
//! Idle -> Validating -> Staging -> Swapping -> Done
//! ```
//!
//! Validating and Staging never touch the live file; a failure there leaves
//! the database exactly as it was. Swapping is the point of no return: the
//! live connection is closed, the live file and its `-wal`/`-shm` journal
//! moved to `<live>.bak` (`.bak-wal`, `.bak-shm`) and the staged copy moved
//! into place. If anything fails from here on, `.bak` and its journal are
//! moved back before the error is reported, so the live path always holds a
//! usable database. `.bak` is settled only once the restored database has
//! been reopened and accepted by the initializer: deleted, or kept under a
//! timestamped name when the request asks for it.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::archive::extract_snapshot;
use super::checksum::sha256_file;
use super::lease::ReadLease;
use super::snapshot::SnapshotManager;
use crate::error::{VaultError, VaultResult};
use crate::storage::persistence::{copy_synced, remove_if_exists, sync_dir, temp_path_for};
use crate::storage::{AdminSeed, ExclusiveAccess, StorageEngine};

/// SQLite journal files that travel with a database file
const JOURNAL_SUFFIXES: [&str; 2] = ["-wal", "-shm"];

/// Filesystem moves performed while swapping
///
/// Abstracted so tests can inject failures between the two renames.
pub trait SwapFs: Send + Sync {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
}

/// The real filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFs;

impl SwapFs for OsFs {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestorePhase {
    Idle,
    Validating,
    Staging,
    Swapping,
    Done,
    Failed,
}

impl fmt::Display for RestorePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RestorePhase::Idle => "idle",
            RestorePhase::Validating => "validating",
            RestorePhase::Staging => "staging",
            RestorePhase::Swapping => "swapping",
            RestorePhase::Done => "done",
            RestorePhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What to restore from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreTarget {
    /// Snapshot in the backup directory (`latest` for the newest)
    Snapshot(String),
    /// Snapshot inside an exported archive; the newest entry when no id given
    Archive {
        path: PathBuf,
        snapshot_id: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreRequest {
    pub target: RestoreTarget,
    /// Recompute the snapshot checksum before staging
    ///
    /// Archive entries are always checked against their manifest.
    pub verify_checksum: bool,
    /// Keep the replaced database beside the live one instead of deleting it
    pub keep_previous: bool,
}

impl RestoreRequest {
    pub fn snapshot(id: impl Into<String>) -> Self {
        Self {
            target: RestoreTarget::Snapshot(id.into()),
            verify_checksum: true,
            keep_previous: false,
        }
    }

    pub fn archive(path: impl Into<PathBuf>, snapshot_id: Option<String>) -> Self {
        Self {
            target: RestoreTarget::Archive {
                path: path.into(),
                snapshot_id,
            },
            verify_checksum: true,
            keep_previous: false,
        }
    }
}

/// Where the restored snapshot came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RestoreSource {
    Snapshot { path: PathBuf },
    Archive { path: PathBuf },
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub snapshot_id: String,
    pub source: RestoreSource,
    /// Phases passed through, in order
    pub phases: Vec<RestorePhase>,
    /// Schema version confirmed after reopening
    pub schema_version: i32,
    /// Snapshot of the replaced database, when one was taken
    pub safety_snapshot: Option<String>,
    /// Replaced database file, when it was kept
    pub previous_database: Option<PathBuf>,
}

/// Snapshot chosen during validation, ready to stage
struct Validated {
    id: String,
    source: RestoreSource,
    file: PathBuf,
    checksum: String,
    /// Extracted from an archive into a temp file we own
    extracted: bool,
    _lease: Option<ReadLease>,
}

pub struct RestoreCoordinator {
    lock_timeout: Duration,
    fs: Box<dyn SwapFs>,
}

impl RestoreCoordinator {
    pub fn new(lock_timeout: Duration) -> Self {
        Self::with_fs(lock_timeout, Box::new(OsFs))
    }

    pub fn with_fs(lock_timeout: Duration, fs: Box<dyn SwapFs>) -> Self {
        Self { lock_timeout, fs }
    }

    /// Run a restore to completion or roll it back
    pub fn restore(
        &self,
        engine: &StorageEngine,
        snapshots: &SnapshotManager,
        request: &RestoreRequest,
        seed: &AdminSeed,
    ) -> VaultResult<RestoreReport> {
        let mut phases = vec![RestorePhase::Idle];
        let result = self.run(engine, snapshots, request, seed, &mut phases);

        match &result {
            Ok(report) => info!(
                "Restored snapshot {} (schema version {})",
                report.snapshot_id, report.schema_version
            ),
            Err(e) => {
                let phase = phases.last().copied().unwrap_or(RestorePhase::Idle);
                phases.push(RestorePhase::Failed);
                error!("Restore failed while {}: {} (phases: {:?})", phase, e, phases);
            }
        }
        result
    }

    fn run(
        &self,
        engine: &StorageEngine,
        snapshots: &SnapshotManager,
        request: &RestoreRequest,
        seed: &AdminSeed,
        phases: &mut Vec<RestorePhase>,
    ) -> VaultResult<RestoreReport> {
        let live = engine.path().to_path_buf();
        let staged = sibling(&live, ".restore.tmp");

        phases.push(RestorePhase::Validating);
        let validated = self.validate(snapshots, request, &staged)?;

        phases.push(RestorePhase::Staging);
        let staging = self.stage(engine, snapshots, request, &validated, &staged);
        if validated.extracted {
            remove_if_exists(&validated.file);
        }
        let (_snapshot_lock, exclusive) = staging?;
        drop(validated._lease);

        phases.push(RestorePhase::Swapping);
        self.swap(&exclusive, &live, &staged)?;
        let schema_version = self.confirm(&exclusive, &live, seed)?;
        let previous_database = self.settle_previous(&live, request.keep_previous);

        phases.push(RestorePhase::Done);
        Ok(RestoreReport {
            snapshot_id: validated.id,
            source: validated.source,
            phases: phases.clone(),
            schema_version,
            safety_snapshot: None,
            previous_database,
        })
    }

    fn validate(
        &self,
        snapshots: &SnapshotManager,
        request: &RestoreRequest,
        staged: &Path,
    ) -> VaultResult<Validated> {
        match &request.target {
            RestoreTarget::Snapshot(id) => {
                let snapshot = snapshots.resolve(id)?;
                let lease = snapshots
                    .leases()
                    .acquire_read(&snapshot.id)
                    .ok_or_else(|| VaultError::corrupt(&snapshot.id, "snapshot is being deleted"))?;

                if request.verify_checksum {
                    snapshot.verify()?;
                } else if !snapshot.path.exists() {
                    return Err(VaultError::corrupt(&snapshot.id, "snapshot file is missing"));
                }

                Ok(Validated {
                    id: snapshot.id.clone(),
                    source: RestoreSource::Snapshot {
                        path: snapshot.path.clone(),
                    },
                    file: snapshot.path,
                    checksum: snapshot.checksum,
                    extracted: false,
                    _lease: Some(lease),
                })
            }
            RestoreTarget::Archive { path, snapshot_id } => {
                let extract_to = temp_path_for(staged);
                let entry = extract_snapshot(path, snapshot_id.as_deref(), &extract_to)?;
                Ok(Validated {
                    id: entry.id,
                    source: RestoreSource::Archive { path: path.clone() },
                    file: extract_to,
                    checksum: entry.checksum,
                    extracted: true,
                    _lease: None,
                })
            }
        }
    }

    /// Take both locks and put a verified copy next to the live file
    fn stage<'a>(
        &self,
        engine: &'a StorageEngine,
        snapshots: &'a SnapshotManager,
        request: &RestoreRequest,
        validated: &Validated,
        staged: &Path,
    ) -> VaultResult<(parking_lot::MutexGuard<'a, ()>, ExclusiveAccess<'a>)> {
        let snapshot_lock = snapshots.acquire_lock()?;
        let exclusive = engine.quiesce(self.lock_timeout)?;

        remove_if_exists(staged);
        let result = (|| -> VaultResult<()> {
            copy_synced(&validated.file, staged)?;
            if request.verify_checksum || validated.extracted {
                let actual = sha256_file(staged)?;
                if actual != validated.checksum {
                    return Err(VaultError::corrupt(
                        &validated.id,
                        format!("staged copy checksum mismatch: found {}", actual),
                    ));
                }
            }
            Ok(())
        })();

        if let Err(e) = result {
            remove_if_exists(staged);
            return Err(e);
        }

        debug!("Staged snapshot {} at {:?}", validated.id, staged);
        Ok((snapshot_lock, exclusive))
    }

    /// Move the staged copy into the live path, moving `.bak` back on failure
    fn swap(&self, exclusive: &ExclusiveAccess<'_>, live: &Path, staged: &Path) -> VaultResult<()> {
        let bak = sibling(live, ".bak");

        if let Err(e) = exclusive.close() {
            remove_if_exists(staged);
            return Err(VaultError::RestoreFailed {
                phase: RestorePhase::Swapping,
                reason: format!("could not close live database: {}", e),
                rolled_back: true,
            });
        }

        self.discard(&bak);
        let had_live = live.exists();
        if had_live {
            if let Err(e) = self.fs.rename(live, &bak) {
                remove_if_exists(staged);
                return Err(self.reopen_after_rollback(
                    exclusive,
                    format!("could not move live database aside: {}", e),
                ));
            }
            // Frames a failed close-time checkpoint left behind travel with `.bak`
            if let Err(e) = self.move_journal(live, &bak) {
                remove_if_exists(staged);
                let reason = format!("could not move journal files aside: {}", e);
                if let Err(back) = self.move_back(&bak, live) {
                    return Err(rollback_failed(reason, back, &bak));
                }
                return Err(self.reopen_after_rollback(exclusive, reason));
            }
        } else {
            self.remove_journal_files(live);
        }

        if let Err(e) = self.fs.rename(staged, live) {
            warn!("Moving staged database into place failed: {}; rolling back", e);
            remove_if_exists(staged);
            let reason = format!("could not move staged database into place: {}", e);

            if had_live {
                if let Err(back) = self.move_back(&bak, live) {
                    return Err(rollback_failed(reason, back, &bak));
                }
            }
            return Err(self.reopen_after_rollback(exclusive, reason));
        }

        if let Some(dir) = live.parent() {
            sync_dir(dir);
        }
        Ok(())
    }

    /// Reopen the restored database and run the initializer over it
    ///
    /// On failure the previous database is swapped back in.
    fn confirm(
        &self,
        exclusive: &ExclusiveAccess<'_>,
        live: &Path,
        seed: &AdminSeed,
    ) -> VaultResult<i32> {
        let bak = sibling(live, ".bak");

        let rejected = match exclusive
            .reopen()
            .and_then(|()| exclusive.initialize(seed))
        {
            Ok(result) => return Ok(result.schema_version),
            Err(e) => e,
        };

        warn!("Restored database rejected: {}; swapping back", rejected);
        let reason = format!("restored database rejected: {}", rejected);

        if let Err(close) = exclusive.close() {
            warn!("Closing rejected database failed: {}", close);
        }
        if !bak.exists() {
            return Err(self.reopen_after_rollback(exclusive, reason));
        }
        if let Err(rm) = self.fs.remove_file(live) {
            warn!("Failed to remove rejected database: {}", rm);
        }
        self.remove_journal_files(live);
        if let Err(back) = self.move_back(&bak, live) {
            return Err(rollback_failed(reason, back, &bak));
        }
        Err(self.reopen_after_rollback(exclusive, reason))
    }

    /// Delete `.bak` or, when asked, keep it under a timestamped name
    fn settle_previous(&self, live: &Path, keep: bool) -> Option<PathBuf> {
        let bak = sibling(live, ".bak");
        if !bak.exists() {
            return None;
        }
        if !keep {
            self.discard(&bak);
            return None;
        }

        let stamp = Utc::now().format("%Y%m%d-%H%M%S").to_string();
        let mut kept = sibling(live, &format!(".{}.replaced", stamp));
        let mut n = 2;
        while kept.exists() {
            kept = sibling(live, &format!(".{}-{}.replaced", stamp, n));
            n += 1;
        }

        if let Err(e) = self.fs.rename(&bak, &kept) {
            warn!("Could not rename {:?} to {:?}: {}", bak, kept, e);
            return Some(bak);
        }
        if let Err(e) = self.move_journal(&bak, &kept) {
            warn!("Journal of the replaced database left beside {:?}: {}", bak, e);
        }
        info!("Replaced database kept at {:?}", kept);
        Some(kept)
    }

    fn reopen_after_rollback(&self, exclusive: &ExclusiveAccess<'_>, reason: String) -> VaultError {
        let rolled_back = match exclusive.reopen() {
            Ok(()) => true,
            Err(e) => {
                error!("Reopening previous database failed: {}", e);
                false
            }
        };
        VaultError::RestoreFailed {
            phase: RestorePhase::Swapping,
            reason,
            rolled_back,
        }
    }

    /// Put `.bak` and its journal back at the live path
    fn move_back(&self, bak: &Path, live: &Path) -> io::Result<()> {
        self.fs.rename(bak, live)?;
        self.move_journal(bak, live)
    }

    /// Rename the journal files of `from` to match `to`
    fn move_journal(&self, from: &Path, to: &Path) -> io::Result<()> {
        for suffix in JOURNAL_SUFFIXES {
            let journal = sibling(from, suffix);
            if journal.exists() {
                self.fs.rename(&journal, &sibling(to, suffix))?;
            }
        }
        Ok(())
    }

    /// Remove a database file together with its journal
    fn discard(&self, path: &Path) {
        self.remove_quietly(path);
        self.remove_journal_files(path);
    }

    fn remove_journal_files(&self, path: &Path) {
        for suffix in JOURNAL_SUFFIXES {
            self.remove_quietly(&sibling(path, suffix));
        }
    }

    fn remove_quietly(&self, path: &Path) {
        if let Err(e) = self.fs.remove_file(path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove {:?}: {}", path, e);
            }
        }
    }
}

fn rollback_failed(reason: String, cause: io::Error, bak: &Path) -> VaultError {
    error!(
        "Rollback failed; previous database remains at {:?}: {}",
        bak, cause
    );
    VaultError::RestoreFailed {
        phase: RestorePhase::Swapping,
        reason: format!(
            "{}; rollback also failed ({}), previous database is at {}",
            reason,
            cause,
            bak.display()
        ),
        rolled_back: false,
    }
}

/// `path` with `suffix` appended to its file name
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

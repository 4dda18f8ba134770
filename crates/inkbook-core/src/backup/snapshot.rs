//! Snapshot creation, listing and verification
//!
//! A snapshot is two files in the backup directory:
//!
//! - `<id>.snapshot`: consistent copy of the live database
//! - `<id>.snapshot.json`: the `Snapshot` record (checksum, size, timestamps)
//!
//! The id is the UTC creation time formatted `YYYYMMDD-HHMMSS`, so sorting ids
//! lexicographically sorts them chronologically.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::checksum::sha256_file;
use super::lease::SnapshotLeases;
use crate::error::{IoContext, VaultError, VaultResult};
use crate::storage::persistence::{atomic_write, remove_if_exists, sync_dir};
use crate::storage::StorageEngine;

/// Extension of snapshot data files
pub const SNAPSHOT_EXTENSION: &str = "snapshot";

const ID_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Immutable record of one snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Timestamp id, `YYYYMMDD-HHMMSS`
    pub id: String,
    /// Live database the snapshot was taken from
    pub source_path: PathBuf,
    /// Snapshot data file
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    /// Lowercase hex SHA-256 of the data file
    pub checksum: String,
}

impl Snapshot {
    /// Recompute the checksum and compare it with the recorded one
    pub fn verify(&self) -> VaultResult<()> {
        if !self.path.exists() {
            return Err(VaultError::corrupt(&self.id, "snapshot file is missing"));
        }

        let actual = sha256_file(&self.path)?;
        if actual != self.checksum {
            return Err(VaultError::corrupt(
                &self.id,
                format!("checksum mismatch: expected {}, found {}", self.checksum, actual),
            ));
        }

        debug!("Snapshot {} verified", self.id);
        Ok(())
    }

    /// Path of the metadata sidecar
    pub fn sidecar_path(&self) -> PathBuf {
        sidecar_for(&self.path)
    }
}

/// Snapshot id for a creation time
pub fn snapshot_id_for(time: DateTime<Utc>) -> String {
    time.format(ID_FORMAT).to_string()
}

/// Whether `id` has the `YYYYMMDD-HHMMSS` shape of a snapshot id
pub fn is_snapshot_id(id: &str) -> bool {
    id.len() == 15 && NaiveDateTime::parse_from_str(id, ID_FORMAT).is_ok()
}

fn sidecar_for(data_path: &Path) -> PathBuf {
    let mut name = data_path.as_os_str().to_os_string();
    name.push(".json");
    PathBuf::from(name)
}

/// Creates and finds snapshots in one backup directory
pub struct SnapshotManager {
    dir: PathBuf,
    lock: Mutex<()>,
    lock_timeout: Duration,
    leases: SnapshotLeases,
}

impl SnapshotManager {
    pub fn new(dir: impl Into<PathBuf>, lock_timeout: Duration, leases: SnapshotLeases) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
            lock_timeout,
            leases,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn leases(&self) -> &SnapshotLeases {
        &self.leases
    }

    /// Acquire the single-writer snapshot lock
    ///
    /// Held by `create_snapshot` and by restore for its whole duration.
    pub fn acquire_lock(&self) -> VaultResult<MutexGuard<'_, ()>> {
        self.lock
            .try_lock_for(self.lock_timeout)
            .ok_or(VaultError::LockTimeout {
                lock: "snapshot",
                waited: self.lock_timeout,
            })
    }

    /// Take a consistent snapshot of the live database
    pub fn create_snapshot(&self, engine: &StorageEngine) -> VaultResult<Snapshot> {
        self.create_snapshot_at(engine, Utc::now())
    }

    /// Take a snapshot stamped with `now`
    pub fn create_snapshot_at(
        &self,
        engine: &StorageEngine,
        now: DateTime<Utc>,
    ) -> VaultResult<Snapshot> {
        let _lock = self.acquire_lock()?;

        fs::create_dir_all(&self.dir).at(&self.dir)?;

        let id = snapshot_id_for(now);
        let final_path = self.data_path(&id);
        if final_path.exists() {
            return Err(VaultError::DuplicateSnapshot {
                id,
                path: final_path,
            });
        }

        let temp_path = self
            .dir
            .join(format!(".{}.{}.tmp", id, uuid::Uuid::new_v4().simple()));
        let sidecar_path = sidecar_for(&final_path);

        let result = (|| -> VaultResult<Snapshot> {
            engine.consistent_copy(&temp_path)?;

            let checksum = sha256_file(&temp_path)?;
            let size_bytes = fs::metadata(&temp_path).at(&temp_path)?.len();
            let snapshot = Snapshot {
                id: id.clone(),
                source_path: engine.path().to_path_buf(),
                path: final_path.clone(),
                created_at: now,
                size_bytes,
                checksum,
            };

            atomic_write(&sidecar_path, &serde_json::to_vec_pretty(&snapshot)?)?;
            fs::rename(&temp_path, &final_path).at(&final_path)?;
            sync_dir(&self.dir);
            Ok(snapshot)
        })();

        match result {
            Ok(snapshot) => {
                info!(
                    "Created snapshot {} ({} bytes, sha256 {})",
                    snapshot.id, snapshot.size_bytes, snapshot.checksum
                );
                Ok(snapshot)
            }
            Err(e) => {
                warn!("Snapshot {} failed, cleaning up: {}", id, e);
                remove_if_exists(&temp_path);
                // The sidecar may predate us only if the data file did too
                if !final_path.exists() {
                    remove_if_exists(&sidecar_path);
                }
                Err(e)
            }
        }
    }

    /// All snapshots with a readable sidecar, newest first
    pub fn list_snapshots(&self) -> VaultResult<Vec<Snapshot>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.dir).at(&self.dir)? {
            let path = entry.at(&self.dir)?.path();
            let is_snapshot = path
                .extension()
                .map_or(false, |ext| ext == SNAPSHOT_EXTENSION);
            let hidden = path
                .file_name()
                .map_or(true, |n| n.to_string_lossy().starts_with('.'));
            if !is_snapshot || hidden {
                continue;
            }

            match self.load_sidecar(&path) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => warn!("Skipping {:?}: {}", path, e),
            }
        }

        snapshots.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(snapshots)
    }

    /// Look up one snapshot by id
    pub fn get(&self, id: &str) -> VaultResult<Snapshot> {
        if !is_snapshot_id(id) {
            return Err(VaultError::SnapshotNotFound { id: id.to_string() });
        }

        let data_path = self.data_path(id);
        if !sidecar_for(&data_path).exists() {
            return Err(VaultError::SnapshotNotFound { id: id.to_string() });
        }
        self.load_sidecar(&data_path)
    }

    /// Look up a snapshot by id, or the newest one for `latest`
    pub fn resolve(&self, id: &str) -> VaultResult<Snapshot> {
        if id.eq_ignore_ascii_case("latest") {
            return self
                .list_snapshots()?
                .into_iter()
                .next()
                .ok_or_else(|| VaultError::SnapshotNotFound { id: id.to_string() });
        }
        self.get(id)
    }

    fn data_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", id, SNAPSHOT_EXTENSION))
    }

    fn load_sidecar(&self, data_path: &Path) -> VaultResult<Snapshot> {
        let sidecar = sidecar_for(data_path);
        let bytes = fs::read(&sidecar).at(&sidecar)?;
        let mut snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        // The backup directory may have been moved since creation
        snapshot.path = data_path.to_path_buf();
        Ok(snapshot)
    }
}

/// Delete a snapshot's data file and sidecar
pub(crate) fn remove_snapshot_files(snapshot: &Snapshot) -> VaultResult<()> {
    match fs::remove_file(&snapshot.path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(VaultError::from_io(e, &snapshot.path)),
    }
    let sidecar = snapshot.sidecar_path();
    match fs::remove_file(&sidecar) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(VaultError::from_io(e, sidecar)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::AdminSeed;
    use chrono::TimeZone;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        engine: StorageEngine,
        manager: SnapshotManager,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let engine = StorageEngine::open(temp.path().join("db").join("studio.db")).unwrap();
        engine
            .initialize(&AdminSeed {
                username: "admin".to_string(),
                password: "pw".to_string(),
            })
            .unwrap();
        let manager = SnapshotManager::new(
            temp.path().join("backups"),
            Duration::from_millis(200),
            SnapshotLeases::new(),
        );
        Fixture {
            _temp: temp,
            engine,
            manager,
        }
    }

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 0).unwrap() + chrono::Duration::seconds(secs as i64)
    }

    #[test]
    fn test_create_snapshot_writes_file_and_sidecar() {
        let f = fixture();

        let snapshot = f.manager.create_snapshot_at(&f.engine, at(0)).unwrap();

        assert_eq!(snapshot.id, "20250314-092600");
        assert!(snapshot.path.exists());
        assert!(snapshot.sidecar_path().exists());
        assert_eq!(snapshot.size_bytes, fs::metadata(&snapshot.path).unwrap().len());
        assert_eq!(snapshot.checksum, sha256_file(&snapshot.path).unwrap());
        assert_eq!(snapshot.source_path, f.engine.path());
        snapshot.verify().unwrap();
    }

    #[test]
    fn test_snapshots_sort_chronologically() {
        let f = fixture();

        let ids: Vec<String> = [0, 1, 61, 3600]
            .iter()
            .map(|s| f.manager.create_snapshot_at(&f.engine, at(*s)).unwrap().id)
            .collect();

        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);

        let listed: Vec<String> = f
            .manager
            .list_snapshots()
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        let mut newest_first = ids.clone();
        newest_first.reverse();
        assert_eq!(listed, newest_first);

        for snapshot in f.manager.list_snapshots().unwrap() {
            snapshot.verify().unwrap();
        }
    }

    #[test]
    fn test_same_second_is_duplicate() {
        let f = fixture();

        let first = f.manager.create_snapshot_at(&f.engine, at(5)).unwrap();
        let before = fs::read(&first.path).unwrap();

        let err = f.manager.create_snapshot_at(&f.engine, at(5)).unwrap_err();
        assert!(matches!(err, VaultError::DuplicateSnapshot { .. }));

        // Original untouched, no temp files left behind
        assert_eq!(fs::read(&first.path).unwrap(), before);
        let entries = fs::read_dir(f.manager.dir()).unwrap().count();
        assert_eq!(entries, 2);
    }

    #[test]
    fn test_failed_copy_leaves_nothing_visible() {
        let f = fixture();
        f.engine.close().unwrap();
        fs::remove_file(f.engine.path()).unwrap();

        let err = f.manager.create_snapshot_at(&f.engine, at(0)).unwrap_err();
        assert!(matches!(err, VaultError::NotFound { .. }));
        assert!(f.manager.list_snapshots().unwrap().is_empty());
        let leftovers = fs::read_dir(f.manager.dir()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_verify_detects_tampering() {
        let f = fixture();
        let snapshot = f.manager.create_snapshot_at(&f.engine, at(0)).unwrap();

        let mut bytes = fs::read(&snapshot.path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&snapshot.path, bytes).unwrap();

        let err = snapshot.verify().unwrap_err();
        assert!(matches!(err, VaultError::CorruptSnapshot { ref reason, .. } if reason.contains("checksum mismatch")));

        fs::remove_file(&snapshot.path).unwrap();
        let err = snapshot.verify().unwrap_err();
        assert!(matches!(err, VaultError::CorruptSnapshot { ref reason, .. } if reason.contains("missing")));
    }

    #[test]
    fn test_list_skips_missing_sidecar() {
        let f = fixture();
        let kept = f.manager.create_snapshot_at(&f.engine, at(0)).unwrap();
        let orphan = f.manager.create_snapshot_at(&f.engine, at(1)).unwrap();
        fs::remove_file(orphan.sidecar_path()).unwrap();

        let listed = f.manager.list_snapshots().unwrap();
        assert_eq!(listed, vec![kept]);
    }

    #[test]
    fn test_get_and_resolve() {
        let f = fixture();
        f.manager.create_snapshot_at(&f.engine, at(0)).unwrap();
        let newest = f.manager.create_snapshot_at(&f.engine, at(10)).unwrap();

        assert_eq!(f.manager.get(&newest.id).unwrap(), newest);
        assert_eq!(f.manager.resolve("latest").unwrap(), newest);
        assert!(matches!(
            f.manager.get("20000101-000000"),
            Err(VaultError::SnapshotNotFound { .. })
        ));
        assert!(matches!(
            f.manager.get("../../etc/passwd"),
            Err(VaultError::SnapshotNotFound { .. })
        ));
    }

    #[test]
    fn test_lock_times_out_while_held() {
        let f = fixture();
        let _held = f.manager.acquire_lock().unwrap();

        let err = f.manager.create_snapshot_at(&f.engine, at(0)).unwrap_err();
        assert!(matches!(err, VaultError::LockTimeout { lock: "snapshot", .. }));
    }

    #[test]
    fn test_snapshot_id_shape() {
        assert!(is_snapshot_id("20250314-092600"));
        assert!(!is_snapshot_id("2025-03-14"));
        assert!(!is_snapshot_id("latest"));
    }
}

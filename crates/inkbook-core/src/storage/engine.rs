//! Storage engine: sole owner of the live database connection
//!
//! ## Consistent copies
//!
//! The live database runs in WAL mode. `consistent_copy` opens a second,
//! read-only connection and drives SQLite's online backup API over the whole
//! database in a single step, i.e. inside one read transaction. Writers on
//! the live connection keep going (WAL readers do not block writers) and the
//! copy reflects exactly one committed state, never a half-written page.
//!
//! ## Access gate
//!
//! Normal traffic goes through `with_connection`, which holds the gate in
//! shared mode. A restore takes the gate exclusively through `quiesce`,
//! waiting at most the configured timeout.

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use rusqlite::backup::Backup;
use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info, warn};

use super::schema::{self, AdminSeed, InitResult, SchemaState};
use crate::error::{IoContext, VaultError, VaultResult};

/// How long SQLite waits on a locked database before reporting busy
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Pages per backup step; large enough to copy any database in one step
const COPY_PAGES_PER_STEP: i32 = i32::MAX;

/// Pause between backup steps when the source reports busy
const BACKUP_RETRY_PAUSE: Duration = Duration::from_millis(50);

/// Owner of the live database handle
pub struct StorageEngine {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
    gate: RwLock<()>,
}

/// Liveness and schema state of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineHealth {
    pub live: bool,
    pub schema_compatible: bool,
    pub schema_version: Option<i32>,
}

impl StorageEngine {
    /// Open (or create) the database at `path`
    pub fn open(path: impl Into<PathBuf>) -> VaultResult<Self> {
        let path = path.into();
        let conn = open_connection(&path)?;
        info!("Opened database {:?}", path);

        Ok(Self {
            path,
            conn: Mutex::new(Some(conn)),
            gate: RwLock::new(()),
        })
    }

    /// Open the database at `path`, starting closed if it cannot be opened
    ///
    /// Used to restore over a damaged file; `reopen` tries again once the
    /// file has been replaced.
    pub fn open_or_closed(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let conn = match open_connection(&path) {
            Ok(conn) => {
                info!("Opened database {:?}", path);
                Some(conn)
            }
            Err(e) => {
                warn!("Database {:?} could not be opened ({}); starting closed", path, e);
                None
            }
        };

        Self {
            path,
            conn: Mutex::new(conn),
            gate: RwLock::new(()),
        }
    }

    /// Path of the live database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a live connection is open
    pub fn is_live(&self) -> bool {
        self.conn.lock().is_some()
    }

    /// Run `f` against the live connection
    ///
    /// Blocks while a restore holds the engine exclusively.
    pub fn with_connection<T, F>(&self, f: F) -> VaultResult<T>
    where
        F: FnOnce(&mut Connection) -> VaultResult<T>,
    {
        let _shared = self.gate.read();
        self.with_connection_ungated(f)
    }

    fn with_connection_ungated<T, F>(&self, f: F) -> VaultResult<T>
    where
        F: FnOnce(&mut Connection) -> VaultResult<T>,
    {
        let mut slot = self.conn.lock();
        match slot.as_mut() {
            Some(conn) => f(conn),
            None => Err(VaultError::DatabaseClosed {
                path: self.path.clone(),
            }),
        }
    }

    /// Create the schema and seed data if absent (idempotent)
    pub fn initialize(&self, seed: &AdminSeed) -> VaultResult<InitResult> {
        self.with_connection(|conn| schema::initialize_database(conn, &self.path, seed))
    }

    /// Liveness plus schema compatibility
    pub fn health(&self) -> EngineHealth {
        let probe = self.with_connection(|conn| {
            let state = schema::inspect_schema(conn)?;
            let version = schema::get_schema_version(conn)?;
            Ok((state, version))
        });

        match probe {
            Ok((state, version)) => EngineHealth {
                live: true,
                schema_compatible: state == SchemaState::Current,
                schema_version: version,
            },
            Err(e) => {
                debug!("Health probe failed: {}", e);
                EngineHealth {
                    live: false,
                    schema_compatible: false,
                    schema_version: None,
                }
            }
        }
    }

    /// Write a consistent copy of the live database to `dest`
    ///
    /// `dest` must not exist yet. The live connection is not used, so normal
    /// traffic is only held up for as long as it takes to open the copy
    /// connection.
    pub fn consistent_copy(&self, dest: &Path) -> VaultResult<()> {
        let _shared = self.gate.read();

        if !self.path.exists() {
            return Err(VaultError::NotFound {
                path: self.path.clone(),
            });
        }
        if dest.exists() {
            return Err(VaultError::from_io(
                std::io::Error::new(std::io::ErrorKind::AlreadyExists, "copy target exists"),
                dest,
            ));
        }

        let src = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        src.busy_timeout(BUSY_TIMEOUT)?;

        let mut dst = Connection::open(dest)?;
        {
            let backup = Backup::new(&src, &mut dst)?;
            backup.run_to_completion(COPY_PAGES_PER_STEP, BACKUP_RETRY_PAUSE, None)?;
        }
        dst.close().map_err(|(_, e)| e)?;
        src.close().map_err(|(_, e)| e)?;

        debug!("Consistent copy of {:?} written to {:?}", self.path, dest);
        Ok(())
    }

    /// Fold the WAL back into the main database file
    pub fn checkpoint(&self) -> VaultResult<()> {
        self.with_connection(|conn| checkpoint_connection(conn))
    }

    /// Take exclusive access, waiting at most `timeout`
    ///
    /// While the returned guard lives no other caller can reach the live
    /// connection.
    pub fn quiesce(&self, timeout: Duration) -> VaultResult<ExclusiveAccess<'_>> {
        let guard = self
            .gate
            .try_write_for(timeout)
            .ok_or(VaultError::LockTimeout {
                lock: "database",
                waited: timeout,
            })?;
        Ok(ExclusiveAccess {
            engine: self,
            _guard: guard,
        })
    }

    /// Checkpoint and close the live connection
    pub fn close(&self) -> VaultResult<()> {
        let _exclusive = self.gate.write();
        self.close_ungated()
    }

    /// Reopen the live connection after `close`
    pub fn reopen(&self) -> VaultResult<()> {
        let _exclusive = self.gate.write();
        self.reopen_ungated()
    }

    fn close_ungated(&self) -> VaultResult<()> {
        let mut slot = self.conn.lock();
        let Some(conn) = slot.take() else {
            return Ok(());
        };

        if let Err(e) = checkpoint_connection(&conn) {
            warn!("Checkpoint before close failed: {}", e);
        }

        match conn.close() {
            Ok(()) => {
                info!("Closed database {:?}", self.path);
                Ok(())
            }
            Err((conn, e)) => {
                *slot = Some(conn);
                Err(e.into())
            }
        }
    }

    fn reopen_ungated(&self) -> VaultResult<()> {
        let mut slot = self.conn.lock();
        if slot.is_none() {
            *slot = Some(open_connection(&self.path)?);
            info!("Reopened database {:?}", self.path);
        }
        Ok(())
    }
}

impl Drop for StorageEngine {
    fn drop(&mut self) {
        if let Err(e) = self.close_ungated() {
            warn!("Failed to close database {:?}: {}", self.path, e);
        }
    }
}

/// Exclusive hold on the engine, used by restore
///
/// Methods bypass the gate because the guard already owns it.
pub struct ExclusiveAccess<'a> {
    engine: &'a StorageEngine,
    _guard: RwLockWriteGuard<'a, ()>,
}

impl std::fmt::Debug for ExclusiveAccess<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExclusiveAccess")
            .field("path", &self.engine.path())
            .finish_non_exhaustive()
    }
}

impl ExclusiveAccess<'_> {
    pub fn path(&self) -> &Path {
        self.engine.path()
    }

    pub fn close(&self) -> VaultResult<()> {
        self.engine.close_ungated()
    }

    pub fn reopen(&self) -> VaultResult<()> {
        self.engine.reopen_ungated()
    }

    pub fn initialize(&self, seed: &AdminSeed) -> VaultResult<InitResult> {
        self.engine
            .with_connection_ungated(|conn| schema::initialize_database(conn, &self.engine.path, seed))
    }
}

fn open_connection(path: &Path) -> VaultResult<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).at(parent)?;
    }

    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;

    let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        warn!("Database {:?} is in {} journal mode, not WAL", path, mode);
    }
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    Ok(conn)
}

fn checkpoint_connection(conn: &Connection) -> VaultResult<()> {
    conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn seed() -> AdminSeed {
        AdminSeed {
            username: "admin".to_string(),
            password: "pw".to_string(),
        }
    }

    fn open_initialized(temp: &TempDir) -> StorageEngine {
        let engine = StorageEngine::open(temp.path().join("db").join("studio.db")).unwrap();
        engine.initialize(&seed()).unwrap();
        engine
    }

    fn add_client(engine: &StorageEngine, name: &str) {
        engine
            .with_connection(|conn| {
                conn.execute("INSERT INTO clients (name) VALUES (?1)", [name])?;
                Ok(())
            })
            .unwrap();
    }

    fn client_count(path: &Path) -> i64 {
        let conn = Connection::open(path).unwrap();
        conn.query_row("SELECT COUNT(*) FROM clients", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_open_creates_parent_dirs_and_wal() {
        let temp = TempDir::new().unwrap();
        let engine = open_initialized(&temp);

        assert!(engine.path().exists());
        assert!(engine.is_live());
        let mode: String = engine
            .with_connection(|conn| Ok(conn.query_row("PRAGMA journal_mode", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_consistent_copy_contains_committed_rows() {
        let temp = TempDir::new().unwrap();
        let engine = open_initialized(&temp);
        add_client(&engine, "Ada");
        add_client(&engine, "Grace");

        let dest = temp.path().join("copy.db");
        engine.consistent_copy(&dest).unwrap();

        assert_eq!(client_count(&dest), 2);
        // Live database untouched and still usable
        add_client(&engine, "Linus");
        assert_eq!(client_count(&dest), 2);
    }

    #[test]
    fn test_consistent_copy_of_many_pages() {
        let temp = TempDir::new().unwrap();
        let engine = open_initialized(&temp);
        engine
            .with_connection(|conn| {
                let tx = conn.transaction()?;
                for i in 0..2_000 {
                    tx.execute(
                        "INSERT INTO clients (name, medical_info) VALUES (?1, ?2)",
                        rusqlite::params![format!("client-{}", i), "x".repeat(512)],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .unwrap();

        let dest = temp.path().join("copy.db");
        engine.consistent_copy(&dest).unwrap();
        assert_eq!(client_count(&dest), 2_000);
    }

    #[test]
    fn test_consistent_copy_refuses_existing_target() {
        let temp = TempDir::new().unwrap();
        let engine = open_initialized(&temp);
        let dest = temp.path().join("copy.db");
        std::fs::write(&dest, b"keep me").unwrap();

        assert!(engine.consistent_copy(&dest).is_err());
        assert_eq!(std::fs::read(&dest).unwrap(), b"keep me");
    }

    #[test]
    fn test_copy_under_concurrent_writes() {
        let temp = TempDir::new().unwrap();
        let engine = Arc::new(open_initialized(&temp));

        let writer = {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                for i in 0..200 {
                    add_client(&engine, &format!("client-{}", i));
                }
            })
        };

        let dest = temp.path().join("copy.db");
        engine.consistent_copy(&dest).unwrap();
        writer.join().unwrap();

        let conn = Connection::open(&dest).unwrap();
        let check: String = conn
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))
            .unwrap();
        assert_eq!(check, "ok");
    }

    #[test]
    fn test_close_and_reopen() {
        let temp = TempDir::new().unwrap();
        let engine = open_initialized(&temp);
        add_client(&engine, "Ada");

        engine.close().unwrap();
        assert!(!engine.is_live());
        let err = engine.with_connection(|_| Ok(())).unwrap_err();
        assert!(matches!(err, VaultError::DatabaseClosed { .. }));

        engine.reopen().unwrap();
        assert!(engine.is_live());
        assert_eq!(client_count(engine.path()), 1);
    }

    #[test]
    fn test_open_or_closed_over_damaged_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("studio.db");
        std::fs::write(&path, vec![0xA5u8; 8192]).unwrap();

        assert!(StorageEngine::open(&path).is_err());
        let engine = StorageEngine::open_or_closed(&path);
        assert!(!engine.is_live());
        assert!(!engine.health().live);

        std::fs::remove_file(&path).unwrap();
        engine.reopen().unwrap();
        engine.initialize(&seed()).unwrap();
        assert!(engine.health().schema_compatible);
    }

    #[test]
    fn test_quiesce_times_out_while_held() {
        let temp = TempDir::new().unwrap();
        let engine = open_initialized(&temp);

        let held = engine.quiesce(Duration::from_millis(10)).unwrap();
        let err = engine.quiesce(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, VaultError::LockTimeout { lock: "database", .. }));
        drop(held);

        assert!(engine.quiesce(Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn test_health_reports_schema() {
        let temp = TempDir::new().unwrap();
        let engine = StorageEngine::open(temp.path().join("studio.db")).unwrap();

        let before = engine.health();
        assert!(before.live);
        assert!(!before.schema_compatible);

        engine.initialize(&seed()).unwrap();
        let after = engine.health();
        assert!(after.schema_compatible);
        assert_eq!(after.schema_version, Some(schema::SCHEMA_VERSION));

        engine.close().unwrap();
        assert!(!engine.health().live);
    }
}

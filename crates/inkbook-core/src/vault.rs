//! Vault: the process-wide storage context
//!
//! Created once at startup with `Vault::open` and torn down with
//! `Vault::shutdown`. Owns the storage engine, the snapshot lock, the lease
//! table and the extension registry, and is passed explicitly to whatever
//! needs it. Every operation checks the caller's role first.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::auth::{require, Action, Principal};
use crate::backup::retention::{self, RetentionPlan};
use crate::backup::{
    ArchiveExporter, ArchiveReport, CancelToken, RestoreCoordinator, RestoreReport,
    RestoreRequest, RestoreTarget, RetentionPolicy, RetentionReport, Snapshot, SnapshotLeases,
    SnapshotManager,
};
use crate::config::Config;
use crate::error::{IoContext, VaultError, VaultResult};
use crate::extension::{Extension, ExtensionContext, ExtensionRegistry};
use crate::storage::{AdminSeed, InitResult, StorageEngine};

/// Readiness of the storage layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    /// A live connection is open
    pub live: bool,
    /// The schema matches this build
    pub schema_compatible: bool,
    pub schema_version: Option<i32>,
    pub database_path: PathBuf,
    pub snapshot_count: usize,
}

impl HealthStatus {
    pub fn is_ready(&self) -> bool {
        self.live && self.schema_compatible
    }
}

/// Options for `Vault::restore`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreOptions {
    /// Snapshot the current database before replacing it
    pub safety_snapshot: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            safety_snapshot: true,
        }
    }
}

pub struct Vault {
    config: Config,
    engine: StorageEngine,
    snapshots: SnapshotManager,
    exporter: ArchiveExporter,
    restorer: RestoreCoordinator,
    extensions: ExtensionRegistry,
    seed: AdminSeed,
    init: Option<InitResult>,
}

impl Vault {
    /// Open the database (creating it if needed) and run the initializer
    pub fn open(config: Config) -> VaultResult<Self> {
        Self::open_with_extensions(config, Vec::new())
    }

    /// `open`, registering `extensions` once the database is ready
    pub fn open_with_extensions(
        config: Config,
        extensions: Vec<Arc<dyn Extension>>,
    ) -> VaultResult<Self> {
        Self::create_dirs(&config)?;
        let engine = StorageEngine::open(config.database_path())?;
        let seed = AdminSeed::from_config(&config);
        let init = engine.initialize(&seed)?;

        let mut vault = Self::assemble(config, engine, seed, Some(init));
        for extension in extensions {
            vault.register_extension(extension)?;
        }

        info!(
            "Vault open at {:?} (schema version {}, {})",
            vault.config.data_dir,
            init.schema_version,
            if init.created { "created" } else { "existing" }
        );
        Ok(vault)
    }

    /// Open without requiring a usable live database
    ///
    /// For restoring over a damaged or incompatible file: the engine starts
    /// closed when the file cannot be opened, and an initializer failure is
    /// logged instead of returned. A restore replaces the file and confirms
    /// the result.
    pub fn open_for_recovery(config: Config) -> VaultResult<Self> {
        Self::create_dirs(&config)?;
        let engine = StorageEngine::open_or_closed(config.database_path());
        let seed = AdminSeed::from_config(&config);

        let init = if engine.is_live() {
            match engine.initialize(&seed) {
                Ok(init) => Some(init),
                Err(e) => {
                    warn!("Live database not usable ({}); open for restore only", e);
                    None
                }
            }
        } else {
            None
        };

        info!(
            "Vault open for recovery at {:?} (database {})",
            config.data_dir,
            if init.is_some() { "ready" } else { "unusable" }
        );
        Ok(Self::assemble(config, engine, seed, init))
    }

    fn create_dirs(config: &Config) -> VaultResult<()> {
        for dir in [config.database_dir(), config.backup_dir()] {
            fs::create_dir_all(&dir).at(&dir)?;
        }
        Ok(())
    }

    fn assemble(
        config: Config,
        engine: StorageEngine,
        seed: AdminSeed,
        init: Option<InitResult>,
    ) -> Self {
        let leases = SnapshotLeases::new();
        let snapshots =
            SnapshotManager::new(config.backup_dir(), config.lock_timeout(), leases.clone());
        let exporter = ArchiveExporter::new(leases, config.asset_dirs.clone());
        let restorer = RestoreCoordinator::new(config.lock_timeout());

        Self {
            config,
            engine,
            snapshots,
            exporter,
            restorer,
            extensions: ExtensionRegistry::new(),
            seed,
            init,
        }
    }

    /// Close the live database
    pub fn shutdown(self) -> VaultResult<()> {
        self.engine.close()?;
        info!("Vault shut down");
        Ok(())
    }

    pub fn register_extension(&mut self, extension: Arc<dyn Extension>) -> VaultResult<()> {
        let ctx = ExtensionContext {
            data_dir: self.config.data_dir.clone(),
            database_path: self.engine.path().to_path_buf(),
            backup_dir: self.snapshots.dir().to_path_buf(),
        };
        self.extensions.register(extension, &ctx)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &StorageEngine {
        &self.engine
    }

    pub fn extensions(&self) -> &ExtensionRegistry {
        &self.extensions
    }

    /// Result of the initializer run while opening
    ///
    /// `None` only after `open_for_recovery` over an unusable database.
    pub fn startup_init(&self) -> Option<InitResult> {
        self.init
    }

    /// Re-run the initializer; a no-op on a current database
    pub fn initialize_database(&self, principal: &Principal) -> VaultResult<InitResult> {
        require(principal, Action::InitializeDatabase)?;
        self.engine.initialize(&self.seed)
    }

    pub fn create_snapshot(&self, principal: &Principal) -> VaultResult<Snapshot> {
        require(principal, Action::CreateSnapshot)?;
        let snapshot = self.snapshots.create_snapshot(&self.engine)?;
        self.extensions.notify_snapshot_created(&snapshot);
        Ok(snapshot)
    }

    /// Snapshots, newest first
    pub fn list_snapshots(&self, principal: &Principal) -> VaultResult<Vec<Snapshot>> {
        require(principal, Action::ListSnapshots)?;
        self.snapshots.list_snapshots()
    }

    /// Check one snapshot (`latest` for the newest) against its checksum
    pub fn verify_snapshot(&self, principal: &Principal, id: &str) -> VaultResult<Snapshot> {
        require(principal, Action::VerifySnapshot)?;
        let snapshot = self.snapshots.resolve(id)?;
        let _lease = self
            .snapshots
            .leases()
            .acquire_read(&snapshot.id)
            .ok_or_else(|| VaultError::SnapshotNotFound {
                id: snapshot.id.clone(),
            })?;
        snapshot.verify()?;
        Ok(snapshot)
    }

    /// What `apply_retention` would delete, without deleting
    pub fn plan_retention(
        &self,
        principal: &Principal,
        policy: Option<RetentionPolicy>,
    ) -> VaultResult<RetentionPlan> {
        require(principal, Action::ApplyRetention)?;
        let policy = policy.unwrap_or(self.config.retention);
        let snapshots = self.snapshots.list_snapshots()?;
        Ok(retention::plan_retention(&snapshots, &policy, Utc::now()))
    }

    /// Prune snapshots; the configured policy when `policy` is `None`
    pub fn apply_retention(
        &self,
        principal: &Principal,
        policy: Option<RetentionPolicy>,
    ) -> VaultResult<RetentionReport> {
        require(principal, Action::ApplyRetention)?;
        let policy = policy.unwrap_or(self.config.retention);
        let snapshots = self.snapshots.list_snapshots()?;
        Ok(retention::apply_retention(
            &snapshots,
            &policy,
            self.snapshots.leases(),
        ))
    }

    /// Export snapshots by id (all of them when `ids` is empty)
    ///
    /// Without `output` the archive goes to
    /// `<data_dir>/export/inkbook-export-<timestamp>.zip`.
    pub fn export_archive(
        &self,
        principal: &Principal,
        ids: &[String],
        output: Option<PathBuf>,
        cancel: &CancelToken,
    ) -> VaultResult<ArchiveReport> {
        require(principal, Action::ExportArchive)?;

        let snapshots = if ids.is_empty() {
            self.snapshots.list_snapshots()?
        } else {
            ids.iter()
                .map(|id| self.snapshots.resolve(id))
                .collect::<VaultResult<Vec<_>>>()?
        };
        if snapshots.is_empty() {
            return Err(VaultError::EmptyArchive { requested: 0 });
        }

        let output = output.unwrap_or_else(|| {
            self.config.export_dir().join(format!(
                "inkbook-export-{}.zip",
                Utc::now().format("%Y%m%d-%H%M%S")
            ))
        });
        self.exporter.export_archive(&snapshots, &output, cancel)
    }

    /// Replace the live database with a snapshot or archived snapshot
    pub fn restore(
        &self,
        principal: &Principal,
        request: &RestoreRequest,
        options: RestoreOptions,
    ) -> VaultResult<RestoreReport> {
        require(principal, Action::Restore)?;

        // Pin `latest` before the safety snapshot becomes the newest one
        let mut request = request.clone();
        if let RestoreTarget::Snapshot(id) = &request.target {
            let resolved = self.snapshots.resolve(id)?;
            request.target = RestoreTarget::Snapshot(resolved.id);
        }

        let safety_snapshot = if options.safety_snapshot {
            match self.safety_snapshot() {
                Ok(snapshot) => {
                    info!("Safety snapshot {} taken before restore", snapshot.id);
                    self.extensions.notify_snapshot_created(&snapshot);
                    Some(snapshot.id)
                }
                Err(e) => {
                    warn!(
                        "Safety snapshot failed ({}); the replaced database file is kept instead",
                        e
                    );
                    request.keep_previous = true;
                    None
                }
            }
        } else {
            None
        };

        let mut report = self
            .restorer
            .restore(&self.engine, &self.snapshots, &request, &self.seed)?;
        report.safety_snapshot = safety_snapshot;

        self.extensions.notify_restore_completed(&report);
        Ok(report)
    }

    /// Liveness and schema compatibility
    pub fn health(&self, principal: &Principal) -> VaultResult<HealthStatus> {
        require(principal, Action::ReadHealth)?;
        Ok(self.health_status())
    }

    /// Storage is live and schema-compatible
    pub fn is_ready(&self) -> bool {
        let health = self.engine.health();
        health.live && health.schema_compatible
    }

    fn health_status(&self) -> HealthStatus {
        let engine = self.engine.health();
        let snapshot_count = match self.snapshots.list_snapshots() {
            Ok(list) => list.len(),
            Err(e) => {
                warn!("Could not list snapshots: {}", e);
                0
            }
        };
        HealthStatus {
            live: engine.live,
            schema_compatible: engine.schema_compatible,
            schema_version: engine.schema_version,
            database_path: self.engine.path().to_path_buf(),
            snapshot_count,
        }
    }

    /// Snapshot taken before a restore; waits out a same-second collision
    fn safety_snapshot(&self) -> VaultResult<Snapshot> {
        match self.snapshots.create_snapshot(&self.engine) {
            Err(VaultError::DuplicateSnapshot { id, .. }) => {
                warn!("Snapshot {} already exists; retrying safety snapshot", id);
                std::thread::sleep(Duration::from_millis(1_050));
                self.snapshots.create_snapshot(&self.engine)
            }
            other => other,
        }
    }
}

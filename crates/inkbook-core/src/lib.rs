//! inkbook Core Library
//!
//! Database lifecycle and backup engine for the inkbook studio manager. All
//! studio data (clients, artists, sessions, users) lives in one SQLite file;
//! this crate initializes it, takes consistent snapshots of it, prunes and
//! exports those snapshots, and restores them with rollback.
//!
//! # Architecture
//!
//! - **StorageEngine**: sole owner of the live connection (WAL mode)
//! - **SnapshotManager**: online-backup copies, checksummed, renamed into place
//! - **Retention**: count-then-age pruning that never removes the newest
//! - **ArchiveExporter**: zip bundles with a checksum manifest
//! - **RestoreCoordinator**: validate, stage, swap, confirm; rolls back on failure
//! - **Vault**: ties the above together behind role checks
//!
//! # Quick Start
//!
//! ```text
//! let vault = Vault::open(Config::load()?)?;
//! let admin = Principal::system();
//!
//! let snapshot = vault.create_snapshot(&admin)?;
//! vault.apply_retention(&admin, None)?;
//! vault.restore(&admin, &RestoreRequest::snapshot(&snapshot.id), RestoreOptions::default())?;
//! ```
//!
//! # Modules
//!
//! - `vault`: application context and invocation surface (main entry point)
//! - `storage`: engine, schema and filesystem primitives
//! - `backup`: snapshots, retention, archives and restore
//! - `auth`: role checks
//! - `extension`: extension registry
//! - `job`: the scheduled backup job
//! - `config`: application configuration

pub mod auth;
pub mod backup;
pub mod config;
pub mod error;
pub mod extension;
pub mod job;
pub mod storage;
pub mod vault;

pub use auth::{authorize, Action, Decision, Principal, Role};
pub use backup::{
    ArchiveReport, CancelToken, Manifest, RestorePhase, RestoreReport, RestoreRequest,
    RestoreTarget, RetentionPolicy, RetentionReport, Snapshot,
};
pub use config::Config;
pub use error::{ErrorKind, VaultError, VaultResult};
pub use extension::{Capability, Extension, ExtensionContext, ExtensionRegistry};
pub use job::{run_backup_job, BackupJobReport};
pub use storage::{InitResult, StorageEngine};
pub use vault::{HealthStatus, RestoreOptions, Vault};

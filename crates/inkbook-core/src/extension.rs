//! Extension points
//!
//! Extensions are registered once at startup. Each declares the hooks it
//! wants; the registry only calls hooks an extension declared.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::backup::{RestoreReport, Snapshot};
use crate::error::{VaultError, VaultResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Notified after each successful snapshot
    SnapshotObserver,
    /// Notified after each successful restore
    RestoreObserver,
}

/// What an extension gets to see when it registers
#[derive(Debug, Clone)]
pub struct ExtensionContext {
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub backup_dir: PathBuf,
}

pub trait Extension: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> BTreeSet<Capability>;

    /// Called once when the extension is added to the registry
    fn register(&self, _ctx: &ExtensionContext) -> VaultResult<()> {
        Ok(())
    }

    fn on_snapshot_created(&self, _snapshot: &Snapshot) {}

    fn on_restore_completed(&self, _report: &RestoreReport) {}
}

/// Registered extensions keyed by name
#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: BTreeMap<String, (BTreeSet<Capability>, Arc<dyn Extension>)>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an extension; names must be unique
    pub fn register(
        &mut self,
        extension: Arc<dyn Extension>,
        ctx: &ExtensionContext,
    ) -> VaultResult<()> {
        let name = extension.name().to_string();
        if name.trim().is_empty() {
            return Err(VaultError::Extension("extension name is empty".to_string()));
        }
        if self.extensions.contains_key(&name) {
            return Err(VaultError::Extension(format!(
                "extension '{}' is already registered",
                name
            )));
        }

        extension.register(ctx)?;
        let capabilities = extension.capabilities();
        info!("Registered extension '{}' ({:?})", name, capabilities);
        self.extensions.insert(name, (capabilities, extension));
        Ok(())
    }

    /// Capability sets by extension name
    pub fn capabilities(&self) -> BTreeMap<String, BTreeSet<Capability>> {
        self.extensions
            .iter()
            .map(|(name, (caps, _))| (name.clone(), caps.clone()))
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.extensions.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub(crate) fn notify_snapshot_created(&self, snapshot: &Snapshot) {
        for ext in self.with_capability(Capability::SnapshotObserver) {
            debug!("Notifying '{}' of snapshot {}", ext.name(), snapshot.id);
            ext.on_snapshot_created(snapshot);
        }
    }

    pub(crate) fn notify_restore_completed(&self, report: &RestoreReport) {
        for ext in self.with_capability(Capability::RestoreObserver) {
            debug!("Notifying '{}' of restore {}", ext.name(), report.snapshot_id);
            ext.on_restore_completed(report);
        }
    }

    fn with_capability(&self, capability: Capability) -> impl Iterator<Item = &Arc<dyn Extension>> {
        self.extensions
            .values()
            .filter(move |(caps, _)| caps.contains(&capability))
            .map(|(_, ext)| ext)
    }
}

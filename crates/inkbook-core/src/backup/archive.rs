//! Zip archives of validated snapshots
//!
//! Layout:
//!
//! ```text
//! manifest.json
//! snapshots/<id>.snapshot
//! assets/<folder>/<relative path>
//! ```
//!
//! The manifest records each snapshot's checksum so a restore can verify an
//! extracted entry without trusting the archive's own CRCs.

use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::checksum::sha256_file;
use super::lease::{ReadLease, SnapshotLeases};
use super::snapshot::Snapshot;
use super::CancelToken;
use crate::error::{IoContext, VaultError, VaultResult};
use crate::storage::persistence::{remove_if_exists, sync_dir, sync_file, temp_path_for};

/// Name of the manifest entry
pub const MANIFEST_NAME: &str = "manifest.json";

/// Current manifest format
pub const FORMAT_VERSION: u32 = 1;

/// One snapshot recorded in an archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub size_bytes: u64,
}

impl ManifestEntry {
    /// Name of the snapshot's entry inside the archive
    pub fn entry_name(&self) -> String {
        format!("snapshots/{}.snapshot", self.id)
    }
}

/// Contents of `manifest.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub exported_at: DateTime<Utc>,
    pub snapshots: Vec<ManifestEntry>,
    /// Asset folders bundled under `assets/`
    #[serde(default)]
    pub assets: Vec<String>,
}

impl Manifest {
    /// Entry for `id`, or the newest entry when `id` is `None`
    pub fn select(&self, id: Option<&str>) -> Option<&ManifestEntry> {
        match id {
            Some(id) => self.snapshots.iter().find(|e| e.id == id),
            None => self
                .snapshots
                .iter()
                .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))),
        }
    }
}

/// Snapshot left out of an archive, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExcludedSnapshot {
    pub id: String,
    pub reason: String,
}

/// Result of an export
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveReport {
    pub path: PathBuf,
    pub included: Vec<String>,
    pub excluded: Vec<ExcludedSnapshot>,
    pub manifest: Manifest,
}

/// Writes snapshot archives
pub struct ArchiveExporter {
    leases: SnapshotLeases,
    asset_dirs: Vec<PathBuf>,
}

impl ArchiveExporter {
    pub fn new(leases: SnapshotLeases, asset_dirs: Vec<PathBuf>) -> Self {
        Self { leases, asset_dirs }
    }

    /// Bundle every valid snapshot in `snapshots` into `output_path`
    ///
    /// Corrupt or unavailable snapshots are excluded and reported; if none
    /// remain, nothing is written and `EmptyArchive` is returned.
    pub fn export_archive(
        &self,
        snapshots: &[Snapshot],
        output_path: &Path,
        cancel: &CancelToken,
    ) -> VaultResult<ArchiveReport> {
        if output_path.exists() {
            return Err(VaultError::from_io(
                io::Error::new(io::ErrorKind::AlreadyExists, "archive already exists"),
                output_path,
            ));
        }

        // Leases stay held until the archive is complete
        let mut included: Vec<(&Snapshot, ReadLease)> = Vec::new();
        let mut excluded = Vec::new();

        for snapshot in snapshots {
            cancel.check("export")?;

            let Some(lease) = self.leases.acquire_read(&snapshot.id) else {
                warn!("Excluding snapshot {}: being deleted", snapshot.id);
                excluded.push(ExcludedSnapshot {
                    id: snapshot.id.clone(),
                    reason: "snapshot is being deleted".to_string(),
                });
                continue;
            };

            match snapshot.verify() {
                Ok(()) => included.push((snapshot, lease)),
                Err(e) => {
                    let reason = match e {
                        VaultError::CorruptSnapshot { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    warn!("Excluding snapshot {}: {}", snapshot.id, reason);
                    excluded.push(ExcludedSnapshot {
                        id: snapshot.id.clone(),
                        reason,
                    });
                }
            }
        }

        if included.is_empty() {
            return Err(VaultError::EmptyArchive {
                requested: snapshots.len(),
            });
        }

        let assets = self.asset_entries();
        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            exported_at: Utc::now(),
            snapshots: included
                .iter()
                .map(|(s, _)| ManifestEntry {
                    id: s.id.clone(),
                    checksum: s.checksum.clone(),
                    created_at: s.created_at,
                    size_bytes: s.size_bytes,
                })
                .collect(),
            assets: assets.iter().map(|(_, name)| name.clone()).collect(),
        };

        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }
        let temp_path = temp_path_for(output_path);

        let written = self.write_archive(&temp_path, &manifest, &included, &assets, cancel);
        let result = written.and_then(|()| {
            sync_file(&temp_path)?;
            fs::rename(&temp_path, output_path).at(output_path)?;
            if let Some(parent) = output_path.parent() {
                sync_dir(parent);
            }
            Ok(())
        });
        if let Err(e) = result {
            remove_if_exists(&temp_path);
            return Err(e);
        }

        let included_ids: Vec<String> = included.iter().map(|(s, _)| s.id.clone()).collect();
        info!(
            "Exported {} snapshot(s) to {:?} ({} excluded)",
            included_ids.len(),
            output_path,
            excluded.len()
        );

        Ok(ArchiveReport {
            path: output_path.to_path_buf(),
            included: included_ids,
            excluded,
            manifest,
        })
    }

    fn write_archive(
        &self,
        temp_path: &Path,
        manifest: &Manifest,
        included: &[(&Snapshot, ReadLease)],
        assets: &[(&Path, String)],
        cancel: &CancelToken,
    ) -> VaultResult<()> {
        let file = File::create(temp_path).at(temp_path)?;
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        zip.start_file(MANIFEST_NAME, options)?;
        zip.write_all(&serde_json::to_vec_pretty(manifest)?)
            .at(temp_path)?;

        for (snapshot, _lease) in included {
            cancel.check("export")?;

            let entry = format!("snapshots/{}.snapshot", snapshot.id);
            let large = snapshot.size_bytes >= u64::from(u32::MAX);
            zip.start_file(entry, options.large_file(large))?;
            let mut source = BufReader::new(File::open(&snapshot.path).at(&snapshot.path)?);
            io::copy(&mut source, &mut zip).at(&snapshot.path)?;
            debug!("Added snapshot {} to archive", snapshot.id);
        }

        for (dir, name) in assets {
            cancel.check("export")?;
            add_dir(&mut zip, dir, &format!("assets/{}", name), options)?;
        }

        zip.finish()?;
        Ok(())
    }

    /// Existing asset folders with their archive names
    ///
    /// Folders sharing a final name get `-2`, `-3`... in configuration order.
    fn asset_entries(&self) -> Vec<(&Path, String)> {
        let mut entries: Vec<(&Path, String)> = Vec::new();
        for dir in &self.asset_dirs {
            if !dir.is_dir() {
                warn!("Asset folder {:?} does not exist; skipping", dir);
                continue;
            }
            let Some(folder) = asset_folder_name(dir) else {
                continue;
            };

            let mut name = folder.clone();
            let mut n = 2;
            while entries.iter().any(|(_, taken)| *taken == name) {
                name = format!("{}-{}", folder, n);
                n += 1;
            }
            entries.push((dir.as_path(), name));
        }
        entries
    }
}

fn asset_folder_name(dir: &Path) -> Option<String> {
    dir.file_name().map(|n| n.to_string_lossy().into_owned())
}

fn add_dir(
    zip: &mut ZipWriter<File>,
    dir: &Path,
    prefix: &str,
    options: SimpleFileOptions,
) -> VaultResult<()> {
    let mut entries = fs::read_dir(dir)
        .at(dir)?
        .collect::<io::Result<Vec<_>>>()
        .at(dir)?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let name = format!("{}/{}", prefix, entry.file_name().to_string_lossy());
        let file_type = entry.file_type().at(&path)?;

        if file_type.is_dir() {
            add_dir(zip, &path, &name, options)?;
        } else if file_type.is_file() {
            zip.start_file(name, options)?;
            let mut source = BufReader::new(File::open(&path).at(&path)?);
            io::copy(&mut source, zip).at(&path)?;
        }
    }
    Ok(())
}

/// Read `manifest.json` from an archive
pub fn read_manifest(archive_path: &Path) -> VaultResult<Manifest> {
    let file = File::open(archive_path).at(archive_path)?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;
    let entry = archive.by_name(MANIFEST_NAME)?;
    Ok(serde_json::from_reader(entry)?)
}

/// Extract one snapshot from an archive into `dest` and verify it
///
/// Picks `snapshot_id`, or the newest entry in the manifest when `None`.
/// On checksum mismatch `dest` is removed and `CorruptSnapshot` returned.
pub fn extract_snapshot(
    archive_path: &Path,
    snapshot_id: Option<&str>,
    dest: &Path,
) -> VaultResult<ManifestEntry> {
    let manifest = read_manifest(archive_path)?;
    let entry = manifest
        .select(snapshot_id)
        .cloned()
        .ok_or_else(|| VaultError::SnapshotNotFound {
            id: snapshot_id
                .map(str::to_string)
                .unwrap_or_else(|| archive_path.display().to_string()),
        })?;

    let file = File::open(archive_path).at(archive_path)?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;
    let mut source = archive
        .by_name(&entry.entry_name())
        .map_err(|e| VaultError::corrupt(&entry.id, format!("archive entry unreadable: {}", e)))?;

    let result = (|| -> VaultResult<()> {
        let mut out = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dest)
            .at(dest)?;
        io::copy(&mut source, &mut out).map_err(|e| {
            VaultError::corrupt(&entry.id, format!("archive entry unreadable: {}", e))
        })?;
        out.sync_all().at(dest)?;

        let actual = sha256_file(dest)?;
        if actual != entry.checksum {
            return Err(VaultError::corrupt(
                &entry.id,
                format!(
                    "checksum mismatch against manifest: expected {}, found {}",
                    entry.checksum, actual
                ),
            ));
        }
        Ok(())
    })();

    if let Err(e) = result {
        remove_if_exists(dest);
        return Err(e);
    }

    debug!("Extracted snapshot {} from {:?}", entry.id, archive_path);
    Ok(entry)
}

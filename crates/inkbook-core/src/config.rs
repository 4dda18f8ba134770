//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/inkbook/config.toml)
//! 3. Environment variables (INKBOOK_* prefix)
//!
//! Environment variables take precedence over config file values.
//!
//! ## Data layout
//!
//! ```text
//! <data_dir>/
//!   db/inkbook.db             live database
//!   backups/<id>.snapshot     snapshot files (+ .snapshot.json sidecars)
//!   export/<name>.zip         exported archives
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::backup::RetentionPolicy;

/// Environment variable prefix
const ENV_PREFIX: &str = "INKBOOK";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory for the database, backups and exports
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// File name of the live database inside `<data_dir>/db`
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// Snapshot retention policy
    #[serde(default)]
    pub retention: RetentionPolicy,

    /// How long to wait for the snapshot or restore lock
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,

    /// Folders bundled into exported archives (client photos, consent forms)
    #[serde(default)]
    pub asset_dirs: Vec<PathBuf>,

    /// Username of the administrator seeded into a fresh database
    #[serde(default = "default_admin_username")]
    pub admin_username: String,

    /// Initial administrator password; must be changed on first login
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_password: Option<String>,

    /// Log file path (stderr when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_file: default_database_file(),
            retention: RetentionPolicy::default(),
            lock_timeout_secs: default_lock_timeout_secs(),
            asset_dirs: Vec::new(),
            admin_username: default_admin_username(),
            admin_password: None,
            log_file: None,
        }
    }
}

impl Config {
    /// Configuration rooted at `data_dir` with every other value defaulted
    ///
    /// Does not read the config file or the environment; used by tests and
    /// by callers that build an isolated database.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (INKBOOK_DATA_DIR, INKBOOK_LOCK_TIMEOUT_SECS, ...)
    /// 2. Config file (~/.config/inkbook/config.toml or INKBOOK_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration, preferring an explicit `--config` path
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var(format!("{}_DATABASE_FILE", ENV_PREFIX)) {
            if !val.is_empty() {
                self.database_file = val;
            }
        }

        if let Ok(val) = std::env::var(format!("{}_LOCK_TIMEOUT_SECS", ENV_PREFIX)) {
            self.lock_timeout_secs = val
                .parse()
                .with_context(|| format!("Invalid {}_LOCK_TIMEOUT_SECS: {:?}", ENV_PREFIX, val))?;
        }

        if let Ok(val) = std::env::var(format!("{}_RETENTION_MAX_COUNT", ENV_PREFIX)) {
            self.retention.max_count = val.parse().with_context(|| {
                format!("Invalid {}_RETENTION_MAX_COUNT: {:?}", ENV_PREFIX, val)
            })?;
        }

        if let Ok(val) = std::env::var(format!("{}_RETENTION_MAX_AGE_DAYS", ENV_PREFIX)) {
            self.retention.max_age_days = val.parse().with_context(|| {
                format!("Invalid {}_RETENTION_MAX_AGE_DAYS: {:?}", ENV_PREFIX, val)
            })?;
        }

        if let Ok(val) = std::env::var(format!("{}_ADMIN_PASSWORD", ENV_PREFIX)) {
            self.admin_password = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = std::env::var(format!("{}_LOG_FILE", ENV_PREFIX)) {
            self.log_file = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }

        Ok(())
    }

    /// Save configuration to the default config file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with INKBOOK_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("inkbook")
            .join("config.toml")
    }

    /// Directory holding the live database
    pub fn database_dir(&self) -> PathBuf {
        self.data_dir.join("db")
    }

    /// Path to the live database file
    pub fn database_path(&self) -> PathBuf {
        self.database_dir().join(&self.database_file)
    }

    /// Directory holding snapshots
    pub fn backup_dir(&self) -> PathBuf {
        self.data_dir.join("backups")
    }

    /// Directory holding exported archives
    pub fn export_dir(&self) -> PathBuf {
        self.data_dir.join("export")
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// Ensure the database, backup and export directories exist
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.database_dir(), self.backup_dir(), self.export_dir()] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {:?}", dir))?;
        }
        Ok(())
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("inkbook")
}

fn default_database_file() -> String {
    "inkbook.db".to_string()
}

fn default_lock_timeout_secs() -> u64 {
    30
}

fn default_admin_username() -> String {
    "admin".to_string()
}

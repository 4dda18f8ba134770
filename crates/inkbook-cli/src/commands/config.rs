//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use inkbook_core::Config;

use crate::output::{Output, OutputFormat};

const VALID_KEYS: &str = "data_dir, database_file, lock_timeout_secs, retention.max_count, \
                          retention.max_age_days, admin_username, log_file, asset_dirs";

fn optional(value: &str) -> Option<String> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value.to_string())
    }
}

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "database_file": config.database_file,
                    "database_path": config.database_path(),
                    "lock_timeout_secs": config.lock_timeout_secs,
                    "retention": config.retention,
                    "admin_username": config.admin_username,
                    "admin_password_set": config.admin_password.is_some(),
                    "asset_dirs": config.asset_dirs,
                    "log_file": config.log_file
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            let asset_dirs = if config.asset_dirs.is_empty() {
                "(none)".to_string()
            } else {
                config
                    .asset_dirs
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            println!("Configuration:");
            println!("  data_dir:               {}", config.data_dir.display());
            println!("  database_file:          {}", config.database_file);
            println!("  lock_timeout_secs:      {}", config.lock_timeout_secs);
            println!("  retention.max_count:    {}", config.retention.max_count);
            println!("  retention.max_age_days: {}", config.retention.max_age_days);
            println!("  admin_username:         {}", config.admin_username);
            println!(
                "  admin_password:         {}",
                if config.admin_password.is_some() {
                    "(set)"
                } else {
                    "(not set)"
                }
            );
            println!("  asset_dirs:             {}", asset_dirs);
            println!(
                "  log_file:               {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Apply one `key = value` assignment
fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "data_dir" => {
            config.data_dir = value.into();
        }
        "database_file" => {
            if value.is_empty() || value.contains(['/', '\\']) {
                bail!("database_file must be a plain file name");
            }
            config.database_file = value.to_string();
        }
        "lock_timeout_secs" => {
            config.lock_timeout_secs = value
                .parse()
                .context("Invalid value for lock_timeout_secs. Use a number of seconds.")?;
        }
        "retention.max_count" => {
            config.retention.max_count = value
                .parse()
                .context("Invalid value for retention.max_count. Use a whole number.")?;
        }
        "retention.max_age_days" => {
            config.retention.max_age_days = value
                .parse()
                .context("Invalid value for retention.max_age_days. Use a whole number.")?;
        }
        "admin_username" => {
            if value.trim().is_empty() {
                bail!("admin_username cannot be empty");
            }
            config.admin_username = value.to_string();
        }
        "log_file" => {
            config.log_file = optional(value).map(PathBuf::from);
        }
        "asset_dirs" => {
            config.asset_dirs = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty() && *s != "none")
                .map(PathBuf::from)
                .collect();
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                VALID_KEYS
            );
        }
    }
    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply(&mut config, &key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_retention_keys() {
        let mut config = Config::with_data_dir("/tmp/inkbook");
        apply(&mut config, "retention.max_count", "3").unwrap();
        apply(&mut config, "retention.max_age_days", "30").unwrap();

        assert_eq!(config.retention.max_count, 3);
        assert_eq!(config.retention.max_age_days, 30);
        assert!(apply(&mut config, "retention.max_count", "-1").is_err());
    }

    #[test]
    fn test_apply_lists_and_optionals() {
        let mut config = Config::with_data_dir("/tmp/inkbook");
        apply(&mut config, "asset_dirs", "/srv/photos, /srv/consent-forms").unwrap();
        assert_eq!(
            config.asset_dirs,
            vec![
                PathBuf::from("/srv/photos"),
                PathBuf::from("/srv/consent-forms")
            ]
        );

        apply(&mut config, "log_file", "/tmp/inkbook.log").unwrap();
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/inkbook.log")));
        apply(&mut config, "log_file", "none").unwrap();
        assert_eq!(config.log_file, None);
    }

    #[test]
    fn test_apply_rejects_bad_keys_and_values() {
        let mut config = Config::with_data_dir("/tmp/inkbook");
        let err = apply(&mut config, "sync_url", "ws://x").unwrap_err();
        assert!(err.to_string().contains("Unknown configuration key"));
        assert!(apply(&mut config, "database_file", "../studio.db").is_err());
        assert!(apply(&mut config, "admin_username", " ").is_err());
    }

    #[test]
    fn test_set_persists_to_given_path() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        let output = Output::new(OutputFormat::Quiet);

        set(
            "lock_timeout_secs".to_string(),
            "5".to_string(),
            Some(&path),
            &output,
        )
        .unwrap();

        let saved = Config::load_from_path(&path).unwrap();
        assert_eq!(saved.lock_timeout_secs, 5);
    }
}

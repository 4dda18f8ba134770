//! Status command handler

use anyhow::Result;

use inkbook_core::{Principal, Vault};

use crate::output::{format_size, Output, OutputFormat};

/// Show database health
pub fn show(vault: &Vault, principal: &Principal, output: &Output) -> Result<()> {
    let health = vault.health(principal)?;
    let config = vault.config();

    match output.format {
        OutputFormat::Json => output.json(&serde_json::json!({
            "ready": health.is_ready(),
            "health": health,
            "data_dir": config.data_dir,
            "backup_dir": config.backup_dir(),
            "retention": config.retention,
            "extensions": vault.extensions().capabilities(),
        }))?,
        OutputFormat::Quiet => {
            println!("{}", if health.is_ready() { "ready" } else { "not ready" });
        }
        OutputFormat::Human => {
            let size = std::fs::metadata(&health.database_path)
                .map(|m| format_size(m.len()))
                .unwrap_or_else(|_| "(missing)".to_string());

            println!("inkbook Status");
            println!("==============");
            println!();
            println!("Database:");
            println!("  Location: {}", health.database_path.display());
            println!("  Size:     {}", size);
            println!("  Live:     {}", if health.live { "yes" } else { "no" });
            println!(
                "  Schema:   {}",
                match (health.schema_version, health.schema_compatible) {
                    (Some(v), true) => format!("version {}", v),
                    (Some(v), false) => format!("version {} (incompatible)", v),
                    (None, _) => "(not initialized)".to_string(),
                }
            );
            println!();
            println!("Backups:");
            println!("  Location:  {}", config.backup_dir().display());
            println!("  Snapshots: {}", health.snapshot_count);
            println!(
                "  Retention: newest {}, or younger than {} day(s)",
                config.retention.max_count, config.retention.max_age_days
            );
            if !vault.extensions().is_empty() {
                println!();
                println!("Extensions: {}", vault.extensions().names().join(", "));
            }
        }
    }

    Ok(())
}

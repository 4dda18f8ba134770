//! Init command handler

use anyhow::Result;

use inkbook_core::{Principal, Vault};

use crate::output::{Output, OutputFormat};

/// Run the database initializer
///
/// Opening the vault already initializes; this reports what happened and is
/// safe to repeat.
pub fn run(vault: &Vault, principal: &Principal, output: &Output) -> Result<()> {
    let opened = vault.startup_init();
    let result = vault.initialize_database(principal)?;
    let created = opened.is_some_and(|init| init.created) || result.created;

    match output.format {
        OutputFormat::Json => output.json(&serde_json::json!({
            "created": created,
            "schema_version": result.schema_version,
            "database_path": vault.engine().path(),
        }))?,
        OutputFormat::Quiet => println!("{}", result.schema_version),
        OutputFormat::Human => {
            if created {
                output.success(&format!(
                    "Created database at {}",
                    vault.engine().path().display()
                ));
                println!("  Administrator: {}", vault.config().admin_username);
                if vault.config().admin_password.is_none() {
                    println!("  Password:      same as username (set admin_password to change it)");
                }
            } else {
                output.success("Database already initialized");
            }
            println!("  Schema version: {}", result.schema_version);
        }
    }

    Ok(())
}

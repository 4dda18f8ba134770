//! Snapshot command handlers

use anyhow::Result;

use inkbook_core::{Principal, Vault};

use crate::output::{format_size, Output, OutputFormat};

/// Take a snapshot of the live database
pub fn create(vault: &Vault, principal: &Principal, output: &Output) -> Result<()> {
    let snapshot = vault.create_snapshot(principal)?;

    match output.format {
        OutputFormat::Human => {
            output.success(&format!(
                "Created snapshot {} ({})",
                snapshot.id,
                format_size(snapshot.size_bytes)
            ));
            println!("  {}", snapshot.path.display());
        }
        _ => output.print_snapshot(&snapshot)?,
    }
    Ok(())
}

/// List snapshots, newest first
pub fn list(vault: &Vault, principal: &Principal, output: &Output) -> Result<()> {
    let snapshots = vault.list_snapshots(principal)?;
    output.print_snapshots(&snapshots)
}

/// Recompute a snapshot's checksum and compare it with the recorded one
pub fn verify(vault: &Vault, principal: &Principal, id: &str, output: &Output) -> Result<()> {
    let snapshot = vault.verify_snapshot(principal, id)?;

    match output.format {
        OutputFormat::Json => output.json(&serde_json::json!({
            "status": "valid",
            "snapshot": snapshot,
        }))?,
        OutputFormat::Quiet => println!("{}", snapshot.id),
        OutputFormat::Human => {
            output.success(&format!("Snapshot {} is intact", snapshot.id));
            println!("  Checksum: {}", snapshot.checksum);
        }
    }
    Ok(())
}

//! Export command handler

use std::path::PathBuf;

use anyhow::Result;
use tracing::info;

use inkbook_core::{CancelToken, Principal, Vault};

use crate::output::{format_size, Output, OutputFormat};

/// Export snapshots to a zip archive; Ctrl-C cancels between snapshots
pub async fn run(
    vault: &Vault,
    principal: &Principal,
    ids: Vec<String>,
    path: Option<PathBuf>,
    output: &Output,
) -> Result<()> {
    let cancel = CancelToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, cancelling export");
                cancel.cancel();
            }
        })
    };

    let result = vault.export_archive(principal, &ids, path, &cancel);
    watcher.abort();
    let report = result?;

    match output.format {
        OutputFormat::Json => output.json(&report)?,
        OutputFormat::Quiet => println!("{}", report.path.display()),
        OutputFormat::Human => {
            let size = std::fs::metadata(&report.path)
                .map(|m| format_size(m.len()))
                .unwrap_or_default();
            output.success(&format!(
                "Exported {} snapshot(s) to {} ({})",
                report.included.len(),
                report.path.display(),
                size
            ));
            for id in &report.included {
                println!("  + {}", id);
            }
            if !report.manifest.assets.is_empty() {
                println!("  Assets: {}", report.manifest.assets.join(", "));
            }
        }
    }
    for excluded in &report.excluded {
        output.warning(&format!("Skipped {}: {}", excluded.id, excluded.reason));
    }
    Ok(())
}

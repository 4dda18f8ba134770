//! Schedule command handler

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use inkbook_core::{run_backup_job, Principal, Vault};

use crate::output::{Output, OutputFormat};

/// Run the backup job every `interval_secs` until Ctrl-C
///
/// The first run happens immediately. A failed run is reported and the
/// schedule keeps going.
pub async fn run(
    vault: Vault,
    principal: Principal,
    interval_secs: u64,
    output: &Output,
) -> Result<()> {
    if interval_secs == 0 {
        bail!("--interval must be at least 1 second");
    }

    let vault = Arc::new(vault);
    let principal = Arc::new(principal);
    let mut ticker = interval(Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    output.message(&format!(
        "Running backup job every {}s (Ctrl-C to stop)",
        interval_secs
    ));

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let job = {
                    let vault = Arc::clone(&vault);
                    let principal = Arc::clone(&principal);
                    tokio::task::spawn_blocking(move || run_backup_job(&vault, &principal))
                };
                match job.await? {
                    Ok(report) => match output.format {
                        OutputFormat::Json => output.json(&report)?,
                        OutputFormat::Quiet => println!("{}", report.snapshot.id),
                        OutputFormat::Human => output.success(&format!(
                            "Snapshot {} taken, {} pruned",
                            report.snapshot.id,
                            report.retention.deleted.len()
                        )),
                    },
                    Err(e) => {
                        error!("Backup job failed: {}", e);
                        output.error(&anyhow::Error::from(e));
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Interrupt received, stopping schedule");
                break;
            }
        }
    }

    match Arc::try_unwrap(vault) {
        Ok(vault) => vault.shutdown()?,
        Err(_) => info!("Backup job still running; skipping orderly shutdown"),
    }
    output.message("Schedule stopped");
    Ok(())
}

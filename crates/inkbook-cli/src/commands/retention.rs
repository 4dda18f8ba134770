//! Retention command handler

use anyhow::Result;

use inkbook_core::{Principal, RetentionPolicy, Vault};

use crate::output::{Output, OutputFormat};

/// Command-line overrides on top of the configured policy
fn policy_with_overrides(
    base: RetentionPolicy,
    max_count: Option<usize>,
    max_age_days: Option<u32>,
) -> RetentionPolicy {
    RetentionPolicy {
        max_count: max_count.unwrap_or(base.max_count),
        max_age_days: max_age_days.unwrap_or(base.max_age_days),
    }
}

/// Apply (or preview) the retention policy
pub fn apply(
    vault: &Vault,
    principal: &Principal,
    max_count: Option<usize>,
    max_age_days: Option<u32>,
    dry_run: bool,
    output: &Output,
) -> Result<()> {
    let policy = policy_with_overrides(vault.config().retention, max_count, max_age_days);

    if dry_run {
        let plan = vault.plan_retention(principal, Some(policy))?;
        match output.format {
            OutputFormat::Json => output.json(&serde_json::json!({
                "dry_run": true,
                "policy": policy,
                "keep": plan.keep,
                "delete": plan.delete,
            }))?,
            OutputFormat::Quiet => {
                for snapshot in &plan.delete {
                    println!("{}", snapshot.id);
                }
            }
            OutputFormat::Human => {
                if plan.delete.is_empty() {
                    println!("Nothing to delete ({} snapshot(s) kept).", plan.keep.len());
                } else {
                    println!("Would delete {} snapshot(s):", plan.delete.len());
                    for snapshot in &plan.delete {
                        println!("  {}", snapshot.id);
                    }
                    println!("Would keep {} snapshot(s).", plan.keep.len());
                }
            }
        }
        return Ok(());
    }

    let report = vault.apply_retention(principal, Some(policy))?;
    match output.format {
        OutputFormat::Json => output.json(&report)?,
        OutputFormat::Quiet => {
            for snapshot in &report.deleted {
                println!("{}", snapshot.id);
            }
        }
        OutputFormat::Human => {
            output.success(&format!(
                "Deleted {} snapshot(s), kept {}",
                report.deleted.len(),
                report.kept.len()
            ));
            for snapshot in &report.deleted {
                println!("  - {}", snapshot.id);
            }
        }
    }
    for failure in &report.failed {
        output.warning(&format!(
            "Could not delete {}: {}",
            failure.id, failure.reason
        ));
    }
    Ok(())
}

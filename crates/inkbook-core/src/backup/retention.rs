//! Retention policy and snapshot pruning
//!
//! Evaluation order:
//!
//! 1. Sort snapshots newest first
//! 2. Keep the newest `max_count` (at least one, whatever the policy says)
//! 3. Of the rest, delete those older than `max_age_days` and keep the others
//!
//! A snapshot younger than the age threshold is never deleted, even when the
//! count cap is exceeded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::lease::SnapshotLeases;
use super::snapshot::{remove_snapshot_files, Snapshot};

/// How many snapshots to keep, and for how long
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Newest snapshots kept regardless of age
    pub max_count: usize,
    /// Snapshots beyond `max_count` older than this are deleted
    pub max_age_days: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_count: 7,
            max_age_days: 7,
        }
    }
}

/// Pure keep/delete decision
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetentionPlan {
    pub keep: Vec<Snapshot>,
    pub delete: Vec<Snapshot>,
}

/// A snapshot retention wanted to delete but could not
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionFailure {
    pub id: String,
    pub reason: String,
}

/// Outcome of applying a retention policy
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetentionReport {
    pub kept: Vec<Snapshot>,
    pub deleted: Vec<Snapshot>,
    pub failed: Vec<DeletionFailure>,
}

/// Decide which snapshots to keep and which to delete
pub fn plan_retention(
    snapshots: &[Snapshot],
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> RetentionPlan {
    let mut sorted = snapshots.to_vec();
    sorted.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });

    let keep_newest = policy.max_count.max(1);
    let max_age = chrono::Duration::days(i64::from(policy.max_age_days));

    let mut plan = RetentionPlan::default();
    for (index, snapshot) in sorted.into_iter().enumerate() {
        if index < keep_newest || now - snapshot.created_at <= max_age {
            plan.keep.push(snapshot);
        } else {
            plan.delete.push(snapshot);
        }
    }
    plan
}

/// Delete what the policy rejects, continuing past individual failures
pub fn apply_retention(
    snapshots: &[Snapshot],
    policy: &RetentionPolicy,
    leases: &SnapshotLeases,
) -> RetentionReport {
    apply_retention_at(snapshots, policy, leases, Utc::now())
}

/// `apply_retention` evaluated at `now`
pub fn apply_retention_at(
    snapshots: &[Snapshot],
    policy: &RetentionPolicy,
    leases: &SnapshotLeases,
    now: DateTime<Utc>,
) -> RetentionReport {
    let plan = plan_retention(snapshots, policy, now);
    let mut report = RetentionReport {
        kept: plan.keep,
        ..Default::default()
    };

    for snapshot in plan.delete {
        let Some(_lease) = leases.acquire_delete(&snapshot.id) else {
            warn!("Snapshot {} is in use; not deleting", snapshot.id);
            report.failed.push(DeletionFailure {
                id: snapshot.id.clone(),
                reason: "snapshot is in use by an export or restore".to_string(),
            });
            continue;
        };

        match remove_snapshot_files(&snapshot) {
            Ok(()) => {
                info!("Deleted snapshot {}", snapshot.id);
                report.deleted.push(snapshot);
            }
            Err(e) => {
                warn!("Failed to delete snapshot {}: {}", snapshot.id, e);
                report.failed.push(DeletionFailure {
                    id: snapshot.id.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        "Retention kept {}, deleted {}, failed {}",
        report.kept.len(),
        report.deleted.len(),
        report.failed.len()
    );
    report
}

//! Per-snapshot leases
//!
//! Readers (export, restore) hold a read lease while they use a snapshot
//! file; retention takes a delete lease before removing one. The two exclude
//! each other: a leased snapshot cannot be deleted and a snapshot being
//! deleted cannot be leased.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct LeaseState {
    readers: usize,
    deleting: bool,
}

/// Lease table shared by everything that touches snapshot files
#[derive(Debug, Clone, Default)]
pub struct SnapshotLeases {
    inner: Arc<Mutex<HashMap<String, LeaseState>>>,
}

impl SnapshotLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a read lease, or `None` while the snapshot is being deleted
    pub fn acquire_read(&self, id: &str) -> Option<ReadLease> {
        let mut table = self.inner.lock();
        let state = table.entry(id.to_string()).or_default();
        if state.deleting {
            return None;
        }
        state.readers += 1;
        Some(ReadLease {
            leases: self.clone(),
            id: id.to_string(),
        })
    }

    /// Take the delete lease, or `None` while any reader holds the snapshot
    pub fn acquire_delete(&self, id: &str) -> Option<DeleteLease> {
        let mut table = self.inner.lock();
        let state = table.entry(id.to_string()).or_default();
        if state.deleting || state.readers > 0 {
            return None;
        }
        state.deleting = true;
        Some(DeleteLease {
            leases: self.clone(),
            id: id.to_string(),
        })
    }

    /// Number of read leases currently held on `id`
    pub fn readers(&self, id: &str) -> usize {
        self.inner.lock().get(id).map_or(0, |s| s.readers)
    }

    fn release(&self, id: &str, delete: bool) {
        let mut table = self.inner.lock();
        if let Some(state) = table.get_mut(id) {
            if delete {
                state.deleting = false;
            } else {
                state.readers = state.readers.saturating_sub(1);
            }
            if state.readers == 0 && !state.deleting {
                table.remove(id);
            }
        }
    }
}

/// Shared hold on a snapshot file; released on drop
#[derive(Debug)]
pub struct ReadLease {
    leases: SnapshotLeases,
    id: String,
}

impl ReadLease {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for ReadLease {
    fn drop(&mut self) {
        self.leases.release(&self.id, false);
    }
}

/// Exclusive hold taken before deleting a snapshot; released on drop
#[derive(Debug)]
pub struct DeleteLease {
    leases: SnapshotLeases,
    id: String,
}

impl Drop for DeleteLease {
    fn drop(&mut self) {
        self.leases.release(&self.id, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readers_block_delete() {
        let leases = SnapshotLeases::new();

        let a = leases.acquire_read("s1").unwrap();
        let b = leases.acquire_read("s1").unwrap();
        assert_eq!(leases.readers("s1"), 2);
        assert!(leases.acquire_delete("s1").is_none());

        drop(a);
        assert!(leases.acquire_delete("s1").is_none());
        drop(b);
        assert!(leases.acquire_delete("s1").is_some());
    }

    #[test]
    fn test_delete_blocks_readers() {
        let leases = SnapshotLeases::new();

        let delete = leases.acquire_delete("s1").unwrap();
        assert!(leases.acquire_read("s1").is_none());
        assert!(leases.acquire_delete("s1").is_none());
        // Other snapshots unaffected
        assert!(leases.acquire_read("s2").is_some());

        drop(delete);
        assert!(leases.acquire_read("s1").is_some());
    }

    #[test]
    fn test_released_entries_are_dropped() {
        let leases = SnapshotLeases::new();
        {
            let _lease = leases.acquire_read("s1").unwrap();
        }
        assert_eq!(leases.readers("s1"), 0);
        assert!(leases.inner.lock().is_empty());
    }
}

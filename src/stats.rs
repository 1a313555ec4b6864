//! Mount-wide statistics (spec §9: "gather under an instrumented 'mount
//! statistics' object"). Grounded on the teacher's `buffer_usage_data.rs`:
//! plain atomic counters, bumped with relaxed ordering since nothing here
//! gates correctness, mirrored out through the `metrics` crate at the same
//! boundaries the counters themselves change.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::atomic::AtomicCell;
use metrics::{counter, gauge};

/// A point-in-time copy of [`MountStats`]'s counters, cheap to hand back to
/// a caller (e.g. a `GET_HISTORY`/diagnostic ioctl) without holding any
/// lock over the live atomics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub btree_inserts: u64,
    pub btree_deletes: u64,
    pub bigblocks_allocated: u64,
    pub flush_groups_finalized: u64,
    pub undo_records_emitted: u64,
    pub redo_records_emitted: u64,
    pub last_flush_at: Option<Instant>,
}

/// Process-wide counters for one mount (spec §9's "mount statistics
/// object", the language-neutral stand-in for HAMMER's `hammer_count_*`
/// sysctl globals). Every update is a single atomic fetch-add; there is no
/// lock here by design — these counters are diagnostic, not load-bearing
/// for any invariant in §3.
pub struct MountStats {
    btree_inserts: AtomicU64,
    btree_deletes: AtomicU64,
    bigblocks_allocated: AtomicU64,
    flush_groups_finalized: AtomicU64,
    undo_records_emitted: AtomicU64,
    redo_records_emitted: AtomicU64,
    /// Wall-clock time of the last finalized flush group, the same
    /// `AtomicCell`-over-`Instant` idiom the teacher's `disk_v2::ledger`
    /// uses for `last_flush` rather than a `Mutex<Instant>`.
    last_flush_at: AtomicCell<Option<Instant>>,
}

impl MountStats {
    pub fn new() -> Self {
        MountStats {
            btree_inserts: AtomicU64::new(0),
            btree_deletes: AtomicU64::new(0),
            bigblocks_allocated: AtomicU64::new(0),
            flush_groups_finalized: AtomicU64::new(0),
            undo_records_emitted: AtomicU64::new(0),
            redo_records_emitted: AtomicU64::new(0),
            last_flush_at: AtomicCell::new(None),
        }
    }

    pub fn record_btree_insert(&self) {
        self.btree_inserts.fetch_add(1, Ordering::Relaxed);
        counter!("hammer_btree_inserts_total", 1);
    }

    pub fn record_btree_delete(&self) {
        self.btree_deletes.fetch_add(1, Ordering::Relaxed);
        counter!("hammer_btree_deletes_total", 1);
    }

    pub fn record_bigblock_allocated(&self) {
        let total = self.bigblocks_allocated.fetch_add(1, Ordering::Relaxed) + 1;
        gauge!("hammer_bigblocks_allocated", total as f64);
    }

    pub fn record_flush_group_finalized(&self, group: u64) {
        self.flush_groups_finalized.fetch_add(1, Ordering::Relaxed);
        self.last_flush_at.store(Some(Instant::now()));
        gauge!("hammer_flush_group_current", group as f64);
    }

    pub fn record_undo_emitted(&self) {
        self.undo_records_emitted.fetch_add(1, Ordering::Relaxed);
        counter!("hammer_undo_records_total", 1);
    }

    pub fn record_redo_emitted(&self) {
        self.redo_records_emitted.fetch_add(1, Ordering::Relaxed);
        counter!("hammer_redo_records_total", 1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            btree_inserts: self.btree_inserts.load(Ordering::Relaxed),
            btree_deletes: self.btree_deletes.load(Ordering::Relaxed),
            bigblocks_allocated: self.bigblocks_allocated.load(Ordering::Relaxed),
            flush_groups_finalized: self.flush_groups_finalized.load(Ordering::Relaxed),
            undo_records_emitted: self.undo_records_emitted.load(Ordering::Relaxed),
            redo_records_emitted: self.redo_records_emitted.load(Ordering::Relaxed),
            last_flush_at: self.last_flush_at.load(),
        }
    }
}

impl Default for MountStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let stats = MountStats::new();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn each_recorder_bumps_only_its_own_counter() {
        let stats = MountStats::new();
        stats.record_btree_insert();
        stats.record_bigblock_allocated();
        stats.record_flush_group_finalized(3);
        let snap = stats.snapshot();
        assert_eq!(snap.btree_inserts, 1);
        assert_eq!(snap.btree_deletes, 0);
        assert_eq!(snap.bigblocks_allocated, 1);
        assert_eq!(snap.flush_groups_finalized, 1);
    }

    #[test]
    fn last_flush_at_is_unset_until_a_group_finalizes() {
        let stats = MountStats::new();
        assert!(stats.snapshot().last_flush_at.is_none());
        stats.record_flush_group_finalized(1);
        assert!(stats.snapshot().last_flush_at.is_some());
    }
}

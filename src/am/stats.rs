//! Records-in-range estimator and background fragment-statistics monitor
//! (SPEC_FULL.md SS4.11), grounded in
//! `original_source/.../dbtux/DbtuxStat.cpp`'s `statRecordsInRange`.

use crate::OID;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

/// Estimate of how many live entries fall inside a scan's bounds, mirroring
/// `statRecordsInRange`'s four-value output: total entries in the
/// fragment, an estimate in range, and estimates strictly before/after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeEstimate {
    pub total: usize,
    pub in_range: usize,
    pub before: usize,
    pub after: usize,
}

/// Combine before/after boundary counts into a records-in-range estimate
/// the same way the original does: subtract the two boundary counts from
/// the fragment total, falling back to a one-node guess when the boundary
/// counts overlap or overshoot the total (can happen under concurrent
/// uncommitted inserts/deletes near the scan boundary, per the original's
/// own comment on where its error comes from).
pub fn estimate_records_in_range(
    total: usize,
    before: usize,
    after: usize,
    fallback_occupancy: usize,
) -> RangeEstimate {
    let rem = before + after;
    let in_range = if total > rem {
        total - rem
    } else {
        fallback_occupancy
    };

    RangeEstimate {
        total,
        in_range,
        before,
        after,
    }
}

/// Running counters for one index fragment: live entry count and the
/// number of insert/delete operations since the last sweep.
#[derive(Default)]
pub struct FragStats {
    entry_count: AtomicUsize,
    entry_ops: AtomicUsize,
}

impl FragStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_insert(&self) {
        self.entry_count.fetch_add(1, Ordering::Relaxed);
        self.entry_ops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.entry_count.fetch_sub(1, Ordering::Relaxed);
        self.entry_ops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count.load(Ordering::Relaxed)
    }

    pub fn entry_ops(&self) -> usize {
        self.entry_ops.load(Ordering::Relaxed)
    }
}

/// Tracks `FragStats` for every index fragment registered with it and
/// periodically logs a summary -- the background stat monitor SPEC_FULL
/// SS4.11/SS8 property 7 calls for. Nothing here spawns a thread; `run` is
/// meant to be driven from its own thread (see `bin/checkpoint-daemon.rs`,
/// which drives the checkpoint and stat sweep loops side by side).
pub struct StatMonitor {
    frags: Mutex<HashMap<OID, Arc<FragStats>>>,
}

impl StatMonitor {
    pub fn new() -> Self {
        Self {
            frags: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, rel_id: OID) -> Arc<FragStats> {
        let mut frags = self.frags.lock().unwrap();
        frags
            .entry(rel_id)
            .or_insert_with(|| Arc::new(FragStats::new()))
            .clone()
    }

    /// Log a one-line summary of every registered fragment's current entry
    /// count and op count, then reset op counts to zero.
    pub fn sweep_once(&self) {
        let frags = self.frags.lock().unwrap();
        for (rel_id, stats) in frags.iter() {
            log::debug!(
                "fragment {} stats: {} entries, {} ops since last sweep",
                rel_id,
                stats.entry_count(),
                stats.entry_ops()
            );
            stats.entry_ops.store(0, Ordering::Relaxed);
        }
    }

    /// Run `sweep_once` every `interval` until `stop` returns true.
    pub fn run<F>(&self, interval: Duration, mut stop: F)
    where
        F: FnMut() -> bool,
    {
        while !stop() {
            self.sweep_once();
            std::thread::sleep(interval);
        }
    }
}

impl Default for StatMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_subtracts_boundary_counts_from_total() {
        let est = estimate_records_in_range(100, 20, 30, 5);
        assert_eq!(
            est,
            RangeEstimate {
                total: 100,
                in_range: 50,
                before: 20,
                after: 30,
            }
        );
    }

    #[test]
    fn estimate_falls_back_when_boundary_counts_overshoot() {
        let est = estimate_records_in_range(10, 7, 8, 3);
        assert_eq!(est.in_range, 3);
    }

    #[test]
    fn frag_stats_track_count_and_ops() {
        let stats = FragStats::new();
        stats.record_insert();
        stats.record_insert();
        stats.record_delete();
        assert_eq!(stats.entry_count(), 1);
        assert_eq!(stats.entry_ops(), 3);
    }

    #[test]
    fn monitor_registers_and_sweeps_without_panicking() {
        let monitor = StatMonitor::new();
        let stats = monitor.register(1);
        stats.record_insert();
        monitor.sweep_once();
        assert_eq!(stats.entry_ops(), 0);
        assert_eq!(stats.entry_count(), 1);
    }
}

use std::sync::atomic::{AtomicU64, Ordering};

use jobrunner_redis::ReclaimCounts;

/// Atomic counters for the chron daemon's reclamation cycles.
///
/// Counters use relaxed ordering; [`snapshot`](Self::snapshot) gives a
/// point-in-time view for logging.
#[derive(Debug, Default)]
pub struct ChronMetrics {
    /// Cycles attempted (including raced ones).
    pub cycles: AtomicU64,
    /// Cycles skipped because every pool-lock slot was held.
    pub raced: AtomicU64,
    /// Cycles that saw a partition or aggregator failure.
    pub failed_cycles: AtomicU64,
    /// Per-queue script failures.
    pub script_errors: AtomicU64,
    /// Queues reclaimed across all cycles.
    pub queues_scanned: AtomicU64,
    /// Expired claims returned to their unclaimed lists.
    pub released: AtomicU64,
    /// Expired claims abandoned for exhausting attempts.
    pub abandoned: AtomicU64,
    /// Dead jobs whose data was pruned.
    pub pruned: AtomicU64,
    /// Delayed jobs promoted to unclaimed.
    pub undelayed: AtomicU64,
}

/// A point-in-time copy of [`ChronMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChronSnapshot {
    pub cycles: u64,
    pub raced: u64,
    pub failed_cycles: u64,
    pub script_errors: u64,
    pub queues_scanned: u64,
    pub released: u64,
    pub abandoned: u64,
    pub pruned: u64,
    pub undelayed: u64,
}

impl ChronMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold one cycle's totals into the running counters.
    pub fn record_cycle(&self, totals: ReclaimCounts, queues: u64) {
        self.queues_scanned.fetch_add(queues, Ordering::Relaxed);
        self.released.fetch_add(totals.released, Ordering::Relaxed);
        self.abandoned
            .fetch_add(totals.abandoned, Ordering::Relaxed);
        self.pruned.fetch_add(totals.pruned, Ordering::Relaxed);
        self.undelayed
            .fetch_add(totals.undelayed, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ChronSnapshot {
        ChronSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            raced: self.raced.load(Ordering::Relaxed),
            failed_cycles: self.failed_cycles.load(Ordering::Relaxed),
            script_errors: self.script_errors.load(Ordering::Relaxed),
            queues_scanned: self.queues_scanned.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            pruned: self.pruned.load(Ordering::Relaxed),
            undelayed: self.undelayed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_cycle_accumulates() {
        let metrics = ChronMetrics::default();
        metrics.record_cycle(
            ReclaimCounts {
                released: 2,
                abandoned: 1,
                pruned: 0,
                undelayed: 3,
                ready: 5,
            },
            4,
        );
        metrics.record_cycle(
            ReclaimCounts {
                released: 1,
                abandoned: 0,
                pruned: 2,
                undelayed: 0,
                ready: 1,
            },
            2,
        );

        let snap = metrics.snapshot();
        assert_eq!(snap.queues_scanned, 6);
        assert_eq!(snap.released, 3);
        assert_eq!(snap.abandoned, 1);
        assert_eq!(snap.pruned, 2);
        assert_eq!(snap.undelayed, 3);
    }
}

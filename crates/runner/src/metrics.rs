use std::sync::atomic::{AtomicU64, Ordering};

use crate::dispatch::BatchOutcome;

/// Atomic counters for runner dispatch outcomes.
#[derive(Debug, Default)]
pub struct RunnerMetrics {
    /// Requests dispatched.
    pub dispatched: AtomicU64,
    /// Jobs reported ok by the execution endpoint.
    pub ok_jobs: AtomicU64,
    /// Jobs reported failed by the execution endpoint.
    pub failed_jobs: AtomicU64,
    /// Requests that failed in transport or returned an unreadable body.
    pub request_errors: AtomicU64,
}

/// A point-in-time copy of [`RunnerMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerSnapshot {
    pub dispatched: u64,
    pub ok_jobs: u64,
    pub failed_jobs: u64,
    pub request_errors: u64,
}

impl RunnerMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self, batch: BatchOutcome) {
        self.ok_jobs.fetch_add(batch.ok, Ordering::Relaxed);
        self.failed_jobs.fetch_add(batch.failed, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RunnerSnapshot {
        RunnerSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            ok_jobs: self.ok_jobs.load(Ordering::Relaxed),
            failed_jobs: self.failed_jobs.load(Ordering::Relaxed),
            request_errors: self.request_errors.load(Ordering::Relaxed),
        }
    }
}

/// Resident set size of this process in bytes, from `/proc/self/statm`.
/// Returns `None` off Linux or when the file is unreadable.
pub fn resident_memory_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(resident_pages * 4096)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_accumulate() {
        let metrics = RunnerMetrics::default();
        metrics.record_batch(BatchOutcome { ok: 3, failed: 1 });
        metrics.record_batch(BatchOutcome { ok: 2, failed: 0 });
        RunnerMetrics::incr(&metrics.dispatched);

        let snap = metrics.snapshot();
        assert_eq!(snap.ok_jobs, 5);
        assert_eq!(snap.failed_jobs, 1);
        assert_eq!(snap.dispatched, 1);
        assert_eq!(snap.request_errors, 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn resident_memory_is_readable() {
        assert!(resident_memory_bytes().unwrap() > 0);
    }
}

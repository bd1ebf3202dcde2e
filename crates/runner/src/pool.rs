use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use jobrunner_core::{LoopConfig, Priority, QueueId, ReadyMap, ScheduleConfig};

use crate::dispatch::{BatchOutcome, DispatchError, Dispatcher};
use crate::metrics::RunnerMetrics;
use crate::select::select_queue;

/// One reaped request: which queue it served, how long it ran, and what
/// came back.
struct CompletedRequest {
    queue: QueueId,
    elapsed: Duration,
    outcome: Result<BatchOutcome, DispatchError>,
}

/// What one refill pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefillOutcome {
    /// Slots still free after dispatching.
    pub free: usize,
    /// Requests newly dispatched by this pass.
    pub newly_filled: usize,
}

/// A loop's pool of concurrent outbound requests.
///
/// Capacity equals the loop's configured runner count; a slot is either
/// free or backing exactly one in-flight task in the [`JoinSet`].
/// Reaping is non-blocking (`try_join_next`), so the daemon's control
/// loop never stalls on a slow endpoint.
pub struct SlotPool {
    loop_id: String,
    capacity: usize,
    in_flight: JoinSet<CompletedRequest>,
}

impl SlotPool {
    pub fn new(loop_id: impl Into<String>, capacity: usize) -> Self {
        Self {
            loop_id: loop_id.into(),
            capacity,
            in_flight: JoinSet::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Reap finished requests, then dispatch new ones up to the free-slot
    /// count.
    ///
    /// Dispatch stops early when the selector has nothing to offer or
    /// picks a tenant with no configured host; retrying the draw within
    /// one pass would just spin on the same ready map.
    pub fn refill(
        &mut self,
        dispatcher: &Arc<Dispatcher>,
        config: &LoopConfig,
        priority: Priority,
        schedule: &ScheduleConfig,
        ready: &mut ReadyMap,
        metrics: &RunnerMetrics,
        rng: &mut impl Rng,
    ) -> RefillOutcome {
        self.reap(schedule, ready, metrics);

        let mut newly_filled = 0;
        while self.in_flight.len() < self.capacity {
            let Some(queue) = select_queue(config, priority, ready, rng) else {
                break;
            };
            if dispatcher.host_for(&queue.tenant).is_none() {
                debug!(
                    loop_id = %self.loop_id,
                    tenant = %queue.tenant,
                    "selected tenant has no configured host"
                );
                break;
            }

            // A high-priority turn grants the endpoint the longer budget.
            let maxtime = match priority {
                Priority::High => schedule.lp_max_time,
                Priority::Low => schedule.hp_max_time,
            };

            let dispatcher = Arc::clone(dispatcher);
            let task_queue = queue.clone();
            self.in_flight.spawn(async move {
                let started = Instant::now();
                let outcome = dispatcher.run_jobs(&task_queue, maxtime).await;
                CompletedRequest {
                    queue: task_queue,
                    elapsed: started.elapsed(),
                    outcome,
                }
            });

            RunnerMetrics::incr(&metrics.dispatched);
            newly_filled += 1;
        }

        RefillOutcome {
            free: self.capacity - self.in_flight.len(),
            newly_filled,
        }
    }

    /// Collect every completed request without blocking.
    fn reap(&mut self, schedule: &ScheduleConfig, ready: &mut ReadyMap, metrics: &RunnerMetrics) {
        while let Some(joined) = self.in_flight.try_join_next() {
            let done = match joined {
                Ok(done) => done,
                Err(e) => {
                    RunnerMetrics::incr(&metrics.request_errors);
                    warn!(loop_id = %self.loop_id, error = %e, "request task aborted");
                    continue;
                }
            };

            match done.outcome {
                Ok(batch) => {
                    metrics.record_batch(batch);
                    // A request that came back well under the execution
                    // budget drained its queue; drop it from this
                    // iteration's view so slots go elsewhere.
                    if early_finish(done.elapsed, schedule) {
                        ready.remove(&done.queue);
                    }
                    debug!(
                        loop_id = %self.loop_id,
                        queue = %done.queue,
                        ok = batch.ok,
                        failed = batch.failed,
                        elapsed_ms = done.elapsed.as_millis() as u64,
                        "request completed"
                    );
                }
                Err(e) => {
                    RunnerMetrics::incr(&metrics.request_errors);
                    warn!(
                        loop_id = %self.loop_id,
                        queue = %done.queue,
                        error = %e,
                        "runner request failed"
                    );
                }
            }
        }
    }

    /// Abort every in-flight request. Called on shutdown.
    pub fn terminate(&mut self) {
        self.in_flight.abort_all();
        while self.in_flight.try_join_next().is_some() {}
    }
}

/// The early-finish heuristic compares against half the high-priority
/// budget regardless of the slot's actual priority.
// TODO(dispatch): decide whether low-priority slots should compare
// against lp_max_time instead; the uniform threshold is carried over
// unchanged for now.
fn early_finish(elapsed: Duration, schedule: &ScheduleConfig) -> bool {
    elapsed < Duration::from_secs(schedule.hp_max_time) / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn early_finish_uses_half_the_high_priority_budget() {
        let schedule = ScheduleConfig {
            hp_max_delay: 120,
            lp_max_delay: 600,
            hp_max_time: 30,
            lp_max_time: 60,
        };
        assert!(early_finish(Duration::from_secs(14), &schedule));
        assert!(!early_finish(Duration::from_secs(15), &schedule));
        assert!(!early_finish(Duration::from_secs(40), &schedule));
    }

    #[test]
    fn new_pool_is_idle() {
        let pool = SlotPool::new("main", 3);
        assert_eq!(pool.capacity(), 3);
        assert_eq!(pool.in_flight(), 0);
    }
}

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::watch;
use tracing::{debug, info};

use jobrunner_core::{LoopConfig, PriorityState, ServiceConfig};
use jobrunner_redis::HaClient;

use crate::cache::ReadyCache;
use crate::dispatch::Dispatcher;
use crate::metrics::{RunnerMetrics, resident_memory_bytes};
use crate::pool::SlotPool;

/// One configured loop with its runtime state.
struct LoopState {
    id: String,
    config: LoopConfig,
    priority: PriorityState,
    pool: SlotPool,
}

/// The dispatch daemon: a single-threaded control loop multiplexing every
/// configured loop's slot pool.
pub struct RunnerDaemon {
    config: Arc<ServiceConfig>,
    aggregators: HaClient,
    dispatcher: Arc<Dispatcher>,
    cache: ReadyCache,
    loops: Vec<LoopState>,
    metrics: Arc<RunnerMetrics>,
    rng: StdRng,
}

impl RunnerDaemon {
    pub fn new(
        config: Arc<ServiceConfig>,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Self, jobrunner_redis::HaError> {
        let aggregators = HaClient::new(&config.aggregators, &config.redis)?;
        let cache = ReadyCache::new(Duration::from_millis(config.runner.cache_ttl_ms));

        let now = Instant::now();
        let mut loops: Vec<LoopState> = config
            .loops
            .iter()
            .map(|(id, loop_config)| LoopState {
                id: id.clone(),
                config: loop_config.clone(),
                priority: PriorityState::new(now),
                pool: SlotPool::new(id.clone(), loop_config.runners),
            })
            .collect();
        loops.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(Self {
            config,
            aggregators,
            dispatcher,
            cache,
            loops,
            metrics: Arc::new(RunnerMetrics::default()),
            rng: StdRng::from_entropy(),
        })
    }

    pub fn metrics(&self) -> Arc<RunnerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Drive dispatch until shutdown is signaled, then abort in-flight
    /// requests.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            loops = self.loops.len(),
            slots = self.loops.iter().map(|l| l.config.runners).sum::<usize>(),
            "runner daemon starting"
        );

        let idle = Duration::from_millis(self.config.runner.idle_sleep_ms);
        let stats_every = Duration::from_secs(self.config.runner.stats_interval_secs);
        let hp_max_delay = Duration::from_secs(self.config.schedule.hp_max_delay);
        let lp_max_delay = Duration::from_secs(self.config.schedule.lp_max_delay);
        let mut last_stats = Instant::now();
        let mut last_rss = resident_memory_bytes();

        loop {
            // Signals are dispatched only here, between iterations, never
            // mid-request.
            if *shutdown.borrow() {
                break;
            }

            let now = Instant::now();
            let mut ready = self.cache.get(&self.aggregators, now).await;

            let mut any_new = false;
            if ready.is_empty() {
                sleep_or_shutdown(&mut shutdown, idle).await;
            } else {
                for state in &mut self.loops {
                    let flipped = state.priority.tick(now, hp_max_delay, lp_max_delay);
                    let outcome = state.pool.refill(
                        &self.dispatcher,
                        &state.config,
                        state.priority.level(),
                        &self.config.schedule,
                        &mut ready,
                        &self.metrics,
                        &mut self.rng,
                    );
                    any_new |= outcome.newly_filled > 0;

                    // Free slots with nothing to serve: give the other
                    // priority class a turn, unless the timed rotation
                    // already flipped this iteration.
                    if outcome.free > 0 && outcome.newly_filled == 0 && !flipped {
                        state.priority.flip(Instant::now());
                        debug!(
                            loop_id = %state.id,
                            level = ?state.priority.level(),
                            "priority flipped on empty refill"
                        );
                    }
                }

                if !any_new {
                    sleep_or_shutdown(&mut shutdown, idle).await;
                }
            }

            if last_stats.elapsed() >= stats_every {
                last_rss = self.emit_stats(last_rss);
                last_stats = Instant::now();
            }
        }

        info!("terminating slots");
        for state in &mut self.loops {
            state.pool.terminate();
        }
        info!("runner daemon stopped");
    }

    /// Log the counter snapshot plus the resident-memory delta since the
    /// previous emission. Returns the current RSS for the next delta.
    fn emit_stats(&self, last_rss: Option<u64>) -> Option<u64> {
        let snap = self.metrics.snapshot();
        let rss = resident_memory_bytes();
        let rss_delta_kb = match (last_rss, rss) {
            (Some(prev), Some(cur)) => (i64::try_from(cur).unwrap_or(i64::MAX)
                - i64::try_from(prev).unwrap_or(0))
                / 1024,
            _ => 0,
        };
        info!(
            dispatched = snap.dispatched,
            ok_jobs = snap.ok_jobs,
            failed_jobs = snap.failed_jobs,
            request_errors = snap.request_errors,
            rss_delta_kb,
            "runner stats"
        );
        rss
    }
}

/// Sleep for `duration`, waking early if shutdown is signaled.
async fn sleep_or_shutdown(shutdown: &mut watch::Receiver<bool>, duration: Duration) {
    tokio::select! {
        () = tokio::time::sleep(duration) => {}
        _ = shutdown.changed() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn test_daemon() -> RunnerDaemon {
        let toml = r#"
            aggregators = ["redis://127.0.0.1:6380"]
            partitions = ["redis://127.0.0.1:6381"]

            [loops.beta]
            runners = 2

            [loops.alpha]
            runners = 3
            include = ["*"]

            [claim_ttl]
            "*" = 3600

            [attempts]
            "*" = 3

            [dispatch]
            url = "http://127.0.0.1:9005/rpc/RunJobs.php"
            secret_project = "jobrunner"
            tenants = {}
        "#;
        let config: Arc<ServiceConfig> = Arc::new(toml::from_str(toml).expect("config parses"));
        let dispatcher = Arc::new(
            Dispatcher::new(&config.dispatch, SecretString::new("s".to_owned()))
                .expect("dispatcher builds"),
        );
        RunnerDaemon::new(config, dispatcher).expect("daemon builds")
    }

    #[tokio::test]
    async fn loops_are_built_in_stable_order() {
        let daemon = test_daemon();
        let ids: Vec<&str> = daemon.loops.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "beta"]);
        assert_eq!(daemon.loops[0].pool.capacity(), 3);
        assert_eq!(daemon.loops[1].pool.capacity(), 2);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let mut daemon = test_daemon();
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            daemon.run(rx).await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).expect("receiver alive");

        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(result.is_ok(), "daemon should stop after shutdown signal");
    }
}

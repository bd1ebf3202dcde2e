use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use jobrunner_core::{QueueId, ServiceConfig};
use jobrunner_redis::{
    HaClient, LockError, PoolLock, QUEUES_WITH_JOBS, ReclaimArgs, ReclaimCounts, ReclaimError,
    publish_ready_map, reclaim_queue,
};

use crate::metrics::ChronMetrics;

/// Name of the chron pool lock on the aggregators.
const CHRON_LOCK: &str = "jobqueue:chron";

/// The reclamation daemon. One instance per process; multiple processes
/// coordinate through the pool lock.
pub struct ChronDaemon {
    config: Arc<ServiceConfig>,
    aggregators: HaClient,
    partitions: HaClient,
    metrics: Arc<ChronMetrics>,
}

impl ChronDaemon {
    pub fn new(config: Arc<ServiceConfig>) -> Result<Self, jobrunner_redis::HaError> {
        let aggregators = HaClient::new(&config.aggregators, &config.redis)?;
        let partitions = HaClient::new(&config.partitions, &config.redis)?;
        Ok(Self {
            config,
            aggregators,
            partitions,
            metrics: Arc::new(ChronMetrics::default()),
        })
    }

    pub fn metrics(&self) -> Arc<ChronMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Run reclamation cycles until shutdown is signaled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            partitions = self.partitions.len(),
            aggregators = self.aggregators.len(),
            "chron daemon starting"
        );

        let mut period = tokio::time::interval(Duration::from_millis(self.config.reclaim.period_ms));
        period.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    // A closed channel means the signal task is gone;
                    // treat it as a shutdown rather than spinning.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = period.tick() => {
                    self.run_cycle().await;
                }
            }
        }

        info!("chron daemon stopped");
    }

    /// One full reclamation cycle, guarded by a pool-lock slot.
    async fn run_cycle(&self) {
        ChronMetrics::incr(&self.metrics.cycles);
        let now = chrono::Utc::now().timestamp();
        let lock_ttl = Duration::from_secs(self.config.reclaim.lock_ttl);

        let guard = match PoolLock::acquire(
            &self.aggregators,
            CHRON_LOCK,
            self.partitions.len(),
            lock_ttl,
            now,
        )
        .await
        {
            Ok(guard) => guard,
            Err(LockError::Unavailable) => {
                ChronMetrics::incr(&self.metrics.raced);
                debug!("every pool-lock slot is held; skipping cycle");
                return;
            }
            Err(LockError::Backend(e)) => {
                ChronMetrics::incr(&self.metrics.failed_cycles);
                warn!(error = %e, "pool lock unreachable; skipping cycle");
                return;
            }
        };

        let mut rng = StdRng::from_entropy();
        let mut failed = false;
        let mut totals = ReclaimCounts::default();
        let mut queues_scanned: u64 = 0;
        let mut since_refresh: u32 = 0;
        // Queues observed ready this cycle, as encoded name -> timestamp.
        let mut pending: BTreeMap<String, i64> = BTreeMap::new();

        let mut partitions = self.partitions.endpoint_names();
        partitions.shuffle(&mut rng);

        'partitions: for partition in &partitions {
            let mut queues = match self.live_queues(partition).await {
                Ok(queues) => queues,
                Err(e) => {
                    warn!(partition = %partition, error = %e, "partition scan failed");
                    failed = true;
                    continue;
                }
            };
            queues.shuffle(&mut rng);

            let mut conn = match self.partitions.connection(partition).await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(partition = %partition, error = %e, "partition unreachable");
                    failed = true;
                    continue;
                }
            };

            for encoded in queues {
                let id = match QueueId::decode(&encoded) {
                    Ok(id) => id,
                    Err(e) => {
                        warn!(queue = %encoded, error = %e, "skipping undecodable queue name");
                        continue;
                    }
                };

                let args = self.reclaim_args(&id, now);
                match reclaim_queue(&mut conn, &id, &args).await {
                    Ok(counts) => {
                        totals.accumulate(counts);
                        queues_scanned += 1;
                        if counts.ready > 0 {
                            pending.insert(encoded, now);
                        }
                    }
                    Err(ReclaimError::Transport(message)) => {
                        warn!(partition = %partition, error = %message, "partition lost mid-round");
                        self.partitions.mark_unhealthy(partition);
                        failed = true;
                        continue 'partitions;
                    }
                    Err(e) => {
                        ChronMetrics::incr(&self.metrics.script_errors);
                        warn!(queue = %id, error = %e, "reclaim failed for queue");
                    }
                }

                since_refresh += 1;
                if since_refresh >= self.config.reclaim.lock_refresh_every {
                    since_refresh = 0;
                    let refreshed_at = chrono::Utc::now().timestamp();
                    if let Err(e) = guard.refresh(refreshed_at).await {
                        warn!(error = %e, "pool lock refresh failed");
                    }
                }

                // Cap server CPU: breathe between script invocations.
                tokio::time::sleep(Duration::from_millis(self.config.reclaim.invoke_delay_ms))
                    .await;
            }
        }

        if pending.is_empty() {
            debug!("no ready queues observed; keeping previous ready map");
        } else if publish_ready_map(&self.aggregators, &pending).await == 0 {
            warn!("ready-map publish failed on every aggregator");
            failed = true;
        }

        if let Err(e) = guard.release().await {
            warn!(error = %e, "pool lock release failed; slot will expire via TTL");
        }

        if failed {
            ChronMetrics::incr(&self.metrics.failed_cycles);
        }
        self.metrics.record_cycle(totals, queues_scanned);

        info!(
            queues = queues_scanned,
            ready_queues = pending.len(),
            released = totals.released,
            abandoned = totals.abandoned,
            pruned = totals.pruned,
            undelayed = totals.undelayed,
            failed,
            "reclamation cycle complete"
        );
    }

    /// The encoded names of queues holding live jobs on one partition.
    async fn live_queues(&self, partition: &str) -> Result<Vec<String>, jobrunner_redis::HaError> {
        let mut cmd = redis::cmd("SMEMBERS");
        cmd.arg(QUEUES_WITH_JOBS);
        let value = self.partitions.exec(partition, &cmd).await?;
        redis::from_redis_value(&value).map_err(|e| jobrunner_redis::HaError::Reply(e.to_string()))
    }

    /// Resolve the per-type reclaim parameters for one queue.
    fn reclaim_args(&self, id: &QueueId, now: i64) -> ReclaimArgs {
        let claim_ttl = i64::try_from(self.config.claim_ttl_for(&id.queue_type)).unwrap_or(i64::MAX);
        let prune_ttl = i64::try_from(self.config.reclaim.prune_ttl).unwrap_or(i64::MAX);
        ReclaimArgs {
            claim_cutoff: now.saturating_sub(claim_ttl),
            prune_cutoff: now.saturating_sub(prune_ttl),
            attempts_limit: self.config.attempts_for(&id.queue_type),
            now,
            batch: self.config.reclaim.batch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Arc<ServiceConfig> {
        let toml = r#"
            aggregators = ["redis://127.0.0.1:6380"]
            partitions = ["redis://127.0.0.1:6381"]

            [claim_ttl]
            "*" = 3600
            html = 600

            [attempts]
            "*" = 3
            email = 5

            [dispatch]
            url = "http://127.0.0.1:9005/rpc/RunJobs.php"
            secret_project = "jobrunner"
            tenants = {}
        "#;
        Arc::new(toml::from_str(toml).expect("config should parse"))
    }

    #[test]
    fn reclaim_args_use_per_type_parameters() {
        let daemon = ChronDaemon::new(test_config()).expect("pools should build");

        let html = daemon.reclaim_args(&QueueId::new("html", "t1"), 10_000);
        assert_eq!(html.claim_cutoff, 9_400);
        assert_eq!(html.attempts_limit, 3);

        let email = daemon.reclaim_args(&QueueId::new("email", "t1"), 10_000);
        assert_eq!(email.claim_cutoff, 6_400);
        assert_eq!(email.attempts_limit, 5);
        assert_eq!(email.now, 10_000);
        assert_eq!(email.batch, 500);
    }
}

use std::time::{Duration, Instant};

use tracing::warn;

use jobrunner_core::ReadyMap;
use jobrunner_redis::{HaClient, fetch_ready_map};

/// Short-TTL process-local cache over the aggregator's ready map.
///
/// Staleness is preferred to spurious emptiness: a failed or empty fresh
/// read serves the previous map unchanged, so a transient aggregator
/// hiccup does not idle every loop at once.
pub struct ReadyCache {
    ttl: Duration,
    fetched_at: Option<Instant>,
    map: ReadyMap,
}

impl ReadyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            fetched_at: None,
            map: ReadyMap::new(),
        }
    }

    /// The cached map, refreshed from the aggregators when the TTL has
    /// lapsed.
    pub async fn get(&mut self, aggregators: &HaClient, now: Instant) -> ReadyMap {
        if self.is_fresh(now) {
            return self.map.clone();
        }

        match fetch_ready_map(aggregators).await {
            Ok(fresh) => self.apply_fetch(Some(fresh), now),
            Err(e) => {
                warn!(error = %e, "ready-map read failed; serving stale cache");
                self.apply_fetch(None, now);
            }
        }

        self.map.clone()
    }

    fn is_fresh(&self, now: Instant) -> bool {
        self.fetched_at
            .is_some_and(|at| now.saturating_duration_since(at) < self.ttl)
    }

    /// Fold one fetch attempt into the cache. Only a successful,
    /// non-empty read replaces the cached map and its timestamp.
    fn apply_fetch(&mut self, fresh: Option<ReadyMap>, now: Instant) {
        if let Some(map) = fresh
            && !map.is_empty()
        {
            self.map = map;
            self.fetched_at = Some(now);
        }
    }
}

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Resolve a per-type entry from a map carrying a `"*"` default.
pub fn per_type<'a, T>(map: &'a HashMap<String, T>, queue_type: &str) -> Option<&'a T> {
    map.get(queue_type).or_else(|| map.get("*"))
}

/// Top-level configuration for both daemons, loaded from a TOML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Runner loops, keyed by loop id.
    #[serde(default)]
    pub loops: HashMap<String, LoopConfig>,

    /// Aggregator Redis endpoints (URLs), in failover order.
    pub aggregators: Vec<String>,

    /// Partition Redis endpoints (URLs) holding the job queues.
    pub partitions: Vec<String>,

    /// Claim TTL in seconds per queue type, with a `"*"` default entry.
    pub claim_ttl: HashMap<String, u64>,

    /// Attempt limit per queue type, with a `"*"` default entry.
    pub attempts: HashMap<String, u32>,

    /// Priority time-sharing and request max-time parameters.
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Reclamation cycle tuning.
    #[serde(default)]
    pub reclaim: ReclaimConfig,

    /// Outbound job-execution dispatch.
    pub dispatch: DispatchConfig,

    /// Runner loop pacing.
    #[serde(default)]
    pub runner: RunnerTuning,

    /// Redis connection pool tuning.
    #[serde(default)]
    pub redis: RedisTuning,
}

/// One runner loop: a pool of slots with its own queue-type filters.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoopConfig {
    /// Concurrency ceiling: the number of slots this loop drives.
    pub runners: usize,

    /// Queue types this loop serves; `"*"` matches every ready type.
    #[serde(default)]
    pub include: Vec<String>,

    /// Queue types this loop never serves.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Queue types served only while the loop is in its low-priority
    /// share of the rotation.
    #[serde(default)]
    pub low_priority: Vec<String>,
}

/// Priority rotation delays and per-request execution budgets, seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    #[serde(default = "default_hp_max_delay")]
    pub hp_max_delay: u64,
    #[serde(default = "default_lp_max_delay")]
    pub lp_max_delay: u64,
    #[serde(default = "default_hp_max_time")]
    pub hp_max_time: u64,
    #[serde(default = "default_lp_max_time")]
    pub lp_max_time: u64,
}

/// Chron reclamation cycle tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReclaimConfig {
    /// Seconds an abandoned job is kept before its data is pruned.
    #[serde(default = "default_prune_ttl")]
    pub prune_ttl: u64,

    /// Maximum items moved per structure per reclaim pass.
    #[serde(default = "default_reclaim_batch")]
    pub batch: u64,

    /// Pause between script invocations, milliseconds.
    #[serde(default = "default_invoke_delay_ms")]
    pub invoke_delay_ms: u64,

    /// Pool lock TTL, seconds.
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl: u64,

    /// Refresh the pool lock after this many queues.
    #[serde(default = "default_lock_refresh_every")]
    pub lock_refresh_every: u32,

    /// Cycle period, milliseconds.
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
}

/// Outbound HTTP dispatch to the job-execution endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchConfig {
    /// The job-execution endpoint URL.
    pub url: String,

    /// `Host` header per tenant. Tenants absent here are never
    /// dispatched to.
    pub tenants: HashMap<String, String>,

    /// Secret-store project id for the request-signing secret.
    pub secret_project: String,
}

/// Runner loop pacing.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerTuning {
    /// Sleep when idle or saturated, milliseconds.
    #[serde(default = "default_idle_sleep_ms")]
    pub idle_sleep_ms: u64,

    /// Ready-map cache TTL, milliseconds.
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    /// Interval between stats emissions, seconds.
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

/// Redis connection pool tuning, shared by every endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisTuning {
    /// Connections per endpoint pool.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Timeout for acquiring a pooled connection, seconds.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// How long a failed endpoint is considered down, seconds.
    #[serde(default = "default_backoff")]
    pub backoff_secs: u64,
}

fn default_hp_max_delay() -> u64 {
    120
}
fn default_lp_max_delay() -> u64 {
    600
}
fn default_hp_max_time() -> u64 {
    30
}
fn default_lp_max_time() -> u64 {
    60
}
fn default_prune_ttl() -> u64 {
    7 * 24 * 3600
}
fn default_reclaim_batch() -> u64 {
    500
}
fn default_invoke_delay_ms() -> u64 {
    5
}
fn default_lock_ttl() -> u64 {
    300
}
fn default_lock_refresh_every() -> u32 {
    100
}
fn default_period_ms() -> u64 {
    1000
}
fn default_idle_sleep_ms() -> u64 {
    100
}
fn default_cache_ttl_ms() -> u64 {
    1000
}
fn default_stats_interval() -> u64 {
    30
}
fn default_pool_size() -> usize {
    10
}
fn default_connection_timeout() -> u64 {
    5
}
fn default_backoff() -> u64 {
    30
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            hp_max_delay: default_hp_max_delay(),
            lp_max_delay: default_lp_max_delay(),
            hp_max_time: default_hp_max_time(),
            lp_max_time: default_lp_max_time(),
        }
    }
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            prune_ttl: default_prune_ttl(),
            batch: default_reclaim_batch(),
            invoke_delay_ms: default_invoke_delay_ms(),
            lock_ttl: default_lock_ttl(),
            lock_refresh_every: default_lock_refresh_every(),
            period_ms: default_period_ms(),
        }
    }
}

impl Default for RunnerTuning {
    fn default() -> Self {
        Self {
            idle_sleep_ms: default_idle_sleep_ms(),
            cache_ttl_ms: default_cache_ttl_ms(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}

impl Default for RedisTuning {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            connection_timeout_secs: default_connection_timeout(),
            backoff_secs: default_backoff(),
        }
    }
}

impl RedisTuning {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

impl ServiceConfig {
    /// Load and validate the configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Self = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic checks beyond what serde enforces.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.aggregators.is_empty() {
            return Err(ConfigError::Invalid("no aggregator endpoints".into()));
        }
        if self.partitions.is_empty() {
            return Err(ConfigError::Invalid("no partition endpoints".into()));
        }
        if !self.claim_ttl.contains_key("*") {
            return Err(ConfigError::Invalid(
                "claim_ttl is missing the \"*\" default entry".into(),
            ));
        }
        if !self.attempts.contains_key("*") {
            return Err(ConfigError::Invalid(
                "attempts is missing the \"*\" default entry".into(),
            ));
        }
        for (id, lp) in &self.loops {
            if lp.runners == 0 {
                return Err(ConfigError::Invalid(format!(
                    "loop {id:?} has zero runners"
                )));
            }
        }
        Ok(())
    }

    /// Claim TTL for a queue type, falling back to the `"*"` entry.
    ///
    /// `validate` guarantees the default entry exists.
    pub fn claim_ttl_for(&self, queue_type: &str) -> u64 {
        per_type(&self.claim_ttl, queue_type).copied().unwrap_or(0)
    }

    /// Attempt limit for a queue type, falling back to the `"*"` entry.
    pub fn attempts_for(&self, queue_type: &str) -> u32 {
        per_type(&self.attempts, queue_type).copied().unwrap_or(0)
    }
}

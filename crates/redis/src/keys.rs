use jobrunner_core::QueueId;

/// Cluster-wide set of encoded queue names currently holding live jobs.
pub const QUEUES_WITH_JOBS: &str = "global:jobqueue:s-queuesWithJobs";

/// Aggregator hash of encoded queue name to last-ready unix timestamp.
pub const READY_MAP_KEY: &str = "jobqueue:aggregator:h-ready";

/// Staging key for atomic ready-map publishes (write temp, then rename).
pub fn ready_temp_key() -> String {
    format!("{READY_MAP_KEY}:temp")
}

/// The per-queue Redis keys on a partition, one set per (type, tenant).
#[derive(Debug, Clone)]
pub struct QueueKeys {
    /// Sorted set of claimed job ids, scored by claim timestamp.
    pub claimed: String,
    /// Hash of job id to attempt count.
    pub attempts: String,
    /// List of unclaimed job ids, in dispatch order.
    pub unclaimed: String,
    /// Hash of job id to job payload.
    pub data: String,
    /// Sorted set of abandoned job ids, scored by claim timestamp at death.
    pub abandoned: String,
    /// Sorted set of delayed job ids, scored by ready-at timestamp.
    pub delayed: String,
}

impl QueueKeys {
    pub fn for_queue(id: &QueueId) -> Self {
        let base = format!("{}:jobqueue:{}", id.tenant, id.queue_type);
        Self {
            claimed: format!("{base}:z-claimed"),
            attempts: format!("{base}:h-attempts"),
            unclaimed: format!("{base}:l-unclaimed"),
            data: format!("{base}:h-data"),
            abandoned: format!("{base}:z-abandoned"),
            delayed: format!("{base}:z-delayed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_partition_keys() {
        let keys = QueueKeys::for_queue(&QueueId::new("html", "t1"));
        assert_eq!(keys.claimed, "t1:jobqueue:html:z-claimed");
        assert_eq!(keys.attempts, "t1:jobqueue:html:h-attempts");
        assert_eq!(keys.unclaimed, "t1:jobqueue:html:l-unclaimed");
        assert_eq!(keys.data, "t1:jobqueue:html:h-data");
        assert_eq!(keys.abandoned, "t1:jobqueue:html:z-abandoned");
        assert_eq!(keys.delayed, "t1:jobqueue:html:z-delayed");
    }

    #[test]
    fn temp_key_derives_from_live_key() {
        assert_eq!(ready_temp_key(), "jobqueue:aggregator:h-ready:temp");
    }
}

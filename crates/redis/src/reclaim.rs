use std::sync::LazyLock;

use redis::{Script, Value};
use thiserror::Error;

use jobrunner_core::QueueId;

use crate::ha::is_transport_error;
use crate::keys::{QUEUES_WITH_JOBS, QueueKeys};
use crate::scripts;

static RECLAIM: LazyLock<Script> = LazyLock::new(|| Script::new(scripts::RECLAIM));

/// Errors from one reclaim invocation. Transport failures condemn the
/// whole partition round; script failures are per-queue and skippable.
#[derive(Debug, Error)]
pub enum ReclaimError {
    /// The partition connection failed mid-invocation.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server rejected or failed the script.
    #[error("script error: {0}")]
    Script(String),

    /// The script returned something other than five integers.
    #[error("unexpected reply: {0}")]
    Reply(String),
}

/// Arguments for one reclaim pass, already resolved for the queue's type.
#[derive(Debug, Clone, Copy)]
pub struct ReclaimArgs {
    /// Claims with a timestamp at or below this are expired.
    pub claim_cutoff: i64,
    /// Abandoned jobs dead since before this are pruned.
    pub prune_cutoff: i64,
    /// Attempt count at which an expired claim is abandoned, not released.
    pub attempts_limit: u32,
    /// Current unix timestamp; delayed jobs due by now are promoted.
    pub now: i64,
    /// Maximum items moved per structure in this pass.
    pub batch: u64,
}

/// Counters returned by one reclaim pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimCounts {
    /// Expired claims returned to the unclaimed list.
    pub released: u64,
    /// Expired claims moved to the abandoned set.
    pub abandoned: u64,
    /// Long-dead jobs whose data was deleted.
    pub pruned: u64,
    /// Delayed jobs promoted to the unclaimed list.
    pub undelayed: u64,
    /// Length of the unclaimed list after the pass.
    pub ready: u64,
}

impl ReclaimCounts {
    pub fn accumulate(&mut self, other: Self) {
        self.released += other.released;
        self.abandoned += other.abandoned;
        self.pruned += other.pruned;
        self.undelayed += other.undelayed;
        self.ready += other.ready;
    }

    fn from_value(value: &Value) -> Result<Self, ReclaimError> {
        let (released, abandoned, pruned, undelayed, ready) =
            redis::from_redis_value::<(u64, u64, u64, u64, u64)>(value)
                .map_err(|e| ReclaimError::Reply(e.to_string()))?;
        Ok(Self {
            released,
            abandoned,
            pruned,
            undelayed,
            ready,
        })
    }
}

/// Run one atomic reclaim pass for a queue on an already-open partition
/// connection.
pub async fn reclaim_queue(
    conn: &mut deadpool_redis::Connection,
    id: &QueueId,
    args: &ReclaimArgs,
) -> Result<ReclaimCounts, ReclaimError> {
    let keys = QueueKeys::for_queue(id);
    let value: Value = RECLAIM
        .key(&keys.claimed)
        .key(&keys.attempts)
        .key(&keys.unclaimed)
        .key(&keys.data)
        .key(&keys.abandoned)
        .key(&keys.delayed)
        .key(QUEUES_WITH_JOBS)
        .arg(args.claim_cutoff)
        .arg(args.prune_cutoff)
        .arg(args.attempts_limit)
        .arg(args.now)
        .arg(id.encode())
        .arg(args.batch)
        .invoke_async(conn)
        .await
        .map_err(|e| {
            if is_transport_error(&e) {
                ReclaimError::Transport(e.to_string())
            } else {
                ReclaimError::Script(e.to_string())
            }
        })?;

    ReclaimCounts::from_value(&value)
}

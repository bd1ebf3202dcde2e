use std::time::Duration;

use redis::Value;
use tracing::debug;

use crate::error::{HaError, LockError};
use crate::ha::HaClient;

/// Render the key for one lock slot.
fn slot_key(name: &str, slot: usize) -> String {
    format!("{name}:lock:{slot}")
}

/// Cooperative distributed lock with at-most-N concurrent holders.
///
/// Each of the N slots is a key holding the acquiring daemon's unix
/// timestamp. A slot is free when its key is absent or its timestamp has
/// aged past the TTL, so crashed holders self-evict without any death
/// signal. Acquisition races are settled by `GETSET`: the writer whose
/// prior value matches what it observed owns the slot.
pub struct PoolLock;

impl PoolLock {
    /// Scan the slots in order and claim the first free one.
    pub async fn acquire<'a>(
        client: &'a HaClient,
        name: &str,
        slots: usize,
        ttl: Duration,
        now: i64,
    ) -> Result<PoolLockGuard<'a>, LockError> {
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);

        for slot in 0..slots {
            let key = slot_key(name, slot);

            let observed = read_timestamp(client, &key).await?;
            let free = match observed.as_deref().and_then(parse_timestamp) {
                Some(ts) => ts < now - ttl_secs,
                // Absent, or garbage that no live holder would have written.
                None => true,
            };
            if !free {
                continue;
            }

            let mut getset = redis::cmd("GETSET");
            getset.arg(&key).arg(now);
            let value = client.exec_ha(&getset).await?;
            let prior = as_optional_string(&value)?;

            if prior == observed {
                debug!(slot_key = %key, "pool lock slot acquired");
                return Ok(PoolLockGuard { client, key });
            }
            // Another acquirer got between our read and write; their
            // timestamp is now stored, so the slot is legitimately theirs.
        }

        Err(LockError::Unavailable)
    }
}

async fn read_timestamp(client: &HaClient, key: &str) -> Result<Option<String>, HaError> {
    let mut get = redis::cmd("GET");
    get.arg(key);
    let value = client.exec_ha(&get).await?;
    as_optional_string(&value)
}

fn as_optional_string(value: &Value) -> Result<Option<String>, HaError> {
    redis::from_redis_value::<Option<String>>(value).map_err(|e| HaError::Reply(e.to_string()))
}

fn parse_timestamp(raw: &str) -> Option<i64> {
    raw.parse().ok()
}

/// A held pool-lock slot. Dropping without [`release`](Self::release) is
/// safe; the slot self-evicts after the TTL.
pub struct PoolLockGuard<'a> {
    client: &'a HaClient,
    key: String,
}

impl PoolLockGuard<'_> {
    pub fn slot_key(&self) -> &str {
        &self.key
    }

    /// Overwrite the held slot's timestamp to keep it from expiring
    /// during a long pass.
    pub async fn refresh(&self, now: i64) -> Result<(), HaError> {
        let mut set = redis::cmd("SET");
        set.arg(&self.key).arg(now);
        self.client.exec_ha(&set).await.map(|_| ())
    }

    /// Free the slot for the next acquirer.
    pub async fn release(self) -> Result<(), HaError> {
        let mut del = redis::cmd("DEL");
        del.arg(&self.key);
        self.client.exec_ha(&del).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_keys_are_indexed() {
        assert_eq!(slot_key("jobqueue:chron", 0), "jobqueue:chron:lock:0");
        assert_eq!(slot_key("jobqueue:chron", 7), "jobqueue:chron:lock:7");
    }

    #[test]
    fn garbage_timestamps_read_as_free() {
        assert_eq!(parse_timestamp("1700000000"), Some(1_700_000_000));
        assert_eq!(parse_timestamp("not-a-number"), None);
    }
}

#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use super::*;
    use jobrunner_core::RedisTuning;

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
    }

    fn client() -> HaClient {
        HaClient::new(&[redis_url()], &RedisTuning::default())
            .expect("pool creation should succeed")
    }

    async fn clear_slots(client: &HaClient, name: &str, slots: usize) {
        for slot in 0..slots {
            let mut del = redis::cmd("DEL");
            del.arg(slot_key(name, slot));
            client.exec_ha(&del).await.expect("DEL should succeed");
        }
    }

    #[tokio::test]
    async fn at_most_n_holders() {
        let client = client();
        let name = "jobrunner-test:lock-bound";
        clear_slots(&client, name, 2).await;

        let ttl = Duration::from_secs(300);
        let now = 1_700_000_000;

        let first = PoolLock::acquire(&client, name, 2, ttl, now).await.unwrap();
        let second = PoolLock::acquire(&client, name, 2, ttl, now).await.unwrap();
        assert_ne!(first.slot_key(), second.slot_key());

        let third = PoolLock::acquire(&client, name, 2, ttl, now).await;
        assert!(matches!(third, Err(LockError::Unavailable)));

        first.release().await.unwrap();
        second.release().await.unwrap();
    }

    #[tokio::test]
    async fn stale_slot_is_taken_over() {
        let client = client();
        let name = "jobrunner-test:lock-stale";
        clear_slots(&client, name, 1).await;

        let ttl = Duration::from_secs(300);
        let now = 1_700_000_000;

        // A holder that died long ago.
        let mut set = redis::cmd("SET");
        set.arg(slot_key(name, 0)).arg(now - 301);
        client.exec_ha(&set).await.unwrap();

        let guard = PoolLock::acquire(&client, name, 1, ttl, now).await.unwrap();
        assert_eq!(guard.slot_key(), "jobrunner-test:lock-stale:lock:0");

        // A freshly-refreshed slot is not stolen.
        guard.refresh(now).await.unwrap();
        let raced = PoolLock::acquire(&client, name, 1, ttl, now).await;
        assert!(matches!(raced, Err(LockError::Unavailable)));

        guard.release().await.unwrap();
        let retaken = PoolLock::acquire(&client, name, 1, ttl, now).await;
        assert!(retaken.is_ok());
        retaken.unwrap().release().await.unwrap();
    }
}

use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use jobrunner_core::{QueueId, ReadyMap};

use crate::error::HaError;
use crate::ha::HaClient;
use crate::keys::{READY_MAP_KEY, ready_temp_key};
use crate::scripts;

/// Read the live ready map from the first reachable aggregator.
///
/// Hash fields that fail to decode as queue names are skipped; a corrupt
/// entry must not hide the rest of the map.
pub async fn fetch_ready_map(client: &HaClient) -> Result<ReadyMap, HaError> {
    let mut cmd = redis::cmd("HGETALL");
    cmd.arg(READY_MAP_KEY);
    let value = client.exec_ha(&cmd).await?;
    let entries: HashMap<String, i64> =
        redis::from_redis_value(&value).map_err(|e| HaError::Reply(e.to_string()))?;

    let mut map = ReadyMap::new();
    for (encoded, last_ready) in entries {
        match QueueId::decode(&encoded) {
            Ok(id) => map.insert(&id, last_ready),
            Err(e) => warn!(field = %encoded, error = %e, "skipping undecodable ready-map entry"),
        }
    }
    Ok(map)
}

/// Publish one cycle's ready map to every aggregator.
///
/// Each aggregator rebuilds the staging hash and renames it over the live
/// key in a single script, so readers never observe a partial map.
/// Returns the number of aggregators that accepted the publish; callers
/// treat zero as a failed cycle. Replication across aggregators is
/// best-effort by design, so partial success is success.
///
/// An empty map is never published: the rename would fail, and an empty
/// cycle leaves the previous map in place instead.
pub async fn publish_ready_map(client: &HaClient, entries: &BTreeMap<String, i64>) -> usize {
    if entries.is_empty() {
        return client.len();
    }

    let mut cmd = redis::cmd("EVAL");
    cmd.arg(scripts::PUBLISH_READY)
        .arg(2)
        .arg(ready_temp_key())
        .arg(READY_MAP_KEY);
    for (encoded, last_ready) in entries {
        cmd.arg(encoded).arg(*last_ready);
    }

    client.broadcast(&cmd).await
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

    #[tokio::test]
    async fn publish_then_fetch_round_trips() {
        let client = client();

        let mut entries = BTreeMap::new();
        entries.insert(QueueId::new("html", "t1").encode(), 100i64);
        entries.insert(QueueId::new("email", "t2").encode(), 200i64);

        assert_eq!(publish_ready_map(&client, &entries).await, 1);

        let map = fetch_ready_map(&client).await.unwrap();
        assert_eq!(map.tenants_for("html").unwrap().get("t1"), Some(&100));
        assert_eq!(map.tenants_for("email").unwrap().get("t2"), Some(&200));

        // A second publish fully replaces the map.
        let mut next = BTreeMap::new();
        next.insert(QueueId::new("html", "t9").encode(), 300i64);
        assert_eq!(publish_ready_map(&client, &next).await, 1);

        let map = fetch_ready_map(&client).await.unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.tenants_for("email").is_none());
    }
}

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use deadpool_redis::{Config, Pool, Runtime};
use redis::{Cmd, RedisError, Value};
use tracing::{debug, warn};

use jobrunner_core::RedisTuning;

use crate::error::HaError;

/// One Redis endpoint with its own connection pool. The URL doubles as
/// the endpoint name.
struct Endpoint {
    url: String,
    pool: Pool,
}

/// Client for a set of equivalent Redis endpoints.
///
/// Commands are opaque: the client issues them and hands back the raw
/// [`redis::Value`] without interpreting it. An endpoint that fails at
/// the transport level is recorded as down for a back-off window and
/// deprioritized; it is still retried once every other endpoint has
/// failed within a call, so [`HaError::AllEndpointsDown`] is only
/// returned after genuinely trying everything.
pub struct HaClient {
    endpoints: Vec<Endpoint>,
    down_until: Mutex<HashMap<String, Instant>>,
    backoff: Duration,
}

impl HaClient {
    /// Build a client with one `deadpool-redis` pool per endpoint URL.
    pub fn new(urls: &[String], tuning: &RedisTuning) -> Result<Self, HaError> {
        let endpoints = urls
            .iter()
            .map(|url| {
                let cfg = Config::from_url(url);
                let pool = cfg
                    .builder()
                    .map(|b| {
                        b.max_size(tuning.pool_size)
                            .wait_timeout(Some(tuning.connection_timeout()))
                            .runtime(Runtime::Tokio1)
                            .build()
                    })
                    .map_err(|e| HaError::Connection(e.to_string()))?
                    .map_err(|e| HaError::Connection(e.to_string()))?;
                Ok(Endpoint {
                    url: url.clone(),
                    pool,
                })
            })
            .collect::<Result<Vec<_>, HaError>>()?;

        Ok(Self {
            endpoints,
            down_until: Mutex::new(HashMap::new()),
            backoff: tuning.backoff(),
        })
    }

    /// Endpoint names (URLs) in configured order.
    pub fn endpoint_names(&self) -> Vec<String> {
        self.endpoints.iter().map(|e| e.url.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    fn is_down(&self, url: &str) -> bool {
        let mut down = self.down_until.lock().expect("down map poisoned");
        match down.get(url) {
            Some(until) if Instant::now() < *until => true,
            Some(_) => {
                down.remove(url);
                false
            }
            None => false,
        }
    }

    fn mark_down(&self, url: &str) {
        let until = Instant::now() + self.backoff;
        self.down_until
            .lock()
            .expect("down map poisoned")
            .insert(url.to_owned(), until);
        warn!(endpoint = %url, backoff_secs = self.backoff.as_secs(), "endpoint marked down");
    }

    fn clear_down(&self, url: &str) {
        self.down_until
            .lock()
            .expect("down map poisoned")
            .remove(url);
    }

    /// Record a transport failure observed outside the client's own
    /// operations, e.g. a pooled connection dying mid-script.
    pub fn mark_unhealthy(&self, url: &str) {
        self.mark_down(url);
    }

    fn endpoint(&self, url: &str) -> Result<&Endpoint, HaError> {
        self.endpoints
            .iter()
            .find(|e| e.url == url)
            .ok_or_else(|| HaError::Connection(format!("unknown endpoint {url}")))
    }

    /// Obtain a pooled connection to one named endpoint, e.g. for script
    /// invocation. A failure marks the endpoint down.
    pub async fn connection(&self, url: &str) -> Result<deadpool_redis::Connection, HaError> {
        let endpoint = self.endpoint(url)?;
        match endpoint.pool.get().await {
            Ok(conn) => Ok(conn),
            Err(e) => {
                self.mark_down(url);
                Err(HaError::Transport {
                    endpoint: url.to_owned(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Issue one command against one named endpoint.
    pub async fn exec(&self, url: &str, cmd: &Cmd) -> Result<Value, HaError> {
        let mut conn = self.connection(url).await?;
        match cmd.query_async::<Value>(&mut conn).await {
            Ok(value) => {
                self.clear_down(url);
                Ok(value)
            }
            Err(e) => {
                if is_transport_error(&e) {
                    self.mark_down(url);
                }
                Err(HaError::Transport {
                    endpoint: url.to_owned(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Issue one command with failover: endpoints are tried in configured
    /// order (currently-down ones last) until one succeeds.
    pub async fn exec_ha(&self, cmd: &Cmd) -> Result<Value, HaError> {
        let (healthy, down): (Vec<_>, Vec<_>) = self
            .endpoints
            .iter()
            .partition(|e| !self.is_down(&e.url));

        for endpoint in healthy.into_iter().chain(down) {
            match self.exec(&endpoint.url, cmd).await {
                Ok(value) => return Ok(value),
                Err(e) => debug!(endpoint = %endpoint.url, error = %e, "failover to next endpoint"),
            }
        }

        Err(HaError::AllEndpointsDown(self.endpoints.len()))
    }

    /// Issue one command against every endpoint; returns how many
    /// succeeded.
    pub async fn broadcast(&self, cmd: &Cmd) -> usize {
        let mut ok = 0;
        for endpoint in &self.endpoints {
            match self.exec(&endpoint.url, cmd).await {
                Ok(_) => ok += 1,
                Err(e) => warn!(endpoint = %endpoint.url, error = %e, "broadcast leg failed"),
            }
        }
        ok
    }
}

/// Whether a Redis error means the endpoint itself is unreachable, as
/// opposed to a server-side error on a healthy connection.
pub fn is_transport_error(e: &RedisError) -> bool {
    e.is_io_error() || e.is_timeout() || e.is_connection_refusal() || e.is_connection_dropped()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(urls: &[&str]) -> HaClient {
        let urls: Vec<String> = urls.iter().map(|s| (*s).to_owned()).collect();
        HaClient::new(&urls, &RedisTuning::default()).expect("pool creation should succeed")
    }

    #[test]
    fn down_marks_expire() {
        let c = client(&["redis://127.0.0.1:6390"]);
        assert!(!c.is_down("redis://127.0.0.1:6390"));
        c.mark_down("redis://127.0.0.1:6390");
        assert!(c.is_down("redis://127.0.0.1:6390"));
        c.clear_down("redis://127.0.0.1:6390");
        assert!(!c.is_down("redis://127.0.0.1:6390"));
    }

    #[test]
    fn unknown_endpoint_is_rejected() {
        let c = client(&["redis://127.0.0.1:6390"]);
        assert!(c.endpoint("redis://elsewhere:6390").is_err());
    }

    #[tokio::test]
    async fn exec_ha_reports_all_endpoints() {
        // Nothing listens on these ports; both legs fail at transport
        // level and the call reports the full endpoint count.
        let c = client(&["redis://127.0.0.1:1", "redis://127.0.0.1:2"]);
        let err = c.exec_ha(&redis::cmd("PING")).await.unwrap_err();
        assert!(matches!(err, HaError::AllEndpointsDown(2)));
    }
}

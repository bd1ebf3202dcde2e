use std::collections::HashMap;
use std::time::Duration;

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha1::Sha1;
use thiserror::Error;
use tracing::debug;

use jobrunner_core::{DispatchConfig, QueueId};

type HmacSha1 = Hmac<Sha1>;

/// Fixed signature expiry carried in every request body.
const SIG_EXPIRY: &str = "2147483647";

/// Connect timeout for the job-execution endpoint.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Slack added to `maxtime` for the total request timeout.
const TIMEOUT_SLACK: Duration = Duration::from_secs(5);

/// Longest response-body prefix kept in error messages and logs.
const MAX_LOGGED_BODY: usize = 4096;

/// Errors from one outbound job-execution request.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    /// The signing key was rejected.
    #[error("signing error: {0}")]
    Signing(String),

    /// The request body could not be encoded.
    #[error("failed to encode request body: {0}")]
    Body(String),

    /// The request failed at the transport level or with an unexpected
    /// HTTP status.
    #[error("transport error: {0}")]
    Transport(String),

    /// The selected tenant has no configured host.
    #[error("tenant {0:?} has no configured host")]
    UnknownTenant(String),

    /// The response body was not a list of per-job statuses. Carries the
    /// body truncated to [`MAX_LOGGED_BODY`] bytes.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// One job's result as reported by the execution endpoint.
#[derive(Debug, Deserialize)]
struct JobStatus {
    status: String,
}

/// Tally of one response's per-job statuses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub ok: u64,
    pub failed: u64,
}

/// Issues signed batch-execution POSTs to the application endpoint.
pub struct Dispatcher {
    client: reqwest::Client,
    url: String,
    tenants: HashMap<String, String>,
    secret: SecretString,
}

impl Dispatcher {
    /// Build the dispatcher and its shared HTTP client.
    pub fn new(config: &DispatchConfig, secret: SecretString) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| DispatchError::Client(e.to_string()))?;

        Ok(Self {
            client,
            url: config.url.clone(),
            tenants: config.tenants.clone(),
            secret,
        })
    }

    /// The configured `Host` header for a tenant, if it is known.
    pub fn host_for(&self, tenant: &str) -> Option<&str> {
        self.tenants.get(tenant).map(String::as_str)
    }

    /// Execute one batch of jobs for a queue, allowing the endpoint up to
    /// `maxtime` seconds of work.
    pub async fn run_jobs(
        &self,
        queue: &QueueId,
        maxtime: u64,
    ) -> Result<BatchOutcome, DispatchError> {
        let host = self
            .host_for(&queue.tenant)
            .ok_or_else(|| DispatchError::UnknownTenant(queue.tenant.clone()))?
            .to_owned();
        let body = signed_body(self.secret.expose_secret(), &queue.queue_type, maxtime)?;

        debug!(queue = %queue, host = %host, maxtime, "dispatching job batch");

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::HOST, host)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .timeout(Duration::from_secs(maxtime) + TIMEOUT_SLACK)
            .body(body)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(DispatchError::Transport(format!(
                "unexpected status {status}"
            )));
        }

        parse_statuses(&bytes)
    }
}

/// Build the canonical request body and append its HMAC-SHA1 signature.
///
/// The signature covers the body exactly as sent, minus the trailing
/// `&signature=...` parameter.
fn signed_body(secret: &str, queue_type: &str, maxtime: u64) -> Result<String, DispatchError> {
    let maxtime = maxtime.to_string();
    let mut body = serde_urlencoded::to_string([
        ("async", "false"),
        ("maxtime", maxtime.as_str()),
        ("sigexpiry", SIG_EXPIRY),
        ("tasks", "placeholder"),
        ("title", "Special:RunJobs"),
        ("type", queue_type),
    ])
    .map_err(|e| DispatchError::Body(e.to_string()))?;

    let signature = hmac_sha1_hex(secret, body.as_bytes())?;
    body.push_str("&signature=");
    body.push_str(&signature);
    Ok(body)
}

fn hmac_sha1_hex(secret: &str, message: &[u8]) -> Result<String, DispatchError> {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
        .map_err(|e| DispatchError::Signing(e.to_string()))?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Parse a response body into ok/failed tallies.
fn parse_statuses(bytes: &[u8]) -> Result<BatchOutcome, DispatchError> {
    let statuses: Vec<JobStatus> = serde_json::from_slice(bytes)
        .map_err(|_| DispatchError::MalformedResponse(truncate_body(bytes)))?;

    let ok = statuses.iter().filter(|s| s.status == "ok").count() as u64;
    let failed = statuses.len() as u64 - ok;
    Ok(BatchOutcome { ok, failed })
}

fn truncate_body(bytes: &[u8]) -> String {
    let end = bytes.len().min(MAX_LOGGED_BODY);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_sha1_matches_known_vector() {
        let signature =
            hmac_sha1_hex("key", b"The quick brown fox jumps over the lazy dog").unwrap();
        assert_eq!(signature, "de7c9b85b8b78aa6bc8a7a36f70a90701c9db4d9");
    }

    #[test]
    fn body_parameters_are_ordered_and_signed_last() {
        let body = signed_body("secret", "htmlCacheUpdate", 30).unwrap();
        let unsigned = "async=false&maxtime=30&sigexpiry=2147483647\
                        &tasks=placeholder&title=Special%3ARunJobs&type=htmlCacheUpdate";
        let expected_sig = hmac_sha1_hex("secret", unsigned.as_bytes()).unwrap();
        assert_eq!(body, format!("{unsigned}&signature={expected_sig}"));
    }

    #[test]
    fn maxtime_varies_with_request() {
        let a = signed_body("s", "t", 30).unwrap();
        let b = signed_body("s", "t", 60).unwrap();
        assert!(a.contains("maxtime=30"));
        assert!(b.contains("maxtime=60"));
        assert_ne!(a, b);
    }

    #[test]
    fn statuses_tally_ok_and_failed() {
        let body = br#"[{"status":"ok"},{"status":"failed"},{"status":"ok"}]"#;
        let outcome = parse_statuses(body).unwrap();
        assert_eq!(outcome, BatchOutcome { ok: 2, failed: 1 });
    }

    #[test]
    fn empty_list_is_well_formed() {
        let outcome = parse_statuses(b"[]").unwrap();
        assert_eq!(outcome, BatchOutcome::default());
    }

    #[test]
    fn non_json_body_is_malformed() {
        let err = parse_statuses(b"<html>maintenance</html>").unwrap_err();
        assert!(matches!(err, DispatchError::MalformedResponse(_)));
    }

    #[test]
    fn malformed_body_is_truncated_in_error() {
        let big = vec![b'x'; MAX_LOGGED_BODY * 2];
        let DispatchError::MalformedResponse(kept) = parse_statuses(&big).unwrap_err() else {
            panic!("expected a malformed-response error");
        };
        assert_eq!(kept.len(), MAX_LOGGED_BODY);
    }

    #[test]
    fn unknown_tenant_has_no_host() {
        let config = DispatchConfig {
            url: "http://127.0.0.1:9005/rpc/RunJobs.php".to_owned(),
            tenants: HashMap::from([("t1".to_owned(), "t1.example.org".to_owned())]),
            secret_project: "jobrunner".to_owned(),
        };
        let dispatcher = Dispatcher::new(&config, SecretString::new("s".to_owned())).unwrap();
        assert_eq!(dispatcher.host_for("t1"), Some("t1.example.org"));
        assert_eq!(dispatcher.host_for("t2"), None);
    }
}

use thiserror::Error;

/// Errors surfaced by the HA client and the operations built on it.
#[derive(Debug, Error)]
pub enum HaError {
    /// A connection pool could not be created.
    #[error("connection error: {0}")]
    Connection(String),

    /// A single endpoint failed at the transport level. The endpoint is
    /// placed in its back-off window by the client.
    #[error("transport error on {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    /// Every endpoint was tried within one call and all failed.
    #[error("all {0} endpoints failed")]
    AllEndpointsDown(usize),

    /// An endpoint replied with something the caller cannot interpret.
    #[error("unexpected reply: {0}")]
    Reply(String),
}

/// Errors from pool-lock acquisition.
#[derive(Debug, Error)]
pub enum LockError {
    /// Every slot is held by a live holder. Expected under contention;
    /// callers record it and try again next period.
    #[error("no free lock slot")]
    Unavailable,

    /// The aggregator set could not be reached at all.
    #[error(transparent)]
    Backend(#[from] HaError),
}

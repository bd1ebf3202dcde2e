//! The runner daemon: priority-aware dispatch of job batches over a
//! bounded pool of outbound HTTP requests.
//!
//! Each configured loop owns a fixed number of slots. The daemon reads
//! the aggregator's ready map (through a short-TTL cache), picks a
//! (type, tenant) queue per free slot under the loop's filters and
//! current priority, and issues a signed POST to the job-execution
//! endpoint. Completions are reaped without blocking and accounted into
//! stats counters.

pub mod cache;
pub mod daemon;
pub mod dispatch;
pub mod metrics;
pub mod pool;
pub mod secret;
pub mod select;

pub use cache::ReadyCache;
pub use daemon::RunnerDaemon;
pub use dispatch::{BatchOutcome, DispatchError, Dispatcher};
pub use metrics::{RunnerMetrics, RunnerSnapshot};
pub use pool::{RefillOutcome, SlotPool};
pub use secret::{EnvSecretSource, SecretError, SecretSource};
pub use select::select_queue;

//! Redis plumbing for the jobrunner service.
//!
//! This crate provides the pieces both daemons stand on:
//!
//! - **HA client**: opaque command execution against an ordered set of
//!   equivalent endpoints, with per-endpoint `deadpool-redis` pools,
//!   failover, and broadcast semantics.
//! - **Pool lock**: a cooperative N-slot distributed lock over aggregator
//!   keys, bounding concurrent chron writers.
//! - **Reclaim script**: the atomic Lua transformation of one queue's
//!   Redis structures (claim recycling, abandonment, pruning, undelay).
//! - **Key layout**: partition and aggregator key rendering, plus the
//!   ready-map read/publish operations.
//!
//! All scripts go through [`redis::Script`], which computes the SHA once
//! and falls back from `EVALSHA` to `EVAL` when a server restarts without
//! the script cached.

pub mod aggregator;
pub mod error;
pub mod ha;
pub mod keys;
pub mod lock;
pub mod reclaim;
pub mod scripts;

pub use aggregator::{fetch_ready_map, publish_ready_map};
pub use error::{HaError, LockError};
pub use ha::HaClient;
pub use keys::{QUEUES_WITH_JOBS, QueueKeys, READY_MAP_KEY};
pub use lock::{PoolLock, PoolLockGuard};
pub use reclaim::{ReclaimArgs, ReclaimCounts, ReclaimError, reclaim_queue};

//! Core types for the jobrunner scheduling service.
//!
//! This crate holds the domain vocabulary shared by the runner and chron
//! daemons: queue identities and their canonical wire encoding, the
//! aggregator ready map, loop priority state, and the service
//! configuration with its per-type parameter lookups.

pub mod config;
pub mod error;
pub mod priority;
pub mod queue;

pub use config::{
    DispatchConfig, LoopConfig, ReclaimConfig, RedisTuning, RunnerTuning, ScheduleConfig,
    ServiceConfig, per_type,
};
pub use error::ConfigError;
pub use priority::{Priority, PriorityState};
pub use queue::{QueueId, QueueIdError, ReadyMap};

//! Serialink Bridge Framework
//!
//! Common building blocks for bridges that move telemetry from a local
//! device to a remote broker.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for layered configuration loading (JSON5 file, then environment)
//! - [`BridgeArgs`] for common CLI argument parsing
//! - [`DeliveryQueue`] bounded FIFO with backpressure or shed-oldest overflow
//! - [`Backoff`] exponential backoff with jitter for reconnects and retries
//! - [`ConnectionMonitor`] single-writer connection state with observers
//! - [`BridgeHealth`] counters and health snapshots
//! - [`BridgeRunner`] for supervised workers, signal handling and ordered shutdown

mod args;
mod backoff;
mod config;
mod error;
mod health;
mod monitor;
mod queue;
mod runner;

pub use args::BridgeArgs;
pub use backoff::{Backoff, BackoffConfig};
pub use config::{BridgeConfig, EnvLookup, parse_env, process_env};
pub use error::{BridgeError, Result};
pub use health::{BridgeHealth, log_snapshot};
pub use monitor::ConnectionMonitor;
pub use queue::{DeliveryQueue, Enqueued, OverflowPolicy, PublishTask, QueueError, ShutdownPolicy};
pub use runner::BridgeRunner;

// Re-export commonly used types from serialink-common
pub use serialink_common::{
    BridgeState, ConnectionState, HealthSnapshot, LogFormat, LoggingConfig, RawLine,
    TelemetryFrame,
};

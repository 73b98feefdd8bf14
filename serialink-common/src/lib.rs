//! Serialink Common Library
//!
//! Shared types and utilities for the serialink gateway:
//!
//! - [`telemetry`] - Device data model (`RawLine`, `TelemetryFrame`)
//! - [`health`] - Connection and bridge state, health snapshots
//! - [`config`] - Configuration loading (JSON5 format) and logging settings
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod health;
pub mod telemetry;

// Re-export commonly used types at the crate root
pub use config::{LogFormat, LoggingConfig, parse_config};
pub use error::{Error, Result};
pub use health::{BridgeState, ConnectionState, HealthSnapshot};
pub use telemetry::{FrameError, RawLine, TelemetryFrame, UNKNOWN_DEVICE};

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// `RUST_LOG`, when set, takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}

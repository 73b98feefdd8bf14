//! Error types for the bridge framework.

use thiserror::Error;

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur in a bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration parse error.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration validation error.
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// A required setting was provided neither in the file nor the environment.
    #[error("Missing required setting '{setting}' (env {env})")]
    MissingSetting {
        setting: &'static str,
        env: &'static str,
    },

    /// An environment override could not be parsed.
    #[error("Invalid value for {env}: {message}")]
    InvalidEnv { env: &'static str, message: String },

    /// Worker error.
    #[error("Worker error: {0}")]
    Worker(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Create a configuration validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }

    /// Create a worker error.
    pub fn worker(msg: impl Into<String>) -> Self {
        Self::Worker(msg.into())
    }

    /// True for every error raised while loading or validating configuration.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::ConfigNotFound { .. }
                | Self::ConfigParse(_)
                | Self::ConfigValidation(_)
                | Self::MissingSetting { .. }
                | Self::InvalidEnv { .. }
        )
    }
}

impl From<serialink_common::Error> for BridgeError {
    fn from(err: serialink_common::Error) -> Self {
        match err {
            serialink_common::Error::Config(msg) => Self::Config(msg),
            serialink_common::Error::Parse(msg) => Self::ConfigParse(msg),
        }
    }
}

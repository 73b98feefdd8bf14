use thiserror::Error;

/// Common error type for serialink components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Result type alias using serialink's Error.
pub type Result<T> = std::result::Result<T, Error>;

//! Error types for the device and broker links.
//!
//! All of these are recoverable: the owning loop logs them and reconnects,
//! retries or skips. Only configuration errors stop the process.

use thiserror::Error;

/// Opening the device or connecting to the broker failed.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Failed to open serial port {port}: {message}")]
    Device { port: String, message: String },

    #[error("Broker connection failed: {0}")]
    Broker(String),

    #[error("Broker refused connection: {0}")]
    Refused(String),

    #[error("Invalid TLS setup: {0}")]
    Tls(String),

    #[error("Connection timed out")]
    Timeout,
}

/// Reading a line from the device failed.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("No line within read timeout")]
    Timeout,

    #[error("Device stream closed")]
    Closed,

    #[error("Device is not open")]
    NotConnected,

    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReadError {
    /// True when the link must be reopened.
    pub fn is_disconnect(&self) -> bool {
        !matches!(self, ReadError::Timeout)
    }
}

/// A line could not be turned into a frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Line is empty")]
    Empty,

    #[error("Malformed frame ({reason}): {line}")]
    MalformedFrame { line: String, reason: String },
}

/// Publishing a frame failed.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Not connected to broker")]
    NotConnected,

    #[error("No acknowledgment within publish timeout")]
    Timeout,

    #[error("Broker connection lost: {0}")]
    ConnectionLost(String),

    #[error("Publish rejected by client: {0}")]
    Client(String),
}

//! Connection and bridge state types shared by the bridge and its observers.

use serde::{Deserialize, Serialize};

/// Lifecycle of one I/O link (device or broker).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum ConnectionState {
    /// No link; a reconnect may be pending.
    #[default]
    Disconnected,
    /// An open/connect attempt is in progress.
    Connecting,
    /// Link is up and usable.
    Connected,
    /// Link is up but misbehaving (timeouts, failed publishes).
    Degraded(String),
}

impl ConnectionState {
    /// True only for [`ConnectionState::Connected`].
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Degraded(reason) => write!(f, "degraded ({})", reason),
        }
    }
}

/// Overall state of the bridge as seen by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeState {
    /// Waiting for both links to come up for the first time.
    #[default]
    Starting,
    /// Both links connected.
    Running,
    /// At least one link is down or degraded.
    Degraded,
    /// Shutdown requested, pipeline winding down.
    Stopping,
    /// All links closed.
    Stopped,
}

impl BridgeState {
    /// Compute the steady-state bridge state from the two link states.
    ///
    /// `has_been_running` is true once both links were connected at least once;
    /// before that the bridge is still `Starting`.
    pub fn derive(
        device: &ConnectionState,
        broker: &ConnectionState,
        has_been_running: bool,
    ) -> Self {
        if device.is_connected() && broker.is_connected() {
            BridgeState::Running
        } else if has_been_running {
            BridgeState::Degraded
        } else {
            BridgeState::Starting
        }
    }
}

impl std::fmt::Display for BridgeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeState::Starting => write!(f, "starting"),
            BridgeState::Running => write!(f, "running"),
            BridgeState::Degraded => write!(f, "degraded"),
            BridgeState::Stopping => write!(f, "stopping"),
            BridgeState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Point-in-time health report of a bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Bridge name.
    pub bridge: String,
    /// Overall bridge state.
    pub state: BridgeState,
    /// Device link state.
    pub device: ConnectionState,
    /// Broker link state.
    pub broker: ConnectionState,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Tasks currently waiting in the delivery queue.
    pub queue_depth: u64,
    /// Non-blank lines read from the device.
    pub lines_read: u64,
    /// Lines that became frames.
    pub frames_decoded: u64,
    /// Lines rejected by the decoder.
    pub frames_rejected: u64,
    /// Frames accepted into the delivery queue.
    pub frames_enqueued: u64,
    /// Frames dropped by the shed-oldest overflow policy.
    pub frames_shed: u64,
    /// Frames acknowledged by the broker.
    pub frames_published: u64,
    /// Frames dropped after exhausting publish attempts.
    pub frames_failed: u64,
    /// Device reopen count.
    pub device_reconnects: u64,
    /// Broker reconnect count.
    pub broker_reconnects: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_starting_until_both_connected() {
        let state = BridgeState::derive(
            &ConnectionState::Connected,
            &ConnectionState::Connecting,
            false,
        );
        assert_eq!(state, BridgeState::Starting);
    }

    #[test]
    fn test_derive_running_and_degraded() {
        let up = ConnectionState::Connected;
        let down = ConnectionState::Disconnected;
        let flaky = ConnectionState::Degraded("read timeout".to_string());

        assert_eq!(BridgeState::derive(&up, &up, false), BridgeState::Running);
        assert_eq!(BridgeState::derive(&up, &down, true), BridgeState::Degraded);
        assert_eq!(BridgeState::derive(&flaky, &up, true), BridgeState::Degraded);
    }

    #[test]
    fn test_connection_state_serialization() {
        let json = serde_json::to_string(&ConnectionState::Degraded("stale".into())).unwrap();
        assert_eq!(json, r#"{"state":"degraded","reason":"stale"}"#);

        let json = serde_json::to_string(&ConnectionState::Connected).unwrap();
        assert_eq!(json, r#"{"state":"connected"}"#);
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert_eq!(BridgeState::Degraded.to_string(), "degraded");
    }
}

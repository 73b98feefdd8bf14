//! Observable connection state.
//!
//! Each link (device, broker) owns one [`ConnectionMonitor`] and is the only
//! writer. The supervisor and the health loop hold receivers.

use tokio::sync::watch;

use serialink_common::ConnectionState;

/// Single-writer, many-reader holder of a [`ConnectionState`].
#[derive(Debug)]
pub struct ConnectionMonitor {
    link: &'static str,
    tx: watch::Sender<ConnectionState>,
}

impl ConnectionMonitor {
    /// Create a monitor for the named link, starting `Disconnected`.
    pub fn new(link: &'static str) -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self { link, tx }
    }

    /// Link name used in logs.
    pub fn link(&self) -> &'static str {
        self.link
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.tx.borrow().clone()
    }

    /// Receiver that observes every subsequent transition.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Move to `next`. Repeating the current state is a no-op.
    pub fn set(&self, next: ConnectionState) {
        let link = self.link;
        self.tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            tracing::info!(link, from = %current, to = %next, "Connection state changed");
            *current = next;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_observer_sees_transitions() {
        let monitor = ConnectionMonitor::new("device");
        let mut rx = monitor.subscribe();
        assert_eq!(*rx.borrow(), ConnectionState::Disconnected);

        monitor.set(ConnectionState::Connecting);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Connecting);

        monitor.set(ConnectionState::Connected);
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_connected());
    }

    #[test]
    fn test_repeated_state_is_not_a_change() {
        let monitor = ConnectionMonitor::new("broker");
        let rx = monitor.subscribe();

        monitor.set(ConnectionState::Disconnected);
        assert!(!rx.has_changed().unwrap());

        monitor.set(ConnectionState::Degraded("timeout".into()));
        assert!(rx.has_changed().unwrap());
        assert_eq!(
            monitor.state(),
            ConnectionState::Degraded("timeout".into())
        );
    }
}

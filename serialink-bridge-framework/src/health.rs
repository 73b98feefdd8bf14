//! Bridge health monitoring and metrics.
//!
//! [`BridgeHealth`] is shared by all pipeline stages; each stage bumps its
//! counters and the health loop turns them into a [`HealthSnapshot`].

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::watch;

use serialink_common::{BridgeState, ConnectionState, HealthSnapshot};

/// Bridge health metrics.
#[derive(Debug)]
pub struct BridgeHealth {
    /// Bridge name.
    bridge_name: String,
    /// Start time for uptime calculation.
    start_time: Instant,
    lines_read: AtomicU64,
    frames_decoded: AtomicU64,
    frames_rejected: AtomicU64,
    frames_enqueued: AtomicU64,
    frames_shed: AtomicU64,
    frames_published: AtomicU64,
    frames_failed: AtomicU64,
    device_reconnects: AtomicU64,
    broker_reconnects: AtomicU64,
    /// Last bridge state computed by the supervisor.
    state: Mutex<BridgeState>,
}

impl BridgeHealth {
    /// Create a new health tracker.
    pub fn new(bridge_name: impl Into<String>) -> Self {
        Self {
            bridge_name: bridge_name.into(),
            start_time: Instant::now(),
            lines_read: AtomicU64::new(0),
            frames_decoded: AtomicU64::new(0),
            frames_rejected: AtomicU64::new(0),
            frames_enqueued: AtomicU64::new(0),
            frames_shed: AtomicU64::new(0),
            frames_published: AtomicU64::new(0),
            frames_failed: AtomicU64::new(0),
            device_reconnects: AtomicU64::new(0),
            broker_reconnects: AtomicU64::new(0),
            state: Mutex::new(BridgeState::Starting),
        }
    }

    /// Bridge name.
    pub fn bridge_name(&self) -> &str {
        &self.bridge_name
    }

    pub fn record_line_read(&self) {
        self.lines_read.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_frame_decoded(&self) {
        self.frames_decoded.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_frame_rejected(&self) {
        self.frames_rejected.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_frame_enqueued(&self) {
        self.frames_enqueued.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_frame_shed(&self) {
        self.frames_shed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_frame_published(&self) {
        self.frames_published.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a frame dropped after exhausting its publish attempts.
    pub fn record_frame_failed(&self) {
        self.frames_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_device_reconnect(&self) {
        self.device_reconnects.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_broker_reconnect(&self) {
        self.broker_reconnects.fetch_add(1, Ordering::SeqCst);
    }

    /// Current bridge state.
    pub fn state(&self) -> BridgeState {
        *self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Store a new bridge state, returning the previous one.
    pub fn set_state(&self, next: BridgeState) -> BridgeState {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        std::mem::replace(&mut *state, next)
    }

    /// Get a snapshot of current health metrics.
    pub fn snapshot(
        &self,
        device: &watch::Receiver<ConnectionState>,
        broker: &watch::Receiver<ConnectionState>,
        queue_depth: usize,
    ) -> HealthSnapshot {
        HealthSnapshot {
            bridge: self.bridge_name.clone(),
            state: self.state(),
            device: device.borrow().clone(),
            broker: broker.borrow().clone(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            queue_depth: queue_depth as u64,
            lines_read: self.lines_read.load(Ordering::SeqCst),
            frames_decoded: self.frames_decoded.load(Ordering::SeqCst),
            frames_rejected: self.frames_rejected.load(Ordering::SeqCst),
            frames_enqueued: self.frames_enqueued.load(Ordering::SeqCst),
            frames_shed: self.frames_shed.load(Ordering::SeqCst),
            frames_published: self.frames_published.load(Ordering::SeqCst),
            frames_failed: self.frames_failed.load(Ordering::SeqCst),
            device_reconnects: self.device_reconnects.load(Ordering::SeqCst),
            broker_reconnects: self.broker_reconnects.load(Ordering::SeqCst),
        }
    }
}

/// Log a snapshot as one structured event.
pub fn log_snapshot(snapshot: &HealthSnapshot) {
    tracing::info!(
        bridge = %snapshot.bridge,
        state = %snapshot.state,
        device = %snapshot.device,
        broker = %snapshot.broker,
        uptime_secs = snapshot.uptime_secs,
        queue_depth = snapshot.queue_depth,
        lines_read = snapshot.lines_read,
        frames_rejected = snapshot.frames_rejected,
        frames_published = snapshot.frames_published,
        frames_shed = snapshot.frames_shed,
        frames_failed = snapshot.frames_failed,
        device_reconnects = snapshot.device_reconnects,
        broker_reconnects = snapshot.broker_reconnects,
        "Health report"
    );
}

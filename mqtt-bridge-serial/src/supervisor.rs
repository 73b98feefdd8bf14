//! Pipeline composition and lifecycle.
//!
//! ```text
//! DeviceReader ──▶ FrameDecoder ──▶ DeliveryQueue ──▶ BrokerPublisher
//!      │                                                    │
//!      └──────────── ConnectionMonitor ×2 ──▶ health loop ◀─┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use serialink_bridge_framework::{
    BridgeHealth, BridgeRunner, BridgeState, ConnectionMonitor, ConnectionState, DeliveryQueue,
    HealthSnapshot, ShutdownPolicy, log_snapshot,
};

use crate::config::SerialBridgeConfig;
use crate::publisher::{BrokerPublisher, BrokerTransport};
use crate::reader::{DeviceReader, DeviceTransport};

/// Name used for the runner and in health reports.
pub const BRIDGE_NAME: &str = "mqtt-bridge-serial";

const READ_WORKER: &str = "read-loop";
const PUBLISH_WORKER: &str = "publish-loop";
const HEALTH_WORKER: &str = "health-loop";

/// Time a worker gets to wind down after cancellation.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the pipeline and its three workers.
pub struct BridgeSupervisor<D: DeviceTransport, B: BrokerTransport> {
    config: SerialBridgeConfig,
    device: D,
    broker: B,
    runner: BridgeRunner,
    queue: Arc<DeliveryQueue>,
    health: Arc<BridgeHealth>,
    device_link: Arc<ConnectionMonitor>,
    broker_link: Arc<ConnectionMonitor>,
    started: bool,
}

impl<D: DeviceTransport, B: BrokerTransport> BridgeSupervisor<D, B> {
    pub fn new(config: SerialBridgeConfig, device: D, broker: B) -> Self {
        let queue = Arc::new(DeliveryQueue::new(
            config.queue.capacity,
            config.queue.overflow,
        ));

        Self {
            config,
            device,
            broker,
            runner: BridgeRunner::new(BRIDGE_NAME),
            queue,
            health: Arc::new(BridgeHealth::new(BRIDGE_NAME)),
            device_link: Arc::new(ConnectionMonitor::new("device")),
            broker_link: Arc::new(ConnectionMonitor::new("broker")),
            started: false,
        }
    }

    /// Cancelling this token makes [`run`](Self::run) shut the bridge down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.runner.shutdown_token()
    }

    pub fn health(&self) -> Arc<BridgeHealth> {
        self.health.clone()
    }

    pub fn queue(&self) -> Arc<DeliveryQueue> {
        self.queue.clone()
    }

    /// Observe device link transitions.
    pub fn device_state(&self) -> watch::Receiver<ConnectionState> {
        self.device_link.subscribe()
    }

    /// Observe broker link transitions.
    pub fn broker_state(&self) -> watch::Receiver<ConnectionState> {
        self.broker_link.subscribe()
    }

    /// Current health report.
    pub fn snapshot(&self) -> HealthSnapshot {
        self.health.snapshot(
            &self.device_link.subscribe(),
            &self.broker_link.subscribe(),
            self.queue.len(),
        )
    }

    /// Spawn the read, publish and health workers. Idempotent.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;

        info!(
            bridge = BRIDGE_NAME,
            version = self.runner.version(),
            port = %self.config.serial.port,
            topic = %self.config.mqtt.topic,
            queue_capacity = self.queue.capacity(),
            overflow = ?self.queue.policy(),
            "Starting bridge"
        );

        let backoff = self.config.backoff.clone();

        {
            let device = self.device.clone();
            let serial = self.config.serial.clone();
            let monitor = self.device_link.clone();
            let health = self.health.clone();
            let queue = self.queue.clone();
            let reader_backoff = backoff.clone();
            self.runner
                .spawn_supervised(READ_WORKER, backoff.clone(), move |token| {
                    let reader = DeviceReader::new(
                        device.clone(),
                        serial.clone(),
                        reader_backoff.clone(),
                        monitor.clone(),
                        health.clone(),
                    );
                    reader.run(queue.clone(), token)
                });
        }

        {
            let broker = self.broker.clone();
            let mqtt = self.config.mqtt.clone();
            let monitor = self.broker_link.clone();
            let health = self.health.clone();
            let queue = self.queue.clone();
            let publisher_backoff = backoff.clone();
            self.runner
                .spawn_supervised(PUBLISH_WORKER, backoff.clone(), move |token| {
                    let publisher = BrokerPublisher::new(
                        broker.clone(),
                        &mqtt,
                        publisher_backoff.clone(),
                        monitor.clone(),
                        health.clone(),
                    );
                    publisher.run(queue.clone(), token)
                });
        }

        {
            let health = self.health.clone();
            let queue = self.queue.clone();
            let device_link = self.device_link.clone();
            let broker_link = self.broker_link.clone();
            let interval = self.config.health.interval();
            self.runner.spawn_supervised(HEALTH_WORKER, backoff, move |token| {
                health_loop(
                    health.clone(),
                    queue.clone(),
                    device_link.subscribe(),
                    broker_link.subscribe(),
                    interval,
                    token,
                )
            });
        }
    }

    /// Ordered shutdown: reader, queue, publisher, health loop.
    ///
    /// Returns the final health report.
    pub async fn shutdown(&mut self) -> HealthSnapshot {
        let previous = self.health.set_state(BridgeState::Stopping);
        info!(from = %previous, to = %BridgeState::Stopping, "Bridge state changed");

        self.runner.stop(READ_WORKER, STOP_TIMEOUT).await;
        self.queue.close();

        match self.config.queue.on_shutdown {
            ShutdownPolicy::Drain => {
                let pending = self.queue.len();
                if pending > 0 {
                    info!(pending, "Draining delivery queue");
                }
                let drained = self
                    .runner
                    .join(PUBLISH_WORKER, self.config.queue.drain_timeout())
                    .await;
                let dropped = self.queue.abandon();
                if !drained || dropped > 0 {
                    warn!(dropped, "Drain timed out, remaining frames dropped");
                }
            }
            ShutdownPolicy::Abandon => {
                let dropped = self.queue.abandon();
                if dropped > 0 {
                    warn!(dropped, "Abandoning queued frames on shutdown");
                }
                self.runner.stop(PUBLISH_WORKER, STOP_TIMEOUT).await;
            }
        }

        self.runner.stop(HEALTH_WORKER, STOP_TIMEOUT).await;
        self.runner.stop_all(STOP_TIMEOUT).await;

        self.health.set_state(BridgeState::Stopped);
        let snapshot = self.snapshot();
        log_snapshot(&snapshot);
        info!(bridge = BRIDGE_NAME, "Bridge stopped");
        snapshot
    }

    /// Start the pipeline, wait for a shutdown signal, then stop in order.
    pub async fn run(mut self) -> HealthSnapshot {
        self.start();
        self.runner.wait_for_shutdown().await;
        self.shutdown().await
    }
}

/// Track bridge state from both links and report health periodically.
async fn health_loop(
    health: Arc<BridgeHealth>,
    queue: Arc<DeliveryQueue>,
    mut device: watch::Receiver<ConnectionState>,
    mut broker: watch::Receiver<ConnectionState>,
    interval: Duration,
    cancel: CancellationToken,
) -> serialink_bridge_framework::Result<()> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    let mut has_been_running = health.state() != BridgeState::Starting;

    loop {
        let next = BridgeState::derive(&device.borrow(), &broker.borrow(), has_been_running);
        has_been_running |= next == BridgeState::Running;

        let current = health.state();
        if current != next && !matches!(current, BridgeState::Stopping | BridgeState::Stopped) {
            health.set_state(next);
            info!(from = %current, to = %next, "Bridge state changed");
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            changed = device.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = broker.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {
                log_snapshot(&health.snapshot(&device, &broker, queue.len()));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MqttConfig, SerialConfig};
    use crate::mock::{MockBroker, MockDevice};
    use serialink_bridge_framework::BackoffConfig;

    fn config() -> SerialBridgeConfig {
        SerialBridgeConfig {
            serial: SerialConfig {
                port: "/dev/mock".to_string(),
                settle_delay_ms: 10,
                read_timeout_ms: 100,
                ..Default::default()
            },
            mqtt: MqttConfig {
                url: "localhost".to_string(),
                topic: "sensors/telemetry".to_string(),
                ..Default::default()
            },
            backoff: BackoffConfig::fixed(Duration::from_millis(20)),
            ..Default::default()
        }
    }

    async fn wait_for_state(health: &BridgeHealth, state: BridgeState) {
        while health.state() != state {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_once_both_links_connect() {
        let device = MockDevice::new();
        device.push_silent_session();
        let mut supervisor = BridgeSupervisor::new(config(), device, MockBroker::new());
        let health = supervisor.health();
        assert_eq!(health.state(), BridgeState::Starting);

        supervisor.start();
        wait_for_state(&health, BridgeState::Running).await;
        let snapshot = supervisor.shutdown().await;

        assert_eq!(snapshot.state, BridgeState::Stopped);
        assert_eq!(snapshot.device, ConnectionState::Disconnected);
        assert_eq!(snapshot.broker, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_when_device_goes_silent() {
        let device = MockDevice::new();
        device.push_silent_session();
        let mut supervisor = BridgeSupervisor::new(config(), device, MockBroker::new());
        let health = supervisor.health();
        supervisor.start();

        wait_for_state(&health, BridgeState::Running).await;
        wait_for_state(&health, BridgeState::Degraded).await;

        let snapshot = supervisor.shutdown().await;
        assert_eq!(snapshot.state, BridgeState::Stopped);
        assert_eq!(snapshot.frames_published, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_token_stops_run() {
        let device = MockDevice::new();
        device.push_silent_session();
        let supervisor = BridgeSupervisor::new(config(), device, MockBroker::new());
        let token = supervisor.shutdown_token();
        let health = supervisor.health();

        let handle = tokio::spawn(supervisor.run());
        wait_for_state(&health, BridgeState::Running).await;
        token.cancel();

        let snapshot = handle.await.unwrap();
        assert_eq!(snapshot.state, BridgeState::Stopped);
        assert_eq!(snapshot.queue_depth, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_policy_drops_pending_frames() {
        let device = MockDevice::new();
        device.push_lines(&["{\"n\":1}", "{\"n\":2}", "{\"n\":3}"]);
        let broker = MockBroker::new();
        broker.fail_next_connects(u32::MAX);

        let mut cfg = config();
        cfg.queue.on_shutdown = ShutdownPolicy::Abandon;
        let mut supervisor = BridgeSupervisor::new(cfg, device, broker.clone());
        let health = supervisor.health();
        supervisor.start();

        while supervisor.snapshot().frames_enqueued < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let snapshot = supervisor.shutdown().await;

        assert!(broker.published().is_empty());
        assert_eq!(snapshot.queue_depth, 0);
        assert_eq!(health.state(), BridgeState::Stopped);
    }
}

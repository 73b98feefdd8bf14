//! Broker side of the pipeline: connect, publish with acknowledgment, retry.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use serialink_bridge_framework::{
    Backoff, BackoffConfig, BridgeHealth, ConnectionMonitor, ConnectionState, DeliveryQueue,
    PublishTask,
};

use crate::config::MqttConfig;
use crate::error::{ConnectError, PublishError};

/// Broker acknowledgment for one publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub packet_id: u16,
}

/// An established broker session.
pub trait BrokerSession: Send + 'static {
    /// Publish `payload` on `topic` and resolve once the broker acknowledged it.
    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
    ) -> impl Future<Output = Result<Ack, PublishError>> + Send;

    /// Reason the link went down, if the transport already reported it.
    /// Never waits.
    fn lost(&mut self) -> Option<String>;

    /// Resolve with the reason once the link goes down. Cancel safe.
    fn closed(&mut self) -> impl Future<Output = String> + Send;

    /// Disconnect cleanly.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Something that can open a broker session.
pub trait BrokerTransport: Clone + Send + Sync + 'static {
    type Session: BrokerSession;

    fn connect(&self) -> impl Future<Output = Result<Self::Session, ConnectError>> + Send;
}

/// Final outcome of delivering one task.
#[derive(Debug)]
pub enum Delivery {
    /// Broker acknowledged the frame.
    Published(Ack),
    /// Every attempt failed; the frame was dropped.
    Failed { attempts: u32, error: PublishError },
}

/// Delivers queued frames to the broker, in order, one at a time.
pub struct BrokerPublisher<T: BrokerTransport> {
    transport: T,
    topic: String,
    max_attempts: u32,
    publish_timeout: Duration,
    connect_backoff: Backoff,
    retry_backoff: Backoff,
    monitor: Arc<ConnectionMonitor>,
    health: Arc<BridgeHealth>,
    session: Option<T::Session>,
    connected_once: bool,
}

impl<T: BrokerTransport> BrokerPublisher<T> {
    pub fn new(
        transport: T,
        config: &MqttConfig,
        backoff: BackoffConfig,
        monitor: Arc<ConnectionMonitor>,
        health: Arc<BridgeHealth>,
    ) -> Self {
        Self {
            transport,
            topic: config.topic.clone(),
            max_attempts: config.max_attempts.max(1),
            publish_timeout: config.publish_timeout(),
            connect_backoff: backoff.start(),
            retry_backoff: backoff.start(),
            monitor,
            health,
            session: None,
            connected_once: false,
        }
    }

    /// Topic every frame is published on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Single connect attempt.
    pub async fn connect(&mut self) -> Result<(), ConnectError> {
        self.monitor.set(ConnectionState::Connecting);

        match self.transport.connect().await {
            Ok(session) => {
                self.session = Some(session);
                if self.connected_once {
                    self.health.record_broker_reconnect();
                }
                self.connected_once = true;
                self.monitor.set(ConnectionState::Connected);
                info!(topic = %self.topic, "Connected to MQTT broker");
                Ok(())
            }
            Err(e) => {
                self.monitor.set(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Forget the session if its link went down while idle, so the next
    /// publish does not spend an attempt on it.
    fn reap_lost_session(&mut self) {
        if let Some(reason) = self.session.as_mut().and_then(|session| session.lost()) {
            self.on_link_lost(&reason);
        }
    }

    fn on_link_lost(&mut self, reason: &str) {
        warn!(reason, "Broker connection lost");
        self.session = None;
        self.monitor.set(ConnectionState::Disconnected);
    }

    /// Connect with backoff unless already connected. Returns false if
    /// cancelled before a session was established.
    pub async fn ensure_connected(&mut self, cancel: &CancellationToken) -> bool {
        self.reap_lost_session();
        while self.session.is_none() {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                result = self.connect() => result,
            };

            match result {
                Ok(()) => self.connect_backoff.reset(),
                Err(e) => {
                    let delay = self.connect_backoff.next_delay();
                    warn!(
                        error = %e,
                        attempt = self.connect_backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "Broker connection failed, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return false,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        true
    }

    /// One publish attempt on the current session, bounded by the publish
    /// timeout. Any failure drops the session so the next attempt reconnects.
    pub async fn publish_once(&mut self, payload: &[u8]) -> Result<Ack, PublishError> {
        let Some(session) = self.session.as_mut() else {
            return Err(PublishError::NotConnected);
        };

        let result =
            match tokio::time::timeout(self.publish_timeout, session.publish(&self.topic, payload))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(PublishError::Timeout),
            };

        if let Err(e) = &result {
            self.session = None;
            self.monitor
                .set(ConnectionState::Degraded(format!("publish failed: {e}")));
        }
        result
    }

    /// Deliver one task, retrying up to the attempt limit.
    ///
    /// Returns `None` if `cancel` fired before a final outcome.
    pub async fn deliver(
        &mut self,
        task: &mut PublishTask,
        cancel: &CancellationToken,
    ) -> Option<Delivery> {
        let mut last_error = PublishError::NotConnected;

        while task.attempt_count < self.max_attempts {
            if !self.ensure_connected(cancel).await {
                return None;
            }

            let attempt = task.attempt_count + 1;
            let payload = task.frame.raw_payload().as_bytes();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                result = self.publish_once(payload) => result,
            };

            match result {
                Ok(ack) => {
                    self.retry_backoff.reset();
                    self.health.record_frame_published();
                    debug!(
                        device = %task.frame.device_id(),
                        topic = %self.topic,
                        packet_id = ack.packet_id,
                        attempt,
                        "Message published"
                    );
                    return Some(Delivery::Published(ack));
                }
                Err(e) => {
                    task.attempt_count = attempt;
                    warn!(
                        device = %task.frame.device_id(),
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Publish attempt failed"
                    );
                    last_error = e;

                    if task.attempt_count < self.max_attempts {
                        let delay = self.retry_backoff.next_delay();
                        tokio::select! {
                            _ = cancel.cancelled() => return None,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }

        self.retry_backoff.reset();
        self.health.record_frame_failed();
        error!(
            device = %task.frame.device_id(),
            attempts = task.attempt_count,
            enqueued_at = %task.enqueued_at,
            error = %last_error,
            "Giving up on frame after exhausting publish attempts"
        );
        Some(Delivery::Failed {
            attempts: task.attempt_count,
            error: last_error,
        })
    }

    /// Disconnect from the broker if connected.
    pub async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
            info!("Disconnected from MQTT broker");
        }
        self.monitor.set(ConnectionState::Disconnected);
    }

    /// Publish loop: take tasks from the queue until it is closed and empty
    /// or `cancel` fires.
    pub async fn run(
        mut self,
        queue: Arc<DeliveryQueue>,
        cancel: CancellationToken,
    ) -> serialink_bridge_framework::Result<()> {
        info!(topic = %self.topic, "Starting broker publisher");

        if self.ensure_connected(&cancel).await {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    reason = link_lost(self.session.as_mut()) => {
                        self.on_link_lost(&reason);
                        if !self.ensure_connected(&cancel).await {
                            break;
                        }
                        continue;
                    }
                    next = queue.dequeue() => next,
                };

                let Some(mut task) = next else {
                    debug!("Delivery queue closed and drained");
                    break;
                };

                if self.deliver(&mut task, &cancel).await.is_none() {
                    warn!(
                        device = %task.frame.device_id(),
                        attempts = task.attempt_count,
                        "Shutdown interrupted delivery, frame not published"
                    );
                    break;
                }
            }
        }

        self.close().await;
        info!("Broker publisher stopped");
        Ok(())
    }
}

/// Wait for an idle session to go down. Pending forever without one.
async fn link_lost<S: BrokerSession>(session: Option<&mut S>) -> String {
    match session {
        Some(session) => session.closed().await,
        None => std::future::pending().await,
    }
}

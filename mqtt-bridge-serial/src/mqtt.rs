//! MQTT transport over rumqttc.
//!
//! rumqttc drives the connection from an `EventLoop` that must be polled
//! continuously. Each session owns a task doing that and forwarding the
//! events that matter for publish acknowledgment.

use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, Transport,
};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, warn};

use crate::config::MqttConfig;
use crate::error::{ConnectError, PublishError};
use crate::publisher::{Ack, BrokerSession, BrokerTransport};

/// Requests rumqttc may buffer between the client and its event loop.
const CLIENT_CAPACITY: usize = 16;

const EVENT_LOOP_STOPPED: &str = "event loop stopped";

/// How long a clean disconnect may take before the event loop is dropped.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Connects to the broker described by an [`MqttConfig`].
#[derive(Debug, Clone)]
pub struct MqttTransport {
    config: MqttConfig,
}

impl MqttTransport {
    pub fn new(config: MqttConfig) -> Self {
        Self { config }
    }

    fn options(&self) -> Result<MqttOptions, ConnectError> {
        let (host, port) = self
            .config
            .endpoint()
            .map_err(|e| ConnectError::Broker(e.to_string()))?;

        let mut options = MqttOptions::new(self.config.client_id.clone(), host, port);
        options.set_keep_alive(self.config.keep_alive());
        options.set_clean_session(true);

        if let Some((username, password)) = self.config.credentials() {
            options.set_credentials(username, password);
        }

        if self.config.tls {
            let transport = match &self.config.ca_file {
                Some(path) => {
                    let ca = std::fs::read(path).map_err(|e| {
                        ConnectError::Tls(format!("cannot read CA file {}: {}", path.display(), e))
                    })?;
                    Transport::tls(ca, None, None)
                }
                None => Transport::tls_with_default_config(),
            };
            options.set_transport(transport);
        }

        Ok(options)
    }
}

impl BrokerTransport for MqttTransport {
    type Session = MqttSession;

    async fn connect(&self) -> Result<MqttSession, ConnectError> {
        let options = self.options()?;
        let (client, mut eventloop) = AsyncClient::new(options, CLIENT_CAPACITY);

        match tokio::time::timeout(self.config.connect_timeout(), wait_for_connack(&mut eventloop))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(ConnectError::Timeout),
        }

        let (events_tx, events) = mpsc::unbounded_channel();
        let driver = AbortOnDropHandle::new(tokio::spawn(drive(eventloop, events_tx)));

        Ok(MqttSession {
            client,
            events,
            down: None,
            _driver: driver,
        })
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), ConnectError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(_) => {}
            Err(ConnectionError::ConnectionRefused(code)) => {
                return Err(ConnectError::Refused(format!("{code:?}")));
            }
            Err(e) => return Err(ConnectError::Broker(e.to_string())),
        }
    }
}

/// Event loop activity relevant to a publish in flight.
#[derive(Debug)]
enum LinkEvent {
    Sent(u16),
    Acked(u16),
    Lost(String),
}

async fn drive(mut eventloop: EventLoop, events: mpsc::UnboundedSender<LinkEvent>) {
    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => LinkEvent::Sent(pkid),
            Ok(Event::Incoming(Packet::PubAck(ack))) => LinkEvent::Acked(ack.pkid),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent");
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "MQTT connection lost");
                let _ = events.send(LinkEvent::Lost(e.to_string()));
                return;
            }
        };

        if events.send(event).is_err() {
            return;
        }
    }
}

/// A connected rumqttc client. Dropping it stops its event loop.
pub struct MqttSession {
    client: AsyncClient,
    events: mpsc::UnboundedReceiver<LinkEvent>,
    /// Set once the event loop reported the link gone.
    down: Option<String>,
    _driver: AbortOnDropHandle<()>,
}

impl BrokerSession for MqttSession {
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<Ack, PublishError> {
        // Also drains events left over from earlier, abandoned publishes.
        if let Some(reason) = self.lost() {
            return Err(PublishError::ConnectionLost(reason));
        }

        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .await
            .map_err(|e| PublishError::Client(e.to_string()))?;

        // Publishes are strictly sequential, so the next outgoing publish
        // is ours. Acks for earlier, abandoned packets are skipped.
        let mut packet_id = None;
        loop {
            match self.events.recv().await {
                Some(LinkEvent::Sent(pkid)) if packet_id.is_none() => packet_id = Some(pkid),
                Some(LinkEvent::Acked(pkid)) if packet_id == Some(pkid) => {
                    return Ok(Ack { packet_id: pkid });
                }
                Some(LinkEvent::Lost(reason)) => {
                    self.down = Some(reason.clone());
                    return Err(PublishError::ConnectionLost(reason));
                }
                Some(_) => {}
                None => {
                    self.down = Some(EVENT_LOOP_STOPPED.to_string());
                    return Err(PublishError::ConnectionLost(EVENT_LOOP_STOPPED.to_string()));
                }
            }
        }
    }

    fn lost(&mut self) -> Option<String> {
        while self.down.is_none() {
            match self.events.try_recv() {
                Ok(LinkEvent::Lost(reason)) => self.down = Some(reason),
                Ok(_) => {}
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.down = Some(EVENT_LOOP_STOPPED.to_string());
                }
            }
        }
        self.down.clone()
    }

    async fn closed(&mut self) -> String {
        loop {
            if let Some(reason) = &self.down {
                return reason.clone();
            }
            match self.events.recv().await {
                Some(LinkEvent::Lost(reason)) => self.down = Some(reason),
                Some(_) => {}
                None => self.down = Some(EVENT_LOOP_STOPPED.to_string()),
            }
        }
    }

    async fn close(mut self) {
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "MQTT disconnect request failed");
            return;
        }

        // The driver exits once the disconnect went out.
        let drained = tokio::time::timeout(DISCONNECT_GRACE, async {
            while self.events.recv().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            debug!("MQTT disconnect did not complete in time");
        }
    }
}

//! In-memory device and broker for exercising the bridge without hardware.
//!
//! Both mocks are cheap to clone; clones share the same script and records,
//! so a test keeps one handle while the bridge owns another.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::Notify;

use crate::error::{ConnectError, PublishError};
use crate::publisher::{Ack, BrokerSession, BrokerTransport};
use crate::reader::DeviceTransport;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What the next open of a [`MockDevice`] does.
#[derive(Debug)]
enum DeviceScript {
    /// Stream these bytes, then report end of stream.
    Session(Vec<u8>),
    /// Stream nothing and never close.
    Silent,
    /// Fail the open.
    Fail(String),
}

#[derive(Debug, Default)]
struct DeviceState {
    scripts: VecDeque<DeviceScript>,
    opens: u32,
    /// Writer halves of silent sessions, held so they never see EOF.
    held: Vec<DuplexStream>,
}

/// Scripted serial device. Each open consumes the next script entry; once
/// the script is exhausted every open fails as if the device was unplugged.
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next open yields `bytes` and then end of stream.
    pub fn push_session(&self, bytes: &[u8]) {
        lock(&self.state)
            .scripts
            .push_back(DeviceScript::Session(bytes.to_vec()));
    }

    /// Next open yields each line followed by `\n`.
    pub fn push_lines(&self, lines: &[&str]) {
        let mut bytes = Vec::new();
        for line in lines {
            bytes.extend_from_slice(line.as_bytes());
            bytes.push(b'\n');
        }
        self.push_session(&bytes);
    }

    /// Next open succeeds but the device never sends anything.
    pub fn push_silent_session(&self) {
        lock(&self.state).scripts.push_back(DeviceScript::Silent);
    }

    /// Next open fails with `message`.
    pub fn push_failure(&self, message: &str) {
        lock(&self.state)
            .scripts
            .push_back(DeviceScript::Fail(message.to_string()));
    }

    /// Open attempts so far, failed ones included.
    pub fn open_count(&self) -> u32 {
        lock(&self.state).opens
    }
}

impl DeviceTransport for MockDevice {
    type Stream = DuplexStream;

    async fn open(&self, port: &str, _baud_rate: u32) -> Result<DuplexStream, ConnectError> {
        let script = {
            let mut state = lock(&self.state);
            state.opens += 1;
            state.scripts.pop_front()
        };

        let fail = |message: String| ConnectError::Device {
            port: port.to_string(),
            message,
        };

        match script {
            Some(DeviceScript::Session(bytes)) => {
                let (mut writer, reader) = tokio::io::duplex(bytes.len().max(64));
                writer
                    .write_all(&bytes)
                    .await
                    .map_err(|e| fail(e.to_string()))?;
                Ok(reader)
            }
            Some(DeviceScript::Silent) => {
                let (writer, reader) = tokio::io::duplex(64);
                lock(&self.state).held.push(writer);
                Ok(reader)
            }
            Some(DeviceScript::Fail(message)) => Err(fail(message)),
            None => Err(fail("No such file or directory".to_string())),
        }
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    published: Vec<(String, Vec<u8>)>,
    connects: u32,
    fail_connects: u32,
    fail_publishes: u32,
    stall_publishes: u32,
    always_fail: bool,
    next_packet_id: u16,
    generation: u64,
}

/// Recording broker with failure injection.
#[derive(Debug, Clone, Default)]
pub struct MockBroker {
    state: Arc<Mutex<BrokerState>>,
    dropped: Arc<Notify>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acknowledged publishes as `(topic, payload)`, in order.
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        lock(&self.state).published.clone()
    }

    /// Acknowledged payloads decoded as text.
    pub fn published_payloads(&self) -> Vec<String> {
        lock(&self.state)
            .published
            .iter()
            .map(|(_, payload)| String::from_utf8_lossy(payload).into_owned())
            .collect()
    }

    /// Connect attempts so far, failed ones included.
    pub fn connect_count(&self) -> u32 {
        lock(&self.state).connects
    }

    /// Refuse the next `n` connects.
    pub fn fail_next_connects(&self, n: u32) {
        lock(&self.state).fail_connects = n;
    }

    /// Drop the connection on the next `n` publishes.
    pub fn fail_next_publishes(&self, n: u32) {
        lock(&self.state).fail_publishes = n;
    }

    /// Never acknowledge the next `n` publishes.
    pub fn stall_next_publishes(&self, n: u32) {
        lock(&self.state).stall_publishes = n;
    }

    /// Close every open session from the broker side, as a broker restart
    /// would. Sessions opened afterwards are unaffected.
    pub fn drop_connection(&self) {
        lock(&self.state).generation += 1;
        self.dropped.notify_waiters();
    }

    /// Fail every publish while set.
    pub fn set_always_fail(&self, always_fail: bool) {
        lock(&self.state).always_fail = always_fail;
    }

    /// Wait until at least `count` publishes were acknowledged.
    pub async fn wait_for_published(&self, count: usize) {
        while lock(&self.state).published.len() < count {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }
}

impl BrokerTransport for MockBroker {
    type Session = MockSession;

    async fn connect(&self) -> Result<MockSession, ConnectError> {
        let mut state = lock(&self.state);
        state.connects += 1;
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(ConnectError::Refused("ServerUnavailable".to_string()));
        }
        Ok(MockSession {
            state: self.state.clone(),
            dropped: self.dropped.clone(),
            generation: state.generation,
        })
    }
}

/// Session handed out by [`MockBroker`].
#[derive(Debug)]
pub struct MockSession {
    state: Arc<Mutex<BrokerState>>,
    dropped: Arc<Notify>,
    generation: u64,
}

enum PublishOutcome {
    Acked(u16),
    Dropped,
    Stalled,
}

impl BrokerSession for MockSession {
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<Ack, PublishError> {
        if let Some(reason) = self.lost() {
            return Err(PublishError::ConnectionLost(reason));
        }

        let outcome = {
            let mut state = lock(&self.state);
            if state.always_fail {
                PublishOutcome::Dropped
            } else if state.fail_publishes > 0 {
                state.fail_publishes -= 1;
                PublishOutcome::Dropped
            } else if state.stall_publishes > 0 {
                state.stall_publishes -= 1;
                PublishOutcome::Stalled
            } else {
                state.next_packet_id = state.next_packet_id.wrapping_add(1).max(1);
                state.published.push((topic.to_string(), payload.to_vec()));
                PublishOutcome::Acked(state.next_packet_id)
            }
        };

        match outcome {
            PublishOutcome::Acked(packet_id) => Ok(Ack { packet_id }),
            PublishOutcome::Dropped => Err(PublishError::ConnectionLost(
                "connection reset by broker".to_string(),
            )),
            PublishOutcome::Stalled => std::future::pending().await,
        }
    }

    fn lost(&mut self) -> Option<String> {
        (lock(&self.state).generation != self.generation)
            .then(|| "connection closed by broker".to_string())
    }

    async fn closed(&mut self) -> String {
        let dropped = self.dropped.clone();
        loop {
            let notified = dropped.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(reason) = self.lost() {
                return reason;
            }
            notified.await;
        }
    }

    async fn close(self) {}
}

//! Serial device link: open, settle, read lines, reopen on failure.

use std::future::Future;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use serialink_bridge_framework::{
    Backoff, BackoffConfig, BridgeHealth, ConnectionMonitor, ConnectionState, DeliveryQueue,
    Enqueued, QueueError,
};
use serialink_common::RawLine;

use crate::config::SerialConfig;
use crate::decoder::FrameDecoder;
use crate::error::{ConnectError, DecodeError, ReadError};

/// Something that can open a byte stream to the device.
pub trait DeviceTransport: Clone + Send + Sync + 'static {
    /// Byte stream yielded by a successful open.
    type Stream: AsyncRead + Send + Unpin + 'static;

    /// Open `port` at `baud_rate`.
    fn open(
        &self,
        port: &str,
        baud_rate: u32,
    ) -> impl Future<Output = Result<Self::Stream, ConnectError>> + Send;
}

/// Real serial ports via tokio-serial, 8 data bits, no parity, 1 stop bit.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialTransport;

impl DeviceTransport for SerialTransport {
    type Stream = tokio_serial::SerialStream;

    async fn open(&self, port: &str, baud_rate: u32) -> Result<Self::Stream, ConnectError> {
        let builder = tokio_serial::new(port, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One);

        tokio_serial::SerialStream::open(&builder).map_err(|e| ConnectError::Device {
            port: port.to_string(),
            message: e.to_string(),
        })
    }
}

/// Owns the device connection and turns its byte stream into lines.
pub struct DeviceReader<T: DeviceTransport> {
    transport: T,
    config: SerialConfig,
    backoff: Backoff,
    monitor: Arc<ConnectionMonitor>,
    health: Arc<BridgeHealth>,
    decoder: FrameDecoder,
    stream: Option<BufReader<T::Stream>>,
    /// Bytes of a line still being received. Survives read timeouts.
    pending: Vec<u8>,
    idle_reads: u32,
    opened_once: bool,
}

impl<T: DeviceTransport> DeviceReader<T> {
    /// Create a reader. Nothing is opened until [`open`](Self::open) or
    /// [`next_line`](Self::next_line) is called.
    pub fn new(
        transport: T,
        config: SerialConfig,
        backoff: BackoffConfig,
        monitor: Arc<ConnectionMonitor>,
        health: Arc<BridgeHealth>,
    ) -> Self {
        Self {
            transport,
            config,
            backoff: backoff.start(),
            monitor,
            health,
            decoder: FrameDecoder::new(),
            stream: None,
            pending: Vec::new(),
            idle_reads: 0,
            opened_once: false,
        }
    }

    /// True while a device stream is held.
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Single open attempt, followed by the settle delay on success.
    pub async fn open(&mut self) -> Result<(), ConnectError> {
        self.monitor.set(ConnectionState::Connecting);

        let stream = match self
            .transport
            .open(&self.config.port, self.config.baud_rate)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                self.monitor.set(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        debug!(
            port = %self.config.port,
            settle_ms = self.config.settle_delay_ms,
            "Serial port opened, waiting for device to settle"
        );
        tokio::time::sleep(self.config.settle_delay()).await;

        self.stream = Some(BufReader::new(stream));
        self.pending.clear();
        self.idle_reads = 0;
        if self.opened_once {
            self.health.record_device_reconnect();
        }
        self.opened_once = true;
        self.monitor.set(ConnectionState::Connected);

        info!(
            port = %self.config.port,
            baud_rate = self.config.baud_rate,
            "Serial port connected"
        );
        Ok(())
    }

    /// Open with backoff until it succeeds. Returns false if cancelled first.
    pub async fn connect(&mut self, cancel: &CancellationToken) -> bool {
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                result = self.open() => result,
            };

            match result {
                Ok(()) => {
                    self.backoff.reset();
                    return true;
                }
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    warn!(
                        error = %e,
                        attempt = self.backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "Serial open failed, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return false,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Read one line, waiting at most the configured read timeout.
    ///
    /// A timeout keeps any partial line buffered for the next call.
    pub async fn read_line(&mut self) -> Result<RawLine, ReadError> {
        let stream = self.stream.as_mut().ok_or(ReadError::NotConnected)?;

        let read = tokio::time::timeout(
            self.config.read_timeout(),
            stream.read_until(b'\n', &mut self.pending),
        )
        .await;

        let n = match read {
            Err(_) => return Err(ReadError::Timeout),
            Ok(result) => result?,
        };

        if n == 0 || self.pending.last() != Some(&b'\n') {
            // EOF, possibly in the middle of a line
            self.pending.clear();
            return Err(ReadError::Closed);
        }

        Ok(RawLine::new(std::mem::take(&mut self.pending)))
    }

    /// Release the device.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            info!(port = %self.config.port, "Serial port closed");
        }
        self.pending.clear();
        self.idle_reads = 0;
        self.monitor.set(ConnectionState::Disconnected);
    }

    /// Next non-blank line, reopening the device as often as needed.
    ///
    /// Returns `None` only when `cancel` fires.
    pub async fn next_line(&mut self, cancel: &CancellationToken) -> Option<RawLine> {
        loop {
            if self.stream.is_none() && !self.connect(cancel).await {
                return None;
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                result = self.read_line() => result,
            };

            match result {
                Ok(line) => {
                    self.idle_reads = 0;
                    self.monitor.set(ConnectionState::Connected);
                    if line.is_blank() {
                        continue;
                    }
                    self.health.record_line_read();
                    return Some(line);
                }
                Err(ReadError::Timeout) => {
                    self.idle_reads += 1;
                    debug!(idle_reads = self.idle_reads, "No line within read timeout");

                    if self.idle_reads >= self.config.max_idle_reads {
                        warn!(
                            port = %self.config.port,
                            idle_reads = self.idle_reads,
                            "Device silent for too long, reopening"
                        );
                        self.close();
                    } else if self.idle_reads >= self.config.max_idle_reads.div_ceil(2) {
                        self.monitor
                            .set(ConnectionState::Degraded("device silent".to_string()));
                    }
                }
                Err(e) => {
                    warn!(port = %self.config.port, error = %e, "Serial read failed, reopening");
                    self.close();
                }
            }
        }
    }

    /// Ingestion loop: read lines, decode them and feed the delivery queue
    /// until `cancel` fires or the queue closes.
    pub async fn run(
        mut self,
        queue: Arc<DeliveryQueue>,
        cancel: CancellationToken,
    ) -> serialink_bridge_framework::Result<()> {
        info!(
            port = %self.config.port,
            baud_rate = self.config.baud_rate,
            "Starting device reader"
        );

        while let Some(line) = self.next_line(&cancel).await {
            let frame = match self.decoder.decode(&line) {
                Ok(frame) => frame,
                Err(DecodeError::Empty) => continue,
                Err(e) => {
                    self.health.record_frame_rejected();
                    warn!(error = %e, "Received non-JSON data, skipping");
                    continue;
                }
            };

            self.health.record_frame_decoded();
            info!(
                device = %frame.device_id(),
                temperature = ?frame.temperature(),
                humidity = ?frame.humidity(),
                "New message received"
            );

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(
                        device = %frame.device_id(),
                        "Shutdown while waiting for queue space, frame not queued"
                    );
                    break;
                }
                outcome = queue.enqueue(frame.clone()) => outcome,
            };

            match outcome {
                Ok(Enqueued::Stored) => self.health.record_frame_enqueued(),
                Ok(Enqueued::Shed(evicted)) => {
                    self.health.record_frame_enqueued();
                    self.health.record_frame_shed();
                    warn!(
                        device = %evicted.frame.device_id(),
                        enqueued_at = %evicted.enqueued_at,
                        "Delivery queue full, dropped oldest frame"
                    );
                }
                Err(QueueError::Closed(_)) => {
                    debug!("Delivery queue closed, stopping reader");
                    break;
                }
                Err(QueueError::Full(_)) => {
                    warn!("Delivery queue full, frame dropped");
                }
            }
        }

        self.close();
        info!("Device reader stopped");
        Ok(())
    }
}

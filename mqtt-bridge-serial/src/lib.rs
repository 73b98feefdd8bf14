//! Serial to MQTT telemetry bridge.
//!
//! Reads newline-delimited JSON from a serial-attached device and republishes
//! every valid line, byte for byte, to a single topic on a TLS MQTT broker.
//!
//! # Pipeline
//!
//! - [`reader::DeviceReader`] opens the port, waits for the device to settle
//!   and yields lines, reopening with backoff when the device goes away.
//! - [`decoder::FrameDecoder`] keeps JSON objects and rejects everything else.
//! - [`DeliveryQueue`](serialink_bridge_framework::DeliveryQueue) buffers
//!   frames in order between the two links.
//! - [`publisher::BrokerPublisher`] publishes with QoS 1 and retries up to
//!   `mqtt.max_attempts` times per frame.
//! - [`supervisor::BridgeSupervisor`] runs all of it and shuts it down in order.
//!
//! # Configuration
//!
//! ```json5
//! {
//!   serial: { port: "/dev/ttyUSB0", baud_rate: 115200 },
//!   mqtt: {
//!     url: "mqtts://broker.example.com",
//!     username: "gateway",
//!     password: "secret",
//!     topic: "sensors/telemetry",
//!   },
//! }
//! ```
//!
//! Every value above can also be given through `SERIAL_PORT`, `BAUD_RATE`,
//! `MQTT_URL`, `MQTT_PORT`, `MQTT_USERNAME`, `MQTT_PW`, `MQTT_TOPIC` and
//! `MQTT_CLIENT_ID`, which take precedence over the file.

pub mod config;
pub mod decoder;
pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod mqtt;
pub mod publisher;
pub mod reader;
pub mod supervisor;

pub use config::SerialBridgeConfig;
pub use decoder::FrameDecoder;
pub use error::{ConnectError, DecodeError, PublishError, ReadError};
pub use mqtt::MqttTransport;
pub use publisher::{Ack, BrokerPublisher, BrokerSession, BrokerTransport, Delivery};
pub use reader::{DeviceReader, DeviceTransport, SerialTransport};
pub use supervisor::BridgeSupervisor;

//! Configuration for the serial-to-MQTT bridge.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use serialink_bridge_framework::{
    BackoffConfig, BridgeConfig, BridgeError, EnvLookup, LoggingConfig, OverflowPolicy,
    ShutdownPolicy, parse_env,
};

/// Environment variable names, as used by existing gateway deployments.
pub mod env {
    pub const SERIAL_PORT: &str = "SERIAL_PORT";
    pub const BAUD_RATE: &str = "BAUD_RATE";
    pub const MQTT_URL: &str = "MQTT_URL";
    pub const MQTT_PORT: &str = "MQTT_PORT";
    pub const MQTT_USERNAME: &str = "MQTT_USERNAME";
    pub const MQTT_PW: &str = "MQTT_PW";
    pub const MQTT_TOPIC: &str = "MQTT_TOPIC";
    pub const MQTT_CLIENT_ID: &str = "MQTT_CLIENT_ID";
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SerialBridgeConfig {
    /// Serial device settings
    #[serde(default)]
    pub serial: SerialConfig,

    /// Broker settings
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Delivery queue settings
    #[serde(default)]
    pub queue: QueueConfig,

    /// Reconnect/retry backoff shared by both links
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Health report settings
    #[serde(default)]
    pub health: HealthConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial device configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyACM0" or "COM3")
    #[serde(default)]
    pub port: String,

    /// Baud rate (default: 115200)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// How long a single line read may wait, in milliseconds
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Pause after opening the port while the device boots, in milliseconds
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Consecutive read timeouts before the port is reopened
    #[serde(default = "default_max_idle_reads")]
    pub max_idle_reads: u32,
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_read_timeout_ms() -> u64 {
    5000
}

fn default_settle_delay_ms() -> u64 {
    2000
}

fn default_max_idle_reads() -> u32 {
    12
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            max_idle_reads: default_max_idle_reads(),
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// MQTT broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host, optionally with scheme and port (e.g., "mqtts://broker:8883")
    #[serde(default)]
    pub url: String,

    /// Broker port when `url` carries none (default: 8883)
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Username for broker authentication
    #[serde(default)]
    pub username: Option<String>,

    /// Password for broker authentication
    #[serde(default)]
    pub password: Option<String>,

    /// Topic every frame is published to
    #[serde(default)]
    pub topic: String,

    /// MQTT client identifier
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Time allowed for CONNACK after connecting, in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Time allowed for PUBACK per publish attempt, in milliseconds
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,

    /// Publish attempts per frame before it is dropped
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Use TLS (default: true)
    #[serde(default = "default_tls")]
    pub tls: bool,

    /// PEM CA bundle; platform roots are used when absent
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
}

fn default_mqtt_port() -> u16 {
    8883
}

fn default_client_id() -> String {
    "serialink-gateway".to_string()
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_publish_timeout_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_tls() -> bool {
    true
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            topic: String::new(),
            client_id: default_client_id(),
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_ms: default_connect_timeout_ms(),
            publish_timeout_ms: default_publish_timeout_ms(),
            max_attempts: default_max_attempts(),
            tls: default_tls(),
            ca_file: None,
        }
    }
}

impl MqttConfig {
    /// Host and port to connect to.
    ///
    /// Accepts `host`, `host:port`, and the `mqtt://`, `mqtts://`, `ssl://`
    /// and `tcp://` schemes. A port in the URL wins over `port`.
    pub fn endpoint(&self) -> Result<(String, u16), BridgeError> {
        let url = self.url.trim();
        let host_port = ["mqtts://", "mqtt://", "ssl://", "tcp://"]
            .iter()
            .find_map(|scheme| url.strip_prefix(scheme))
            .unwrap_or(url)
            .trim_end_matches('/');

        let parts: Vec<&str> = host_port.split(':').collect();
        match parts.as_slice() {
            [host] if !host.is_empty() => Ok((host.to_string(), self.port)),
            [host, port] if !host.is_empty() => {
                let port = port.parse::<u16>().map_err(|_| {
                    BridgeError::validation(format!("Invalid port in broker URL: {}", port))
                })?;
                Ok((host.to_string(), port))
            }
            _ => Err(BridgeError::validation(format!(
                "Invalid broker URL format: {}",
                self.url
            ))),
        }
    }

    /// Username and password, when configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

/// Delivery queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of frames waiting for the broker
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Behaviour when full: "backpressure" or "shed_oldest"
    #[serde(default)]
    pub overflow: OverflowPolicy,

    /// Behaviour on shutdown: "drain" or "abandon"
    #[serde(default)]
    pub on_shutdown: ShutdownPolicy,

    /// Upper bound on draining at shutdown, in milliseconds
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

fn default_capacity() -> usize {
    256
}

fn default_drain_timeout_ms() -> u64 {
    5000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            overflow: OverflowPolicy::default(),
            on_shutdown: ShutdownPolicy::default(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

impl QueueConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Health report configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Seconds between health reports
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,
}

fn default_health_interval() -> u64 {
    30
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval(),
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl BridgeConfig for SerialBridgeConfig {
    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn apply_env(&mut self, lookup: EnvLookup<'_>) -> serialink_bridge_framework::Result<()> {
        if let Some(port) = parse_env(lookup, env::SERIAL_PORT)? {
            self.serial.port = port;
        }
        if let Some(baud) = parse_env(lookup, env::BAUD_RATE)? {
            self.serial.baud_rate = baud;
        }
        if let Some(url) = parse_env(lookup, env::MQTT_URL)? {
            self.mqtt.url = url;
        }
        if let Some(port) = parse_env(lookup, env::MQTT_PORT)? {
            self.mqtt.port = port;
        }
        if let Some(username) = parse_env(lookup, env::MQTT_USERNAME)? {
            self.mqtt.username = Some(username);
        }
        if let Some(password) = parse_env(lookup, env::MQTT_PW)? {
            self.mqtt.password = Some(password);
        }
        if let Some(topic) = parse_env(lookup, env::MQTT_TOPIC)? {
            self.mqtt.topic = topic;
        }
        if let Some(client_id) = parse_env(lookup, env::MQTT_CLIENT_ID)? {
            self.mqtt.client_id = client_id;
        }
        Ok(())
    }

    fn validate(&self) -> serialink_bridge_framework::Result<()> {
        if self.serial.port.trim().is_empty() {
            return Err(BridgeError::MissingSetting {
                setting: "serial.port",
                env: env::SERIAL_PORT,
            });
        }
        if self.serial.baud_rate == 0 {
            return Err(BridgeError::validation("serial.baud_rate must be positive"));
        }
        if self.serial.read_timeout_ms == 0 {
            return Err(BridgeError::validation(
                "serial.read_timeout_ms must be positive",
            ));
        }
        if self.serial.max_idle_reads == 0 {
            return Err(BridgeError::validation(
                "serial.max_idle_reads must be positive",
            ));
        }

        if self.mqtt.url.trim().is_empty() {
            return Err(BridgeError::MissingSetting {
                setting: "mqtt.url",
                env: env::MQTT_URL,
            });
        }
        self.mqtt.endpoint()?;

        if self.mqtt.topic.trim().is_empty() {
            return Err(BridgeError::MissingSetting {
                setting: "mqtt.topic",
                env: env::MQTT_TOPIC,
            });
        }
        if self.mqtt.topic.contains(['+', '#']) {
            return Err(BridgeError::validation(format!(
                "mqtt.topic '{}' must not contain wildcards",
                self.mqtt.topic
            )));
        }
        if self.mqtt.client_id.trim().is_empty() {
            return Err(BridgeError::MissingSetting {
                setting: "mqtt.client_id",
                env: env::MQTT_CLIENT_ID,
            });
        }
        match (&self.mqtt.username, &self.mqtt.password) {
            (Some(_), None) => {
                return Err(BridgeError::MissingSetting {
                    setting: "mqtt.password",
                    env: env::MQTT_PW,
                });
            }
            (None, Some(_)) => {
                return Err(BridgeError::MissingSetting {
                    setting: "mqtt.username",
                    env: env::MQTT_USERNAME,
                });
            }
            _ => {}
        }
        if self.mqtt.max_attempts == 0 {
            return Err(BridgeError::validation("mqtt.max_attempts must be positive"));
        }
        if self.mqtt.publish_timeout_ms == 0 || self.mqtt.connect_timeout_ms == 0 {
            return Err(BridgeError::validation(
                "mqtt connect and publish timeouts must be positive",
            ));
        }

        if self.queue.capacity == 0 {
            return Err(BridgeError::validation("queue.capacity must be positive"));
        }
        if self.health.interval_secs == 0 {
            return Err(BridgeError::validation(
                "health.interval_secs must be positive",
            ));
        }

        Ok(())
    }
}

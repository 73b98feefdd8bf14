//! Serial to MQTT telemetry bridge.

use anyhow::{Context, Result};
use tracing::info;

use mqtt_bridge_serial::config::SerialBridgeConfig;
use mqtt_bridge_serial::supervisor::BRIDGE_NAME;
use mqtt_bridge_serial::{BridgeSupervisor, MqttTransport, SerialTransport};
use serialink_bridge_framework::{BridgeArgs, BridgeConfig, process_env};
use serialink_common::LoggingConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let args = BridgeArgs::parse();

    let config = SerialBridgeConfig::load_layered(args.config.as_deref(), &process_env)
        .with_context(|| match &args.config {
            Some(path) => format!("Failed to load configuration from {}", path.display()),
            None => "Failed to load configuration from the environment".to_string(),
        })?;

    let log_config = LoggingConfig {
        level: args
            .log_level
            .clone()
            .unwrap_or_else(|| config.logging.level.clone()),
        format: config.logging.format,
    };
    serialink_common::init_tracing(&log_config).context("Failed to init tracing")?;

    info!("Starting {}", BRIDGE_NAME);
    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    let broker = MqttTransport::new(config.mqtt.clone());
    let supervisor = BridgeSupervisor::new(config, SerialTransport, broker);

    let snapshot = supervisor.run().await;
    info!(
        published = snapshot.frames_published,
        failed = snapshot.frames_failed,
        rejected = snapshot.frames_rejected,
        "Bridge exited"
    );

    Ok(())
}

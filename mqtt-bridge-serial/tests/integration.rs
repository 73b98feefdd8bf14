//! End-to-end pipeline tests over the in-memory device and broker.

use std::time::Duration;

use mqtt_bridge_serial::BridgeSupervisor;
use mqtt_bridge_serial::config::{MqttConfig, SerialBridgeConfig, SerialConfig};
use mqtt_bridge_serial::mock::{MockBroker, MockDevice};
use serialink_bridge_framework::{BackoffConfig, BridgeHealth, OverflowPolicy, ShutdownPolicy};

const TOPIC: &str = "sensors/telemetry";

fn config() -> SerialBridgeConfig {
    let mut config = SerialBridgeConfig {
        serial: SerialConfig {
            port: "/dev/ttyMOCK0".to_string(),
            settle_delay_ms: 50,
            read_timeout_ms: 200,
            ..Default::default()
        },
        mqtt: MqttConfig {
            url: "mqtts://broker.example.com".to_string(),
            topic: TOPIC.to_string(),
            max_attempts: 3,
            publish_timeout_ms: 500,
            ..Default::default()
        },
        backoff: BackoffConfig::fixed(Duration::from_millis(20)),
        ..Default::default()
    };
    config.queue.drain_timeout_ms = 10_000;
    config
}

async fn wait_until(health: &BridgeHealth, mut done: impl FnMut(&BridgeHealth) -> bool) {
    while !done(health) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn counters(health: &BridgeHealth) -> serialink_bridge_framework::HealthSnapshot {
    let link = serialink_bridge_framework::ConnectionMonitor::new("probe");
    health.snapshot(&link.subscribe(), &link.subscribe(), 0)
}

#[tokio::test(start_paused = true)]
async fn test_sensor_line_published_verbatim() {
    let line = r#"{"device_id":"sensor1","temperature":21.5,"humidity":40}"#;
    let device = MockDevice::new();
    device.push_lines(&[line]);
    let broker = MockBroker::new();

    let mut supervisor = BridgeSupervisor::new(config(), device, broker.clone());
    supervisor.start();
    broker.wait_for_published(1).await;
    let snapshot = supervisor.shutdown().await;

    assert_eq!(
        broker.published(),
        vec![(TOPIC.to_string(), line.as_bytes().to_vec())]
    );
    assert_eq!(snapshot.frames_decoded, 1);
    assert_eq!(snapshot.frames_published, 1);
}

#[tokio::test(start_paused = true)]
async fn test_whitespace_and_crlf_trimmed_before_publish() {
    let device = MockDevice::new();
    device.push_session(b"  {\"device_id\": \"s2\", \"humidity\": 55}  \r\n");
    let broker = MockBroker::new();

    let mut supervisor = BridgeSupervisor::new(config(), device, broker.clone());
    supervisor.start();
    broker.wait_for_published(1).await;
    supervisor.shutdown().await;

    assert_eq!(
        broker.published_payloads(),
        vec![r#"{"device_id": "s2", "humidity": 55}"#]
    );
}

#[tokio::test(start_paused = true)]
async fn test_garbage_is_rejected_not_published() {
    let device = MockDevice::new();
    device.push_lines(&["garbage{{{", "[1,2,3]", "{\"n\":1"]);
    let broker = MockBroker::new();

    let mut supervisor = BridgeSupervisor::new(config(), device, broker.clone());
    let health = supervisor.health();
    supervisor.start();
    wait_until(&health, |h| counters(h).frames_rejected == 3).await;
    let snapshot = supervisor.shutdown().await;

    assert!(broker.published().is_empty());
    assert_eq!(snapshot.lines_read, 3);
    assert_eq!(snapshot.frames_enqueued, 0);
}

#[tokio::test(start_paused = true)]
async fn test_fifo_preserved_across_broker_reconnect() {
    let lines: Vec<String> = (1..=6).map(|n| format!("{{\"seq\":{n}}}")).collect();
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    let device = MockDevice::new();
    device.push_lines(&refs);
    let broker = MockBroker::new();
    broker.fail_next_publishes(2);

    let mut supervisor = BridgeSupervisor::new(config(), device, broker.clone());
    supervisor.start();
    broker.wait_for_published(6).await;
    let snapshot = supervisor.shutdown().await;

    assert_eq!(broker.published_payloads(), lines);
    assert!(snapshot.broker_reconnects >= 1);
    assert_eq!(snapshot.frames_failed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_device_reconnect_resumes_without_duplicates() {
    let device = MockDevice::new();
    device.push_lines(&["{\"seq\":1}", "{\"seq\":2}"]);
    device.push_failure("device unplugged");
    device.push_failure("device unplugged");
    device.push_lines(&["{\"seq\":3}"]);
    let broker = MockBroker::new();

    let mut supervisor = BridgeSupervisor::new(config(), device.clone(), broker.clone());
    supervisor.start();
    broker.wait_for_published(3).await;
    let snapshot = supervisor.shutdown().await;

    assert_eq!(
        broker.published_payloads(),
        vec!["{\"seq\":1}", "{\"seq\":2}", "{\"seq\":3}"]
    );
    assert_eq!(snapshot.device_reconnects, 1);
    assert!(device.open_count() >= 4);
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_drops_frame_once() {
    let device = MockDevice::new();
    device.push_lines(&["{\"seq\":1}", "{\"seq\":2}"]);
    let broker = MockBroker::new();
    broker.set_always_fail(true);

    let mut supervisor = BridgeSupervisor::new(config(), device, broker.clone());
    let health = supervisor.health();
    supervisor.start();

    wait_until(&health, |h| counters(h).frames_failed >= 1).await;
    broker.set_always_fail(false);
    broker.wait_for_published(1).await;
    let snapshot = supervisor.shutdown().await;

    assert_eq!(snapshot.frames_failed, 1);
    assert_eq!(broker.published_payloads(), vec!["{\"seq\":2}"]);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_queue() {
    let device = MockDevice::new();
    device.push_lines(&["{\"seq\":1}", "{\"seq\":2}", "{\"seq\":3}"]);
    let broker = MockBroker::new();
    broker.fail_next_connects(50);

    let supervisor = BridgeSupervisor::new(config(), device, broker.clone());
    let health = supervisor.health();
    let queue = supervisor.queue();
    let token = supervisor.shutdown_token();
    let handle = tokio::spawn(supervisor.run());

    wait_until(&health, |h| counters(h).frames_enqueued == 3).await;
    assert!(broker.published().is_empty());
    token.cancel();

    let snapshot = handle.await.unwrap();
    assert_eq!(
        broker.published_payloads(),
        vec!["{\"seq\":1}", "{\"seq\":2}", "{\"seq\":3}"]
    );
    assert_eq!(snapshot.queue_depth, 0);
    assert!(queue.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_abandon_on_shutdown_reports_nothing_published() {
    let device = MockDevice::new();
    device.push_lines(&["{\"seq\":1}", "{\"seq\":2}"]);
    let broker = MockBroker::new();
    broker.fail_next_connects(u32::MAX);

    let mut cfg = config();
    cfg.queue.on_shutdown = ShutdownPolicy::Abandon;
    let mut supervisor = BridgeSupervisor::new(cfg, device, broker.clone());
    let health = supervisor.health();
    supervisor.start();

    wait_until(&health, |h| counters(h).frames_enqueued == 2).await;
    let snapshot = supervisor.shutdown().await;

    assert!(broker.published().is_empty());
    assert_eq!(snapshot.queue_depth, 0);
    assert_eq!(snapshot.frames_published, 0);
}

#[tokio::test(start_paused = true)]
async fn test_shed_oldest_keeps_newest_frames() {
    let lines: Vec<String> = (1..=5).map(|n| format!("{{\"seq\":{n}}}")).collect();
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    let device = MockDevice::new();
    device.push_lines(&refs);
    let broker = MockBroker::new();
    broker.fail_next_connects(u32::MAX);

    let mut cfg = config();
    cfg.queue.capacity = 2;
    cfg.queue.overflow = OverflowPolicy::ShedOldest;
    let mut supervisor = BridgeSupervisor::new(cfg, device, broker.clone());
    let health = supervisor.health();
    supervisor.start();

    wait_until(&health, |h| counters(h).frames_enqueued == 5).await;
    broker.fail_next_connects(0);
    broker.wait_for_published(2).await;
    let snapshot = supervisor.shutdown().await;

    assert_eq!(snapshot.frames_shed, 3);
    assert_eq!(broker.published_payloads(), vec!["{\"seq\":4}", "{\"seq\":5}"]);
}

#[tokio::test(start_paused = true)]
async fn test_backpressure_stalls_reader_without_loss() {
    let lines: Vec<String> = (1..=4).map(|n| format!("{{\"seq\":{n}}}")).collect();
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    let device = MockDevice::new();
    device.push_lines(&refs);
    let broker = MockBroker::new();
    broker.fail_next_connects(u32::MAX);

    let mut cfg = config();
    cfg.queue.capacity = 2;
    let mut supervisor = BridgeSupervisor::new(cfg, device, broker.clone());
    let health = supervisor.health();
    supervisor.start();

    wait_until(&health, |h| counters(h).frames_enqueued == 2).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    // Third frame decoded but waiting for space
    let stalled = counters(&health);
    assert_eq!(stalled.frames_enqueued, 2);
    assert_eq!(stalled.frames_decoded, 3);

    broker.fail_next_connects(0);
    broker.wait_for_published(4).await;
    let snapshot = supervisor.shutdown().await;

    assert_eq!(broker.published_payloads(), lines);
    assert_eq!(snapshot.frames_shed, 0);
}

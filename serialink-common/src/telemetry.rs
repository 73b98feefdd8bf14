//! Device telemetry data model.
//!
//! A [`RawLine`] is what the device emitted; a [`TelemetryFrame`] is a line
//! that passed validation. Frames can only be built through
//! [`TelemetryFrame::parse`], so every frame in the pipeline carries a
//! payload that is a JSON object.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

/// Device id reported when a frame carries none.
pub const UNKNOWN_DEVICE: &str = "Unknown";

/// One newline-terminated record read from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    bytes: Vec<u8>,
    captured_at: DateTime<Utc>,
}

impl RawLine {
    /// Wrap raw bytes captured now.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self::captured_at(bytes, Utc::now())
    }

    /// Wrap raw bytes with an explicit capture time.
    pub fn captured_at(bytes: impl Into<Vec<u8>>, captured_at: DateTime<Utc>) -> Self {
        Self {
            bytes: bytes.into(),
            captured_at,
        }
    }

    /// The bytes exactly as read, terminator included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// When the line was captured.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// The line as text with invalid UTF-8 sequences dropped and surrounding
    /// whitespace (including the terminator) trimmed.
    pub fn text(&self) -> String {
        let decoded: String = self.bytes.utf8_chunks().map(|chunk| chunk.valid()).collect();
        decoded.trim().to_string()
    }

    /// True when nothing but whitespace was read.
    pub fn is_blank(&self) -> bool {
        self.text().is_empty()
    }
}

/// Reasons a payload cannot become a [`TelemetryFrame`].
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("payload is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("payload is a JSON {0}, expected an object")]
    NotAnObject(&'static str),
}

/// A validated telemetry record.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryFrame {
    device_id: String,
    temperature: Option<f64>,
    humidity: Option<f64>,
    raw_payload: String,
    captured_at: DateTime<Utc>,
}

impl TelemetryFrame {
    /// Validate `payload` and extract the well-known fields.
    ///
    /// The payload text is kept verbatim; it is never re-serialized.
    pub fn parse(
        payload: impl Into<String>,
        captured_at: DateTime<Utc>,
    ) -> Result<Self, FrameError> {
        let raw_payload = payload.into();
        let value: Value = serde_json::from_str(&raw_payload)?;

        let Value::Object(fields) = value else {
            return Err(FrameError::NotAnObject(json_kind(&value)));
        };

        Ok(Self {
            device_id: device_id_of(&fields),
            temperature: fields.get("temperature").and_then(Value::as_f64),
            humidity: fields.get("humidity").and_then(Value::as_f64),
            raw_payload,
            captured_at,
        })
    }

    /// Reporting device, `"Unknown"` when absent.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Temperature in °C, if reported as a number.
    pub fn temperature(&self) -> Option<f64> {
        self.temperature
    }

    /// Relative humidity in %, if reported as a number.
    pub fn humidity(&self) -> Option<f64> {
        self.humidity
    }

    /// The exact text that was validated and will be published.
    pub fn raw_payload(&self) -> &str {
        &self.raw_payload
    }

    /// When the source line was captured.
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}

fn device_id_of(fields: &Map<String, Value>) -> String {
    match fields.get("device_id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Null) | None => UNKNOWN_DEVICE.to_string(),
        Some(other) => other.to_string(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_frame() {
        let line = r#"{"device_id":"sensor1","temperature":21.5,"humidity":40}"#;
        let frame = TelemetryFrame::parse(line, Utc::now()).unwrap();

        assert_eq!(frame.device_id(), "sensor1");
        assert_eq!(frame.temperature(), Some(21.5));
        assert_eq!(frame.humidity(), Some(40.0));
        assert_eq!(frame.raw_payload(), line);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let frame = TelemetryFrame::parse(r#"{"battery": 3.1}"#, Utc::now()).unwrap();

        assert_eq!(frame.device_id(), UNKNOWN_DEVICE);
        assert_eq!(frame.temperature(), None);
        assert_eq!(frame.humidity(), None);
    }

    #[test]
    fn test_payload_formatting_is_preserved() {
        let line = r#"{ "humidity" : 40.00 , "device_id":"a" }"#;
        let frame = TelemetryFrame::parse(line, Utc::now()).unwrap();
        assert_eq!(frame.raw_payload(), line);
    }

    #[test]
    fn test_numeric_device_id() {
        let frame = TelemetryFrame::parse(r#"{"device_id": 7}"#, Utc::now()).unwrap();
        assert_eq!(frame.device_id(), "7");
    }

    #[test]
    fn test_non_object_rejected() {
        let err = TelemetryFrame::parse("[1, 2]", Utc::now()).unwrap_err();
        assert!(matches!(err, FrameError::NotAnObject("array")));

        let err = TelemetryFrame::parse("42", Utc::now()).unwrap_err();
        assert!(matches!(err, FrameError::NotAnObject("number")));
    }

    #[test]
    fn test_truncated_rejected() {
        let err = TelemetryFrame::parse(r#"{"device_id":"sen"#, Utc::now()).unwrap_err();
        assert!(matches!(err, FrameError::Malformed(_)));
    }

    #[test]
    fn test_raw_line_text() {
        let line = RawLine::new(b"  {\"a\":1}\r\n".to_vec());
        assert_eq!(line.text(), "{\"a\":1}");
        assert!(!line.is_blank());

        assert!(RawLine::new(b" \r\n".to_vec()).is_blank());
    }

    #[test]
    fn test_raw_line_drops_invalid_utf8() {
        let line = RawLine::new(vec![b'{', 0xff, b'}', b'\n']);
        assert_eq!(line.text(), "{}");
    }

    #[test]
    fn test_raw_line_keeps_encoded_replacement_char() {
        let payload = "{\"label\":\"\u{FFFD}ok\"}";
        let line = RawLine::new(format!("{payload}\n").into_bytes());
        assert_eq!(line.text(), payload);

        let frame = TelemetryFrame::parse(line.text(), line.timestamp()).unwrap();
        assert_eq!(frame.raw_payload(), payload);
    }
}

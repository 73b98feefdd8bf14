//! Line-delimited JSON frame decoding.

use serialink_common::{FrameError, RawLine, TelemetryFrame};

use crate::error::DecodeError;

/// Turns raw device lines into validated frames. Holds no state between lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameDecoder;

impl FrameDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Validate one line.
    ///
    /// The frame's payload is the trimmed line text, byte-identical to what
    /// was validated.
    pub fn decode(&self, line: &RawLine) -> Result<TelemetryFrame, DecodeError> {
        let text = line.text();
        if text.is_empty() {
            return Err(DecodeError::Empty);
        }

        TelemetryFrame::parse(text.as_str(), line.timestamp()).map_err(|e| {
            let reason = match e {
                FrameError::Malformed(json) => json.to_string(),
                other => other.to_string(),
            };
            DecodeError::MalformedFrame { line: text, reason }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(s: &str) -> RawLine {
        RawLine::new(s.as_bytes().to_vec())
    }

    #[test]
    fn test_decode_sensor_line() {
        let input = r#"{"device_id":"sensor1","temperature":21.5,"humidity":40}"#;
        let frame = FrameDecoder::new()
            .decode(&line(&format!("{input}\n")))
            .unwrap();

        assert_eq!(frame.device_id(), "sensor1");
        assert_eq!(frame.temperature(), Some(21.5));
        assert_eq!(frame.humidity(), Some(40.0));
        assert_eq!(frame.raw_payload(), input);
    }

    #[test]
    fn test_decode_garbage() {
        let err = FrameDecoder::new().decode(&line("garbage{{{\n")).unwrap_err();
        match err {
            DecodeError::MalformedFrame { line, .. } => assert_eq!(line, "garbage{{{"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_decode_truncated() {
        let err = FrameDecoder::new()
            .decode(&line(r#"{"device_id":"sensor1","temp"#))
            .unwrap_err();
        assert!(matches!(err, DecodeError::MalformedFrame { .. }));
    }

    #[test]
    fn test_decode_non_object_json() {
        let err = FrameDecoder::new().decode(&line("[21.5, 40]")).unwrap_err();
        match err {
            DecodeError::MalformedFrame { reason, .. } => assert!(reason.contains("array")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_decode_blank() {
        let err = FrameDecoder::new().decode(&line("   \r\n")).unwrap_err();
        assert!(matches!(err, DecodeError::Empty));
    }

    #[test]
    fn test_crlf_terminator_not_in_payload() {
        let frame = FrameDecoder::new().decode(&line("{\"a\":1}\r\n")).unwrap();
        assert_eq!(frame.raw_payload(), "{\"a\":1}");
    }
}

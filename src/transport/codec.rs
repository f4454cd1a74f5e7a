//! JSON wire format for a single reading:
//!
//! ```json
//! { "sensor_id": "t1", "sensor_type": "temperature", "value": 18.5, "time": "2024-01-01T00:00:00Z" }
//! ```
//!
//! Outbound timestamps are RFC 3339 in UTC. Inbound timestamps may also be naive ISO-8601
//! without an offset, which is read as UTC.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use validator::Validate;

use crate::domain::{SensorReading, SensorType};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid reading: {0}")]
    Invalid(#[from] validator::ValidationErrors),
    #[error("unparseable timestamp: {0}")]
    Timestamp(String),
}

#[derive(Debug, Deserialize, Validate)]
struct WireReading {
    #[validate(length(min = 1, max = 128))]
    sensor_id: String,
    sensor_type: SensorType,
    value: f64,
    time: String,
}

pub fn encode(reading: &SensorReading) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(reading)?)
}

pub fn decode(payload: &[u8]) -> Result<SensorReading, CodecError> {
    let wire: WireReading = serde_json::from_slice(payload)?;
    wire.validate()?;
    let timestamp = parse_timestamp(&wire.time)?;
    Ok(SensorReading {
        sensor_id: wire.sensor_id,
        sensor_type: wire.sensor_type,
        value: wire.value,
        timestamp,
    })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, CodecError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| CodecError::Timestamp(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_encode_uses_wire_field_names() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let reading = SensorReading::new("t1", SensorType::Temperature, 18.5, ts);
        let json: serde_json::Value = serde_json::from_slice(&encode(&reading).unwrap()).unwrap();

        assert_eq!(json["sensor_id"], "t1");
        assert_eq!(json["sensor_type"], "temperature");
        assert_eq!(json["value"], 18.5);
        assert_eq!(json["time"], "2024-01-01T00:00:00Z");
    }

    #[test]
    fn test_round_trip_preserves_every_field() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 14, 15, 9, 26).unwrap()
            + chrono::Duration::milliseconds(535);
        let reading = SensorReading::new("bed-7", SensorType::Moisture, 612.37, ts);
        let decoded = decode(&encode(&reading).unwrap()).unwrap();
        assert_eq!(decoded, reading);
    }

    #[test]
    fn test_decode_accepts_naive_timestamp() {
        let payload =
            br#"{"sensor_id":"h1","sensor_type":"humidity","value":55,"time":"2024-06-01T12:30:00.250"}"#;
        let reading = decode(payload).unwrap();
        assert_eq!(reading.value, 55.0);
        assert_eq!(
            reading.timestamp,
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 0).unwrap() + chrono::Duration::milliseconds(250)
        );
    }

    #[test]
    fn test_decode_accepts_offset_timestamp() {
        let payload =
            br#"{"sensor_id":"h1","sensor_type":"humidity","value":55.5,"time":"2024-06-01T14:30:00+02:00"}"#;
        let reading = decode(payload).unwrap();
        assert_eq!(
            reading.timestamp,
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(matches!(decode(b"not json"), Err(CodecError::Json(_))));
        assert!(matches!(
            decode(br#"{"sensor_id":"t1","sensor_type":"temperature","time":"2024-01-01T00:00:00Z"}"#),
            Err(CodecError::Json(_))
        ));
        assert!(matches!(
            decode(br#"{"sensor_id":"t1","sensor_type":"pressure","value":1,"time":"2024-01-01T00:00:00Z"}"#),
            Err(CodecError::Json(_))
        ));
        assert!(matches!(
            decode(br#"{"sensor_id":"t1","sensor_type":"temperature","value":"hot","time":"2024-01-01T00:00:00Z"}"#),
            Err(CodecError::Json(_))
        ));
        assert!(matches!(
            decode(br#"{"sensor_id":"","sensor_type":"temperature","value":1,"time":"2024-01-01T00:00:00Z"}"#),
            Err(CodecError::Invalid(_))
        ));
        assert!(matches!(
            decode(br#"{"sensor_id":"t1","sensor_type":"temperature","value":1,"time":"yesterday"}"#),
            Err(CodecError::Timestamp(_))
        ));
    }
}

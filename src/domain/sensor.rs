use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Physical quantity a sensor measures and an actuator controls.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SensorType {
    /// Air temperature in °C
    Temperature,
    /// Relative humidity in %
    Humidity,
    /// Soil moisture in arbitrary units
    Moisture,
}

impl SensorType {
    pub const ALL: [SensorType; 3] = [
        SensorType::Temperature,
        SensorType::Humidity,
        SensorType::Moisture,
    ];

    /// Inclusive range the environment keeps this quantity in.
    pub fn range(&self) -> (f64, f64) {
        match self {
            SensorType::Temperature => (-20.0, 50.0),
            SensorType::Humidity => (0.0, 100.0),
            SensorType::Moisture => (0.0, 1000.0),
        }
    }

    pub fn clamp_to_range(&self, value: f64) -> f64 {
        let (lo, hi) = self.range();
        value.clamp(lo, hi)
    }
}

/// A single timestamped sample. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub sensor_id: String,
    pub sensor_type: SensorType,
    pub value: f64,
    #[serde(rename = "time")]
    pub timestamp: DateTime<Utc>,
}

impl SensorReading {
    pub fn new(
        sensor_id: impl Into<String>,
        sensor_type: SensorType,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            sensor_type,
            value,
            timestamp,
        }
    }
}

/// Persistence record handed to a [`crate::repo::ReadingStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    pub sensor_id: String,
    pub sensor_type: SensorType,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl From<&SensorReading> for StoredReading {
    fn from(r: &SensorReading) -> Self {
        Self {
            sensor_id: r.sensor_id.clone(),
            sensor_type: r.sensor_type,
            value: r.value,
            timestamp: r.timestamp,
        }
    }
}

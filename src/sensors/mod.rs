//! # Sensor sampling
//!
//! A [`Sampler`] turns the current environment snapshot into a [`SensorReading`]. The
//! simulated sensor adds a fixed placement bias drawn once at construction; it is not
//! re-drawn per sample.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;
use crate::domain::{SensorReading, SensorType};
use crate::simulation::EnvironmentSnapshot;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor {0} timed out")]
    Timeout(String),
}

/// Registration of a sensor in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub sensor_type: SensorType,
    /// Placement bias is drawn uniformly from `[-max_offset, max_offset]`
    #[serde(default = "default_max_offset")]
    pub max_offset: f64,
}

fn default_max_offset() -> f64 {
    1.0
}

#[async_trait]
pub trait Sampler: Send + Sync {
    fn sensor_id(&self) -> &str;
    fn sensor_type(&self) -> SensorType;
    async fn sample(&self, snapshot: &EnvironmentSnapshot) -> Result<SensorReading, SensorError>;
}

/// Virtual sensor reading the simulated environment.
#[derive(Debug, Clone)]
pub struct SimulatedSensor {
    id: String,
    sensor_type: SensorType,
    offset: f64,
}

impl SimulatedSensor {
    /// Create a sensor with a random placement bias.
    pub fn new<R: Rng + ?Sized>(config: &SensorConfig, rng: &mut R) -> Result<Self, ConfigError> {
        let bound = config.max_offset.abs();
        let offset = if bound > 0.0 {
            rng.gen_range(-bound..=bound)
        } else {
            0.0
        };
        Self::with_offset(config.id.clone(), config.sensor_type, offset)
    }

    /// Create a sensor with a known placement bias.
    pub fn with_offset(
        id: impl Into<String>,
        sensor_type: SensorType,
        offset: f64,
    ) -> Result<Self, ConfigError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ConfigError::EmptySensorId);
        }
        Ok(Self {
            id,
            sensor_type,
            offset,
        })
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Biased, rounded reading of the snapshot. Does not touch the model.
    pub fn read(&self, snapshot: &EnvironmentSnapshot) -> SensorReading {
        let raw = snapshot.value(self.sensor_type) + self.offset;
        let value = round2(self.sensor_type.clamp_to_range(raw));
        SensorReading::new(self.id.clone(), self.sensor_type, value, snapshot.timestamp)
    }
}

#[async_trait]
impl Sampler for SimulatedSensor {
    fn sensor_id(&self) -> &str {
        &self.id
    }

    fn sensor_type(&self) -> SensorType {
        self.sensor_type
    }

    async fn sample(&self, snapshot: &EnvironmentSnapshot) -> Result<SensorReading, SensorError> {
        Ok(self.read(snapshot))
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::config::ConfigError;
use crate::domain::SensorType;
use crate::sensors::Sampler;

/// Registered sensor as listed to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorInfo {
    pub id: String,
    pub sensor_type: SensorType,
}

/// Sensors sampled by the gateway. Can be changed while the gateway runs; changes are seen
/// from the next tick.
#[derive(Clone, Default)]
pub struct SensorRegistry {
    sensors: Arc<RwLock<Vec<Arc<dyn Sampler>>>>,
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, sensor: Arc<dyn Sampler>) -> Result<(), ConfigError> {
        let mut sensors = self.sensors.write();
        let duplicate = sensors
            .iter()
            .any(|s| s.sensor_type() == sensor.sensor_type() && s.sensor_id() == sensor.sensor_id());
        if duplicate {
            return Err(ConfigError::DuplicateSensor {
                sensor_type: sensor.sensor_type(),
                id: sensor.sensor_id().to_string(),
            });
        }
        info!(sensor_id = %sensor.sensor_id(), sensor_type = %sensor.sensor_type(), "sensor added");
        sensors.push(sensor);
        Ok(())
    }

    /// Returns whether a sensor was removed.
    pub fn remove(&self, sensor_type: SensorType, id: &str) -> bool {
        let mut sensors = self.sensors.write();
        let before = sensors.len();
        sensors.retain(|s| !(s.sensor_type() == sensor_type && s.sensor_id() == id));
        let removed = sensors.len() < before;
        if removed {
            info!(sensor_id = %id, sensor_type = %sensor_type, "sensor removed");
        }
        removed
    }

    pub fn list(&self) -> Vec<SensorInfo> {
        self.sensors
            .read()
            .iter()
            .map(|s| SensorInfo {
                id: s.sensor_id().to_string(),
                sensor_type: s.sensor_type(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sensors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.read().is_empty()
    }

    /// Current sensors in registration order.
    pub(crate) fn samplers(&self) -> Vec<Arc<dyn Sampler>> {
        self.sensors.read().clone()
    }
}

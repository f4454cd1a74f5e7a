use anyhow::Result;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::controller::{ActuatorConfig, GatewayConfig};
use crate::domain::{Device, SensorType};
use crate::ingest::IngestConfig;
use crate::repo::StoreConfig;
use crate::sensors::SensorConfig;
use crate::simulation::EnvironmentConfig;
use crate::transport::TransportConfig;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
const ENV_PREFIX: &str = "GHT__";

/// Setup-time problems. Any of these stops startup before a loop ticks.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("device {0} already has a controller")]
    DuplicateDevice(Device),
    #[error("controller for {expected} was given the command key of {actual}")]
    SinkMismatch { expected: Device, actual: Device },
    #[error("sensor id must not be empty")]
    EmptySensorId,
    #[error("sensor {sensor_type}/{id} is already registered")]
    DuplicateSensor { sensor_type: SensorType, id: String },
    #[error("thresholds for {device} must satisfy low < high (got low={low}, high={high})")]
    InvalidThresholds { device: Device, low: f64, high: f64 },
    #[error("latitude {0} is outside [-90, 90]")]
    InvalidLatitude(f64),
    #[error("time acceleration must be positive (got {0})")]
    InvalidAcceleration(f64),
    #[error("{0} must be greater than zero")]
    InvalidPeriod(&'static str),
    #[error("smoothing factor for {name} must be in (0, 1] (got {value})")]
    InvalidSmoothing { name: &'static str, value: f64 },
    #[error("{0} must be greater than zero")]
    ZeroCapacity(&'static str),
    #[error("initial {name} must be a finite number (got {value})")]
    InvalidInitial { name: &'static str, value: f64 },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub environment: EnvironmentConfig,
    pub gateway: GatewayConfig,
    pub sensors: Vec<SensorConfig>,
    pub actuators: Vec<ActuatorConfig>,
    pub ingest: IngestConfig,
    pub transport: TransportConfig,
    pub store: StoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: EnvironmentConfig::default(),
            gateway: GatewayConfig::default(),
            sensors: vec![
                SensorConfig {
                    id: "t1".into(),
                    sensor_type: SensorType::Temperature,
                    max_offset: 0.5,
                },
                SensorConfig {
                    id: "h1".into(),
                    sensor_type: SensorType::Humidity,
                    max_offset: 2.0,
                },
                SensorConfig {
                    id: "m1".into(),
                    sensor_type: SensorType::Moisture,
                    max_offset: 10.0,
                },
            ],
            actuators: vec![
                ActuatorConfig::new(Device::Heater, 15.0, 20.0),
                ActuatorConfig::new(Device::Fan, 24.0, 28.0),
                ActuatorConfig::new(Device::Humidifier, 50.0, 60.0),
                ActuatorConfig::new(Device::Dehumidifier, 75.0, 85.0),
                ActuatorConfig::new(Device::Pump, 300.0, 450.0),
            ],
            ingest: IngestConfig::default(),
            transport: TransportConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Config {
    /// `config/default.toml` overlaid with `GHT__SECTION__KEY` environment variables.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Ok(figment.extract()?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let env = &self.environment;
        if !(-90.0..=90.0).contains(&env.latitude) {
            return Err(ConfigError::InvalidLatitude(env.latitude));
        }
        if !(env.time_acceleration > 0.0) || !env.time_acceleration.is_finite() {
            return Err(ConfigError::InvalidAcceleration(env.time_acceleration));
        }
        if let Some(initial) = &env.initial {
            for (name, value) in [
                ("temperature", initial.temperature),
                ("humidity", initial.humidity),
                ("moisture", initial.moisture),
            ] {
                if !value.is_finite() {
                    return Err(ConfigError::InvalidInitial { name, value });
                }
            }
        }
        if env.tick_millis == 0 {
            return Err(ConfigError::InvalidPeriod("environment.tick_millis"));
        }
        for (name, value) in [
            ("temperature", env.smoothing.temperature),
            ("humidity", env.smoothing.humidity),
            ("moisture", env.smoothing.moisture),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::InvalidSmoothing { name, value });
            }
        }

        for (name, millis) in [
            ("gateway.tick_millis", self.gateway.tick_millis),
            ("gateway.publish_timeout_millis", self.gateway.publish_timeout_millis),
            ("gateway.sample_timeout_millis", self.gateway.sample_timeout_millis),
            ("ingest.enqueue_timeout_millis", self.ingest.enqueue_timeout_millis),
            ("ingest.persist_timeout_millis", self.ingest.persist_timeout_millis),
            ("ingest.flush_timeout_millis", self.ingest.flush_timeout_millis),
        ] {
            if millis == 0 {
                return Err(ConfigError::InvalidPeriod(name));
            }
        }
        if self.ingest.queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("ingest.queue_capacity"));
        }
        if self.ingest.buffer_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("ingest.buffer_capacity"));
        }

        let mut devices = HashSet::new();
        for actuator in &self.actuators {
            actuator.validate()?;
            if !devices.insert(actuator.device) {
                return Err(ConfigError::DuplicateDevice(actuator.device));
            }
        }

        let mut sensors = HashSet::new();
        for sensor in &self.sensors {
            if sensor.id.trim().is_empty() {
                return Err(ConfigError::EmptySensorId);
            }
            if !sensors.insert((sensor.sensor_type, sensor.id.as_str())) {
                return Err(ConfigError::DuplicateSensor {
                    sensor_type: sensor.sensor_type,
                    id: sensor.id.clone(),
                });
            }
        }

        Ok(())
    }
}

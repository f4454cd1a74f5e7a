use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ConfigError;
use crate::domain::{Device, Effect, SensorType};
use crate::simulation::EnvironmentSnapshot;
use crate::state::CommandSink;

/// Hysteresis band for one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorConfig {
    pub device: Device,
    pub low: f64,
    pub high: f64,
}

impl ActuatorConfig {
    pub fn new(device: Device, low: f64, high: f64) -> Self {
        Self { device, low, high }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.low.is_finite() || !self.high.is_finite() || self.low >= self.high {
            return Err(ConfigError::InvalidThresholds {
                device: self.device,
                low: self.low,
                high: self.high,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub device: Device,
    pub from: bool,
    pub to: bool,
}

/// Two-state on/off controller with a hysteresis band.
///
/// Raising devices (heater, humidifier, pump) switch ON below `low` and OFF above `high`.
/// Lowering devices (fan, dehumidifier) are mirrored: ON above `high`, OFF below `low`.
/// Inside the band the state never changes.
pub struct ActuatorController {
    device: Device,
    variable: SensorType,
    is_on: bool,
    low: f64,
    high: f64,
    sink: Box<dyn CommandSink>,
}

impl ActuatorController {
    pub fn new(config: &ActuatorConfig, sink: Box<dyn CommandSink>) -> Result<Self, ConfigError> {
        config.validate()?;
        if sink.device() != config.device {
            return Err(ConfigError::SinkMismatch {
                expected: config.device,
                actual: sink.device(),
            });
        }
        Ok(Self {
            device: config.device,
            variable: config.device.controls(),
            is_on: false,
            low: config.low,
            high: config.high,
            sink,
        })
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn variable(&self) -> SensorType {
        self.variable
    }

    pub fn is_on(&self) -> bool {
        self.is_on
    }

    /// Desired new state for `value`, or `None` to stay put.
    pub fn decide(&self, value: f64) -> Option<bool> {
        let (switch_on, switch_off) = match self.device.effect() {
            Effect::Raise => (value < self.low, value > self.high),
            Effect::Lower => (value > self.high, value < self.low),
        };
        match self.is_on {
            false if switch_on => Some(true),
            true if switch_off => Some(false),
            _ => None,
        }
    }

    /// Evaluate against a snapshot and write the command on a transition.
    ///
    /// A failed write is logged and the in-memory state is restored, so the next evaluation
    /// retries the same transition.
    pub async fn evaluate(&mut self, snapshot: &EnvironmentSnapshot) -> Option<Transition> {
        let value = snapshot.value(self.variable);
        let next = self.decide(value)?;
        let previous = self.is_on;

        self.is_on = next;
        match self.sink.write(next).await {
            Ok(()) => {
                info!(
                    device = %self.device,
                    old = state_name(previous),
                    new = state_name(next),
                    value,
                    low = self.low,
                    high = self.high,
                    "actuator switched"
                );
                Some(Transition {
                    device: self.device,
                    from: previous,
                    to: next,
                })
            }
            Err(e) => {
                self.is_on = previous;
                warn!(device = %self.device, error = %e, "command write failed, state rolled back");
                debug!(device = %self.device, is_on = self.is_on, "actuator state after rollback");
                None
            }
        }
    }
}

fn state_name(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

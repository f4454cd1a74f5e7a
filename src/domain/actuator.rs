use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::SensorType;

/// Controllable device. Each device owns exactly one command key.
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
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Device {
    Heater,
    Fan,
    Pump,
    Humidifier,
    Dehumidifier,
}

/// Which way a device pushes its controlled variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Raise,
    Lower,
}

impl Device {
    /// The environment variable this device acts on.
    pub fn controls(&self) -> SensorType {
        match self {
            Device::Heater | Device::Fan => SensorType::Temperature,
            Device::Humidifier | Device::Dehumidifier => SensorType::Humidity,
            Device::Pump => SensorType::Moisture,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            Device::Heater | Device::Humidifier | Device::Pump => Effect::Raise,
            Device::Fan | Device::Dehumidifier => Effect::Lower,
        }
    }
}

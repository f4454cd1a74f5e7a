//! # Shared environment state
//!
//! The only cross-actor mutable state in the system:
//!
//! - the latest [`EnvironmentSnapshot`], written by the environment loop and read by everyone else
//! - the actuator [`Commands`], where each device key has exactly one writer (its controller)
//!   and one reader (the environment loop)
//!
//! Both live behind `tokio::sync::watch` channels, so readers always see a whole value that was
//! published in one piece and never a half-updated record.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

use crate::config::ConfigError;
use crate::domain::Device;
use crate::simulation::EnvironmentSnapshot;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command set closed: environment loop is not running")]
    Closed,
}

/// On/off command for every device, read once per environment tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commands {
    pub heater: bool,
    pub fan: bool,
    pub pump: bool,
    pub humidifier: bool,
    pub dehumidifier: bool,
}

impl Commands {
    pub fn get(&self, device: Device) -> bool {
        match device {
            Device::Heater => self.heater,
            Device::Fan => self.fan,
            Device::Pump => self.pump,
            Device::Humidifier => self.humidifier,
            Device::Dehumidifier => self.dehumidifier,
        }
    }

    pub fn set(&mut self, device: Device, on: bool) {
        match device {
            Device::Heater => self.heater = on,
            Device::Fan => self.fan = on,
            Device::Pump => self.pump = on,
            Device::Humidifier => self.humidifier = on,
            Device::Dehumidifier => self.dehumidifier = on,
        }
    }

    pub fn with(mut self, device: Device, on: bool) -> Self {
        self.set(device, on);
        self
    }
}

/// Write access to a single device's command key.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandSink: Send + Sync {
    fn device(&self) -> Device;
    async fn write(&self, on: bool) -> Result<(), CommandError>;
}

/// Read side handed to every actor except the environment loop.
#[derive(Clone)]
pub struct SharedState {
    snapshot: watch::Receiver<EnvironmentSnapshot>,
    commands: Arc<watch::Sender<Commands>>,
    owners: Arc<Mutex<HashSet<Device>>>,
}

/// Write side owned by the environment loop.
pub struct StateWriter {
    snapshot: watch::Sender<EnvironmentSnapshot>,
    commands: watch::Receiver<Commands>,
}

/// Create the state channels seeded with the model's initial snapshot.
pub fn shared_state(initial: EnvironmentSnapshot) -> (StateWriter, SharedState) {
    let (snapshot_tx, snapshot_rx) = watch::channel(initial);
    let (commands_tx, commands_rx) = watch::channel(Commands::default());

    let writer = StateWriter {
        snapshot: snapshot_tx,
        commands: commands_rx,
    };
    let shared = SharedState {
        snapshot: snapshot_rx,
        commands: Arc::new(commands_tx),
        owners: Arc::new(Mutex::new(HashSet::new())),
    };
    (writer, shared)
}

impl SharedState {
    /// Latest published snapshot.
    pub fn snapshot(&self) -> EnvironmentSnapshot {
        *self.snapshot.borrow()
    }

    /// Current command set.
    pub fn commands(&self) -> Commands {
        *self.commands.borrow()
    }

    /// Receiver that wakes on every published snapshot.
    pub fn watch(&self) -> watch::Receiver<EnvironmentSnapshot> {
        self.snapshot.clone()
    }

    /// Take exclusive ownership of a device's command key.
    ///
    /// Fails if another controller already owns the key. Ownership is released when the
    /// returned handle is dropped.
    pub fn claim(&self, device: Device) -> Result<CommandHandle, ConfigError> {
        let mut owners = self.owners.lock();
        if !owners.insert(device) {
            return Err(ConfigError::DuplicateDevice(device));
        }
        Ok(CommandHandle {
            device,
            commands: self.commands.clone(),
            owners: self.owners.clone(),
        })
    }
}

impl StateWriter {
    /// Commands as last written by the controllers.
    pub fn commands(&self) -> Commands {
        *self.commands.borrow()
    }

    /// Replace the published snapshot in one step.
    pub fn publish(&self, snapshot: EnvironmentSnapshot) {
        self.snapshot.send_replace(snapshot);
    }
}

/// Exclusive writer for one command key.
pub struct CommandHandle {
    device: Device,
    commands: Arc<watch::Sender<Commands>>,
    owners: Arc<Mutex<HashSet<Device>>>,
}

impl std::fmt::Debug for CommandHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandle")
            .field("device", &self.device)
            .finish()
    }
}

#[async_trait]
impl CommandSink for CommandHandle {
    fn device(&self) -> Device {
        self.device
    }

    async fn write(&self, on: bool) -> Result<(), CommandError> {
        if self.commands.is_closed() {
            return Err(CommandError::Closed);
        }
        let device = self.device;
        self.commands.send_modify(|c| c.set(device, on));
        Ok(())
    }
}

impl Drop for CommandHandle {
    fn drop(&mut self) {
        self.owners.lock().remove(&self.device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::EnvironmentSnapshot;
    use chrono::Utc;

    fn snapshot(temperature: f64) -> EnvironmentSnapshot {
        EnvironmentSnapshot {
            temperature,
            humidity: 60.0,
            moisture: 500.0,
            sim_day: 90.0,
            tick: 0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_commands_get_set() {
        let mut c = Commands::default();
        assert!(!c.get(Device::Pump));
        c.set(Device::Pump, true);
        assert!(c.get(Device::Pump));
        assert!(!c.get(Device::Heater));
        assert!(Commands::default().with(Device::Fan, true).fan);
    }

    #[test]
    fn test_claim_is_exclusive() {
        let (_writer, shared) = shared_state(snapshot(18.0));
        let handle = shared.claim(Device::Heater).unwrap();
        assert!(matches!(
            shared.claim(Device::Heater),
            Err(ConfigError::DuplicateDevice(Device::Heater))
        ));
        assert!(shared.claim(Device::Fan).is_ok());

        drop(handle);
        assert!(shared.claim(Device::Heater).is_ok());
    }

    #[tokio::test]
    async fn test_handle_write_visible_to_writer() {
        let (writer, shared) = shared_state(snapshot(18.0));
        let handle = shared.claim(Device::Humidifier).unwrap();

        handle.write(true).await.unwrap();
        assert!(writer.commands().humidifier);
        assert!(shared.commands().humidifier);
        assert!(!writer.commands().dehumidifier);
    }

    #[tokio::test]
    async fn test_handle_write_fails_without_environment() {
        let (writer, shared) = shared_state(snapshot(18.0));
        let handle = shared.claim(Device::Pump).unwrap();
        drop(writer);

        assert!(matches!(handle.write(true).await, Err(CommandError::Closed)));
        assert!(!shared.commands().pump);
    }

    #[test]
    fn test_publish_replaces_snapshot() {
        let (writer, shared) = shared_state(snapshot(18.0));
        writer.publish(snapshot(21.5));
        assert_eq!(shared.snapshot().temperature, 21.5);
    }
}

//! # Control plane
//!
//! [`Runtime::start`] wires the actors together and spawns them on one [`TaskTracker`]:
//!
//! - the environment loop, sole writer of the snapshot
//! - the gateway loop, which runs the actuator controllers and publishes sensor samples
//! - the telemetry ingestor, which subscribes to those samples
//!
//! All of them stop when the shared [`CancellationToken`] is cancelled.

pub mod actuator;
pub mod gateway;
pub mod registry;

use anyhow::{Context, Result};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::config::Config;
use crate::ingest::{IngestHandle, TelemetryIngestor};
use crate::repo::ReadingStore;
use crate::sensors::SimulatedSensor;
use crate::simulation::{EnvironmentLoop, EnvironmentModel};
use crate::state::{shared_state, SharedState};
use crate::transport::Transport;

pub use actuator::{ActuatorConfig, ActuatorController, Transition};
pub use gateway::{GatewayConfig, GatewayLoop, TickReport};
pub use registry::{SensorInfo, SensorRegistry};

/// Running system. Cloning shares the same actors.
#[derive(Clone)]
pub struct Runtime {
    pub state: SharedState,
    pub sensors: SensorRegistry,
    pub ingest: IngestHandle,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl Runtime {
    /// Build every actor from `cfg` and spawn them.
    ///
    /// Configuration problems (duplicate devices, bad thresholds, duplicate sensors) and a
    /// failing subscription are returned before any loop starts ticking.
    pub async fn start(
        cfg: &Config,
        transport: &Transport,
        store: Arc<dyn ReadingStore>,
        tracker: TaskTracker,
        cancel: CancellationToken,
    ) -> Result<Self> {
        cfg.validate()?;

        let model = EnvironmentModel::new(&cfg.environment, Utc::now());
        let (writer, state) = shared_state(model.snapshot());

        let mut actuators = Vec::with_capacity(cfg.actuators.len());
        for actuator in &cfg.actuators {
            let handle = state.claim(actuator.device)?;
            actuators.push(ActuatorController::new(actuator, Box::new(handle))?);
        }

        let mut rng = match cfg.environment.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_entropy(),
        };
        let sensors = SensorRegistry::new();
        for sensor in &cfg.sensors {
            sensors.add(Arc::new(SimulatedSensor::new(sensor, &mut rng)?))?;
        }

        let ingest = TelemetryIngestor::spawn(
            &cfg.ingest,
            Some(transport.subscriber.as_ref()),
            store,
            &tracker,
            cancel.clone(),
        )
        .await
        .context("failed to start telemetry ingestor")?;

        let environment = EnvironmentLoop::new(model, writer, cfg.environment.tick_period());
        tracker.spawn(environment.run(cancel.clone()));

        let gateway = actuators.into_iter().fold(
            GatewayLoop::new(
                state.clone(),
                sensors.clone(),
                transport.publisher.clone(),
                cfg.gateway.clone(),
            ),
            GatewayLoop::with_actuator,
        );
        tracker.spawn(gateway.run(cancel.clone()));

        info!(
            actuators = cfg.actuators.len(),
            sensors = sensors.len(),
            "runtime started"
        );

        Ok(Self {
            state,
            sensors,
            ingest,
            tracker,
            cancel,
        })
    }

    /// Signal every actor to stop. Does not wait.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
    }

    /// Wait for every actor to finish after [`Runtime::shutdown`].
    pub async fn wait(&self) {
        self.tracker.wait().await;
    }
}

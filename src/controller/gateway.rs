use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ActuatorController, SensorRegistry};
use crate::domain::SensorReading;
use crate::state::SharedState;
use crate::transport::{encode, reading_topic, Publisher};
use crate::utils::with_timeout_retry;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub tick_millis: u64,
    pub publish_timeout_millis: u64,
    pub sample_timeout_millis: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            tick_millis: 1_000,
            publish_timeout_millis: 500,
            sample_timeout_millis: 250,
        }
    }
}

impl GatewayConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_millis)
    }

    pub fn sample_timeout(&self) -> Duration {
        Duration::from_millis(self.sample_timeout_millis)
    }
}

/// What happened during one gateway tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub transitions: usize,
    pub sampled: usize,
    pub published: usize,
    pub failed: usize,
}

/// Per-tick control and publish cycle.
///
/// Every tick works on one snapshot: controllers evaluate it in registration order, then all
/// sensors sample that same snapshot concurrently. A decision made in this tick reaches the
/// environment on its next tick, so this tick's samples never reflect it.
pub struct GatewayLoop {
    state: SharedState,
    actuators: Vec<ActuatorController>,
    sensors: SensorRegistry,
    publisher: Arc<dyn Publisher>,
    config: GatewayConfig,
}

impl GatewayLoop {
    pub fn new(
        state: SharedState,
        sensors: SensorRegistry,
        publisher: Arc<dyn Publisher>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            state,
            actuators: Vec::new(),
            sensors,
            publisher,
            config,
        }
    }

    pub fn with_actuator(mut self, controller: ActuatorController) -> Self {
        self.actuators.push(controller);
        self
    }

    pub fn actuators(&self) -> &[ActuatorController] {
        &self.actuators
    }

    pub fn sensors(&self) -> &SensorRegistry {
        &self.sensors
    }

    pub async fn tick(&mut self) -> TickReport {
        let snapshot = self.state.snapshot();
        let mut report = TickReport::default();

        for controller in &mut self.actuators {
            if controller.evaluate(&snapshot).await.is_some() {
                report.transitions += 1;
            }
        }

        let samplers = self.sensors.samplers();
        let sample_timeout = self.config.sample_timeout();
        let samples = join_all(samplers.iter().map(|sampler| {
            let snapshot = &snapshot;
            async move {
                let result = tokio::time::timeout(sample_timeout, sampler.sample(snapshot)).await;
                (sampler, result)
            }
        }))
        .await;

        let mut readings = Vec::with_capacity(samples.len());
        for (sampler, result) in samples {
            match result {
                Ok(Ok(reading)) => readings.push(reading),
                Ok(Err(e)) => {
                    warn!(sensor_id = %sampler.sensor_id(), error = %e, "sample failed");
                }
                Err(_) => {
                    warn!(
                        sensor_id = %sampler.sensor_id(),
                        timeout_ms = sample_timeout.as_millis() as u64,
                        "sample timed out"
                    );
                }
            }
        }
        report.sampled = readings.len();

        let publisher = self.publisher.as_ref();
        let publish_timeout = self.config.publish_timeout();
        let outcomes = join_all(
            readings
                .iter()
                .map(|reading| publish_reading(publisher, reading, publish_timeout)),
        )
        .await;
        report.published = outcomes.iter().filter(|ok| **ok).count();
        report.failed = outcomes.len() - report.published;

        debug!(
            tick = snapshot.tick,
            transitions = report.transitions,
            sampled = report.sampled,
            published = report.published,
            failed = report.failed,
            "gateway tick"
        );
        report
    }

    /// Tick on an absolute schedule until cancelled. Late ticks are skipped, not bunched.
    pub async fn run(mut self, cancel: CancellationToken) {
        let period = self.config.period();
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            period_ms = period.as_millis() as u64,
            actuators = self.actuators.len(),
            sensors = self.sensors.len(),
            "gateway loop started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }

        info!("gateway loop stopped");
    }
}

async fn publish_reading(publisher: &dyn Publisher, reading: &SensorReading, timeout: Duration) -> bool {
    let topic = reading_topic(reading.sensor_type, &reading.sensor_id);
    let payload = match encode(reading) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(topic = %topic, error = %e, "failed to encode reading");
            return false;
        }
    };

    match with_timeout_retry("publish", timeout, || publisher.publish(&topic, payload.clone())).await {
        Ok(()) => true,
        Err(e) => {
            warn!(topic = %topic, error = %e, "failed to publish reading");
            false
        }
    }
}

use chrono::Utc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::EnvironmentModel;
use crate::state::StateWriter;

/// Drives the [`EnvironmentModel`] on a fixed period.
///
/// Each tick reads the commands written since the previous tick, advances the model and
/// publishes the new snapshot. A controller's decision therefore takes effect on the
/// environment tick after it was made.
pub struct EnvironmentLoop {
    model: EnvironmentModel,
    writer: StateWriter,
    period: Duration,
}

impl EnvironmentLoop {
    pub fn new(model: EnvironmentModel, writer: StateWriter, period: Duration) -> Self {
        Self {
            model,
            writer,
            period,
        }
    }

    /// Perform one tick immediately.
    pub fn tick(&mut self) {
        let commands = self.writer.commands();
        let conditions = self.model.step(&commands, Utc::now());
        let snapshot = self.model.snapshot();
        self.writer.publish(snapshot);

        debug!(
            tick = snapshot.tick,
            sim_day = snapshot.sim_day,
            temperature_c = conditions.temperature,
            humidity_pct = conditions.humidity,
            moisture = conditions.moisture,
            "environment tick"
        );
    }

    /// Run until cancelled. Dropping `self` on exit closes the command set.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(period_ms = self.period.as_millis() as u64, "environment loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => self.tick(),
            }
        }

        info!(ticks = self.model.snapshot().tick, "environment loop stopped");
    }
}

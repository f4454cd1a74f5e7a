use anyhow::Result;
use greenhouse_telemetry::{config, controller, repo, telemetry, transport};
use config::Config;
use telemetry::init_tracing;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            return Err(e.into());
        }
    }
    init_tracing();

    let cfg = Config::load()?;
    cfg.validate()?;

    info!(
        latitude = cfg.environment.latitude,
        time_acceleration = cfg.environment.time_acceleration,
        sensors = cfg.sensors.len(),
        actuators = cfg.actuators.len(),
        "starting greenhouse telemetry"
    );

    let tracker = TaskTracker::new();
    let cancel = CancellationToken::new();

    let transport = transport::connect_transport(&cfg.transport, &tracker, cancel.clone())?;
    let store = repo::connect_store(&cfg.store).await?;

    let runtime =
        controller::Runtime::start(&cfg, &transport, store, tracker.clone(), cancel.clone()).await?;

    let signal = telemetry::shutdown_signal().await;

    runtime.shutdown();
    runtime.wait().await;

    let stats = runtime.ingest.stats();
    info!(
        signal = %signal,
        received = stats.received,
        persisted = stats.persisted,
        dropped = stats.dropped,
        malformed = stats.malformed,
        "shutdown complete"
    );
    Ok(())
}

//! Monitor binary: one worker per configured chain over a shared database.

use std::io;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};
use xfer_bridge_domain::config::MonitorConfig;
use xfer_bridge_domain::services::telemetry::{init_telemetry, TelemetryConfig};
use xfer_bridge_monitor::{run_monitor, ChannelNotifier, HttpSettlementGateway, MonitorError};
use xfer_bridge_storage::SeaOrmStorage;

#[tokio::main]
async fn main() -> io::Result<()> {
    if let Err(err) = bootstrap().await {
        eprintln!("[monitor] bootstrap failed: {err}");
        return Err(io::Error::other(err.to_string()));
    }

    Ok(())
}

async fn bootstrap() -> Result<(), MonitorError> {
    let config = MonitorConfig::load_from_env()?;
    let telemetry_config = TelemetryConfig::from_env("MONITOR");
    let _telemetry = init_telemetry(&telemetry_config)?;
    let storage = SeaOrmStorage::connect_with(config.database()).await?;
    let gateway = HttpSettlementGateway::new(config.settlement(), config.retry().settlement_timeout)?;
    let (notifier, delivery) = ChannelNotifier::from_config(config.notifier());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(?err, "failed to listen for ctrl-c");
            return;
        }
        info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    let result = run_monitor(
        config,
        storage,
        Arc::new(notifier),
        Arc::new(gateway),
        shutdown_rx,
    )
    .await;

    // Dropping the last sender lets the delivery task drain its queue and exit.
    if let Err(err) = delivery.await {
        warn!(?err, "notification delivery task failed");
    }
    result
}

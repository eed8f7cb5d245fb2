//! Scanner binary: one worker per configured contract event.

use std::{io, sync::Arc};

use flow_relay_domain::config::ScannerConfig;
use flow_relay_domain::services::{init_telemetry, HttpQueueClient, TelemetryConfig};
use flow_relay_scanner::{run_scanner, FlowAccessClient, ScannerError};
use flow_relay_storage::SeaOrmStorage;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> io::Result<()> {
    if let Err(err) = bootstrap().await {
        eprintln!("[scanner] bootstrap failed: {err}");
        return Err(io::Error::other(err.to_string()));
    }

    Ok(())
}

async fn bootstrap() -> Result<(), ScannerError> {
    let config = ScannerConfig::load_from_env()?;
    let telemetry_config = TelemetryConfig::from_env("SCANNER");
    init_telemetry(&telemetry_config)?;

    let mut storage = SeaOrmStorage::builder().database_url(config.database_url());
    if let Some(max) = config.database_max_connections() {
        storage = storage.max_connections(max);
    }
    let storage = storage.build().await?;
    let queue = HttpQueueClient::new(config.queue());
    let ledger = FlowAccessClient::new();

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
                shutdown.cancel();
            }
        }
    });

    run_scanner(
        &config,
        Arc::new(storage),
        Arc::new(ledger),
        Arc::new(queue),
        shutdown,
    )
    .await
}

//! Consumer binary applying queued ledger events to the listing store.

use std::{io, sync::Arc};

use flow_relay_consumer::{
    handlers::listing, run_consumer, ConsumerError, HandlerRegistry, ListingCreatedHandler,
};
use flow_relay_domain::config::ConsumerConfig;
use flow_relay_domain::services::{init_telemetry, HttpQueueClient, TelemetryConfig};
use flow_relay_storage::SeaOrmStorage;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> io::Result<()> {
    if let Err(err) = bootstrap().await {
        eprintln!("[consumer] bootstrap failed: {err}");
        return Err(io::Error::other(err.to_string()));
    }

    Ok(())
}

async fn bootstrap() -> Result<(), ConsumerError> {
    let config = ConsumerConfig::load_from_env()?;
    let telemetry_config = TelemetryConfig::from_env("CONSUMER");
    init_telemetry(&telemetry_config)?;

    let mut storage = SeaOrmStorage::builder().database_url(config.database_url());
    if let Some(max) = config.database_max_connections() {
        storage = storage.max_connections(max);
    }
    let storage = Arc::new(storage.build().await?);
    let registry = HandlerRegistry::new().register(
        listing::CONTRACT,
        listing::EVENT,
        ListingCreatedHandler::new(storage),
    );
    info!(handlers = registry.len(), "handler registry ready");
    let queue = Arc::new(HttpQueueClient::new(config.queue()));

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

    run_consumer(&config, registry, queue, shutdown).await
}

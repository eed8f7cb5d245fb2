use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{info, warn};

use flow_relay_domain::{
    config::{ConfigError, ScannerConfig},
    services::{MessageQueue, Recycler, TelemetryError},
    storage::{CheckpointStore, StorageError},
};

use tokio_util::sync::CancellationToken;

use crate::{pool::EndpointPool, publisher::OutboundPublisher, rpc::LedgerClient, worker::ScanWorker};

/// Bootstrap failures of the scanner process. All of them are fatal.
#[derive(Debug, Error)]
pub enum ScannerError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("access node list is empty")]
    EmptyPool,
    #[error("scanner task failed: {0}")]
    Task(String),
}

/// Starts one worker per configured event query plus the retry recycler, and
/// waits until every worker has stopped. Cancelling `shutdown` stops all of
/// them.
pub async fn run_scanner<C, L, Q>(
    config: &ScannerConfig,
    checkpoints: Arc<C>,
    ledger: Arc<L>,
    queue: Arc<Q>,
    shutdown: CancellationToken,
) -> Result<(), ScannerError>
where
    C: CheckpointStore + 'static,
    L: LedgerClient + 'static,
    Q: MessageQueue + 'static,
{
    let pool = EndpointPool::new(config.access_nodes().to_vec()).ok_or(ScannerError::EmptyPool)?;
    let tunables = config.tunables().clone();

    let publisher = Arc::new(OutboundPublisher::new(
        queue,
        tunables.batch_max_entries,
        tunables.request_timeout,
    ));
    let recycler = Arc::new(Recycler::new("publisher", publisher.clone()));
    let recycler_handle = recycler.spawn(tunables.retry_interval, shutdown.clone());

    let mut workers = JoinSet::new();
    for contract in config.contracts() {
        for query in contract.event_queries() {
            let worker = ScanWorker::new(
                config.network(),
                query,
                contract.created_block_height,
                pool.clone(),
                checkpoints.clone(),
                ledger.clone(),
                publisher.clone(),
                tunables.clone(),
                &shutdown,
            );
            workers.spawn(worker.run());
        }
    }
    info!(
        network = %config.network(),
        workers = workers.len(),
        access_nodes = pool.len(),
        "scanner started"
    );

    let mut failure = None;
    while let Some(joined) = workers.join_next().await {
        if let Err(err) = joined {
            warn!(%err, "scan worker aborted");
            shutdown.cancel();
            if failure.is_none() {
                failure = Some(ScannerError::Task(err.to_string()));
            }
        }
    }

    shutdown.cancel();
    if let Some(handle) = recycler_handle {
        if let Err(err) = handle.await {
            if failure.is_none() {
                failure = Some(ScannerError::Task(err.to_string()));
            }
        }
    }
    info!(pending_batches = publisher.pending_batches(), "scanner stopped");

    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

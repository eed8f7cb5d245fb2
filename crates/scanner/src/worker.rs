use std::sync::Arc;

use metrics::{counter, gauge, histogram};
use thiserror::Error;
use tracing::{debug, info, warn};

use flow_relay_domain::{
    config::{Network, ScanTunables},
    model::EventQuery,
    services::MessageQueue,
    storage::{CheckpointStore, StorageError},
};
use tokio_util::sync::CancellationToken;

use crate::{
    pool::EndpointPool,
    publisher::{OutboundPublisher, PublishError},
    rpc::{with_deadline, LedgerClient, RpcError},
};

/// Failures of a single scan cycle. All of them are retried after the error
/// backoff; none advances the checkpoint.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("{call} via {endpoint} failed: {source}")]
    Rpc {
        call: &'static str,
        endpoint: String,
        #[source]
        source: RpcError,
    },
    #[error("checkpoint store failed: {0}")]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Encode(#[from] PublishError),
    #[error("only {published} of {total} events were published")]
    Publish { published: usize, total: usize },
}

/// Progress of one worker. Only the worker's own loop mutates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanState {
    pub scaned_height: Option<u64>,
    pub target_height: u64,
    pub latest_height: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The cursor already reached the chain head; no events were fetched.
    Idle { scaned_height: u64, latest_height: u64 },
    Scanned {
        from_height: u64,
        to_height: u64,
        latest_height: u64,
        events: usize,
    },
}

/// Scans one event type of one contract across the height axis.
pub struct ScanWorker<C, L, Q> {
    network: Network,
    query: EventQuery,
    origin_height: u64,
    pool: EndpointPool,
    checkpoints: Arc<C>,
    ledger: Arc<L>,
    publisher: Arc<OutboundPublisher<Q>>,
    tunables: ScanTunables,
    state: ScanState,
    running: CancellationToken,
}

impl<C, L, Q> ScanWorker<C, L, Q>
where
    C: CheckpointStore,
    L: LedgerClient,
    Q: MessageQueue,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        network: Network,
        query: EventQuery,
        origin_height: u64,
        pool: EndpointPool,
        checkpoints: Arc<C>,
        ledger: Arc<L>,
        publisher: Arc<OutboundPublisher<Q>>,
        tunables: ScanTunables,
        shutdown: &CancellationToken,
    ) -> Self {
        Self {
            network,
            query,
            origin_height,
            pool,
            checkpoints,
            ledger,
            publisher,
            tunables,
            state: ScanState::default(),
            running: shutdown.child_token(),
        }
    }

    pub fn query(&self) -> &EventQuery {
        &self.query
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn endpoint_pool(&self) -> &EndpointPool {
        &self.pool
    }

    pub fn is_running(&self) -> bool {
        !self.running.is_cancelled()
    }

    /// Stops this worker only. Cancelling the shutdown token passed to
    /// [`ScanWorker::new`] stops every worker built from it.
    pub fn stop(&self) {
        self.running.cancel();
    }

    /// Handle that stops this worker once the worker has been moved into
    /// [`ScanWorker::run`].
    pub fn stop_handle(&self) -> CancellationToken {
        self.running.clone()
    }

    /// Loops until stopped. Idle cycles sleep the idle interval, failed cycles
    /// sleep the error backoff and retry the same window.
    pub async fn run(mut self) {
        info!(
            network = %self.network,
            query = %self.query.event_type,
            endpoint = self.pool.current(),
            "scan worker started"
        );

        while self.is_running() {
            match self.run_cycle().await {
                Ok(CycleOutcome::Idle {
                    scaned_height,
                    latest_height,
                }) => {
                    debug!(
                        query = %self.query.event_type,
                        scaned_height,
                        latest_height,
                        sleep = ?self.tunables.idle_sleep,
                        "scanned height reached latest height, sleeping"
                    );
                    self.pause(self.tunables.idle_sleep).await;
                }
                Ok(CycleOutcome::Scanned { .. }) => {}
                Err(err) => {
                    counter!("scanner_cycle_errors_total").increment(1);
                    warn!(
                        network = %self.network,
                        query = %self.query.event_type,
                        scaned_height = ?self.state.scaned_height,
                        target_height = self.state.target_height,
                        error = %err,
                        sleep = ?self.tunables.error_sleep,
                        "scan cycle failed, backing off"
                    );
                    self.pause(self.tunables.error_sleep).await;
                }
            }
        }

        info!(query = %self.query.event_type, "scan worker stopped");
    }

    async fn pause(&self, duration: std::time::Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.running.cancelled() => {}
        }
    }

    /// One pass of latest-height → window → events → publish → checkpoint.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, ScanError> {
        let scaned_height = self.scaned_height().await?;

        let endpoint = self.pool.current().to_string();
        let latest_height = match with_deadline(
            self.tunables.request_timeout,
            self.ledger.latest_height(&endpoint),
        )
        .await
        {
            Ok(height) => {
                counter!("scanner_rpc_calls_total", "call" => "latest_height", "result" => "ok")
                    .increment(1);
                height
            }
            Err(source) => return Err(self.rpc_failure("latest_height", endpoint, source)),
        };
        self.state.latest_height = latest_height;

        if scaned_height >= latest_height {
            return Ok(CycleOutcome::Idle {
                scaned_height,
                latest_height,
            });
        }

        let target_height = scaned_height
            .saturating_add(self.tunables.scan_step)
            .min(latest_height);
        self.state.target_height = target_height;
        info!(
            query = %self.query.event_type,
            from = scaned_height,
            to = target_height,
            latest = latest_height,
            "scanning window"
        );

        let events = match with_deadline(
            self.tunables.request_timeout,
            self.ledger.get_events(
                &self.query.event_type,
                scaned_height,
                target_height,
                &endpoint,
            ),
        )
        .await
        {
            Ok(events) => {
                counter!("scanner_rpc_calls_total", "call" => "get_events", "result" => "ok")
                    .increment(1);
                events
            }
            Err(source) => return Err(self.rpc_failure("get_events", endpoint, source)),
        };
        histogram!("scanner_window_events").record(events.len() as f64);

        if !events.is_empty() {
            let published = self.publisher.publish(&events).await?;
            if published < events.len() {
                return Err(ScanError::Publish {
                    published,
                    total: events.len(),
                });
            }
            info!(
                query = %self.query.event_type,
                events = events.len(),
                "published window events"
            );
        }

        self.checkpoints
            .advance(self.network, &self.query.event_type, target_height)
            .await?;
        self.state.scaned_height = Some(target_height);
        gauge!("scanner_checkpoint_height", "event_type" => self.query.event_type.clone())
            .set(target_height as f64);

        Ok(CycleOutcome::Scanned {
            from_height: scaned_height,
            to_height: target_height,
            latest_height,
            events: events.len(),
        })
    }

    /// Reads the persisted cursor once, creating it at the contract's origin
    /// height when absent.
    async fn scaned_height(&mut self) -> Result<u64, ScanError> {
        if let Some(height) = self.state.scaned_height {
            return Ok(height);
        }

        let stored = self
            .checkpoints
            .find_height(self.network, &self.query.event_type)
            .await?;
        let height = match stored {
            Some(height) => height,
            None => {
                self.checkpoints
                    .create_initial(self.network, &self.query.event_type, self.origin_height)
                    .await?;
                info!(
                    query = %self.query.event_type,
                    height = self.origin_height,
                    "created checkpoint at contract origin"
                );
                self.origin_height
            }
        };
        self.state.scaned_height = Some(height);
        Ok(height)
    }

    fn rpc_failure(&mut self, call: &'static str, endpoint: String, source: RpcError) -> ScanError {
        counter!("scanner_rpc_calls_total", "call" => call, "result" => "error").increment(1);
        counter!("scanner_endpoint_rotations_total").increment(1);
        let next = self.pool.rotate();
        warn!(
            query = %self.query.event_type,
            failed = %endpoint,
            next = next,
            "rotating access node"
        );
        ScanError::Rpc {
            call,
            endpoint,
            source,
        }
    }
}

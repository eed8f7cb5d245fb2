use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use async_trait::async_trait;
use metrics::{counter, gauge};
use thiserror::Error;
use tracing::{debug, info, warn};

use flow_relay_domain::{
    config::{ConfigError, ConsumerConfig},
    model::{BlockchainEvent, ConsumerMessage},
    services::{with_deadline, MessageQueue, QueueError, Recycle, RecycleReport, Recycler, TelemetryError},
    storage::StorageError,
};
use tokio_util::sync::CancellationToken;

use crate::registry::HandlerRegistry;

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("consumer already running")]
    AlreadyRunning,
    #[error("consumer task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Success,
    Fail,
    Skip,
}

/// Tally of one receive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchReport {
    pub success: usize,
    pub fail: usize,
    pub skip: usize,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.success + self.fail + self.skip
    }

    fn record(&mut self, outcome: MessageOutcome) {
        match outcome {
            MessageOutcome::Success => self.success += 1,
            MessageOutcome::Fail => self.fail += 1,
            MessageOutcome::Skip => self.skip += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveSettings {
    pub max_messages: usize,
    pub wait: Duration,
    pub error_sleep: Duration,
    pub request_timeout: Duration,
}

impl From<&ConsumerConfig> for ReceiveSettings {
    fn from(config: &ConsumerConfig) -> Self {
        Self {
            max_messages: config.receive_max_messages(),
            wait: config.receive_wait(),
            error_sleep: config.error_sleep(),
            request_timeout: config.request_timeout(),
        }
    }
}

/// Long-polls the queue and dispatches each message to its handler.
///
/// Receipt handles whose deletion failed are kept in a pending-delete set;
/// a redelivery carrying such a handle is skipped without invoking the
/// handler, and the GC recycler keeps retrying the delete.
pub struct InboundConsumer<Q> {
    queue: Arc<Q>,
    registry: HandlerRegistry,
    settings: ReceiveSettings,
    pending_deletes: Mutex<HashSet<String>>,
    running: AtomicBool,
}

impl<Q: MessageQueue> InboundConsumer<Q> {
    pub fn new(queue: Arc<Q>, registry: HandlerRegistry, settings: ReceiveSettings) -> Self {
        Self {
            queue,
            registry,
            settings,
            pending_deletes: Mutex::new(HashSet::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn pending_deletes(&self) -> usize {
        self.lock_pending().len()
    }

    pub fn is_pending_delete(&self, receipt_handle: &str) -> bool {
        self.lock_pending().contains(receipt_handle)
    }

    pub async fn handle_message(&self, message: &ConsumerMessage) -> MessageOutcome {
        if self.is_pending_delete(&message.receipt_handle) {
            debug!(receipt_handle = %message.receipt_handle, "delete still pending, skipping");
            return MessageOutcome::Skip;
        }

        let event: BlockchainEvent = match serde_json::from_str(&message.body) {
            Ok(event) => event,
            Err(err) => {
                warn!(%err, "unparseable message body, deleting");
                if let Err(err) = self.delete(&message.receipt_handle).await {
                    warn!(%err, "failed to delete unparseable message");
                }
                return MessageOutcome::Fail;
            }
        };

        let handler = event
            .contract_and_event()
            .and_then(|(contract, name)| self.registry.lookup(contract, name));
        let Some(handler) = handler else {
            info!(event_type = %event.event_type, "no handler registered, acknowledging");
            self.acknowledge(&message.receipt_handle).await;
            return MessageOutcome::Success;
        };

        let handled = tokio::time::timeout(self.settings.request_timeout, handler.handle(&event)).await;
        match handled {
            Ok(Ok(())) => {
                self.acknowledge(&message.receipt_handle).await;
                MessageOutcome::Success
            }
            Ok(Err(err)) => {
                warn!(
                    %err,
                    event_type = %event.event_type,
                    transaction_id = %event.transaction_id,
                    "handler failed, leaving message for redelivery"
                );
                MessageOutcome::Fail
            }
            Err(_) => {
                warn!(
                    event_type = %event.event_type,
                    deadline = ?self.settings.request_timeout,
                    "handler timed out, leaving message for redelivery"
                );
                MessageOutcome::Fail
            }
        }
    }

    /// Receives one batch and handles its messages in order.
    pub async fn poll_once(&self) -> Result<BatchReport, QueueError> {
        let deadline = self.settings.request_timeout + self.settings.wait;
        let messages = match with_deadline(
            deadline,
            self.queue.receive(self.settings.max_messages, self.settings.wait),
        )
        .await
        {
            Ok(messages) => {
                counter!("consumer_receive_total", "result" => "ok").increment(1);
                messages
            }
            Err(err) => {
                counter!("consumer_receive_total", "result" => "error").increment(1);
                return Err(err);
            }
        };

        let mut report = BatchReport::default();
        if messages.is_empty() {
            return Ok(report);
        }

        info!(total = messages.len(), "resolving events");
        for message in &messages {
            let outcome = self.handle_message(message).await;
            counter!("consumer_messages_total", "result" => outcome_label(outcome)).increment(1);
            report.record(outcome);
        }
        info!(
            total = report.total(),
            success = report.success,
            failed = report.fail,
            skip = report.skip,
            "handle complete"
        );
        Ok(report)
    }

    /// Loops until `shutdown` is cancelled; a failed receive sleeps the error
    /// backoff. A receive already in flight finishes first.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), ConsumerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("consumer already running");
            return Err(ConsumerError::AlreadyRunning);
        }
        info!(
            max_messages = self.settings.max_messages,
            wait = ?self.settings.wait,
            "consumer started"
        );

        while !shutdown.is_cancelled() {
            if let Err(err) = self.poll_once().await {
                warn!(%err, sleep = ?self.settings.error_sleep, "receive failed, backing off");
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.error_sleep) => {}
                    _ = shutdown.cancelled() => {}
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!(pending_deletes = self.pending_deletes(), "consumer stopped");
        Ok(())
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        with_deadline(
            self.settings.request_timeout,
            self.queue.delete_message(receipt_handle),
        )
        .await
    }

    /// Deletes a handled message, parking the handle for GC on failure.
    async fn acknowledge(&self, receipt_handle: &str) {
        if let Err(err) = self.delete(receipt_handle).await {
            warn!(%err, "delete failed, handle parked for gc");
            let mut pending = self.lock_pending();
            pending.insert(receipt_handle.to_string());
            gauge!("consumer_pending_deletes").set(pending.len() as f64);
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashSet<String>> {
        self.pending_deletes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn outcome_label(outcome: MessageOutcome) -> &'static str {
    match outcome {
        MessageOutcome::Success => "success",
        MessageOutcome::Fail => "fail",
        MessageOutcome::Skip => "skip",
    }
}

#[async_trait]
impl<Q: MessageQueue + 'static> Recycle for InboundConsumer<Q> {
    fn pending(&self) -> usize {
        self.pending_deletes()
    }

    /// Retries every parked delete once; failures stay parked.
    async fn recycle(&self) -> RecycleReport {
        let handles: Vec<String> = self.lock_pending().iter().cloned().collect();
        let mut report = RecycleReport {
            attempted: handles.len(),
            recovered: 0,
        };
        info!(total = handles.len(), "deleting parked messages");

        for handle in handles {
            match self.delete(&handle).await {
                Ok(()) => {
                    counter!("consumer_gc_deletes_total", "result" => "ok").increment(1);
                    self.lock_pending().remove(&handle);
                    report.recovered += 1;
                }
                Err(err) => {
                    counter!("consumer_gc_deletes_total", "result" => "error").increment(1);
                    debug!(%err, "parked delete failed again");
                }
            }
        }
        gauge!("consumer_pending_deletes").set(self.pending_deletes() as f64);
        report
    }
}

/// Runs the consumer loop with its GC recycler until `shutdown` is cancelled.
pub async fn run_consumer<Q>(
    config: &ConsumerConfig,
    registry: HandlerRegistry,
    queue: Arc<Q>,
    shutdown: CancellationToken,
) -> Result<(), ConsumerError>
where
    Q: MessageQueue + 'static,
{
    let consumer = Arc::new(InboundConsumer::new(queue, registry, config.into()));
    let recycler = Arc::new(Recycler::new("pending-deletes", consumer.clone()));
    let gc = recycler.spawn(config.gc_interval(), shutdown.clone());

    let result = consumer.run(shutdown.clone()).await;
    shutdown.cancel();
    if let Some(gc) = gc {
        gc.await.map_err(|err| ConsumerError::Task(err.to_string()))?;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::listing::tests::listing_event;
    use crate::handlers::ListingCreatedHandler;
    use crate::registry::{EventHandler, HandlerError};
    use flow_relay_domain::model::QueueBatch;
    use flow_relay_domain::storage::ListingStore;
    use flow_relay_storage::SeaOrmStorage;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct MockQueue {
        inbox: Mutex<VecDeque<Vec<ConsumerMessage>>>,
        receive_fails: AtomicBool,
        failing_deletes: Mutex<HashSet<String>>,
        delete_calls: AtomicUsize,
        deleted: Mutex<Vec<String>>,
    }

    impl MockQueue {
        fn fail_delete(&self, handle: &str) {
            self.failing_deletes.lock().unwrap().insert(handle.to_string());
        }

        fn heal_delete(&self, handle: &str) {
            self.failing_deletes.lock().unwrap().remove(handle);
        }

        fn deleted(&self) -> Vec<String> {
            self.deleted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageQueue for MockQueue {
        async fn send_batch(&self, _batch: &QueueBatch) -> Result<(), QueueError> {
            Ok(())
        }

        async fn receive(
            &self,
            _max_messages: usize,
            wait: Duration,
        ) -> Result<Vec<ConsumerMessage>, QueueError> {
            if self.receive_fails.load(Ordering::SeqCst) {
                return Err(QueueError::Transport("broker unavailable".into()));
            }
            let next = self.inbox.lock().unwrap().pop_front();
            match next {
                Some(messages) => Ok(messages),
                None => {
                    // long poll with nothing queued
                    tokio::time::sleep(wait).await;
                    Ok(Vec::new())
                }
            }
        }

        async fn delete_message(&self, receipt_handle: &str) -> Result<(), QueueError> {
            self.delete_calls.fetch_add(1, Ordering::SeqCst);
            if self.failing_deletes.lock().unwrap().contains(receipt_handle) {
                return Err(QueueError::Transport("delete refused".into()));
            }
            self.deleted.lock().unwrap().push(receipt_handle.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingHandler {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl EventHandler for Arc<CountingHandler> {
        async fn handle(&self, _event: &BlockchainEvent) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(HandlerError::InvalidPayload {
                    field: "listingId",
                    reason: "missing".into(),
                });
            }
            Ok(())
        }
    }

    fn settings() -> ReceiveSettings {
        ReceiveSettings {
            max_messages: 10,
            wait: Duration::from_millis(1),
            error_sleep: Duration::from_millis(1),
            request_timeout: Duration::from_secs(1),
        }
    }

    fn message(handle: &str, event: &BlockchainEvent) -> ConsumerMessage {
        ConsumerMessage::new(handle, serde_json::to_string(event).unwrap())
    }

    fn counting() -> (Arc<CountingHandler>, HandlerRegistry) {
        let handler = Arc::new(CountingHandler::default());
        let registry =
            HandlerRegistry::new().register("MelosMarketplace", "ListingCreated", handler.clone());
        (handler, registry)
    }

    #[tokio::test]
    async fn handled_message_is_deleted() {
        let queue = Arc::new(MockQueue::default());
        let (handler, registry) = counting();
        let consumer = InboundConsumer::new(queue.clone(), registry, settings());

        let outcome = consumer.handle_message(&message("r1", &listing_event(1))).await;

        assert_eq!(outcome, MessageOutcome::Success);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.deleted(), vec!["r1"]);
    }

    #[tokio::test]
    async fn parked_handle_is_skipped_without_handler_call() {
        let queue = Arc::new(MockQueue::default());
        queue.fail_delete("r1");
        let (handler, registry) = counting();
        let consumer = InboundConsumer::new(queue.clone(), registry, settings());
        let delivery = message("r1", &listing_event(1));

        assert_eq!(consumer.handle_message(&delivery).await, MessageOutcome::Success);
        assert!(consumer.is_pending_delete("r1"));

        assert_eq!(consumer.handle_message(&delivery).await, MessageOutcome::Skip);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.delete_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn poison_message_is_deleted_and_never_parked() {
        let queue = Arc::new(MockQueue::default());
        let (handler, registry) = counting();
        let consumer = InboundConsumer::new(queue.clone(), registry, settings());

        let outcome = consumer
            .handle_message(&ConsumerMessage::new("r1", "{not json"))
            .await;
        assert_eq!(outcome, MessageOutcome::Fail);
        assert_eq!(queue.deleted(), vec!["r1"]);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);

        queue.fail_delete("r2");
        let outcome = consumer
            .handle_message(&ConsumerMessage::new("r2", "garbage"))
            .await;
        assert_eq!(outcome, MessageOutcome::Fail);
        assert!(!consumer.is_pending_delete("r2"));
        assert_eq!(consumer.pending_deletes(), 0);
    }

    #[tokio::test]
    async fn unregistered_event_is_acknowledged() {
        let queue = Arc::new(MockQueue::default());
        let (handler, registry) = counting();
        let consumer = InboundConsumer::new(queue.clone(), registry, settings());
        let mut event = listing_event(1);
        event.event_type = "A.01.MelosMarketplace.OfferAccepted".into();

        assert_eq!(
            consumer.handle_message(&message("r1", &event)).await,
            MessageOutcome::Success
        );
        event.event_type = "flow.AccountCreated".into();
        assert_eq!(
            consumer.handle_message(&message("r2", &event)).await,
            MessageOutcome::Success
        );
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(queue.deleted(), vec!["r1", "r2"]);
    }

    #[tokio::test]
    async fn handler_failure_leaves_message_undeleted() {
        let queue = Arc::new(MockQueue::default());
        let (handler, registry) = counting();
        handler.fail.store(true, Ordering::SeqCst);
        let consumer = InboundConsumer::new(queue.clone(), registry, settings());

        let outcome = consumer.handle_message(&message("r1", &listing_event(1))).await;

        assert_eq!(outcome, MessageOutcome::Fail);
        assert_eq!(queue.delete_calls.load(Ordering::SeqCst), 0);
        assert_eq!(consumer.pending_deletes(), 0);
    }

    #[tokio::test]
    async fn poll_reports_each_outcome() {
        let queue = Arc::new(MockQueue::default());
        queue.inbox.lock().unwrap().push_back(vec![
            message("r1", &listing_event(1)),
            ConsumerMessage::new("r2", "nope"),
            message("r3", &listing_event(3)),
        ]);
        let (_handler, registry) = counting();
        let consumer = InboundConsumer::new(queue.clone(), registry, settings());
        consumer.lock_pending().insert("r3".into());

        let report = consumer.poll_once().await.unwrap();

        assert_eq!(
            report,
            BatchReport {
                success: 1,
                fail: 1,
                skip: 1
            }
        );
        assert_eq!(report.total(), 3);
    }

    #[tokio::test]
    async fn receive_failure_surfaces_as_error() {
        let queue = Arc::new(MockQueue::default());
        queue.receive_fails.store(true, Ordering::SeqCst);
        let (_handler, registry) = counting();
        let consumer = InboundConsumer::new(queue, registry, settings());

        assert!(matches!(
            consumer.poll_once().await,
            Err(QueueError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn gc_retries_parked_deletes_until_they_succeed() {
        let queue = Arc::new(MockQueue::default());
        queue.fail_delete("r1");
        queue.fail_delete("r2");
        let (_handler, registry) = counting();
        let consumer = InboundConsumer::new(queue.clone(), registry, settings());
        consumer.handle_message(&message("r1", &listing_event(1))).await;
        consumer.handle_message(&message("r2", &listing_event(2))).await;
        assert_eq!(consumer.pending(), 2);

        queue.heal_delete("r1");
        let report = consumer.recycle().await;
        assert_eq!(
            report,
            RecycleReport {
                attempted: 2,
                recovered: 1
            }
        );
        assert!(consumer.is_pending_delete("r2"));
        assert!(!consumer.is_pending_delete("r1"));

        queue.heal_delete("r2");
        consumer.recycle().await;
        assert_eq!(consumer.pending(), 0);
        assert_eq!(queue.deleted(), vec!["r1", "r2"]);
    }

    #[tokio::test]
    async fn redelivered_listing_is_stored_once() {
        let storage = Arc::new(SeaOrmStorage::connect("sqlite::memory:").await.unwrap());
        let registry = HandlerRegistry::new().register(
            "MelosMarketplace",
            "ListingCreated",
            ListingCreatedHandler::new(storage.clone()),
        );
        let queue = Arc::new(MockQueue::default());
        let consumer = InboundConsumer::new(queue.clone(), registry, settings());
        let event = listing_event(42);

        assert_eq!(
            consumer.handle_message(&message("r1", &event)).await,
            MessageOutcome::Success
        );
        assert_eq!(
            consumer.handle_message(&message("r2", &event)).await,
            MessageOutcome::Success
        );
        assert!(storage.find_listing(42).await.unwrap().is_some());
        assert_eq!(queue.deleted(), vec!["r1", "r2"]);
    }

    #[tokio::test]
    async fn second_run_is_refused() {
        let queue = Arc::new(MockQueue::default());
        let (_handler, registry) = counting();
        let consumer = Arc::new(InboundConsumer::new(queue, registry, settings()));
        let shutdown = CancellationToken::new();

        let first = tokio::spawn({
            let (consumer, shutdown) = (consumer.clone(), shutdown.clone());
            async move { consumer.run(shutdown).await }
        });
        while !consumer.running.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        assert!(matches!(
            consumer.run(shutdown.clone()).await,
            Err(ConsumerError::AlreadyRunning)
        ));
        shutdown.cancel();
        first.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancellation_cuts_error_backoff_short() {
        let queue = Arc::new(MockQueue::default());
        queue.receive_fails.store(true, Ordering::SeqCst);
        let (_handler, registry) = counting();
        let consumer = Arc::new(InboundConsumer::new(
            queue,
            registry,
            ReceiveSettings {
                error_sleep: Duration::from_secs(3600),
                ..settings()
            },
        ));
        let shutdown = CancellationToken::new();

        let run = tokio::spawn({
            let (consumer, shutdown) = (consumer.clone(), shutdown.clone());
            async move { consumer.run(shutdown).await }
        });
        while !consumer.running.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("consumer stops during backoff")
            .unwrap()
            .unwrap();
    }
}

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use metrics::{counter, gauge};
use thiserror::Error;
use tracing::{info, warn};

use flow_relay_domain::model::{BlockchainEvent, QueueBatch, QueueEntry};
use flow_relay_domain::services::{with_deadline, MessageQueue, QueueError, Recycle, RecycleReport};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("cannot serialize event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Splits events into bounded queue batches and keeps failed batches for the
/// retry recycler.
///
/// The retry buffer does not release the worker's checkpoint. A window with a
/// failed batch is published again in full, so its entries can reach the queue
/// twice: once from the recycler and once from the republished window, and the
/// batches that succeeded the first time are sent again as well. Consumers
/// deduplicate by their own keys.
pub struct OutboundPublisher<Q> {
    queue: Arc<Q>,
    max_entries: usize,
    deadline: Duration,
    pending: Mutex<Vec<QueueBatch>>,
}

impl<Q: MessageQueue> OutboundPublisher<Q> {
    pub fn new(queue: Arc<Q>, max_entries: usize, deadline: Duration) -> Self {
        Self {
            queue,
            max_entries: max_entries.max(1),
            deadline,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Submits `events` in batches of at most `max_entries`. A failed batch is
    /// buffered whole and the remaining batches are still submitted. Returns
    /// the number of entries accepted synchronously.
    pub async fn publish(&self, events: &[BlockchainEvent]) -> Result<usize, PublishError> {
        let entries = events
            .iter()
            .enumerate()
            .map(|(index, event)| QueueEntry::from_event(index, event))
            .collect::<Result<Vec<_>, _>>()?;

        let mut succeeded = 0;
        for chunk in entries.chunks(self.max_entries) {
            let batch = QueueBatch::new(chunk.to_vec());
            match self.submit(&batch).await {
                Ok(()) => {
                    counter!("publisher_batches_total", "result" => "ok").increment(1);
                    succeeded += batch.len();
                }
                Err(err) => {
                    counter!("publisher_batches_total", "result" => "error").increment(1);
                    warn!(
                        %err,
                        entries = batch.len(),
                        first_id = batch.entries.first().map(|e| e.id.as_str()),
                        "batch submission failed, buffering for retry"
                    );
                    self.push_pending(batch);
                }
            }
        }
        Ok(succeeded)
    }

    pub fn pending_batches(&self) -> usize {
        self.lock_pending().len()
    }

    pub fn pending_snapshot(&self) -> Vec<QueueBatch> {
        self.lock_pending().clone()
    }

    async fn submit(&self, batch: &QueueBatch) -> Result<(), QueueError> {
        with_deadline(self.deadline, self.queue.send_batch(batch)).await
    }

    fn push_pending(&self, batch: QueueBatch) {
        let mut pending = self.lock_pending();
        pending.push(batch);
        gauge!("publisher_retry_buffer_len").set(pending.len() as f64);
    }

    fn take_pending(&self) -> Vec<QueueBatch> {
        let mut pending = self.lock_pending();
        gauge!("publisher_retry_buffer_len").set(0.0);
        std::mem::take(&mut *pending)
    }

    fn lock_pending(&self) -> MutexGuard<'_, Vec<QueueBatch>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl<Q: MessageQueue + 'static> Recycle for OutboundPublisher<Q> {
    fn pending(&self) -> usize {
        self.pending_batches()
    }

    /// Resubmits every buffered batch once. Batches failing again are not put
    /// back; the owning worker keeps its checkpoint and republishes the window.
    async fn recycle(&self) -> RecycleReport {
        let batches = self.take_pending();
        let mut report = RecycleReport {
            attempted: batches.len(),
            recovered: 0,
        };
        info!(batches = batches.len(), "resubmitting buffered batches");

        for batch in batches {
            match self.submit(&batch).await {
                Ok(()) => {
                    counter!("publisher_recycled_batches_total", "result" => "ok").increment(1);
                    report.recovered += 1;
                }
                Err(err) => {
                    counter!("publisher_recycled_batches_total", "result" => "dropped")
                        .increment(1);
                    warn!(%err, entries = batch.len(), "buffered batch failed again");
                }
            }
        }
        report
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flow_relay_domain::model::ConsumerMessage;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Queue that fails the submissions whose 1-based call number is listed.
    #[derive(Default)]
    pub(crate) struct ScriptedQueue {
        pub calls: AtomicUsize,
        pub fail_calls: Mutex<HashSet<usize>>,
        pub fail_all: std::sync::atomic::AtomicBool,
        pub sent: Mutex<Vec<QueueBatch>>,
    }

    impl ScriptedQueue {
        pub(crate) fn failing(calls: &[usize]) -> Self {
            Self {
                fail_calls: Mutex::new(calls.iter().copied().collect()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl MessageQueue for ScriptedQueue {
        async fn send_batch(&self, batch: &QueueBatch) -> Result<(), QueueError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_all.load(Ordering::SeqCst) || self.fail_calls.lock().unwrap().contains(&call)
            {
                return Err(QueueError::Transport("broker unavailable".into()));
            }
            self.sent.lock().unwrap().push(batch.clone());
            Ok(())
        }

        async fn receive(
            &self,
            _max_messages: usize,
            _wait: Duration,
        ) -> Result<Vec<ConsumerMessage>, QueueError> {
            Ok(Vec::new())
        }

        async fn delete_message(&self, _receipt_handle: &str) -> Result<(), QueueError> {
            Ok(())
        }
    }

    pub(crate) fn events(count: usize) -> Vec<BlockchainEvent> {
        (0..count)
            .map(|index| BlockchainEvent {
                block_height: 1000 + index as u64,
                event_type: "A.01.MelosMarketplace.ListingCreated".into(),
                transaction_id: format!("tx{index}"),
                event_index: 0,
                data: Default::default(),
            })
            .collect()
    }

    fn publisher(queue: Arc<ScriptedQueue>) -> OutboundPublisher<ScriptedQueue> {
        OutboundPublisher::new(queue, 5, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn splits_into_bounded_batches() {
        let queue = Arc::new(ScriptedQueue::default());
        let publisher = publisher(queue.clone());

        let published = publisher.publish(&events(12)).await.unwrap();

        assert_eq!(published, 12);
        let sizes: Vec<usize> = queue.sent.lock().unwrap().iter().map(QueueBatch::len).collect();
        assert_eq!(sizes, vec![5, 5, 2]);
        assert_eq!(publisher.pending_batches(), 0);
    }

    #[tokio::test]
    async fn failed_batch_is_buffered_and_siblings_continue() {
        let queue = Arc::new(ScriptedQueue::failing(&[2]));
        let publisher = publisher(queue.clone());

        let published = publisher.publish(&events(12)).await.unwrap();

        assert_eq!(published, 7);
        assert_eq!(queue.calls.load(Ordering::SeqCst), 3);
        let pending = publisher.pending_snapshot();
        assert_eq!(pending.len(), 1);
        let ids: Vec<&str> = pending[0].entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(
            ids,
            [
                "ListingCreated-5",
                "ListingCreated-6",
                "ListingCreated-7",
                "ListingCreated-8",
                "ListingCreated-9"
            ]
        );
    }

    #[tokio::test]
    async fn recycle_resubmits_buffered_batches() {
        let queue = Arc::new(ScriptedQueue::failing(&[1]));
        let publisher = publisher(queue.clone());
        assert_eq!(publisher.publish(&events(3)).await.unwrap(), 0);
        assert_eq!(publisher.pending(), 1);

        let report = publisher.recycle().await;

        assert_eq!(
            report,
            RecycleReport {
                attempted: 1,
                recovered: 1
            }
        );
        assert_eq!(publisher.pending(), 0);
        assert_eq!(queue.sent.lock().unwrap()[0].len(), 3);
    }

    #[tokio::test]
    async fn batches_failing_again_are_not_requeued_in_the_same_tick() {
        let queue = Arc::new(ScriptedQueue::default());
        queue.fail_all.store(true, Ordering::SeqCst);
        let publisher = publisher(queue.clone());
        publisher.publish(&events(7)).await.unwrap();
        assert_eq!(publisher.pending(), 2);

        let report = publisher.recycle().await;

        assert_eq!(report.attempted, 2);
        assert_eq!(report.recovered, 0);
        assert_eq!(queue.calls.load(Ordering::SeqCst), 4);
        assert_eq!(publisher.pending(), 0);
    }

    #[tokio::test]
    async fn empty_publish_sends_nothing() {
        let queue = Arc::new(ScriptedQueue::default());
        let publisher = publisher(queue.clone());
        assert_eq!(publisher.publish(&[]).await.unwrap(), 0);
        assert_eq!(queue.calls.load(Ordering::SeqCst), 0);
    }
}

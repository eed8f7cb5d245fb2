//! Queue collaborator: the trait both pipelines talk to and an HTTP client
//! speaking the SQS JSON protocol against an SQS-compatible endpoint.

use std::{collections::HashMap, future::Future, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::QueueConfig;
use crate::model::{ConsumerMessage, QueueBatch, QueueEntry};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue transport error: {0}")]
    Transport(String),
    #[error("queue rejected {failed} of {total} entries: {reason}")]
    Rejected {
        failed: usize,
        total: usize,
        reason: String,
    },
    #[error("queue call exceeded {0:?}")]
    Timeout(Duration),
    #[error("malformed queue response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for QueueError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Decode(value.to_string())
        } else {
            Self::Transport(value.to_string())
        }
    }
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Submits every entry of `batch`; any rejected entry fails the batch.
    async fn send_batch(&self, batch: &QueueBatch) -> Result<(), QueueError>;
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<ConsumerMessage>, QueueError>;
    async fn delete_message(&self, receipt_handle: &str) -> Result<(), QueueError>;
}

/// Bounds a queue call by a caller-side deadline.
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> Result<T, QueueError>
where
    F: Future<Output = Result<T, QueueError>>,
{
    tokio::time::timeout(deadline, call)
        .await
        .map_err(|_| QueueError::Timeout(deadline))?
}

const TARGET_PREFIX: &str = "AmazonSQS.";
const CONTENT_TYPE: &str = "application/x-amz-json-1.0";

/// Queue client for SQS-compatible brokers. Requests are unsigned; deploy
/// behind a signing proxy or against a broker that does not require auth.
#[derive(Debug, Clone)]
pub struct HttpQueueClient {
    http: reqwest::Client,
    queue_url: String,
    endpoint: String,
}

impl HttpQueueClient {
    pub fn new(config: &QueueConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(http: reqwest::Client, config: &QueueConfig) -> Self {
        Self {
            http,
            queue_url: config.queue_url().to_string(),
            endpoint: config.endpoint().to_string(),
        }
    }

    async fn call<B, R>(&self, action: &str, body: &B) -> Result<R, QueueError>
    where
        B: Serialize + Sync,
        R: for<'de> Deserialize<'de>,
    {
        let response = self
            .http
            .post(&self.endpoint)
            .header("X-Amz-Target", format!("{TARGET_PREFIX}{action}"))
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(QueueError::Transport(format!("{action} returned {status}: {text}")));
        }

        let bytes = response.bytes().await?;
        // DeleteMessage answers with an empty body.
        let payload: &[u8] = if bytes.is_empty() { b"{}" } else { &bytes };
        serde_json::from_slice(payload).map_err(|err| QueueError::Decode(err.to_string()))
    }
}

#[async_trait]
impl MessageQueue for HttpQueueClient {
    async fn send_batch(&self, batch: &QueueBatch) -> Result<(), QueueError> {
        let request = SendMessageBatchRequest {
            queue_url: &self.queue_url,
            entries: batch.entries.iter().map(BatchEntry::from).collect(),
        };
        let response: SendMessageBatchResponse = self.call("SendMessageBatch", &request).await?;
        if response.failed.is_empty() {
            return Ok(());
        }

        let reason = response
            .failed
            .iter()
            .map(|failure| {
                format!(
                    "{}: {}",
                    failure.id,
                    failure.message.as_deref().unwrap_or(failure.code.as_str())
                )
            })
            .collect::<Vec<_>>()
            .join("; ");
        Err(QueueError::Rejected {
            failed: response.failed.len(),
            total: batch.len(),
            reason,
        })
    }

    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<ConsumerMessage>, QueueError> {
        let request = ReceiveMessageRequest {
            queue_url: &self.queue_url,
            max_number_of_messages: max_messages,
            wait_time_seconds: wait.as_secs(),
            message_attribute_names: &["All"],
        };
        let response: ReceiveMessageResponse = self.call("ReceiveMessage", &request).await?;
        Ok(response
            .messages
            .into_iter()
            .map(|message| ConsumerMessage::new(message.receipt_handle, message.body))
            .collect())
    }

    async fn delete_message(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let request = DeleteMessageRequest {
            queue_url: &self.queue_url,
            receipt_handle,
        };
        let _: serde_json::Value = self.call("DeleteMessage", &request).await?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendMessageBatchRequest<'a> {
    queue_url: &'a str,
    entries: Vec<BatchEntry<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct BatchEntry<'a> {
    id: &'a str,
    message_body: &'a str,
    message_attributes: HashMap<&'static str, AttributeValue>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AttributeValue {
    data_type: &'static str,
    string_value: String,
}

impl AttributeValue {
    fn string(value: &str) -> Self {
        Self {
            data_type: "String",
            string_value: value.to_string(),
        }
    }

    fn number(value: u64) -> Self {
        Self {
            data_type: "Number",
            string_value: value.to_string(),
        }
    }
}

impl<'a> From<&'a QueueEntry> for BatchEntry<'a> {
    fn from(entry: &'a QueueEntry) -> Self {
        let mut message_attributes = HashMap::new();
        message_attributes.insert(
            "BlockHeight",
            AttributeValue::number(entry.attributes.block_height),
        );
        message_attributes.insert(
            "TransactionId",
            AttributeValue::string(&entry.attributes.transaction_id),
        );
        message_attributes.insert(
            "EventType",
            AttributeValue::string(&entry.attributes.event_type),
        );
        Self {
            id: &entry.id,
            message_body: &entry.body,
            message_attributes,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendMessageBatchResponse {
    #[serde(default)]
    failed: Vec<BatchFailure>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BatchFailure {
    id: String,
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ReceiveMessageRequest<'a> {
    queue_url: &'a str,
    max_number_of_messages: usize,
    wait_time_seconds: u64,
    message_attribute_names: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReceiveMessageResponse {
    #[serde(default)]
    messages: Vec<ReceivedMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReceivedMessage {
    receipt_handle: String,
    #[serde(default)]
    body: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct DeleteMessageRequest<'a> {
    queue_url: &'a str,
    receipt_handle: &'a str,
}

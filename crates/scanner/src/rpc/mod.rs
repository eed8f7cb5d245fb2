use std::{future::Future, time::Duration};

use async_trait::async_trait;
use flow_relay_domain::model::BlockchainEvent;
use thiserror::Error;

pub mod cadence;
mod types;

pub use types::{BlockEvents, BlockHeader, BlockResponse, RawEvent};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("rpc transport error: {0}")]
    Transport(String),
    #[error("rpc call returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("rpc call exceeded {0:?}")]
    Timeout(Duration),
    #[error("cannot decode rpc response: {0}")]
    Decode(String),
    #[error("access node returned no sealed block")]
    NoSealedBlock,
}

impl From<reqwest::Error> for RpcError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Decode(value.to_string())
        } else {
            Self::Transport(value.to_string())
        }
    }
}

/// Read access to the ledger through one access node per call.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn latest_height(&self, endpoint: &str) -> Result<u64, RpcError>;

    /// Events of `event_type` sealed in `[from_height, to_height]`, in block
    /// order.
    async fn get_events(
        &self,
        event_type: &str,
        from_height: u64,
        to_height: u64,
        endpoint: &str,
    ) -> Result<Vec<BlockchainEvent>, RpcError>;
}

/// Bounds an RPC call by a caller-side deadline.
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> Result<T, RpcError>
where
    F: Future<Output = Result<T, RpcError>>,
{
    tokio::time::timeout(deadline, call)
        .await
        .map_err(|_| RpcError::Timeout(deadline))?
}

/// Client for the Flow Access REST API (`/v1/blocks`, `/v1/events`).
#[derive(Debug, Clone, Default)]
pub struct FlowAccessClient {
    http: reqwest::Client,
}

impl FlowAccessClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn get_json<T>(&self, url: String, query: &[(&str, String)]) -> Result<T, RpcError>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let response = self.http.get(url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RpcError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

fn api_url(endpoint: &str, path: &str) -> String {
    format!("{}/v1/{}", endpoint.trim_end_matches('/'), path)
}

#[async_trait]
impl LedgerClient for FlowAccessClient {
    async fn latest_height(&self, endpoint: &str) -> Result<u64, RpcError> {
        let blocks: Vec<BlockResponse> = self
            .get_json(api_url(endpoint, "blocks"), &[("height", "sealed".to_string())])
            .await?;
        blocks
            .first()
            .map(|block| block.header.height)
            .ok_or(RpcError::NoSealedBlock)
    }

    async fn get_events(
        &self,
        event_type: &str,
        from_height: u64,
        to_height: u64,
        endpoint: &str,
    ) -> Result<Vec<BlockchainEvent>, RpcError> {
        let blocks: Vec<BlockEvents> = self
            .get_json(
                api_url(endpoint, "events"),
                &[
                    ("type", event_type.to_string()),
                    ("start_height", from_height.to_string()),
                    ("end_height", to_height.to_string()),
                ],
            )
            .await?;
        into_events(blocks)
    }
}

fn into_events(blocks: Vec<BlockEvents>) -> Result<Vec<BlockchainEvent>, RpcError> {
    let mut events = Vec::new();
    for block in blocks {
        for raw in block.events {
            events.push(BlockchainEvent {
                block_height: block.block_height,
                data: cadence::decode_payload(&raw.payload)?,
                event_type: raw.event_type,
                transaction_id: raw.transaction_id,
                event_index: u32::try_from(raw.event_index)
                    .map_err(|_| RpcError::Decode("event index overflow".into()))?,
            });
        }
    }
    Ok(events)
}

//! Data structures shared by the scanner (producer) and consumer binaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifies one event kind of one contract, e.g.
/// `A.0123456789abcdef.MelosMarketplace.ListingCreated`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventQuery {
    pub event_type: String,
    pub contract_name: String,
    pub address: String,
    pub event_name: String,
}

impl EventQuery {
    pub fn new(address: &str, contract_name: &str, event_name: &str) -> Self {
        let address = address
            .trim()
            .trim_start_matches("0x")
            .to_ascii_lowercase();
        Self {
            event_type: format!("A.{address}.{contract_name}.{event_name}"),
            contract_name: contract_name.to_string(),
            address,
            event_name: event_name.to_string(),
        }
    }
}

/// Splits a canonical event type into `(contract, event)`. Types that do not
/// follow the `A.<address>.<contract>.<event>` shape yield `None`.
pub fn split_event_type(event_type: &str) -> Option<(&str, &str)> {
    let mut parts = event_type.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("A"), Some(address), Some(contract), Some(event), None)
            if !address.is_empty() && !contract.is_empty() && !event.is_empty() =>
        {
            Some((contract, event))
        }
        _ => None,
    }
}

/// Decoded ledger event. This is also the JSON body carried by queue
/// messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockchainEvent {
    pub block_height: u64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub transaction_id: String,
    pub event_index: u32,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl BlockchainEvent {
    /// Last segment of the event type, used for queue entry ids.
    pub fn event_name(&self) -> &str {
        self.event_type
            .rsplit('.')
            .next()
            .unwrap_or(self.event_type.as_str())
    }

    pub fn contract_and_event(&self) -> Option<(&str, &str)> {
        split_event_type(&self.event_type)
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name).filter(|value| !value.is_null())
    }
}

/// Metadata attached to each queue entry so brokers and operators can filter
/// without parsing the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventAttributes {
    pub block_height: u64,
    pub transaction_id: String,
    pub event_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: String,
    pub attributes: EventAttributes,
    pub body: String,
}

impl QueueEntry {
    /// Builds the entry for the event at `index` of a publish call. The id is
    /// deterministic (`<eventName>-<index>`) so it stays unique per batch.
    pub fn from_event(index: usize, event: &BlockchainEvent) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: format!("{}-{}", event.event_name(), index),
            attributes: EventAttributes {
                block_height: event.block_height,
                transaction_id: event.transaction_id.clone(),
                event_type: event.event_type.clone(),
            },
            body: serde_json::to_string(event)?,
        })
    }
}

/// Ordered group of entries submitted in one call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueueBatch {
    pub entries: Vec<QueueEntry>,
}

impl QueueBatch {
    pub fn new(entries: Vec<QueueEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One delivery of a queue message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerMessage {
    pub receipt_handle: String,
    pub body: String,
}

impl ConsumerMessage {
    pub fn new(receipt_handle: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            receipt_handle: receipt_handle.into(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewListing {
    pub listing_id: u64,
    pub listing_type: u8,
    pub transaction_id: String,
    pub block_height: u64,
    pub event_index: u32,
    pub seller: String,
    pub nft_id: u64,
    pub nft_type: String,
    pub nft_resource_uuid: String,
    pub payment_token: String,
    pub listing_start_time: f64,
    pub listing_end_time: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListingRecord {
    pub listing_id: u64,
    pub listing_type: u8,
    pub transaction_id: String,
    pub block_height: u64,
    pub event_index: u32,
    pub seller: String,
    pub nft_id: u64,
    pub nft_type: String,
    pub nft_resource_uuid: String,
    pub payment_token: String,
    pub listing_start_time: f64,
    pub listing_end_time: Option<f64>,
    pub created_at: DateTime<Utc>,
}

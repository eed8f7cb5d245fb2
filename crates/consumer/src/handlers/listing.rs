//! Reference handler persisting `ListingCreated` marketplace events.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use serde_json::Value;
use tracing::{debug, info};

use flow_relay_domain::{
    model::{BlockchainEvent, NewListing},
    storage::ListingStore,
};

use crate::registry::{EventHandler, HandlerError};

pub const CONTRACT: &str = "MelosMarketplace";
pub const EVENT: &str = "ListingCreated";

/// Inserts one listing per `listingId`; redelivered events find the existing
/// row and succeed without writing.
pub struct ListingCreatedHandler<S> {
    store: Arc<S>,
}

impl<S: ListingStore> ListingCreatedHandler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: ListingStore + 'static> EventHandler for ListingCreatedHandler<S> {
    async fn handle(&self, event: &BlockchainEvent) -> Result<(), HandlerError> {
        let listing = parse_listing(event)?;

        if self.store.find_listing(listing.listing_id).await?.is_some() {
            debug!(listing_id = listing.listing_id, "listing already stored");
            counter!("consumer_listings_total", "result" => "duplicate").increment(1);
            return Ok(());
        }

        let record = self.store.insert_listing(listing).await?;
        counter!("consumer_listings_total", "result" => "inserted").increment(1);
        info!(
            listing_id = record.listing_id,
            seller = %record.seller,
            block_height = record.block_height,
            "listing stored"
        );
        Ok(())
    }
}

fn parse_listing(event: &BlockchainEvent) -> Result<NewListing, HandlerError> {
    let listing_type = match required(event, "listingType")? {
        Value::Object(map) => map.get("rawValue").unwrap_or(&Value::Null),
        other => other,
    };
    let listing_type = as_u64("listingType", listing_type)?;

    Ok(NewListing {
        listing_id: as_u64("listingId", required(event, "listingId")?)?,
        listing_type: u8::try_from(listing_type).map_err(|_| HandlerError::InvalidPayload {
            field: "listingType",
            reason: format!("out of range: {listing_type}"),
        })?,
        transaction_id: event.transaction_id.clone(),
        block_height: event.block_height,
        event_index: event.event_index,
        seller: as_text("seller", required(event, "seller")?)?,
        nft_id: as_u64("nftId", required(event, "nftId")?)?,
        nft_type: as_text("nftType", required(event, "nftType")?)?,
        nft_resource_uuid: as_text("nftResourceUUID", required(event, "nftResourceUUID")?)?,
        payment_token: as_text("paymentToken", required(event, "paymentToken")?)?,
        listing_start_time: as_f64("listingStartTime", required(event, "listingStartTime")?)?,
        listing_end_time: event
            .field("listingEndTime")
            .map(|value| as_f64("listingEndTime", value))
            .transpose()?,
    })
}

fn required<'a>(event: &'a BlockchainEvent, field: &'static str) -> Result<&'a Value, HandlerError> {
    event.field(field).ok_or(HandlerError::InvalidPayload {
        field,
        reason: "missing".into(),
    })
}

fn invalid(field: &'static str, value: &Value) -> HandlerError {
    HandlerError::InvalidPayload {
        field,
        reason: format!("malformed: {value}"),
    }
}

fn as_u64(field: &'static str, value: &Value) -> Result<u64, HandlerError> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| invalid(field, value))
}

fn as_f64(field: &'static str, value: &Value) -> Result<f64, HandlerError> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| invalid(field, value))
}

fn as_text(field: &'static str, value: &Value) -> Result<String, HandlerError> {
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(invalid(field, other)),
    }
}

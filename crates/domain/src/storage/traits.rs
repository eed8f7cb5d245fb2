use async_trait::async_trait;
use thiserror::Error;

use crate::config::Network;
use crate::model::{ListingRecord, NewListing};

/// Common result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
}

impl StorageError {
    pub fn from_source(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }
}

/// Persisted scan cursors keyed by `(network, event_type)`.
///
/// The store itself does not enforce monotonicity; callers never advance a
/// key below the last height they wrote.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn find_height(&self, network: Network, event_type: &str) -> StorageResult<Option<u64>>;
    async fn create_initial(&self, network: Network, event_type: &str, height: u64)
        -> StorageResult<()>;
    async fn advance(&self, network: Network, event_type: &str, height: u64) -> StorageResult<()>;
}

#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn find_listing(&self, listing_id: u64) -> StorageResult<Option<ListingRecord>>;
    async fn insert_listing(&self, listing: NewListing) -> StorageResult<ListingRecord>;
}

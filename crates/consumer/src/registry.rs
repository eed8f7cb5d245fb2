use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

use flow_relay_domain::{model::BlockchainEvent, storage::StorageError};

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("field `{field}` is {reason}")]
    InvalidPayload { field: &'static str, reason: String },
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Applies one decoded event to the domain. Implementations must tolerate
/// the same event being delivered more than once.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &BlockchainEvent) -> Result<(), HandlerError>;
}

/// Dispatch table keyed by contract name, then event name.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HashMap<String, Arc<dyn EventHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(mut self, contract: &str, event: &str, handler: H) -> Self
    where
        H: EventHandler + 'static,
    {
        self.handlers
            .entry(contract.to_string())
            .or_default()
            .insert(event.to_string(), Arc::new(handler));
        self
    }

    pub fn lookup(&self, contract: &str, event: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers.get(contract)?.get(event).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl EventHandler for Noop {
        async fn handle(&self, _event: &BlockchainEvent) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[test]
    fn lookup_is_keyed_by_contract_and_event() {
        let registry = HandlerRegistry::new()
            .register("MelosMarketplace", "ListingCreated", Noop)
            .register("MelosMarketplace", "ListingRemoved", Noop);

        assert_eq!(registry.len(), 2);
        assert!(registry.lookup("MelosMarketplace", "ListingCreated").is_some());
        assert!(registry.lookup("MelosMarketplace", "OfferAccepted").is_none());
        assert!(registry.lookup("MelosNFT", "ListingCreated").is_none());
    }
}

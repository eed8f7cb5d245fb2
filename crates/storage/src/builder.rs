use flow_relay_domain::storage::{StorageError, StorageResult};
use sea_orm::{ConnectOptions, Database};

use crate::{migration::run_migrations, SeaOrmStorage};

#[derive(Default)]
pub struct StorageBuilder {
    database_url: Option<String>,
    max_connections: Option<u32>,
}

impl StorageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = Some(max);
        self
    }

    pub async fn build(self) -> StorageResult<SeaOrmStorage> {
        let url = self
            .database_url
            .ok_or_else(|| StorageError::Database("missing database url".into()))?;
        let mut options = ConnectOptions::new(url);
        if let Some(max) = self.max_connections {
            options.max_connections(max);
        }
        let db = Database::connect(options)
            .await
            .map_err(StorageError::from_source)?;
        run_migrations(&db).await?;
        Ok(SeaOrmStorage::from_connection(db))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_relay_domain::{config::Network, storage::CheckpointStore};

    #[tokio::test]
    async fn builds_capped_pool_with_migrations() {
        let storage = StorageBuilder::new()
            .database_url("sqlite::memory:")
            .max_connections(1)
            .build()
            .await
            .expect("storage builds");

        storage
            .create_initial(Network::Mainnet, "A.01.MelosMarketplace.ListingCreated", 7)
            .await
            .unwrap();
        assert_eq!(
            storage
                .find_height(Network::Mainnet, "A.01.MelosMarketplace.ListingCreated")
                .await
                .unwrap(),
            Some(7)
        );
    }

    #[tokio::test]
    async fn missing_url_is_an_error() {
        let result = StorageBuilder::new().max_connections(2).build().await;
        assert!(matches!(result, Err(StorageError::Database(_))));
    }
}

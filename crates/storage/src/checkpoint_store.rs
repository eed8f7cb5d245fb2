use flow_relay_domain::config::Network;
use flow_relay_domain::storage::{CheckpointStore, StorageError, StorageResult};
use sea_orm::{sea_query::OnConflict, EntityTrait, Set};

use crate::entity::block_scans;
use crate::SeaOrmStorage;

fn active(network: Network, event_type: &str, height: u64) -> block_scans::ActiveModel {
    block_scans::ActiveModel {
        network: Set(network.to_string()),
        event_type: Set(event_type.to_string()),
        height: Set(height as i64),
    }
}

#[async_trait::async_trait]
impl CheckpointStore for SeaOrmStorage {
    async fn find_height(&self, network: Network, event_type: &str) -> StorageResult<Option<u64>> {
        let maybe = block_scans::Entity::find_by_id((network.to_string(), event_type.to_string()))
            .one(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(maybe.map(|model| model.height.max(0) as u64))
    }

    async fn create_initial(
        &self,
        network: Network,
        event_type: &str,
        height: u64,
    ) -> StorageResult<()> {
        block_scans::Entity::insert(active(network, event_type, height))
            .on_conflict(
                OnConflict::columns([block_scans::Column::Network, block_scans::Column::EventType])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(())
    }

    async fn advance(&self, network: Network, event_type: &str, height: u64) -> StorageResult<()> {
        block_scans::Entity::insert(active(network, event_type, height))
            .on_conflict(
                OnConflict::columns([block_scans::Column::Network, block_scans::Column::EventType])
                    .update_column(block_scans::Column::Height)
                    .to_owned(),
            )
            .exec_without_returning(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(())
    }
}

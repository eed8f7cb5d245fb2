use flow_relay_domain::model::{ListingRecord, NewListing};
use flow_relay_domain::storage::{ListingStore, StorageError, StorageResult};
use sea_orm::{ActiveModelTrait, EntityTrait, Set};

use crate::entity::listings;
use crate::SeaOrmStorage;

#[async_trait::async_trait]
impl ListingStore for SeaOrmStorage {
    async fn find_listing(&self, listing_id: u64) -> StorageResult<Option<ListingRecord>> {
        let maybe = listings::Entity::find_by_id(listing_id as i64)
            .one(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(maybe.map(listing_to_record))
    }

    async fn insert_listing(&self, listing: NewListing) -> StorageResult<ListingRecord> {
        let model = listings::ActiveModel {
            listing_id: Set(listing.listing_id as i64),
            listing_type: Set(i16::from(listing.listing_type)),
            transaction_id: Set(listing.transaction_id),
            block_height: Set(listing.block_height as i64),
            event_index: Set(listing.event_index as i32),
            seller: Set(listing.seller),
            nft_id: Set(listing.nft_id as i64),
            nft_type: Set(listing.nft_type),
            nft_resource_uuid: Set(listing.nft_resource_uuid),
            payment_token: Set(listing.payment_token),
            listing_start_time: Set(listing.listing_start_time),
            listing_end_time: Set(listing.listing_end_time),
            created_at: Set(chrono::Utc::now()),
        };
        let created = model
            .insert(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(listing_to_record(created))
    }
}

fn listing_to_record(model: listings::Model) -> ListingRecord {
    ListingRecord {
        listing_id: model.listing_id as u64,
        listing_type: model.listing_type as u8,
        transaction_id: model.transaction_id,
        block_height: model.block_height as u64,
        event_index: model.event_index as u32,
        seller: model.seller,
        nft_id: model.nft_id as u64,
        nft_type: model.nft_type,
        nft_resource_uuid: model.nft_resource_uuid,
        payment_token: model.payment_token,
        listing_start_time: model.listing_start_time,
        listing_end_time: model.listing_end_time,
        created_at: model.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(listing_id: u64) -> NewListing {
        NewListing {
            listing_id,
            listing_type: 1,
            transaction_id: "ab12".into(),
            block_height: 1200,
            event_index: 0,
            seller: "0x01cf0e2f2f715450".into(),
            nft_id: 42,
            nft_type: "A.01.MelosNFT.NFT".into(),
            nft_resource_uuid: "9001".into(),
            payment_token: "A.7e60df042a9c0868.FlowToken.Vault".into(),
            listing_start_time: 1_650_000_000.0,
            listing_end_time: None,
        }
    }

    #[tokio::test]
    async fn inserted_listing_can_be_found() {
        let storage = SeaOrmStorage::connect("sqlite::memory:").await.unwrap();
        assert!(storage.find_listing(3).await.unwrap().is_none());

        let record = storage.insert_listing(listing(3)).await.unwrap();
        assert_eq!(record.listing_id, 3);

        let found = storage.find_listing(3).await.unwrap().expect("listing stored");
        assert_eq!(found.nft_id, 42);
        assert_eq!(found.listing_end_time, None);
        assert_eq!(found.listing_start_time, 1_650_000_000.0);
    }

    #[tokio::test]
    async fn duplicate_listing_id_is_rejected_by_schema() {
        let storage = SeaOrmStorage::connect("sqlite::memory:").await.unwrap();
        storage.insert_listing(listing(5)).await.unwrap();
        assert!(storage.insert_listing(listing(5)).await.is_err());
    }
}

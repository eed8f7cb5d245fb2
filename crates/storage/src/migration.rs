use sea_orm::sea_query::{ColumnDef, Expr, Index, IndexCreateStatement, Table, TableCreateStatement};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection};

use crate::entity::{block_scans, listings};
use flow_relay_domain::storage::{StorageError, StorageResult};

pub async fn run_migrations(db: &DatabaseConnection) -> StorageResult<()> {
    let backend = db.get_database_backend();

    let block_scans_table = Table::create()
        .if_not_exists()
        .table(block_scans::Entity)
        .col(
            ColumnDef::new(block_scans::Column::Network)
                .string_len(16)
                .not_null(),
        )
        .col(
            ColumnDef::new(block_scans::Column::EventType)
                .string_len(255)
                .not_null(),
        )
        .col(
            ColumnDef::new(block_scans::Column::Height)
                .big_integer()
                .not_null(),
        )
        .primary_key(
            Index::create()
                .col(block_scans::Column::Network)
                .col(block_scans::Column::EventType),
        )
        .to_owned();
    create_table(db, backend, block_scans_table).await?;

    let listings_table = Table::create()
        .if_not_exists()
        .table(listings::Entity)
        .col(
            ColumnDef::new(listings::Column::ListingId)
                .big_integer()
                .not_null()
                .primary_key(),
        )
        .col(
            ColumnDef::new(listings::Column::ListingType)
                .small_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(listings::Column::TransactionId)
                .string_len(64)
                .not_null(),
        )
        .col(
            ColumnDef::new(listings::Column::BlockHeight)
                .big_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(listings::Column::EventIndex)
                .integer()
                .not_null(),
        )
        .col(ColumnDef::new(listings::Column::Seller).string().not_null())
        .col(ColumnDef::new(listings::Column::NftId).big_integer().not_null())
        .col(ColumnDef::new(listings::Column::NftType).string().not_null())
        .col(
            ColumnDef::new(listings::Column::NftResourceUuid)
                .string()
                .not_null(),
        )
        .col(
            ColumnDef::new(listings::Column::PaymentToken)
                .string()
                .not_null(),
        )
        .col(
            ColumnDef::new(listings::Column::ListingStartTime)
                .double()
                .not_null(),
        )
        .col(
            ColumnDef::new(listings::Column::ListingEndTime)
                .double()
                .null(),
        )
        .col(
            ColumnDef::new(listings::Column::CreatedAt)
                .timestamp_with_time_zone()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .to_owned();
    create_table(db, backend, listings_table).await?;

    for (name, column) in [
        ("idx_listings_transaction_id", listings::Column::TransactionId),
        ("idx_listings_seller", listings::Column::Seller),
        ("idx_listings_nft_type", listings::Column::NftType),
    ] {
        let index = Index::create()
            .if_not_exists()
            .name(name)
            .table(listings::Entity)
            .col(column)
            .to_owned();
        create_index(db, backend, index).await?;
    }

    Ok(())
}

async fn create_table(
    db: &DatabaseConnection,
    backend: DatabaseBackend,
    mut statement: TableCreateStatement,
) -> StorageResult<()> {
    statement.if_not_exists();
    db.execute(backend.build(&statement))
        .await
        .map_err(StorageError::from_source)?;
    Ok(())
}

async fn create_index(
    db: &DatabaseConnection,
    backend: DatabaseBackend,
    statement: IndexCreateStatement,
) -> StorageResult<()> {
    db.execute(backend.build(&statement))
        .await
        .map_err(StorageError::from_source)?;
    Ok(())
}

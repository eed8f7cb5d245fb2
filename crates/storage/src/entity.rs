pub mod block_scans {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "block_scans")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub network: String,
        #[sea_orm(primary_key, auto_increment = false)]
        pub event_type: String,
        pub height: i64,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod listings {
    use sea_orm::entity::prelude::*;
    use sea_orm::sea_query::Expr;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "listings")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub listing_id: i64,
        pub listing_type: i16,
        pub transaction_id: String,
        pub block_height: i64,
        pub event_index: i32,
        pub seller: String,
        pub nft_id: i64,
        pub nft_type: String,
        pub nft_resource_uuid: String,
        pub payment_token: String,
        pub listing_start_time: f64,
        pub listing_end_time: Option<f64>,
        #[sea_orm(default_expr = "Expr::current_timestamp()")]
        pub created_at: DateTimeUtc,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod transfer_intents {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "transfer_intents")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        pub chain: String,
        pub deposit_address: String,
        pub asset: String,
        pub policy_kind: String,
        pub policy_amount: Option<String>,
        pub state: String,
        pub deposit_tx_hash: Option<String>,
        pub deposit_log_index: Option<i64>,
        pub deposit_block_height: Option<i64>,
        pub deposit_block_hash: Option<String>,
        pub deposit_amount: Option<String>,
        pub settlement_reference: Option<String>,
        pub settlement_attempts: i32,
        pub settlement_next_attempt_at: Option<DateTimeUtc>,
        pub settlement_last_error: Option<String>,
        pub revert_count: i32,
        pub created_at: DateTimeUtc,
        pub updated_at: DateTimeUtc,
        pub expires_at: Option<DateTimeUtc>,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod chain_events {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "chain_events")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub chain: String,
        pub block_height: i64,
        pub block_hash: String,
        pub parent_hash: String,
        pub tx_hash: String,
        pub log_index: i64,
        pub intent_id: String,
        pub asset: String,
        pub amount: String,
        pub match_kind: String,
        pub payload_ref: String,
        pub active: bool,
        pub observed_at: DateTimeUtc,
        pub invalidated_at: Option<DateTimeUtc>,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod chain_cursors {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "chain_cursors")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub chain: String,
        pub next_height: i64,
        /// JSON array of `{height, hash}` entries, ascending.
        pub recent_blocks: String,
        pub updated_at: DateTimeUtc,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

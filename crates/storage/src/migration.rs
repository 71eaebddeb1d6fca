use sea_orm::sea_query::{ColumnDef, Index, IndexCreateStatement, Table, TableCreateStatement};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection};

use crate::entity::{chain_cursors, chain_events, transfer_intents};
use crate::errors::StorageError;
use xfer_bridge_domain::storage::StorageResult;

pub async fn run_migrations(db: &DatabaseConnection) -> StorageResult<()> {
    let backend = db.get_database_backend();

    let intents_table = Table::create()
        .table(transfer_intents::Entity)
        .col(
            ColumnDef::new(transfer_intents::Column::Id)
                .string_len(64)
                .not_null()
                .primary_key(),
        )
        .col(
            ColumnDef::new(transfer_intents::Column::Chain)
                .string_len(32)
                .not_null(),
        )
        .col(
            ColumnDef::new(transfer_intents::Column::DepositAddress)
                .string_len(42)
                .not_null(),
        )
        .col(
            ColumnDef::new(transfer_intents::Column::Asset)
                .string_len(16)
                .not_null(),
        )
        .col(
            ColumnDef::new(transfer_intents::Column::PolicyKind)
                .string_len(16)
                .not_null(),
        )
        .col(ColumnDef::new(transfer_intents::Column::PolicyAmount).string_len(40).null())
        .col(
            ColumnDef::new(transfer_intents::Column::State)
                .string_len(24)
                .not_null(),
        )
        .col(ColumnDef::new(transfer_intents::Column::DepositTxHash).string_len(66).null())
        .col(ColumnDef::new(transfer_intents::Column::DepositLogIndex).big_integer().null())
        .col(ColumnDef::new(transfer_intents::Column::DepositBlockHeight).big_integer().null())
        .col(ColumnDef::new(transfer_intents::Column::DepositBlockHash).string_len(66).null())
        .col(ColumnDef::new(transfer_intents::Column::DepositAmount).string_len(40).null())
        .col(ColumnDef::new(transfer_intents::Column::SettlementReference).string_len(64).null())
        .col(
            ColumnDef::new(transfer_intents::Column::SettlementAttempts)
                .integer()
                .not_null()
                .default(0),
        )
        .col(
            ColumnDef::new(transfer_intents::Column::SettlementNextAttemptAt)
                .date_time()
                .null(),
        )
        .col(ColumnDef::new(transfer_intents::Column::SettlementLastError).text().null())
        .col(
            ColumnDef::new(transfer_intents::Column::RevertCount)
                .integer()
                .not_null()
                .default(0),
        )
        .col(
            ColumnDef::new(transfer_intents::Column::CreatedAt)
                .date_time()
                .not_null(),
        )
        .col(
            ColumnDef::new(transfer_intents::Column::UpdatedAt)
                .date_time()
                .not_null(),
        )
        .col(ColumnDef::new(transfer_intents::Column::ExpiresAt).date_time().null())
        .to_owned();
    create_table(db, backend, intents_table).await?;

    create_index(
        db,
        backend,
        Index::create()
            .name("idx_transfer_intents_watch")
            .table(transfer_intents::Entity)
            .col(transfer_intents::Column::Chain)
            .col(transfer_intents::Column::DepositAddress)
            .to_owned(),
    )
    .await?;
    create_index(
        db,
        backend,
        Index::create()
            .name("idx_transfer_intents_state")
            .table(transfer_intents::Entity)
            .col(transfer_intents::Column::Chain)
            .col(transfer_intents::Column::State)
            .to_owned(),
    )
    .await?;

    let events_table = Table::create()
        .table(chain_events::Entity)
        .col(
            ColumnDef::new(chain_events::Column::Id)
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(ColumnDef::new(chain_events::Column::Chain).string_len(32).not_null())
        .col(ColumnDef::new(chain_events::Column::BlockHeight).big_integer().not_null())
        .col(ColumnDef::new(chain_events::Column::BlockHash).string_len(66).not_null())
        .col(ColumnDef::new(chain_events::Column::ParentHash).string_len(66).not_null())
        .col(ColumnDef::new(chain_events::Column::TxHash).string_len(66).not_null())
        .col(ColumnDef::new(chain_events::Column::LogIndex).big_integer().not_null())
        .col(ColumnDef::new(chain_events::Column::IntentId).string_len(64).not_null())
        .col(ColumnDef::new(chain_events::Column::Asset).string_len(16).not_null())
        .col(ColumnDef::new(chain_events::Column::Amount).string_len(40).not_null())
        .col(ColumnDef::new(chain_events::Column::MatchKind).string_len(16).not_null())
        .col(ColumnDef::new(chain_events::Column::PayloadRef).string_len(64).not_null())
        .col(
            ColumnDef::new(chain_events::Column::Active)
                .boolean()
                .not_null()
                .default(true),
        )
        .col(ColumnDef::new(chain_events::Column::ObservedAt).date_time().not_null())
        .col(ColumnDef::new(chain_events::Column::InvalidatedAt).date_time().null())
        .to_owned();
    create_table(db, backend, events_table).await?;

    create_index(
        db,
        backend,
        Index::create()
            .name("idx_chain_events_height")
            .table(chain_events::Entity)
            .col(chain_events::Column::Chain)
            .col(chain_events::Column::BlockHeight)
            .to_owned(),
    )
    .await?;
    create_index(
        db,
        backend,
        Index::create()
            .name("idx_chain_events_tx")
            .table(chain_events::Entity)
            .col(chain_events::Column::Chain)
            .col(chain_events::Column::TxHash)
            .col(chain_events::Column::LogIndex)
            .to_owned(),
    )
    .await?;
    create_index(
        db,
        backend,
        Index::create()
            .name("idx_chain_events_intent")
            .table(chain_events::Entity)
            .col(chain_events::Column::IntentId)
            .to_owned(),
    )
    .await?;

    let cursors_table = Table::create()
        .table(chain_cursors::Entity)
        .col(
            ColumnDef::new(chain_cursors::Column::Chain)
                .string_len(32)
                .not_null()
                .primary_key(),
        )
        .col(ColumnDef::new(chain_cursors::Column::NextHeight).big_integer().not_null())
        .col(ColumnDef::new(chain_cursors::Column::RecentBlocks).text().not_null())
        .col(ColumnDef::new(chain_cursors::Column::UpdatedAt).date_time().not_null())
        .to_owned();
    create_table(db, backend, cursors_table).await?;

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
    mut statement: IndexCreateStatement,
) -> StorageResult<()> {
    statement.if_not_exists();
    db.execute(backend.build(&statement))
        .await
        .map_err(StorageError::from_source)?;
    Ok(())
}

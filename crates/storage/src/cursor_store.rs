use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, TransactionTrait};
use xfer_bridge_domain::model::{ChainId, Cursor};
use xfer_bridge_domain::storage::{BlockCommit, ChainRollback, CursorStore, StorageResult};

use crate::convert::{cursor_active_model, cursor_from_model, new_event_active_model};
use crate::entity::{chain_cursors, chain_events};
use crate::errors::StorageError;
use crate::intent_store::apply_intent_update;
use crate::SeaOrmStorage;

#[async_trait::async_trait]
impl CursorStore for SeaOrmStorage {
    async fn load_cursor(&self, chain: &ChainId, capacity: usize) -> StorageResult<Option<Cursor>> {
        let maybe = chain_cursors::Entity::find_by_id(chain.as_str().to_owned())
            .one(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        maybe
            .map(|model| cursor_from_model(model, capacity))
            .transpose()
    }

    async fn commit_block(&self, commit: BlockCommit) -> StorageResult<usize> {
        let chain = commit.cursor.chain().clone();
        let txn = self
            .connection()
            .begin()
            .await
            .map_err(StorageError::from_source)?;

        if let Some(stored) = stored_next_height(&txn, &chain).await? {
            if commit.cursor.next_height() <= stored {
                return Err(StorageError::Conflict(format!(
                    "cursor for {chain} is already at {stored}, refusing to move to {}",
                    commit.cursor.next_height()
                )));
            }
        }

        let mut inserted = 0;
        for event in &commit.events {
            let duplicate = chain_events::Entity::find()
                .filter(chain_events::Column::Chain.eq(event.chain.as_str()))
                .filter(chain_events::Column::TxHash.eq(event.tx_hash.as_str()))
                .filter(chain_events::Column::LogIndex.eq(i64::from(event.log_index)))
                .filter(chain_events::Column::Active.eq(true))
                .one(&txn)
                .await
                .map_err(StorageError::from_source)?;
            if duplicate.is_some() {
                continue;
            }
            chain_events::Entity::insert(new_event_active_model(event))
                .exec_without_returning(&txn)
                .await
                .map_err(StorageError::from_source)?;
            inserted += 1;
        }

        for update in &commit.intents {
            apply_intent_update(&txn, update).await?;
        }
        write_cursor(&txn, &commit.cursor).await?;

        txn.commit().await.map_err(StorageError::from_source)?;
        Ok(inserted)
    }

    async fn rollback(&self, rollback: ChainRollback) -> StorageResult<usize> {
        let chain = rollback.cursor.chain().clone();
        let txn = self
            .connection()
            .begin()
            .await
            .map_err(StorageError::from_source)?;

        if let Some(stored) = stored_next_height(&txn, &chain).await? {
            if rollback.cursor.next_height() > stored {
                return Err(StorageError::Conflict(format!(
                    "rollback for {chain} would move the cursor forward from {stored}"
                )));
            }
        }

        let result = chain_events::Entity::update_many()
            .col_expr(chain_events::Column::Active, Expr::value(false))
            .col_expr(chain_events::Column::InvalidatedAt, Expr::value(Utc::now()))
            .filter(chain_events::Column::Chain.eq(chain.as_str()))
            .filter(chain_events::Column::BlockHeight.gte(rollback.invalidate_from as i64))
            .filter(chain_events::Column::Active.eq(true))
            .exec(&txn)
            .await
            .map_err(StorageError::from_source)?;

        for update in &rollback.intents {
            apply_intent_update(&txn, update).await?;
        }
        write_cursor(&txn, &rollback.cursor).await?;

        txn.commit().await.map_err(StorageError::from_source)?;
        Ok(result.rows_affected as usize)
    }
}

async fn stored_next_height<C: ConnectionTrait>(
    conn: &C,
    chain: &ChainId,
) -> StorageResult<Option<u64>> {
    let maybe = chain_cursors::Entity::find_by_id(chain.as_str().to_owned())
        .one(conn)
        .await
        .map_err(StorageError::from_source)?;
    Ok(maybe.map(|model| model.next_height.max(0) as u64))
}

async fn write_cursor<C: ConnectionTrait>(conn: &C, cursor: &Cursor) -> StorageResult<()> {
    chain_cursors::Entity::insert(cursor_active_model(cursor, Utc::now())?)
        .on_conflict(
            OnConflict::column(chain_cursors::Column::Chain)
                .update_columns([
                    chain_cursors::Column::NextHeight,
                    chain_cursors::Column::RecentBlocks,
                    chain_cursors::Column::UpdatedAt,
                ])
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await
        .map_err(StorageError::from_source)?;
    Ok(())
}

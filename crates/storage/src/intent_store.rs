use chrono::Utc;
use sea_orm::{
    ActiveValue::NotSet, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    TransactionTrait,
};
use xfer_bridge_domain::model::{ChainId, IntentId, IntentState, NewTransferIntent, TransferIntent};
use xfer_bridge_domain::storage::{IntentUpdate, StorageResult, WatchRegistry};

use crate::convert::{intent_active_model, intent_from_model};
use crate::entity::transfer_intents;
use crate::errors::StorageError;
use crate::SeaOrmStorage;

fn open_state_names() -> Vec<&'static str> {
    IntentState::OPEN.iter().map(|state| state.as_ref()).collect()
}

#[async_trait::async_trait]
impl WatchRegistry for SeaOrmStorage {
    async fn register_watch(&self, request: NewTransferIntent) -> StorageResult<TransferIntent> {
        let txn = self
            .connection()
            .begin()
            .await
            .map_err(StorageError::from_source)?;

        let existing = transfer_intents::Entity::find_by_id(request.id.as_str().to_owned())
            .one(&txn)
            .await
            .map_err(StorageError::from_source)?;
        if let Some(existing) = existing {
            let existing = intent_from_model(existing)?;
            if existing.same_watch(&request) {
                return Ok(existing);
            }
            return Err(StorageError::Conflict(format!(
                "intent `{}` is already registered with different parameters",
                request.id
            )));
        }

        let watcher = transfer_intents::Entity::find()
            .filter(transfer_intents::Column::Chain.eq(request.chain.as_str()))
            .filter(transfer_intents::Column::DepositAddress.eq(request.deposit_address.as_str()))
            .filter(transfer_intents::Column::State.is_in(open_state_names()))
            .one(&txn)
            .await
            .map_err(StorageError::from_source)?;
        if let Some(watcher) = watcher {
            return Err(StorageError::Conflict(format!(
                "address {} on {} is already watched by intent `{}`",
                request.deposit_address, request.chain, watcher.id
            )));
        }

        let intent = request.into_intent(Utc::now());
        transfer_intents::Entity::insert(intent_active_model(&intent))
            .exec_without_returning(&txn)
            .await
            .map_err(StorageError::from_source)?;
        txn.commit().await.map_err(StorageError::from_source)?;
        Ok(intent)
    }

    async fn find_intent(&self, id: &IntentId) -> StorageResult<Option<TransferIntent>> {
        let maybe = transfer_intents::Entity::find_by_id(id.as_str().to_owned())
            .one(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        maybe.map(intent_from_model).transpose()
    }

    async fn open_watches(&self, chain: &ChainId) -> StorageResult<Vec<TransferIntent>> {
        transfer_intents::Entity::find()
            .filter(transfer_intents::Column::Chain.eq(chain.as_str()))
            .filter(transfer_intents::Column::State.is_in(open_state_names()))
            .order_by_asc(transfer_intents::Column::CreatedAt)
            .all(self.connection())
            .await
            .map_err(StorageError::from_source)?
            .into_iter()
            .map(intent_from_model)
            .collect()
    }

    async fn intents_in_state(
        &self,
        chain: &ChainId,
        state: IntentState,
    ) -> StorageResult<Vec<TransferIntent>> {
        transfer_intents::Entity::find()
            .filter(transfer_intents::Column::Chain.eq(chain.as_str()))
            .filter(transfer_intents::Column::State.eq(state.as_ref()))
            .order_by_asc(transfer_intents::Column::UpdatedAt)
            .all(self.connection())
            .await
            .map_err(StorageError::from_source)?
            .into_iter()
            .map(intent_from_model)
            .collect()
    }

    async fn intents_backed_from(
        &self,
        chain: &ChainId,
        height: u64,
    ) -> StorageResult<Vec<TransferIntent>> {
        transfer_intents::Entity::find()
            .filter(transfer_intents::Column::Chain.eq(chain.as_str()))
            .filter(transfer_intents::Column::DepositBlockHeight.gte(height as i64))
            .order_by_asc(transfer_intents::Column::DepositBlockHeight)
            .all(self.connection())
            .await
            .map_err(StorageError::from_source)?
            .into_iter()
            .map(intent_from_model)
            .collect()
    }

    async fn save_intent(&self, update: IntentUpdate) -> StorageResult<()> {
        apply_intent_update(self.connection(), &update).await
    }
}

/// Compare-and-set write: succeeds only while the stored row is still in
/// `update.expected`.
pub(crate) async fn apply_intent_update<C: ConnectionTrait>(
    conn: &C,
    update: &IntentUpdate,
) -> StorageResult<()> {
    if update.intent.state == IntentState::Reverted {
        return Err(StorageError::Database(format!(
            "intent `{}` cannot be persisted in transient state `reverted`",
            update.intent.id
        )));
    }

    let mut model = intent_active_model(&update.intent);
    model.id = NotSet;
    model.created_at = NotSet;
    let result = transfer_intents::Entity::update_many()
        .set(model)
        .filter(transfer_intents::Column::Id.eq(update.intent.id.as_str()))
        .filter(transfer_intents::Column::State.eq(update.expected.as_ref()))
        .exec(conn)
        .await
        .map_err(StorageError::from_source)?;

    if result.rows_affected == 0 {
        return Err(StorageError::Conflict(format!(
            "intent `{}` is no longer in state `{}`",
            update.intent.id, update.expected
        )));
    }
    Ok(())
}

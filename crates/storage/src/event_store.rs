use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use xfer_bridge_domain::model::{ChainEvent, IntentId};
use xfer_bridge_domain::storage::{ChainEventStore, StorageResult};

use crate::convert::event_from_model;
use crate::entity::chain_events;
use crate::errors::StorageError;
use crate::SeaOrmStorage;

#[async_trait::async_trait]
impl ChainEventStore for SeaOrmStorage {
    async fn events_for_intent(
        &self,
        id: &IntentId,
        include_inactive: bool,
    ) -> StorageResult<Vec<ChainEvent>> {
        let mut query =
            chain_events::Entity::find().filter(chain_events::Column::IntentId.eq(id.as_str()));
        if !include_inactive {
            query = query.filter(chain_events::Column::Active.eq(true));
        }
        query
            .order_by_asc(chain_events::Column::BlockHeight)
            .order_by_asc(chain_events::Column::Id)
            .all(self.connection())
            .await
            .map_err(StorageError::from_source)?
            .into_iter()
            .map(event_from_model)
            .collect()
    }
}

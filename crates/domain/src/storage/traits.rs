use async_trait::async_trait;
use thiserror::Error;

use crate::model::{
    ChainEvent, ChainId, Cursor, IntentId, IntentState, NewChainEvent, NewTransferIntent,
    TransferIntent,
};

/// Common result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    /// A compare-and-set guard failed or a uniqueness rule was violated.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl StorageError {
    pub fn from_source(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// An intent snapshot to persist, guarded by the state it was read in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentUpdate {
    pub intent: TransferIntent,
    pub expected: IntentState,
}

/// Everything derived from one block. Applied together with the cursor
/// advance or not at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockCommit {
    pub cursor: Cursor,
    pub events: Vec<NewChainEvent>,
    pub intents: Vec<IntentUpdate>,
}

/// Reorg rollback: events at or above `invalidate_from` become inactive, the
/// listed intents are reverted and the cursor moves back, atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainRollback {
    pub cursor: Cursor,
    pub invalidate_from: u64,
    pub intents: Vec<IntentUpdate>,
}

/// Durable mapping from (chain, deposit address) to the open transfer intent
/// watching it.
#[async_trait]
pub trait WatchRegistry: Send + Sync {
    /// Registers an intent. Re-registering an identical watch returns the
    /// stored record; any other reuse of the id or of an open address is a
    /// conflict.
    async fn register_watch(&self, intent: NewTransferIntent) -> StorageResult<TransferIntent>;
    async fn find_intent(&self, id: &IntentId) -> StorageResult<Option<TransferIntent>>;
    /// Intents whose address is still watched on `chain`.
    async fn open_watches(&self, chain: &ChainId) -> StorageResult<Vec<TransferIntent>>;
    async fn intents_in_state(
        &self,
        chain: &ChainId,
        state: IntentState,
    ) -> StorageResult<Vec<TransferIntent>>;
    /// Intents in any state whose matched deposit sits at or above `height`.
    async fn intents_backed_from(
        &self,
        chain: &ChainId,
        height: u64,
    ) -> StorageResult<Vec<TransferIntent>>;
    /// Compare-and-set write of a single intent outside a block commit.
    async fn save_intent(&self, update: IntentUpdate) -> StorageResult<()>;
}

#[async_trait]
pub trait ChainEventStore: Send + Sync {
    async fn events_for_intent(
        &self,
        id: &IntentId,
        include_inactive: bool,
    ) -> StorageResult<Vec<ChainEvent>>;
}

#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load_cursor(&self, chain: &ChainId, capacity: usize) -> StorageResult<Option<Cursor>>;
    /// Returns the number of newly inserted events; replays of an already
    /// recorded event are skipped.
    async fn commit_block(&self, commit: BlockCommit) -> StorageResult<usize>;
    /// Returns the number of events marked inactive.
    async fn rollback(&self, rollback: ChainRollback) -> StorageResult<usize>;
}

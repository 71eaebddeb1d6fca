use chrono::{DateTime, Utc};

use super::{Address, Amount, Asset, BlockHash, ChainId, IntentId, MatchKind, TxHash};

/// Log index reserved for value carried by the transaction itself rather
/// than by an emitted log.
pub const NATIVE_TRANSFER_INDEX: u32 = u32::MAX;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRef {
    pub height: u64,
    pub hash: BlockHash,
}

/// A block as returned by the chain client, already narrowed to the
/// transfers that touch a watched address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub height: u64,
    pub hash: BlockHash,
    pub parent_hash: BlockHash,
    pub transfers: Vec<ObservedTransfer>,
}

impl Block {
    pub fn block_ref(&self) -> BlockRef {
        BlockRef {
            height: self.height,
            hash: self.hash.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedTransfer {
    pub tx_hash: TxHash,
    pub log_index: u32,
    pub from: Option<Address>,
    pub to: Address,
    pub asset: Asset,
    pub amount: Amount,
    pub payload_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChainEvent {
    pub chain: ChainId,
    pub block_height: u64,
    pub block_hash: BlockHash,
    pub parent_hash: BlockHash,
    pub tx_hash: TxHash,
    pub log_index: u32,
    pub intent_id: IntentId,
    pub asset: Asset,
    pub amount: Amount,
    pub match_kind: MatchKind,
    pub payload_ref: String,
    pub observed_at: DateTime<Utc>,
}

/// A recorded chain event. Never overwritten: a reorg only flips `active`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEvent {
    pub id: i64,
    pub chain: ChainId,
    pub block_height: u64,
    pub block_hash: BlockHash,
    pub parent_hash: BlockHash,
    pub tx_hash: TxHash,
    pub log_index: u32,
    pub intent_id: IntentId,
    pub asset: Asset,
    pub amount: Amount,
    pub match_kind: MatchKind,
    pub payload_ref: String,
    pub active: bool,
    pub observed_at: DateTime<Utc>,
    pub invalidated_at: Option<DateTime<Utc>>,
}

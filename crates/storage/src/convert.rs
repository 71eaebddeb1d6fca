//! Row <-> domain conversions. Numbers that exceed `i64` (amounts) are stored
//! as decimal strings.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue::NotSet, Set};
use serde::{Deserialize, Serialize};
use xfer_bridge_domain::model::{
    Address, Amount, AmountPolicy, Asset, BlockHash, BlockRef, ChainEvent, ChainId, Cursor,
    IntentId, IntentState, MatchKind, MatchedDeposit, NewChainEvent, SettlementProgress,
    TransferIntent, TxHash,
};
use xfer_bridge_domain::storage::StorageResult;

use crate::entity::{chain_cursors, chain_events, transfer_intents};
use crate::errors::corrupt;

#[derive(Debug, Serialize, Deserialize)]
struct StoredBlockRef {
    height: u64,
    hash: String,
}

pub(crate) fn intent_from_model(model: transfer_intents::Model) -> StorageResult<TransferIntent> {
    let policy_amount = model
        .policy_amount
        .as_deref()
        .map(str::parse::<Amount>)
        .transpose()
        .map_err(|err| corrupt("policy_amount", err))?;
    let policy = AmountPolicy::from_parts(&model.policy_kind, policy_amount)
        .map_err(|err| corrupt("policy_kind", err))?;

    let deposit = match (
        model.deposit_tx_hash,
        model.deposit_log_index,
        model.deposit_block_height,
        model.deposit_block_hash,
        model.deposit_amount,
    ) {
        (Some(tx_hash), Some(log_index), Some(height), Some(block_hash), Some(amount)) => {
            Some(MatchedDeposit {
                tx_hash: TxHash::parse(&tx_hash).map_err(|err| corrupt("deposit_tx_hash", err))?,
                log_index: u32::try_from(log_index)
                    .map_err(|err| corrupt("deposit_log_index", err))?,
                block_height: u64::try_from(height)
                    .map_err(|err| corrupt("deposit_block_height", err))?,
                block_hash: BlockHash::parse(&block_hash)
                    .map_err(|err| corrupt("deposit_block_hash", err))?,
                amount: amount.parse().map_err(|err| corrupt("deposit_amount", err))?,
            })
        }
        _ => None,
    };

    Ok(TransferIntent {
        id: IntentId::parse(&model.id).map_err(|err| corrupt("id", err))?,
        chain: ChainId::parse(&model.chain).map_err(|err| corrupt("chain", err))?,
        deposit_address: Address::parse(&model.deposit_address)
            .map_err(|err| corrupt("deposit_address", err))?,
        asset: Asset::parse(&model.asset).map_err(|err| corrupt("asset", err))?,
        policy,
        state: model
            .state
            .parse::<IntentState>()
            .map_err(|err| corrupt("state", err))?,
        deposit,
        settlement: SettlementProgress {
            reference: model.settlement_reference,
            attempts: u32::try_from(model.settlement_attempts).unwrap_or_default(),
            next_attempt_at: model.settlement_next_attempt_at,
            last_error: model.settlement_last_error,
        },
        revert_count: u32::try_from(model.revert_count).unwrap_or_default(),
        created_at: model.created_at,
        updated_at: model.updated_at,
        expires_at: model.expires_at,
    })
}

pub(crate) fn intent_active_model(intent: &TransferIntent) -> transfer_intents::ActiveModel {
    let deposit = intent.deposit.as_ref();
    transfer_intents::ActiveModel {
        id: Set(intent.id.as_str().to_owned()),
        chain: Set(intent.chain.as_str().to_owned()),
        deposit_address: Set(intent.deposit_address.as_str().to_owned()),
        asset: Set(intent.asset.as_str().to_owned()),
        policy_kind: Set(intent.policy.kind().to_owned()),
        policy_amount: Set(intent.policy.amount().map(|amount| amount.to_string())),
        state: Set(intent.state.as_ref().to_owned()),
        deposit_tx_hash: Set(deposit.map(|d| d.tx_hash.as_str().to_owned())),
        deposit_log_index: Set(deposit.map(|d| i64::from(d.log_index))),
        deposit_block_height: Set(deposit.map(|d| d.block_height as i64)),
        deposit_block_hash: Set(deposit.map(|d| d.block_hash.as_str().to_owned())),
        deposit_amount: Set(deposit.map(|d| d.amount.to_string())),
        settlement_reference: Set(intent.settlement.reference.clone()),
        settlement_attempts: Set(i32::try_from(intent.settlement.attempts).unwrap_or(i32::MAX)),
        settlement_next_attempt_at: Set(intent.settlement.next_attempt_at),
        settlement_last_error: Set(intent.settlement.last_error.clone()),
        revert_count: Set(i32::try_from(intent.revert_count).unwrap_or(i32::MAX)),
        created_at: Set(intent.created_at),
        updated_at: Set(intent.updated_at),
        expires_at: Set(intent.expires_at),
    }
}

pub(crate) fn event_from_model(model: chain_events::Model) -> StorageResult<ChainEvent> {
    Ok(ChainEvent {
        id: model.id,
        chain: ChainId::parse(&model.chain).map_err(|err| corrupt("chain", err))?,
        block_height: u64::try_from(model.block_height)
            .map_err(|err| corrupt("block_height", err))?,
        block_hash: BlockHash::parse(&model.block_hash).map_err(|err| corrupt("block_hash", err))?,
        parent_hash: BlockHash::parse(&model.parent_hash)
            .map_err(|err| corrupt("parent_hash", err))?,
        tx_hash: TxHash::parse(&model.tx_hash).map_err(|err| corrupt("tx_hash", err))?,
        log_index: u32::try_from(model.log_index).map_err(|err| corrupt("log_index", err))?,
        intent_id: IntentId::parse(&model.intent_id).map_err(|err| corrupt("intent_id", err))?,
        asset: Asset::parse(&model.asset).map_err(|err| corrupt("asset", err))?,
        amount: model.amount.parse().map_err(|err| corrupt("amount", err))?,
        match_kind: model
            .match_kind
            .parse::<MatchKind>()
            .map_err(|err| corrupt("match_kind", err))?,
        payload_ref: model.payload_ref,
        active: model.active,
        observed_at: model.observed_at,
        invalidated_at: model.invalidated_at,
    })
}

pub(crate) fn new_event_active_model(event: &NewChainEvent) -> chain_events::ActiveModel {
    chain_events::ActiveModel {
        id: NotSet,
        chain: Set(event.chain.as_str().to_owned()),
        block_height: Set(event.block_height as i64),
        block_hash: Set(event.block_hash.as_str().to_owned()),
        parent_hash: Set(event.parent_hash.as_str().to_owned()),
        tx_hash: Set(event.tx_hash.as_str().to_owned()),
        log_index: Set(i64::from(event.log_index)),
        intent_id: Set(event.intent_id.as_str().to_owned()),
        asset: Set(event.asset.as_str().to_owned()),
        amount: Set(event.amount.to_string()),
        match_kind: Set(event.match_kind.as_ref().to_owned()),
        payload_ref: Set(event.payload_ref.clone()),
        active: Set(true),
        observed_at: Set(event.observed_at),
        invalidated_at: Set(None),
    }
}

pub(crate) fn cursor_from_model(
    model: chain_cursors::Model,
    capacity: usize,
) -> StorageResult<Cursor> {
    let chain = ChainId::parse(&model.chain).map_err(|err| corrupt("chain", err))?;
    let next_height =
        u64::try_from(model.next_height).map_err(|err| corrupt("next_height", err))?;
    let stored: Vec<StoredBlockRef> =
        serde_json::from_str(&model.recent_blocks).map_err(|err| corrupt("recent_blocks", err))?;
    let recent = stored
        .into_iter()
        .map(|entry| {
            Ok(BlockRef {
                height: entry.height,
                hash: BlockHash::parse(&entry.hash).map_err(|err| corrupt("recent_blocks", err))?,
            })
        })
        .collect::<StorageResult<Vec<_>>>()?;
    Ok(Cursor::restore(chain, next_height, recent, capacity))
}

pub(crate) fn cursor_active_model(
    cursor: &Cursor,
    now: DateTime<Utc>,
) -> StorageResult<chain_cursors::ActiveModel> {
    let recent: Vec<StoredBlockRef> = cursor
        .recent()
        .map(|entry| StoredBlockRef {
            height: entry.height,
            hash: entry.hash.as_str().to_owned(),
        })
        .collect();
    let recent_blocks =
        serde_json::to_string(&recent).map_err(|err| corrupt("recent_blocks", err))?;
    Ok(chain_cursors::ActiveModel {
        chain: Set(cursor.chain().as_str().to_owned()),
        next_height: Set(cursor.next_height() as i64),
        recent_blocks: Set(recent_blocks),
        updated_at: Set(now),
    })
}

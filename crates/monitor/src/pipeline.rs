use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::warn;
use xfer_bridge_domain::config::ChainConfig;
use xfer_bridge_domain::model::{
    Address, Amount, Block, ChainEvent, Cursor, IntentId, IntentState, MatchKind, MatchedDeposit,
    NewChainEvent, StateChange, TransferIntent,
};
use xfer_bridge_domain::services::METRIC_EVENTS_MATCHED;
use xfer_bridge_domain::storage::{BlockCommit, IntentUpdate};

use crate::worker::MonitorError;

/// Open intents of one chain, keyed by the address they watch, plus the
/// running total of underpaid deposits used when aggregation is enabled.
#[derive(Debug, Default, Clone)]
pub struct WatchSet {
    by_address: HashMap<Address, TransferIntent>,
    partial: HashMap<IntentId, Amount>,
}

impl WatchSet {
    pub fn new(intents: impl IntoIterator<Item = TransferIntent>) -> Self {
        Self {
            by_address: intents
                .into_iter()
                .map(|intent| (intent.deposit_address.clone(), intent))
                .collect(),
            partial: HashMap::new(),
        }
    }

    /// Seeds the aggregate of an awaiting intent from its active events.
    pub fn seed_partial(&mut self, intent: &IntentId, events: &[ChainEvent]) {
        let total = events
            .iter()
            .filter(|event| event.active && event.match_kind == MatchKind::Underpaid)
            .fold(Amount::ZERO, |sum, event| sum.saturating_add(event.amount));
        if total > Amount::ZERO {
            self.partial.insert(intent.clone(), total);
        }
    }

    pub fn addresses(&self) -> HashSet<Address> {
        self.by_address.keys().cloned().collect()
    }

    pub fn awaiting(&self) -> impl Iterator<Item = &TransferIntent> {
        self.by_address
            .values()
            .filter(|intent| intent.state == IntentState::AwaitingDeposit)
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }
}

/// Everything one block produces, ready for a single atomic commit.
#[derive(Debug, Clone)]
pub struct BlockPlan {
    pub commit: BlockCommit,
    pub changes: Vec<StateChange>,
    pub alerts: Vec<String>,
}

/// Matches the transfers of `block` against `watches` and advances `cursor`
/// over it. `watches` is updated in place so the next block sees the new
/// intent states.
pub fn plan_block(
    config: &ChainConfig,
    cursor: &Cursor,
    block: &Block,
    watches: &mut WatchSet,
    now: DateTime<Utc>,
) -> Result<BlockPlan, MonitorError> {
    let mut next_cursor = cursor.clone();
    next_cursor.advance(block.block_ref())?;

    let mut events = Vec::new();
    let mut before: Vec<(IntentId, IntentState)> = Vec::new();
    let mut changes = Vec::new();
    let mut alerts = Vec::new();

    for transfer in &block.transfers {
        let Some(intent) = watches.by_address.get_mut(&transfer.to) else {
            continue;
        };

        let match_kind = if transfer.asset != intent.asset {
            MatchKind::AssetMismatch
        } else {
            intent
                .policy
                .evaluate(transfer.amount, config.amount_tolerance)
        };
        counter!(METRIC_EVENTS_MATCHED, "chain" => config.chain.to_string(), "kind" => match_kind.to_string())
            .increment(1);

        events.push(NewChainEvent {
            chain: config.chain.clone(),
            block_height: block.height,
            block_hash: block.hash.clone(),
            parent_hash: block.parent_hash.clone(),
            tx_hash: transfer.tx_hash.clone(),
            log_index: transfer.log_index,
            intent_id: intent.id.clone(),
            asset: transfer.asset.clone(),
            amount: transfer.amount,
            match_kind,
            payload_ref: transfer.payload_ref.clone(),
            observed_at: now,
        });
        if !before.iter().any(|(id, _)| id == &intent.id) {
            before.push((intent.id.clone(), intent.state));
        }

        if intent.state != IntentState::AwaitingDeposit {
            continue;
        }

        let backing_amount = match match_kind {
            MatchKind::Full => Some(transfer.amount),
            MatchKind::Underpaid if config.aggregate_deposits => {
                let total = watches
                    .partial
                    .get(&intent.id)
                    .copied()
                    .unwrap_or(Amount::ZERO)
                    .saturating_add(transfer.amount);
                match intent.policy.evaluate(total, config.amount_tolerance) {
                    MatchKind::Full => Some(total),
                    MatchKind::Overpaid => {
                        alerts.push(format!(
                            "intent {} was overpaid across several deposits ({total} {})",
                            intent.id, intent.asset
                        ));
                        watches.partial.insert(intent.id.clone(), total);
                        None
                    }
                    _ => {
                        watches.partial.insert(intent.id.clone(), total);
                        None
                    }
                }
            }
            MatchKind::Overpaid | MatchKind::AssetMismatch => {
                warn!(
                    chain = %config.chain,
                    intent_id = %intent.id,
                    tx = %transfer.tx_hash,
                    kind = %match_kind,
                    "deposit does not satisfy intent"
                );
                alerts.push(format!(
                    "intent {} received {} {} in tx {} ({match_kind})",
                    intent.id, transfer.amount, transfer.asset, transfer.tx_hash
                ));
                None
            }
            MatchKind::Underpaid => None,
        };

        if let Some(amount) = backing_amount {
            let deposit = MatchedDeposit {
                tx_hash: transfer.tx_hash.clone(),
                log_index: transfer.log_index,
                block_height: block.height,
                block_hash: block.hash.clone(),
                amount,
            };
            let mut detected = intent.detect(deposit, now)?;
            if let Some(link) = config.explorer_link(transfer.tx_hash.as_str()) {
                if let Some(first) = detected.first_mut() {
                    first.detail = format!("{} ({link})", first.detail);
                }
            }
            changes.extend(detected);
            watches.partial.remove(&intent.id);
        }
    }

    let intents = before
        .into_iter()
        .filter_map(|(id, expected)| {
            let intent = watches
                .by_address
                .values()
                .find(|intent| intent.id == id)?;
            (intent.state != expected).then(|| IntentUpdate {
                intent: intent.clone(),
                expected,
            })
        })
        .collect();

    Ok(BlockPlan {
        commit: BlockCommit {
            cursor: next_cursor,
            events,
            intents,
        },
        changes,
        alerts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use xfer_bridge_domain::model::{
        AmountPolicy, Asset, BlockHash, ChainId, NewTransferIntent, ObservedTransfer, TxHash,
    };

    fn chain_config(aggregate: bool) -> ChainConfig {
        let mut config =
            ChainConfig::with_defaults(ChainId::parse("ethereum").unwrap(), "http://node", 100)
                .unwrap();
        config.aggregate_deposits = aggregate;
        config
    }

    fn address() -> Address {
        Address::parse(&format!("0x{}", "ab".repeat(20))).unwrap()
    }

    fn intent(policy: AmountPolicy) -> TransferIntent {
        NewTransferIntent {
            id: IntentId::parse("intent-1").unwrap(),
            chain: ChainId::parse("ethereum").unwrap(),
            deposit_address: address(),
            asset: Asset::parse("USDC").unwrap(),
            policy,
            expires_at: None,
        }
        .into_intent(Utc::now())
    }

    fn hash(height: u64) -> BlockHash {
        BlockHash::parse(&format!("0x{height:064x}")).unwrap()
    }

    fn block(height: u64, transfers: Vec<ObservedTransfer>) -> Block {
        Block {
            height,
            hash: hash(height),
            parent_hash: hash(height - 1),
            transfers,
        }
    }

    fn transfer(tx: u64, asset: &str, amount: u128) -> ObservedTransfer {
        ObservedTransfer {
            tx_hash: TxHash::parse(&format!("0x{tx:064x}")).unwrap(),
            log_index: tx as u32,
            from: None,
            to: address(),
            asset: Asset::parse(asset).unwrap(),
            amount: Amount::new(amount),
            payload_ref: "00".repeat(32),
        }
    }

    fn exact() -> AmountPolicy {
        AmountPolicy::Exact {
            amount: Amount::new(1_500_000),
        }
    }

    #[test]
    fn exact_deposit_detects_the_intent() {
        let config = chain_config(false);
        let cursor = Cursor::starting_at(config.chain.clone(), 100, 8);
        let mut watches = WatchSet::new([intent(exact())]);

        let plan = plan_block(
            &config,
            &cursor,
            &block(100, vec![transfer(1, "USDC", 1_500_000)]),
            &mut watches,
            Utc::now(),
        )
        .unwrap();

        assert_eq!(plan.commit.cursor.next_height(), 101);
        assert_eq!(plan.commit.events.len(), 1);
        assert_eq!(plan.commit.events[0].match_kind, MatchKind::Full);
        assert_eq!(plan.commit.intents.len(), 1);
        assert_eq!(plan.commit.intents[0].expected, IntentState::AwaitingDeposit);
        assert_eq!(plan.commit.intents[0].intent.state, IntentState::Confirming);
        let states: Vec<_> = plan.changes.iter().map(|c| c.to).collect();
        assert_eq!(states, vec![IntentState::Detected, IntentState::Confirming]);
        assert!(plan.changes[0].detail.contains("etherscan.io"));
    }

    #[test]
    fn partial_and_wrong_asset_are_recorded_only() {
        let config = chain_config(false);
        let cursor = Cursor::starting_at(config.chain.clone(), 100, 8);
        let mut watches = WatchSet::new([intent(exact())]);

        let plan = plan_block(
            &config,
            &cursor,
            &block(
                100,
                vec![transfer(1, "USDC", 500_000), transfer(2, "ETH", 1_500_000)],
            ),
            &mut watches,
            Utc::now(),
        )
        .unwrap();

        let kinds: Vec<_> = plan.commit.events.iter().map(|e| e.match_kind).collect();
        assert_eq!(kinds, vec![MatchKind::Underpaid, MatchKind::AssetMismatch]);
        assert!(plan.commit.intents.is_empty());
        assert!(plan.changes.is_empty());
        assert_eq!(plan.alerts.len(), 1);
    }

    #[test]
    fn aggregation_completes_on_the_last_deposit() {
        let config = chain_config(true);
        let cursor = Cursor::starting_at(config.chain.clone(), 100, 8);
        let mut watches = WatchSet::new([intent(exact())]);

        let first = plan_block(
            &config,
            &cursor,
            &block(100, vec![transfer(1, "USDC", 1_000_000)]),
            &mut watches,
            Utc::now(),
        )
        .unwrap();
        assert!(first.changes.is_empty());

        let second = plan_block(
            &config,
            &first.commit.cursor,
            &block(101, vec![transfer(2, "USDC", 500_000)]),
            &mut watches,
            Utc::now(),
        )
        .unwrap();
        let updated = &second.commit.intents[0].intent;
        assert_eq!(updated.state, IntentState::Confirming);
        let deposit = updated.deposit.as_ref().unwrap();
        assert_eq!(deposit.block_height, 101);
        assert_eq!(deposit.amount, Amount::new(1_500_000));
    }

    #[test]
    fn second_deposit_after_detection_is_only_recorded() {
        let config = chain_config(false);
        let cursor = Cursor::starting_at(config.chain.clone(), 100, 8);
        let mut watches = WatchSet::new([intent(AmountPolicy::Any)]);

        let plan = plan_block(
            &config,
            &cursor,
            &block(
                100,
                vec![transfer(1, "USDC", 10), transfer(2, "USDC", 20)],
            ),
            &mut watches,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(plan.commit.events.len(), 2);
        assert_eq!(plan.commit.intents.len(), 1);
        let deposit = plan.commit.intents[0].intent.deposit.as_ref().unwrap();
        assert_eq!(deposit.amount, Amount::new(10));
    }

    #[test]
    fn non_contiguous_block_is_rejected() {
        let config = chain_config(false);
        let cursor = Cursor::starting_at(config.chain.clone(), 100, 8);
        let mut watches = WatchSet::default();
        let err = plan_block(&config, &cursor, &block(102, vec![]), &mut watches, Utc::now())
            .unwrap_err();
        assert!(matches!(err, MonitorError::Cursor(_)));
    }
}

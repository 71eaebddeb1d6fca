//! Fork detection against the cursor's recent hash history.

use chrono::{DateTime, Utc};
use tracing::debug;
use xfer_bridge_domain::model::{Block, Cursor, IntentState, StateChange, TransferIntent};
use xfer_bridge_domain::storage::{ChainRollback, IntentUpdate};

use crate::rpc::{ChainClient, ChainError};
use crate::worker::MonitorError;

/// Whether `block` builds on the last block the cursor committed.
pub fn extends_cursor(cursor: &Cursor, block: &Block) -> bool {
    match cursor.tip() {
        Some(tip) => tip.height + 1 == block.height && tip.hash == block.parent_hash,
        None => block.height == cursor.next_height(),
    }
}

/// Where the local view and the canonical chain part ways.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkPoint {
    /// Last height whose stored hash the node still reports. Everything at or
    /// above it is invalidated and rescanned.
    pub height: u64,
    /// Blocks discarded above `height`.
    pub depth: u64,
}

/// Walks the cursor history from the tip downwards until a stored hash
/// agrees with the node.
pub async fn find_fork_point<C>(
    client: &C,
    cursor: &Cursor,
    max_depth: u64,
) -> Result<ForkPoint, MonitorError>
where
    C: ChainClient + ?Sized,
{
    let Some(tip) = cursor.height() else {
        return Err(ChainError::Inconsistent("no committed blocks to compare".into()).into());
    };

    let mut checked = 0;
    for entry in cursor.recent().rev() {
        let depth = tip - entry.height;
        if depth > max_depth {
            break;
        }
        checked = depth;
        let canonical = client.block_hash(entry.height).await?;
        debug!(height = entry.height, ?canonical, stored = %entry.hash, "comparing fork candidate");
        if canonical.as_ref() == Some(&entry.hash) {
            if depth == 0 {
                // The tip is still canonical, so the mismatching block came
                // from a node that has not caught up yet.
                return Err(ChainError::Inconsistent(format!(
                    "block {} disagrees with a tip the node still reports",
                    tip + 1
                ))
                .into());
            }
            return Ok(ForkPoint {
                height: entry.height,
                depth,
            });
        }
    }

    Err(MonitorError::ReorgTooDeep {
        chain: cursor.chain().clone(),
        checked: checked + 1,
        max_depth,
    })
}

/// The atomic rollback for a fork plus the notifications it produces.
#[derive(Debug, Clone)]
pub struct RollbackPlan {
    pub rollback: ChainRollback,
    pub changes: Vec<StateChange>,
    pub alerts: Vec<String>,
}

/// Reverts every pre-settlement intent backed by a deposit at or above the
/// fork height and rewinds the cursor so the fork height is scanned again.
pub fn plan_rollback(
    cursor: &Cursor,
    fork: ForkPoint,
    backed: Vec<TransferIntent>,
    now: DateTime<Utc>,
) -> Result<RollbackPlan, MonitorError> {
    let mut rewound = cursor.clone();
    rewound.rewind_to(fork.height);

    let mut intents = Vec::new();
    let mut changes = Vec::new();
    let mut alerts = Vec::new();
    for mut intent in backed {
        let Some(deposit_height) = intent.deposit.as_ref().map(|d| d.block_height) else {
            continue;
        };
        if deposit_height < fork.height {
            continue;
        }
        match intent.state {
            IntentState::Detected | IntentState::Confirming | IntentState::Confirmed => {
                if intent.state == IntentState::Confirmed {
                    alerts.push(format!(
                        "confirmed intent {} lost its deposit at height {deposit_height} to a reorg of depth {}",
                        intent.id, fork.depth
                    ));
                }
                let expected = intent.state;
                changes.extend(intent.revert(fork.height, now)?);
                intents.push(IntentUpdate { intent, expected });
            }
            IntentState::Settled | IntentState::SettlementFailed => alerts.push(format!(
                "{} intent {} was backed by block {deposit_height}, which a reorg of depth {} removed",
                intent.state, intent.id, fork.depth
            )),
            _ => {}
        }
    }

    Ok(RollbackPlan {
        rollback: ChainRollback {
            cursor: rewound,
            invalidate_from: fork.height,
            intents,
        },
        changes,
        alerts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use xfer_bridge_domain::model::{
        Address, Amount, AmountPolicy, Asset, BlockHash, BlockRef, ChainId, IntentId,
        MatchedDeposit, NewTransferIntent, TxHash,
    };

    use crate::rpc::TransactionReceipt;

    fn hash(height: u64, fork: u8) -> BlockHash {
        BlockHash::parse(&format!("0x{fork:02x}{height:062x}")).unwrap()
    }

    fn chain() -> ChainId {
        ChainId::parse("ethereum").unwrap()
    }

    struct CanonicalHashes(HashMap<u64, BlockHash>);

    #[async_trait]
    impl ChainClient for CanonicalHashes {
        async fn head_height(&self) -> Result<u64, ChainError> {
            Ok(self.0.keys().copied().max().unwrap_or_default())
        }

        async fn blocks_in_range(
            &self,
            _from: u64,
            _to: u64,
            _watched: &HashSet<Address>,
        ) -> Result<Vec<Block>, ChainError> {
            Ok(Vec::new())
        }

        async fn block_hash(&self, height: u64) -> Result<Option<BlockHash>, ChainError> {
            Ok(self.0.get(&height).cloned())
        }

        async fn transaction_receipt(
            &self,
            _tx_hash: &TxHash,
        ) -> Result<Option<TransactionReceipt>, ChainError> {
            Ok(None)
        }
    }

    /// Cursor over 95..=105 on the original branch.
    fn cursor() -> Cursor {
        let mut cursor = Cursor::starting_at(chain(), 95, 16);
        for height in 95..=105 {
            cursor
                .advance(BlockRef {
                    height,
                    hash: hash(height, 0),
                })
                .unwrap();
        }
        cursor
    }

    /// Node view where everything above `last_shared` was replaced.
    fn node(last_shared: u64) -> CanonicalHashes {
        CanonicalHashes(
            (95..=110)
                .map(|h| (h, hash(h, if h > last_shared { 1 } else { 0 })))
                .collect(),
        )
    }

    #[tokio::test]
    async fn fork_is_found_within_bound() {
        let fork = find_fork_point(&node(100), &cursor(), 6).await.unwrap();
        assert_eq!(fork, ForkPoint { height: 100, depth: 5 });
    }

    #[tokio::test]
    async fn deeper_reorg_is_fatal() {
        let err = find_fork_point(&node(100), &cursor(), 4).await.unwrap_err();
        assert!(matches!(err, MonitorError::ReorgTooDeep { max_depth: 4, .. }));
    }

    #[tokio::test]
    async fn exhausted_history_is_fatal() {
        let err = find_fork_point(&node(90), &cursor(), 64).await.unwrap_err();
        assert!(matches!(err, MonitorError::ReorgTooDeep { .. }));
    }

    #[tokio::test]
    async fn agreeing_tip_is_inconsistent_not_a_reorg() {
        let err = find_fork_point(&node(110), &cursor(), 6).await.unwrap_err();
        assert!(matches!(err, MonitorError::Chain(ChainError::Inconsistent(_))));
    }

    fn backed_intent(id: &str, state: IntentState, height: u64) -> TransferIntent {
        let mut intent = NewTransferIntent {
            id: IntentId::parse(id).unwrap(),
            chain: chain(),
            deposit_address: Address::parse(&format!("0x{}", "ab".repeat(20))).unwrap(),
            asset: Asset::parse("USDC").unwrap(),
            policy: AmountPolicy::Any,
            expires_at: None,
        }
        .into_intent(Utc::now());
        intent.state = state;
        intent.deposit = Some(MatchedDeposit {
            tx_hash: TxHash::parse(&format!("0x{height:064x}")).unwrap(),
            log_index: 0,
            block_height: height,
            block_hash: hash(height, 0),
            amount: Amount::new(1),
        });
        intent
    }

    #[test]
    fn rollback_reverts_open_intents_and_alerts_on_settled() {
        let fork = ForkPoint {
            height: 100,
            depth: 5,
        };
        let plan = plan_rollback(
            &cursor(),
            fork,
            vec![
                backed_intent("confirming", IntentState::Confirming, 100),
                backed_intent("settled", IntentState::Settled, 102),
                backed_intent("older", IntentState::Confirming, 99),
            ],
            Utc::now(),
        )
        .unwrap();

        assert_eq!(plan.rollback.cursor.next_height(), 100);
        assert_eq!(plan.rollback.cursor.height(), Some(99));
        assert_eq!(plan.rollback.invalidate_from, 100);
        assert_eq!(plan.rollback.intents.len(), 1);
        let update = &plan.rollback.intents[0];
        assert_eq!(update.expected, IntentState::Confirming);
        assert_eq!(update.intent.state, IntentState::AwaitingDeposit);
        let states: Vec<_> = plan.changes.iter().map(|c| c.to).collect();
        assert_eq!(states, vec![IntentState::Reverted, IntentState::AwaitingDeposit]);
        assert_eq!(plan.alerts.len(), 1);
    }
}

use chrono::{DateTime, Utc};
use hex::encode as hex_encode;
use sha3::{Digest, Sha3_256};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

use super::{Address, Amount, Asset, BlockHash, ChainId, FormatError, IntentId, TxHash};

/// Lifecycle of a transfer intent.
///
/// `Reverted` is transient: a reorged intent passes through it on its way back
/// to `AwaitingDeposit` and is never persisted in that state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr, Display)]
#[strum(serialize_all = "snake_case")]
pub enum IntentState {
    AwaitingDeposit,
    Detected,
    Confirming,
    Confirmed,
    Settled,
    Expired,
    Reverted,
    SettlementFailed,
}

impl IntentState {
    /// States whose deposit address is still watched by the scanner.
    pub const OPEN: [IntentState; 4] = [
        IntentState::AwaitingDeposit,
        IntentState::Detected,
        IntentState::Confirming,
        IntentState::Confirmed,
    ];

    pub fn is_open(self) -> bool {
        Self::OPEN.contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            IntentState::Settled | IntentState::Expired | IntentState::SettlementFailed
        )
    }

    pub fn can_expire(self) -> bool {
        matches!(
            self,
            IntentState::AwaitingDeposit | IntentState::Detected | IntentState::Confirming
        )
    }

    pub fn can_transition_to(self, next: IntentState) -> bool {
        use IntentState::*;
        matches!(
            (self, next),
            (AwaitingDeposit, Detected)
                | (AwaitingDeposit, Expired)
                | (Detected, Confirming)
                | (Detected, Expired)
                | (Detected, Reverted)
                | (Confirming, Confirmed)
                | (Confirming, Expired)
                | (Confirming, Reverted)
                | (Confirmed, Settled)
                | (Confirmed, SettlementFailed)
                | (Confirmed, Reverted)
                | (Reverted, AwaitingDeposit)
                | (SettlementFailed, Confirmed)
        )
    }
}

/// How an observed amount is compared against the intent's expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountPolicy {
    Exact { amount: Amount },
    AtLeast { minimum: Amount },
    Any,
}

impl AmountPolicy {
    pub fn from_parts(kind: &str, amount: Option<Amount>) -> Result<Self, FormatError> {
        match (kind, amount) {
            ("exact", Some(amount)) => Ok(Self::Exact { amount }),
            ("at_least", Some(minimum)) => Ok(Self::AtLeast { minimum }),
            ("any", _) => Ok(Self::Any),
            ("exact" | "at_least", None) => Err(FormatError::Amount(String::new())),
            (other, _) => Err(FormatError::Policy(other.to_owned())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Exact { .. } => "exact",
            Self::AtLeast { .. } => "at_least",
            Self::Any => "any",
        }
    }

    pub fn amount(&self) -> Option<Amount> {
        match self {
            Self::Exact { amount } => Some(*amount),
            Self::AtLeast { minimum } => Some(*minimum),
            Self::Any => None,
        }
    }

    /// Classifies an observed amount. `tolerance` only widens exact matches.
    pub fn evaluate(&self, observed: Amount, tolerance: Amount) -> MatchKind {
        match self {
            Self::Exact { amount } => {
                if observed.abs_diff(*amount) <= tolerance {
                    MatchKind::Full
                } else if observed < *amount {
                    MatchKind::Underpaid
                } else {
                    MatchKind::Overpaid
                }
            }
            Self::AtLeast { minimum } => {
                if observed >= *minimum {
                    MatchKind::Full
                } else {
                    MatchKind::Underpaid
                }
            }
            Self::Any if observed > Amount::ZERO => MatchKind::Full,
            Self::Any => MatchKind::Underpaid,
        }
    }
}

/// Outcome of comparing one chain event against its intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr, Display)]
#[strum(serialize_all = "snake_case")]
pub enum MatchKind {
    Full,
    Underpaid,
    Overpaid,
    AssetMismatch,
}

/// The deposit backing an intent's progress past `AwaitingDeposit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedDeposit {
    pub tx_hash: TxHash,
    pub log_index: u32,
    pub block_height: u64,
    pub block_hash: BlockHash,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SettlementProgress {
    /// Idempotency key handed to the settlement gateway; fixed once set.
    pub reference: Option<String>,
    pub attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransferIntent {
    pub id: IntentId,
    pub chain: ChainId,
    pub deposit_address: Address,
    pub asset: Asset,
    pub policy: AmountPolicy,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewTransferIntent {
    pub fn into_intent(self, now: DateTime<Utc>) -> TransferIntent {
        TransferIntent {
            id: self.id,
            chain: self.chain,
            deposit_address: self.deposit_address,
            asset: self.asset,
            policy: self.policy,
            state: IntentState::AwaitingDeposit,
            deposit: None,
            settlement: SettlementProgress::default(),
            revert_count: 0,
            created_at: now,
            updated_at: now,
            expires_at: self.expires_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferIntent {
    pub id: IntentId,
    pub chain: ChainId,
    pub deposit_address: Address,
    pub asset: Asset,
    pub policy: AmountPolicy,
    pub state: IntentState,
    pub deposit: Option<MatchedDeposit>,
    pub settlement: SettlementProgress,
    pub revert_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A single applied state change, emitted to the notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub intent_id: IntentId,
    pub chain: ChainId,
    pub from: IntentState,
    pub to: IntentState,
    pub at: DateTime<Utc>,
    pub detail: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("intent {intent} cannot move from {from} to {to}")]
    Invalid {
        intent: IntentId,
        from: IntentState,
        to: IntentState,
    },
}

impl TransferIntent {
    /// Whether the registration request describes the same watch as `self`.
    pub fn same_watch(&self, request: &NewTransferIntent) -> bool {
        self.chain == request.chain
            && self.deposit_address == request.deposit_address
            && self.asset == request.asset
            && self.policy == request.policy
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.state.can_expire() && self.expires_at.is_some_and(|deadline| deadline <= now)
    }

    fn move_to(
        &mut self,
        next: IntentState,
        now: DateTime<Utc>,
        detail: impl Into<String>,
    ) -> Result<StateChange, TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError::Invalid {
                intent: self.id.clone(),
                from: self.state,
                to: next,
            });
        }
        let change = StateChange {
            intent_id: self.id.clone(),
            chain: self.chain.clone(),
            from: self.state,
            to: next,
            at: now,
            detail: detail.into(),
        };
        self.state = next;
        self.updated_at = now;
        Ok(change)
    }

    /// `awaiting_deposit → detected → confirming`; depth tracking starts
    /// immediately.
    pub fn detect(
        &mut self,
        deposit: MatchedDeposit,
        now: DateTime<Utc>,
    ) -> Result<Vec<StateChange>, TransitionError> {
        let detail = format!(
            "deposit of {} {} in tx {} at height {}",
            deposit.amount, self.asset, deposit.tx_hash, deposit.block_height
        );
        let detected = self.move_to(IntentState::Detected, now, detail)?;
        self.deposit = Some(deposit);
        let confirming = self.move_to(IntentState::Confirming, now, "tracking confirmations")?;
        Ok(vec![detected, confirming])
    }

    pub fn confirm(
        &mut self,
        confirmations: u64,
        now: DateTime<Utc>,
    ) -> Result<StateChange, TransitionError> {
        self.move_to(
            IntentState::Confirmed,
            now,
            format!("{confirmations} confirmations reached"),
        )
    }

    /// Fixes the settlement idempotency key if it is not yet set and returns
    /// it.
    pub fn ensure_settlement_reference(&mut self) -> String {
        if let Some(reference) = &self.settlement.reference {
            return reference.clone();
        }
        let reference = derive_settlement_reference(&self.id);
        self.settlement.reference = Some(reference.clone());
        reference
    }

    pub fn settle(
        &mut self,
        gateway_reference: &str,
        now: DateTime<Utc>,
    ) -> Result<StateChange, TransitionError> {
        let change = self.move_to(
            IntentState::Settled,
            now,
            format!("settled, gateway reference {gateway_reference}"),
        )?;
        self.settlement.attempts = self.settlement.attempts.saturating_add(1);
        self.settlement.next_attempt_at = None;
        self.settlement.last_error = None;
        Ok(change)
    }

    /// Records a retryable settlement failure without changing state.
    pub fn schedule_settlement_retry(
        &mut self,
        error: impl Into<String>,
        next_attempt_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        self.settlement.attempts = self.settlement.attempts.saturating_add(1);
        self.settlement.last_error = Some(error.into());
        self.settlement.next_attempt_at = Some(next_attempt_at);
        self.updated_at = now;
    }

    pub fn settlement_due(&self, now: DateTime<Utc>) -> bool {
        self.state == IntentState::Confirmed
            && self.settlement.next_attempt_at.is_none_or(|at| at <= now)
    }

    pub fn fail_settlement(
        &mut self,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<StateChange, TransitionError> {
        let reason = reason.into();
        let change = self.move_to(
            IntentState::SettlementFailed,
            now,
            format!("settlement rejected permanently: {reason}"),
        )?;
        self.settlement.attempts = self.settlement.attempts.saturating_add(1);
        self.settlement.last_error = Some(reason);
        self.settlement.next_attempt_at = None;
        Ok(change)
    }

    /// Manual resolution of a dead-lettered settlement.
    pub fn requeue_settlement(&mut self, now: DateTime<Utc>) -> Result<StateChange, TransitionError> {
        let change = self.move_to(IntentState::Confirmed, now, "settlement requeued by operator")?;
        self.settlement.attempts = 0;
        self.settlement.next_attempt_at = None;
        Ok(change)
    }

    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<StateChange, TransitionError> {
        self.move_to(IntentState::Expired, now, "expired before confirmation")
    }

    /// The backing event was invalidated by a reorg: pass through `reverted`
    /// back to `awaiting_deposit` and forget the matched deposit. The
    /// settlement reference survives so a payout already in flight is
    /// replayed under the same key once the deposit is matched again.
    pub fn revert(
        &mut self,
        invalidated_from: u64,
        now: DateTime<Utc>,
    ) -> Result<Vec<StateChange>, TransitionError> {
        let detail = match &self.deposit {
            Some(deposit) => format!(
                "backing tx {} at height {} reorged (chain diverged from height {invalidated_from})",
                deposit.tx_hash, deposit.block_height
            ),
            None => format!("chain diverged from height {invalidated_from}"),
        };
        let reverted = self.move_to(IntentState::Reverted, now, detail)?;
        let awaiting = self.move_to(IntentState::AwaitingDeposit, now, "awaiting re-detection")?;
        self.deposit = None;
        self.settlement = SettlementProgress {
            reference: self.settlement.reference.take(),
            ..SettlementProgress::default()
        };
        self.revert_count = self.revert_count.saturating_add(1);
        Ok(vec![reverted, awaiting])
    }
}

/// Deterministic idempotency key for the settlement of an intent. Depends on
/// the intent id alone: a reorg that moves the deposit to another block or
/// log position must not yield a second payout key.
pub fn derive_settlement_reference(intent: &IntentId) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(b"settlement:");
    hasher.update(intent.as_str().as_bytes());
    hex_encode(hasher.finalize())
}

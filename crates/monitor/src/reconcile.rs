//! Height- and time-driven intent transitions that happen outside block
//! commits.

use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{debug, info};
use xfer_bridge_domain::config::ChainConfig;
use xfer_bridge_domain::model::{IntentState, TransferIntent};
use xfer_bridge_domain::services::METRIC_TRANSITIONS;
use xfer_bridge_domain::storage::{IntentUpdate, StorageError};

use crate::notify::{Notification, Notifier};
use crate::worker::{MonitorError, MonitorStore};

/// Moves `confirming` intents whose backing block is deep enough under
/// `head` to `confirmed`.
pub async fn advance_confirmations<S>(
    store: &S,
    notifier: &dyn Notifier,
    config: &ChainConfig,
    head: u64,
    now: DateTime<Utc>,
) -> Result<usize, MonitorError>
where
    S: MonitorStore + ?Sized,
{
    let mut confirmed = 0;
    for mut intent in store
        .intents_in_state(&config.chain, IntentState::Confirming)
        .await?
    {
        let Some(height) = intent.deposit.as_ref().map(|d| d.block_height) else {
            continue;
        };
        let confirmations = head.saturating_sub(height);
        if confirmations < config.required_confirmations {
            debug!(intent_id = %intent.id, confirmations, "awaiting confirmations");
            continue;
        }
        let change = intent.confirm(confirmations, now)?;
        if !saved(store, intent, IntentState::Confirming).await? {
            continue;
        }
        info!(intent_id = %change.intent_id, confirmations, "deposit confirmed");
        counter!(METRIC_TRANSITIONS, "chain" => config.chain.to_string(), "to" => "confirmed")
            .increment(1);
        notifier.notify(Notification::Transition(change));
        confirmed += 1;
    }
    Ok(confirmed)
}

/// Expires every open, pre-confirmation intent past its deadline.
pub async fn expire_intents<S>(
    store: &S,
    notifier: &dyn Notifier,
    config: &ChainConfig,
    now: DateTime<Utc>,
) -> Result<usize, MonitorError>
where
    S: MonitorStore + ?Sized,
{
    let mut expired = 0;
    for mut intent in store.open_watches(&config.chain).await? {
        if !intent.is_expired_at(now) {
            continue;
        }
        let expected = intent.state;
        let change = intent.expire(now)?;
        if !saved(store, intent, expected).await? {
            continue;
        }
        counter!(METRIC_TRANSITIONS, "chain" => config.chain.to_string(), "to" => "expired")
            .increment(1);
        notifier.notify(Notification::Transition(change));
        expired += 1;
    }
    Ok(expired)
}

/// A lost compare-and-set means the intent moved on concurrently; the next
/// tick sees its new state.
async fn saved<S>(
    store: &S,
    intent: TransferIntent,
    expected: IntentState,
) -> Result<bool, MonitorError>
where
    S: MonitorStore + ?Sized,
{
    let id = intent.id.clone();
    match store.save_intent(IntentUpdate { intent, expected }).await {
        Ok(()) => Ok(true),
        Err(StorageError::Conflict(reason)) => {
            debug!(intent_id = %id, %reason, "intent changed underneath, skipping");
            Ok(false)
        }
        Err(err) => Err(err.into()),
    }
}

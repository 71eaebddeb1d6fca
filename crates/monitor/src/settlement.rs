use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use xfer_bridge_domain::config::{RetryConfig, SettlementConfig};
use xfer_bridge_domain::model::{ChainId, IntentState, TransferIntent};
use xfer_bridge_domain::services::METRIC_SETTLEMENT_ATTEMPTS;
use xfer_bridge_domain::storage::IntentUpdate;

use crate::notify::{Notification, Notifier};
use crate::retry::RetryPolicy;
use crate::worker::{MonitorError, MonitorStore};

/// Payload handed to the settlement gateway. `reference` doubles as the
/// idempotency key: repeated calls with the same reference must not pay out
/// twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementRequest {
    pub reference: String,
    pub intent_id: String,
    pub chain: String,
    pub asset: String,
    pub amount: String,
    pub source_tx_hash: String,
    pub log_index: u32,
}

impl SettlementRequest {
    /// `None` while the intent has no matched deposit.
    pub fn for_intent(intent: &TransferIntent, reference: String) -> Option<Self> {
        let deposit = intent.deposit.as_ref()?;
        Some(Self {
            reference,
            intent_id: intent.id.to_string(),
            chain: intent.chain.to_string(),
            asset: intent.asset.to_string(),
            amount: deposit.amount.to_string(),
            source_tx_hash: deposit.tx_hash.to_string(),
            log_index: deposit.log_index,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementReceipt {
    pub gateway_reference: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SettlementError {
    #[error("retryable settlement failure: {0}")]
    Retryable(String),
    #[error("permanent settlement failure: {0}")]
    Permanent(String),
}

#[async_trait]
pub trait SettlementGateway: Send + Sync {
    async fn settle(&self, request: &SettlementRequest)
        -> Result<SettlementReceipt, SettlementError>;
}

/// Posts settlement requests as JSON with an `Idempotency-Key` header.
pub struct HttpSettlementGateway {
    http: reqwest::Client,
    url: String,
    auth_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    #[serde(default)]
    reference: Option<String>,
}

impl HttpSettlementGateway {
    pub fn new(config: &SettlementConfig, timeout: Duration) -> Result<Self, SettlementError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| SettlementError::Permanent(format!("http client: {err}")))?;
        Ok(Self {
            http,
            url: config.url.clone(),
            auth_token: config.auth_token.clone(),
        })
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

#[async_trait]
impl SettlementGateway for HttpSettlementGateway {
    async fn settle(
        &self,
        request: &SettlementRequest,
    ) -> Result<SettlementReceipt, SettlementError> {
        let mut builder = self
            .http
            .post(&self.url)
            .header("Idempotency-Key", &request.reference)
            .json(request);
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }
        let response = builder
            .send()
            .await
            .map_err(|err| SettlementError::Retryable(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let body = response.json::<GatewayResponse>().await.ok();
            return Ok(SettlementReceipt {
                gateway_reference: body
                    .and_then(|body| body.reference)
                    .unwrap_or_else(|| request.reference.clone()),
            });
        }

        let text = response.text().await.unwrap_or_default();
        let reason = format!("gateway returned {status}: {}", text.trim());
        if is_retryable_status(status) {
            Err(SettlementError::Retryable(reason))
        } else {
            Err(SettlementError::Permanent(reason))
        }
    }
}

/// Settles every confirmed intent of `chain` whose next attempt is due.
/// Returns how many intents reached `settled`.
pub async fn settle_due<S>(
    store: &S,
    gateway: &dyn SettlementGateway,
    notifier: &dyn Notifier,
    chain: &ChainId,
    retry: &RetryConfig,
    now: DateTime<Utc>,
) -> Result<usize, MonitorError>
where
    S: MonitorStore + ?Sized,
{
    let policy = RetryPolicy::new(
        retry.settlement_base_delay,
        retry.settlement_max_delay,
        u32::MAX,
    );
    let mut settled = 0;
    for mut intent in store.intents_in_state(chain, IntentState::Confirmed).await? {
        if !intent.settlement_due(now) {
            continue;
        }

        // The key must be durable before the first call so a replay after a
        // crash reuses it.
        if intent.settlement.reference.is_none() {
            intent.ensure_settlement_reference();
            store
                .save_intent(IntentUpdate {
                    intent: intent.clone(),
                    expected: IntentState::Confirmed,
                })
                .await?;
        }
        let reference = intent.ensure_settlement_reference();
        let Some(request) = SettlementRequest::for_intent(&intent, reference) else {
            warn!(intent_id = %intent.id, "confirmed intent has no deposit, skipping settlement");
            continue;
        };

        match gateway.settle(&request).await {
            Ok(receipt) => {
                counter!(METRIC_SETTLEMENT_ATTEMPTS, "chain" => chain.to_string(), "result" => "settled")
                    .increment(1);
                let change = intent.settle(&receipt.gateway_reference, now)?;
                store
                    .save_intent(IntentUpdate {
                        intent,
                        expected: IntentState::Confirmed,
                    })
                    .await?;
                info!(intent_id = %change.intent_id, reference = %receipt.gateway_reference, "intent settled");
                notifier.notify(Notification::Transition(change));
                settled += 1;
            }
            Err(SettlementError::Retryable(reason)) => {
                counter!(METRIC_SETTLEMENT_ATTEMPTS, "chain" => chain.to_string(), "result" => "retry")
                    .increment(1);
                let delay = policy.delay(intent.settlement.attempts);
                let next_attempt_at = now
                    + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                warn!(
                    intent_id = %intent.id,
                    attempts = intent.settlement.attempts + 1,
                    %next_attempt_at,
                    reason = %reason,
                    "settlement will be retried"
                );
                intent.schedule_settlement_retry(reason, next_attempt_at, now);
                store
                    .save_intent(IntentUpdate {
                        intent,
                        expected: IntentState::Confirmed,
                    })
                    .await?;
            }
            Err(SettlementError::Permanent(reason)) => {
                counter!(METRIC_SETTLEMENT_ATTEMPTS, "chain" => chain.to_string(), "result" => "failed")
                    .increment(1);
                let change = intent.fail_settlement(reason.clone(), now)?;
                store
                    .save_intent(IntentUpdate {
                        intent,
                        expected: IntentState::Confirmed,
                    })
                    .await?;
                notifier.notify(Notification::alert(
                    chain,
                    format!(
                        "settlement of intent {} failed permanently and needs manual resolution: {reason}",
                        change.intent_id
                    ),
                ));
                notifier.notify(Notification::Transition(change));
            }
        }
    }
    Ok(settled)
}

use std::time::Duration;

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::info;
use xfer_bridge_domain::config::AssetDecimals;
use xfer_bridge_domain::model::{
    Address, Amount, AmountPolicy, Asset, ChainEvent, ChainId, IntentId, NewTransferIntent,
    TransferIntent,
};
use xfer_bridge_domain::services::METRIC_API_REQUESTS;
use xfer_bridge_domain::storage::{ChainEventStore, WatchRegistry};

use crate::state::AppState;

use super::ApiError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyBody {
    pub kind: String,
    /// Whole asset units such as `"1.5"`, scaled by the asset's decimals;
    /// required for `exact` and `at_least`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterIntentRequest {
    pub intent_id: String,
    pub chain: String,
    pub deposit_address: String,
    pub asset: String,
    pub policy: PolicyBody,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DepositView {
    pub tx_hash: String,
    pub log_index: u32,
    pub block_height: u64,
    pub block_hash: String,
    pub amount: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EventView {
    pub block_height: u64,
    pub block_hash: String,
    pub tx_hash: String,
    pub log_index: u32,
    pub asset: String,
    pub amount: String,
    pub match_kind: String,
    pub active: bool,
    pub observed_at: DateTime<Utc>,
    pub invalidated_at: Option<DateTime<Utc>>,
}

impl From<ChainEvent> for EventView {
    fn from(event: ChainEvent) -> Self {
        Self {
            block_height: event.block_height,
            block_hash: event.block_hash.to_string(),
            tx_hash: event.tx_hash.to_string(),
            log_index: event.log_index,
            asset: event.asset.to_string(),
            amount: event.amount.to_string(),
            match_kind: event.match_kind.to_string(),
            active: event.active,
            observed_at: event.observed_at,
            invalidated_at: event.invalidated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IntentResponse {
    pub intent_id: String,
    pub chain: String,
    pub deposit_address: String,
    pub asset: String,
    pub policy: PolicyBody,
    pub state: String,
    pub deposit: Option<DepositView>,
    pub settlement_reference: Option<String>,
    pub settlement_attempts: u32,
    pub settlement_error: Option<String>,
    pub revert_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub events: Vec<EventView>,
}

impl IntentResponse {
    /// `decimals` renders the policy amount in whole units; without it the
    /// atomic amount is shown.
    pub fn new(intent: TransferIntent, events: Vec<ChainEvent>, decimals: Option<u8>) -> Self {
        let policy_amount = intent.policy.amount().map(|amount| match decimals {
            Some(decimals) => amount.to_decimal_string(decimals),
            None => amount.to_string(),
        });
        Self {
            intent_id: intent.id.to_string(),
            chain: intent.chain.to_string(),
            deposit_address: intent.deposit_address.to_string(),
            asset: intent.asset.to_string(),
            policy: PolicyBody {
                kind: intent.policy.kind().to_owned(),
                amount: policy_amount,
            },
            state: intent.state.to_string(),
            deposit: intent.deposit.map(|deposit| DepositView {
                tx_hash: deposit.tx_hash.to_string(),
                log_index: deposit.log_index,
                block_height: deposit.block_height,
                block_hash: deposit.block_hash.to_string(),
                amount: deposit.amount.to_string(),
            }),
            settlement_reference: intent.settlement.reference,
            settlement_attempts: intent.settlement.attempts,
            settlement_error: intent.settlement.last_error,
            revert_count: intent.revert_count,
            created_at: intent.created_at,
            updated_at: intent.updated_at,
            expires_at: intent.expires_at,
            events: events.into_iter().map(EventView::from).collect(),
        }
    }
}

fn parse_request(
    request: RegisterIntentRequest,
    default_ttl: Duration,
    asset_decimals: &AssetDecimals,
    now: DateTime<Utc>,
) -> Result<NewTransferIntent, ApiError> {
    let chain = ChainId::parse(&request.chain)?;
    let asset = Asset::parse(&request.asset)?;
    let amount = match request.policy.amount.as_deref() {
        Some(raw) => {
            let decimals = asset_decimals.lookup(&chain, &asset).ok_or_else(|| {
                ApiError::BadRequest(format!("unknown decimals for {asset} on {chain}"))
            })?;
            Some(Amount::from_decimal(raw, decimals)?)
        }
        None => None,
    };
    let policy = AmountPolicy::from_parts(&request.policy.kind, amount)?;

    let ttl = match request.ttl_secs {
        Some(0) => return Err(ApiError::BadRequest("ttl_secs must be positive".into())),
        Some(secs) => Duration::from_secs(secs),
        None => default_ttl,
    };
    let expires_at = chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| ApiError::BadRequest("ttl_secs is out of range".into()))?;

    Ok(NewTransferIntent {
        id: IntentId::parse(&request.intent_id)?,
        chain,
        deposit_address: Address::parse(&request.deposit_address)?,
        asset,
        policy,
        expires_at: Some(expires_at),
    })
}

pub async fn register_intent_handler(
    state: web::Data<AppState>,
    payload: web::Json<RegisterIntentRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = match parse_request(
        payload.into_inner(),
        state.default_intent_ttl(),
        state.asset_decimals(),
        Utc::now(),
    ) {
        Ok(request) => request,
        Err(err) => {
            counter!(METRIC_API_REQUESTS, "endpoint" => "register", "status" => "invalid")
                .increment(1);
            return Err(err);
        }
    };

    let intent = match state.storage().register_watch(request).await {
        Ok(intent) => intent,
        Err(err) => {
            let status = if err.is_conflict() { "conflict" } else { "error" };
            counter!(METRIC_API_REQUESTS, "endpoint" => "register", "status" => status)
                .increment(1);
            return Err(err.into());
        }
    };
    info!(
        intent_id = %intent.id,
        chain = %intent.chain,
        address = %intent.deposit_address,
        "watch registered"
    );
    counter!(METRIC_API_REQUESTS, "endpoint" => "register", "status" => "ok").increment(1);
    let events = state.storage().events_for_intent(&intent.id, true).await?;
    let decimals = state.decimals_of(&intent);
    Ok(HttpResponse::Ok().json(IntentResponse::new(intent, events, decimals)))
}

pub async fn intent_status_handler(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = IntentId::parse(&path.into_inner())?;
    let Some(intent) = state.storage().find_intent(&id).await? else {
        counter!(METRIC_API_REQUESTS, "endpoint" => "status", "status" => "not_found")
            .increment(1);
        return Err(ApiError::NotFound);
    };
    let events = state.storage().events_for_intent(&id, true).await?;
    counter!(METRIC_API_REQUESTS, "endpoint" => "status", "status" => "ok").increment(1);
    let decimals = state.decimals_of(&intent);
    Ok(HttpResponse::Ok().json(IntentResponse::new(intent, events, decimals)))
}

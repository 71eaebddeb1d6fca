use actix_web::{web, HttpResponse};
use chrono::Utc;
use metrics::counter;
use tracing::{info, warn};
use xfer_bridge_domain::model::{IntentId, IntentState};
use xfer_bridge_domain::services::METRIC_API_REQUESTS;
use xfer_bridge_domain::storage::{ChainEventStore, IntentUpdate, WatchRegistry};
use xfer_bridge_monitor::Notification;

use crate::state::AppState;

use super::{intent::IntentResponse, ApiError};

pub async fn metrics_handler(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(state.telemetry().render_metrics())
}

/// Manual resolution of a dead-lettered settlement: `settlement_failed`
/// goes back to `confirmed` with a fresh attempt budget.
pub async fn requeue_settlement_handler(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = IntentId::parse(&path.into_inner())?;
    let Some(mut intent) = state.storage().find_intent(&id).await? else {
        counter!(METRIC_API_REQUESTS, "endpoint" => "requeue", "status" => "not_found")
            .increment(1);
        return Err(ApiError::NotFound);
    };

    let change = match intent.requeue_settlement(Utc::now()) {
        Ok(change) => change,
        Err(err) => {
            warn!(intent_id = %id, state = %intent.state, "requeue rejected");
            counter!(METRIC_API_REQUESTS, "endpoint" => "requeue", "status" => "conflict")
                .increment(1);
            return Err(err.into());
        }
    };
    state
        .storage()
        .save_intent(IntentUpdate {
            intent: intent.clone(),
            expected: IntentState::SettlementFailed,
        })
        .await?;
    info!(intent_id = %change.intent_id, "settlement requeued");
    counter!(METRIC_API_REQUESTS, "endpoint" => "requeue", "status" => "ok").increment(1);
    state.notifier().notify(Notification::Transition(change));

    let events = state.storage().events_for_intent(&id, true).await?;
    let decimals = state.decimals_of(&intent);
    Ok(HttpResponse::Ok().json(IntentResponse::new(intent, events, decimals)))
}

//! Admin Override & Audit routes.
//!
//! Every route here acts on behalf of a staff member identified by the
//! gateway headers.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use moeda_core::admin::{AdjustRequest, CancelRequest};
use moeda_core::ledger::{AccountKey, LedgerError, retry_stale};
use moeda_shared::AppError;
use moeda_shared::types::{DisciplineId, StudentId, TransactionId};

use crate::middleware::StaffActor;
use crate::{ApiError, AppState};

/// Creates the admin routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/accounts/{student_id}/{discipline_id}/adjust", post(adjust))
        .route(
            "/accounts/{student_id}/{discipline_id}/cancel/{transaction_id}",
            post(cancel_purchase),
        )
        .route("/accounts/{student_id}/{discipline_id}/audit", get(audit_trail))
}

/// Request body for a manual adjustment.
#[derive(Debug, Deserialize)]
pub struct AdjustBody {
    /// Signed amount; negative removes coins.
    pub amount: i64,
    /// Required for negative amounts.
    pub justification: Option<String>,
    /// Lets a negative adjustment take the balance below zero.
    #[serde(default)]
    pub allow_negative: bool,
    /// Idempotency key.
    pub origin_event_id: String,
}

/// Request body for a purchase cancellation.
#[derive(Debug, Default, Deserialize)]
pub struct CancelBody {
    /// Why the purchase is cancelled.
    #[serde(default)]
    pub reason: Option<String>,
}

/// POST `/accounts/{student_id}/{discipline_id}/adjust` - Manual correction.
async fn adjust(
    State(state): State<AppState>,
    StaffActor(actor): StaffActor,
    Path((student_id, discipline_id)): Path<(StudentId, DisciplineId)>,
    Json(payload): Json<AdjustBody>,
) -> Result<impl IntoResponse, ApiError> {
    let request = AdjustRequest {
        actor,
        student_id,
        discipline_id,
        amount: payload.amount,
        justification: payload.justification,
        allow_negative: payload.allow_negative,
        origin_event_id: payload.origin_event_id,
    };
    let admin = &state.services.admin;
    let outcome = retry_stale(&state.services.retry, "adjust", || admin.adjust(&request)).await?;

    let effects = outcome.side_effects;
    if !effects.replayed && !(effects.audit_recorded && effects.notification_sent) {
        warn!(tx_id = %outcome.transaction.id, "Adjustment side effects queued for retry");
    }
    info!(account = %request.account(), actor_id = %actor.id, "Adjustment accepted");
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// POST `/accounts/{student_id}/{discipline_id}/cancel/{transaction_id}` -
/// Cancel a purchase and refund its coins.
async fn cancel_purchase(
    State(state): State<AppState>,
    StaffActor(actor): StaffActor,
    Path((student_id, discipline_id, transaction_id)): Path<(StudentId, DisciplineId, TransactionId)>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let payload: CancelBody = if body.is_empty() {
        CancelBody::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::Validation(format!("invalid cancellation body: {e}")))?
    };

    let key = AccountKey::new(student_id, discipline_id);
    let original = state.services.accounts.transaction(transaction_id).await?;
    if original.account != key {
        return Err(LedgerError::TransactionNotFound(transaction_id).into());
    }

    let request = CancelRequest {
        transaction_id,
        actor,
        reason: payload.reason,
    };
    let admin = &state.services.admin;
    let outcome = retry_stale(&state.services.retry, "cancel_purchase", || {
        admin.cancel_purchase(&request)
    })
    .await?;

    info!(account = %key, transaction_id = %transaction_id, actor_id = %actor.id, "Cancellation accepted");
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// GET `/accounts/{student_id}/{discipline_id}/audit` - Audit trail.
async fn audit_trail(
    State(state): State<AppState>,
    StaffActor(_actor): StaffActor,
    Path((student_id, discipline_id)): Path<(StudentId, DisciplineId)>,
) -> Result<impl IntoResponse, ApiError> {
    let key = AccountKey::new(student_id, discipline_id);
    let entries = state.services.admin.audit_trail(key).await?;
    Ok(Json(json!({ "entries": entries })))
}

//! Transfer Broker routes.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use serde::Deserialize;
use tracing::info;

use moeda_core::ledger::retry_stale;
use moeda_core::transfer::{SpendRequest, TransferRequest};
use moeda_shared::types::{DisciplineId, StudentId};

use crate::{ApiError, AppState};

/// Creates the transfer routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/accounts/{student_id}/{discipline_id}/transfer", post(transfer))
        .route("/accounts/{student_id}/{discipline_id}/spend", post(spend))
}

/// Request body for a transfer out of the path's account.
#[derive(Debug, Deserialize)]
pub struct TransferBody {
    /// Destination discipline.
    pub to: DisciplineId,
    /// Coins taken from the source, fee included.
    pub amount: i64,
    /// Idempotency key.
    pub origin_event_id: String,
}

/// Request body for a purchase.
#[derive(Debug, Deserialize)]
pub struct SpendBody {
    /// Price in coins.
    pub amount: i64,
    /// Idempotency key, typically the purchase id.
    pub origin_event_id: String,
}

/// POST `/accounts/{student_id}/{discipline_id}/transfer` - Move coins to
/// another discipline of the same student.
async fn transfer(
    State(state): State<AppState>,
    Path((student_id, discipline_id)): Path<(StudentId, DisciplineId)>,
    Json(payload): Json<TransferBody>,
) -> Result<impl IntoResponse, ApiError> {
    let request = TransferRequest {
        student_id,
        from: discipline_id,
        to: payload.to,
        amount: payload.amount,
        origin_event_id: payload.origin_event_id,
    };
    let transfers = &state.services.transfers;
    let receipt = retry_stale(&state.services.retry, "transfer", || transfers.transfer(&request)).await?;

    info!(
        student_id = %student_id,
        from = %request.from,
        to = %request.to,
        fee = receipt.fee,
        "Transfer accepted"
    );
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// POST `/accounts/{student_id}/{discipline_id}/spend` - Pay for points.
async fn spend(
    State(state): State<AppState>,
    Path((student_id, discipline_id)): Path<(StudentId, DisciplineId)>,
    Json(payload): Json<SpendBody>,
) -> Result<impl IntoResponse, ApiError> {
    let request = SpendRequest {
        student_id,
        discipline_id,
        amount: payload.amount,
        origin_event_id: payload.origin_event_id,
    };
    let transfers = &state.services.transfers;
    let receipt = retry_stale(&state.services.retry, "spend", || transfers.spend(&request)).await?;

    info!(student_id = %student_id, total = receipt.total(), pooled = receipt.pooled, "Spend accepted");
    Ok((StatusCode::CREATED, Json(receipt)))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{app, request, send, test_state};
    use axum::http::StatusCode;
    use moeda_shared::types::{DisciplineId, StudentId};
    use serde_json::json;

    async fn seed(state: &crate::AppState, student: StudentId, discipline: DisciplineId, amount: i64) {
        let (status, _) = send(
            app(state),
            request(
                "POST",
                &format!("/api/v1/accounts/{student}/{discipline}/credit"),
                None,
                Some(json!({ "amount": amount, "origin_event_id": "seed" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_transfer_charges_fee() {
        let state = test_state();
        let (student, from, to) = (StudentId::new(), DisciplineId::new(), DisciplineId::new());
        seed(&state, student, from, 100).await;

        let (status, receipt) = send(
            app(&state),
            request(
                "POST",
                &format!("/api/v1/accounts/{student}/{from}/transfer"),
                None,
                Some(json!({ "to": to, "amount": 100, "origin_event_id": "move-1" })),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(receipt["transfer_out"]["amount"], -100);
        assert_eq!(receipt["transfer_in"]["amount"], 90);
        assert_eq!(receipt["fee"], 10);

        let (_, pooled) = send(
            app(&state),
            request("GET", &format!("/api/v1/students/{student}/balance"), None, None),
        )
        .await;
        assert_eq!(pooled["balance"], 90);
    }

    #[tokio::test]
    async fn test_transfer_to_same_discipline_is_rejected() {
        let state = test_state();
        let (student, discipline) = (StudentId::new(), DisciplineId::new());
        seed(&state, student, discipline, 50).await;

        let (status, body) = send(
            app(&state),
            request(
                "POST",
                &format!("/api/v1/accounts/{student}/{discipline}/transfer"),
                None,
                Some(json!({ "to": discipline, "amount": 10, "origin_event_id": "move-1" })),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "transfer_not_applicable");
    }

    #[tokio::test]
    async fn test_spend_debits_discipline_account() {
        let state = test_state();
        let (student, discipline) = (StudentId::new(), DisciplineId::new());
        seed(&state, student, discipline, 40).await;

        let (status, receipt) = send(
            app(&state),
            request(
                "POST",
                &format!("/api/v1/accounts/{student}/{discipline}/spend"),
                None,
                Some(json!({ "amount": 25, "origin_event_id": "purchase-7" })),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(receipt["pooled"], false);
        assert_eq!(receipt["transactions"][0]["amount"], -25);
        assert_eq!(receipt["transactions"][0]["kind"], "spend");
    }
}

//! Distribution Rules Engine routes.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post};
use tracing::info;

use moeda_core::ledger::retry_stale;
use moeda_core::rules::AwardRequest;

use crate::{ApiError, AppState};

/// Creates the award routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/awards", post(award))
}

/// POST `/awards` - Reward a qualifying student event.
///
/// Returns 201 when coins were credited and 200 when the period cap left
/// nothing to pay.
async fn award(
    State(state): State<AppState>,
    Json(payload): Json<AwardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let rules = &state.services.rules;
    let outcome = retry_stale(&state.services.retry, "award", || rules.award(&payload)).await?;

    let status = if outcome.transaction.is_some() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    info!(
        student_id = %payload.student_id,
        event_type = %payload.event_type,
        granted = outcome.granted(),
        capped = outcome.cap_notice.is_some(),
        "Award processed"
    );
    Ok((status, Json(outcome)))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{app, request, send, test_state};
    use axum::http::StatusCode;
    use moeda_shared::types::{DisciplineId, StudentId};
    use serde_json::json;

    #[tokio::test]
    async fn test_award_credits_rule_amount() {
        let state = test_state();
        let (student, discipline) = (StudentId::new(), DisciplineId::new());

        let (status, outcome) = send(
            app(&state),
            request(
                "POST",
                "/api/v1/awards",
                None,
                Some(json!({
                    "student_id": student,
                    "discipline_id": discipline,
                    "event_type": "activity_delivered",
                    "origin_event_id": "delivery-1",
                })),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(outcome["transaction"]["amount"], 10);
        assert!(outcome["cap_notice"].is_null());
    }

    #[tokio::test]
    async fn test_award_replay_does_not_pay_twice() {
        let state = test_state();
        let (student, discipline) = (StudentId::new(), DisciplineId::new());
        let body = json!({
            "student_id": student,
            "discipline_id": discipline,
            "event_type": "summary_posted",
            "origin_event_id": "summary-9",
        });

        let (_, first) = send(app(&state), request("POST", "/api/v1/awards", None, Some(body.clone()))).await;
        let (_, second) = send(app(&state), request("POST", "/api/v1/awards", None, Some(body))).await;
        assert_eq!(first["transaction"]["id"], second["transaction"]["id"]);

        let (_, balance) = send(
            app(&state),
            request("GET", &format!("/api/v1/accounts/{student}/{discipline}/balance"), None, None),
        )
        .await;
        assert_eq!(balance["balance"], 5);
    }

    #[tokio::test]
    async fn test_unknown_event_type_is_rejected() {
        let state = test_state();
        let (status, _) = send(
            app(&state),
            request(
                "POST",
                "/api/v1/awards",
                None,
                Some(json!({
                    "student_id": StudentId::new(),
                    "discipline_id": DisciplineId::new(),
                    "event_type": "attended_class",
                    "origin_event_id": "x",
                })),
            ),
        )
        .await;

        assert!(status.is_client_error());
    }
}

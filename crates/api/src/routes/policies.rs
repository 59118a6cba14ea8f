//! Policy routes.

use axum::{Json, Router, extract::State, routing::get};
use tracing::info;

use moeda_core::audit::StaffRole;
use moeda_core::policy::PolicySnapshot;
use moeda_shared::config::PolicyConfig;

use crate::middleware::StaffActor;
use crate::{ApiError, AppState};

/// Creates the policy routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/policies", get(get_policies).put(replace_policies))
}

/// GET `/policies` - The active snapshot.
async fn get_policies(State(state): State<AppState>) -> Json<PolicySnapshot> {
    Json(PolicySnapshot::clone(&state.services.policies.current()))
}

/// PUT `/policies` - Replace every policy at once.
///
/// In-flight operations finish against the snapshot they started with.
async fn replace_policies(
    State(state): State<AppState>,
    actor: StaffActor,
    Json(payload): Json<PolicyConfig>,
) -> Result<Json<PolicySnapshot>, ApiError> {
    actor.require(&[StaffRole::Administrator, StaffRole::Coordinator])?;

    let snapshot = PolicySnapshot::from_config(&payload)?;
    let installed = state.services.policies.replace(snapshot)?;

    info!(version = installed.version, actor_id = %actor.0.id, "Policies replaced");
    Ok(Json(PolicySnapshot::clone(&installed)))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{app, request, send, test_state};
    use axum::http::StatusCode;
    use moeda_shared::types::{DisciplineId, StudentId};
    use serde_json::json;

    #[tokio::test]
    async fn test_get_returns_default_snapshot() {
        let state = test_state();
        let (status, body) = send(app(&state), request("GET", "/api/v1/policies", None, None)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], 1);
        assert_eq!(body["transfer"]["fee_percent"], 10);
        assert_eq!(body["rules"]["activity_delivered"]["base_amount"], 10);
    }

    #[tokio::test]
    async fn test_replace_bumps_version_and_applies_to_awards() {
        let state = test_state();
        let policy = json!({
            "rules": [{
                "event_type": "quiz_completed",
                "base_amount": 8,
                "per_period_cap": 12,
                "period_days": 7,
            }],
            "transfer": { "fee_percent": 0 },
        });

        let (status, body) = send(
            app(&state),
            request("PUT", "/api/v1/policies", Some("coordenador"), Some(policy)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], 2);

        let (student, discipline) = (StudentId::new(), DisciplineId::new());
        let award = |origin: &str| {
            request(
                "POST",
                "/api/v1/awards",
                None,
                Some(json!({
                    "student_id": student,
                    "discipline_id": discipline,
                    "event_type": "quiz_completed",
                    "origin_event_id": origin,
                })),
            )
        };
        let (status, first) = send(app(&state), award("quiz-1")).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(first["transaction"]["amount"], 8);

        let (status, second) = send(app(&state), award("quiz-2")).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(second["transaction"]["amount"], 4);
        assert_eq!(second["cap_notice"]["requested"], 8);

        let (status, third) = send(app(&state), award("quiz-3")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(third["transaction"].is_null());
    }

    #[tokio::test]
    async fn test_invalid_policy_keeps_current_snapshot() {
        let state = test_state();
        let (status, body) = send(
            app(&state),
            request(
                "PUT",
                "/api/v1/policies",
                Some("administrador"),
                Some(json!({ "transfer": { "fee_percent": 100 } })),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_policy");
        assert_eq!(state.services.policies.current().version, 1);
    }

    #[tokio::test]
    async fn test_teachers_cannot_replace_policies() {
        let state = test_state();
        let (status, _) = send(
            app(&state),
            request("PUT", "/api/v1/policies", Some("professor"), Some(json!({}))),
        )
        .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}

//! Health check endpoints.

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::AppState;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: &'static str,
    /// Service version.
    pub version: &'static str,
    /// Version of the active policy snapshot.
    pub policy_version: u64,
    /// Audit entries and notifications waiting for redelivery.
    pub pending_side_effects: usize,
}

/// Health check handler.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        policy_version: state.services.policies.current().version,
        pending_side_effects: state.services.outbox.pending_len(),
    })
}

/// Creates health check routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{app, request, send, test_state};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_health() {
        let state = test_state();
        let (status, body) = send(app(&state), request("GET", "/api/v1/health", None, None)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["policy_version"], 1);
        assert_eq!(body["pending_side_effects"], 0);
    }
}

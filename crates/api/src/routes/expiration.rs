//! Expiration Manager routes.

use axum::{Json, Router, body::Bytes, extract::State, routing::post};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use moeda_core::audit::StaffRole;
use moeda_core::expiration::SweepReport;
use moeda_shared::AppError;

use crate::middleware::StaffActor;
use crate::{ApiError, AppState};

/// Creates the expiration routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/expiration/sweep", post(sweep))
}

/// Request body for a manual sweep.
#[derive(Debug, Default, Deserialize)]
pub struct SweepBody {
    /// Instant to evaluate lots against; defaults to now.
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

/// POST `/expiration/sweep` - Run one expiration sweep now.
async fn sweep(
    State(state): State<AppState>,
    actor: StaffActor,
    body: Bytes,
) -> Result<Json<SweepReport>, ApiError> {
    actor.require(&[StaffRole::Administrator, StaffRole::Coordinator])?;
    let payload: SweepBody = if body.is_empty() {
        SweepBody::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::Validation(format!("invalid sweep body: {e}")))?
    };

    let as_of = payload.as_of.unwrap_or_else(|| state.services.accounts.now());
    Ok(Json(state.services.expiration.sweep(as_of).await?))
}

//! API error responses.
//!
//! Every failure is rendered as `{"error": "<code>", "message": "<text>"}`
//! with the status code the underlying error maps to.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use moeda_core::ledger::LedgerError;
use moeda_core::policy::PolicyError;
use moeda_shared::AppError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Error returned by handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Ledger operation failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Request-level failure (identity, permissions, input).
    #[error(transparent)]
    App(#[from] AppError),
}

impl From<PolicyError> for ApiError {
    fn from(err: PolicyError) -> Self {
        Self::Ledger(err.into())
    }
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        let code = match self {
            Self::Ledger(err) => err.http_status_code(),
            Self::App(err) => err.status_code(),
        };
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Machine-readable error code, lower snake case.
    #[must_use]
    pub fn code(&self) -> String {
        match self {
            Self::Ledger(err) => err.error_code(),
            Self::App(err) => err.error_code(),
        }
        .to_ascii_lowercase()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            error!(error = %self, "Request failed");
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        (
            status,
            Json(json!({
                "error": self.code(),
                "message": message
            })),
        )
            .into_response()
    }
}

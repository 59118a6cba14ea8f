//! HTTP API layer with Axum routes.
//!
//! This crate provides:
//! - REST routes over the ledger services
//! - Staff identity extraction from gateway headers
//! - Error to response mapping

pub mod error;
pub mod middleware;
pub mod routes;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use axum::Router;
use moeda_core::LedgerServices;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::ApiError;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The ledger and everything built on it.
    pub services: Arc<LedgerServices>,
}

impl AppState {
    /// Wraps the services for sharing across handlers.
    #[must_use]
    pub fn new(services: Arc<LedgerServices>) -> Self {
        Self { services }
    }
}

/// Creates the main application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

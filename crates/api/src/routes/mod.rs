//! API route definitions.

use axum::Router;

use crate::AppState;

pub mod accounts;
pub mod admin;
pub mod awards;
pub mod expiration;
pub mod health;
pub mod policies;
pub mod transfers;

/// Creates the API router with all routes.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(accounts::routes())
        .merge(transfers::routes())
        .merge(admin::routes())
        .merge(awards::routes())
        .merge(expiration::routes())
        .merge(policies::routes())
}

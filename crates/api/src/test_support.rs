//! Helpers for router tests.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header::CONTENT_TYPE},
};
use http_body_util::BodyExt;
use moeda_core::LedgerServices;
use moeda_shared::config::{LedgerConfig, PolicyConfig};
use moeda_shared::types::ActorId;
use serde_json::Value;
use tower::ServiceExt;

use crate::middleware::{ACTOR_ID_HEADER, ACTOR_ROLE_HEADER};
use crate::{AppState, create_router};

/// State over a fresh in-memory ledger with default policies.
pub(crate) fn test_state() -> AppState {
    let services = LedgerServices::in_memory(&LedgerConfig::default(), &PolicyConfig::default())
        .expect("default policies are valid");
    AppState::new(Arc::new(services))
}

/// A router over `state`.
pub(crate) fn app(state: &AppState) -> Router {
    create_router(state.clone())
}

/// Builds a JSON request; `role` adds staff identity headers.
pub(crate) fn request(method: &str, uri: &str, role: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(role) = role {
        builder = builder
            .header(ACTOR_ID_HEADER, ActorId::new().to_string())
            .header(ACTOR_ROLE_HEADER, role);
    }
    match body {
        Some(body) => builder
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Sends `request` and decodes the JSON response.
pub(crate) async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

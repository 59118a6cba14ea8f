//! Staff identity supplied by the auth gateway.
//!
//! The gateway authenticates staff and forwards who they are in two
//! headers. Handlers that act on behalf of staff take a [`StaffActor`].

use axum::{extract::FromRequestParts, http::request::Parts};
use moeda_core::audit::{Actor, StaffRole};
use moeda_shared::AppError;
use moeda_shared::types::ActorId;

use crate::ApiError;

/// Header carrying the staff member's id.
pub const ACTOR_ID_HEADER: &str = "x-actor-id";
/// Header carrying the staff member's role.
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

/// Extractor for the acting staff member.
///
/// ```ignore
/// async fn handler(StaffActor(actor): StaffActor) -> impl IntoResponse {
///     // actor.id, actor.role
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct StaffActor(pub Actor);

impl StaffActor {
    /// Fails with 403 unless the actor holds one of `roles`.
    pub fn require(&self, roles: &[StaffRole]) -> Result<(), ApiError> {
        if roles.contains(&self.0.role) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "role '{}' may not perform this action",
                self.0.role.as_str()
            ))
            .into())
        }
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, ApiError> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::Unauthorized(format!("{name} header is required")).into())
}

impl<S> FromRequestParts<S> for StaffActor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header(parts, ACTOR_ID_HEADER)?
            .parse::<ActorId>()
            .map_err(|_| AppError::Unauthorized(format!("{ACTOR_ID_HEADER} is not a valid id")))?;
        let role = header(parts, ACTOR_ROLE_HEADER)?
            .parse::<StaffRole>()
            .map_err(|_| AppError::Unauthorized(format!("{ACTOR_ROLE_HEADER} is not a staff role")))?;

        Ok(Self(Actor { id, role }))
    }
}

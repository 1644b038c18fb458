use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::app_state::AppState;
use crate::models::access::{Action, UserContext};
use crate::routes::error::ApiError;
use crate::services::policy;

/// Caller identity taken from the `Authorization: Bearer` header.
pub struct AuthUser(pub UserContext);

impl AuthUser {
    /// Server-side policy check; the client's check is only for display.
    pub fn require(&self, action: Action) -> Result<(), ApiError> {
        if policy::can_perform(&self.0.roles, action) {
            Ok(())
        } else {
            tracing::info!(user = %self.0.username, %action, "request denied by policy");
            Err(ApiError::Forbidden(action))
        }
    }

    pub fn username(&self) -> &str {
        &self.0.username
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::Unauthorized("expected a bearer token".to_string()))?;

        let user = state
            .tokens
            .verify(token.trim())
            .map_err(|e| ApiError::Unauthorized(e.to_string()))?;

        Ok(AuthUser(user))
    }
}

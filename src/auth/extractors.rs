use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use tracing::warn;
use uuid::Uuid;

use super::credentials::AuthError;
use crate::{error::ApiError, state::AppState};

/// Extracts the bearer token and resolves it to the caller's user ID.
pub struct AuthUser(pub Uuid);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("missing Authorization header".into()))?;

        // Expect "Bearer <token>"
        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .ok_or_else(|| ApiError::Unauthorized("invalid auth scheme".into()))?;

        match state.credentials.authenticate(token.trim()).await {
            Ok(user_id) => Ok(AuthUser(user_id)),
            Err(e @ (AuthError::Missing | AuthError::Invalid)) => {
                warn!(error = %e, "bearer token rejected");
                Err(ApiError::Unauthorized(e.to_string()))
            }
        }
    }
}

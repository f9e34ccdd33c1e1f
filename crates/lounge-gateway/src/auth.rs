use axum::http::HeaderMap;
use lounge_core::types::ChatUser;
use lounge_store::UserDirectory;

use crate::app::AppState;
use crate::http::ApiError;

/// Pull the token out of an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolve the caller from their bearer token.
pub async fn require_user(state: &AppState, headers: &HeaderMap) -> Result<ChatUser, ApiError> {
    let token = bearer_token(headers).ok_or(ApiError::Unauthorized)?;
    state
        .users
        .resolve_token(token)
        .await?
        .ok_or(ApiError::Unauthorized)
}

/// Like [`require_user`], but only admins get through.
pub async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<ChatUser, ApiError> {
    let user = require_user(state, headers).await?;
    if !user.is_admin() {
        return Err(ApiError::Forbidden);
    }
    Ok(user)
}

pub mod chat;
pub mod health;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use lounge_core::LoungeError;
use lounge_store::StoreError;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::error;

/// Errors surfaced by the REST endpoints, rendered as
/// `{"success": false, "error": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("admin access required")]
    Forbidden,

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Hub(#[from] LoungeError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(e) => match e {
                StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
                StoreError::PermissionDenied(_) | StoreError::Banned => StatusCode::FORBIDDEN,
                StoreError::InvalidContent(_) => StatusCode::BAD_REQUEST,
                StoreError::Database(_) | StoreError::Poisoned => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::Hub(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            error!(error = %self, "request failed");
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "success": false, "error": message }))).into_response()
    }
}

/// Wrap a payload in the `{"success": true, "data": ...}` envelope.
pub fn ok<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

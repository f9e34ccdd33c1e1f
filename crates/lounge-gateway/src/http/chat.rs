//! Community chat REST endpoints under `/community-chat`.
//!
//! Reads are public; deleting needs `Authorization: Bearer <token>`, and the
//! ban endpoints need an admin token. Successful deletes are pushed to every
//! live socket as `message_deleted`.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use lounge_core::config::HISTORY_LIMIT;
use lounge_protocol::ServerEvent;
use lounge_store::ChatStore;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::app::AppState;
use crate::auth::{require_admin, require_user};
use crate::http::{ok, ApiError};

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub limit: Option<usize>,
    pub before: Option<String>,
}

/// GET /community-chat/messages: newest first, paging backwards via `before`.
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Query(q): Query<MessagesQuery>,
) -> Result<Json<Value>, ApiError> {
    let before = q.before.as_deref().filter(|b| !b.is_empty());
    let messages = state
        .chat
        .recent(q.limit.unwrap_or(HISTORY_LIMIT), before)
        .await?;
    Ok(ok(messages))
}

/// GET /community-chat/online
pub async fn online_count(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let count = state.hub.online_count().await?;
    Ok(ok(json!({ "count": count })))
}

/// DELETE /community-chat/messages/{id}
pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let user = require_user(&state, &headers).await?;
    state.chat.delete_message(&id, &user)?;
    state
        .hub
        .broadcast(ServerEvent::MessageDeleted { id: id.clone() })
        .await?;
    info!(message_id = %id, deleted_by = %user.id(), "chat message deleted");
    Ok(ok(json!({ "message": "Message deleted" })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanRequest {
    pub user_id: String,
    pub reason: String,
    /// Hours; absent means permanent.
    pub duration: Option<u32>,
}

/// POST /community-chat/admin/ban
pub async fn ban_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<BanRequest>,
) -> Result<Json<Value>, ApiError> {
    let admin = require_admin(&state, &headers).await?;
    if req.user_id.trim().is_empty() || req.reason.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "userId and reason are required".to_string(),
        ));
    }
    state
        .chat
        .ban_user(&req.user_id, &req.reason, admin.id(), req.duration)?;
    Ok(ok(json!({ "message": "User banned" })))
}

/// DELETE /community-chat/admin/ban/{user_id}
pub async fn unban_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers).await?;
    state.chat.unban_user(&user_id)?;
    Ok(ok(json!({ "message": "User unbanned" })))
}

#[cfg(test)]
mod tests {
    use crate::app::{build_router, test_state, TestState};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use lounge_core::types::NewMessage;
    use lounge_store::ChatStore;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            req = req.header("authorization", format!("Bearer {t}"));
        }
        let body = match body {
            Some(v) => {
                req = req.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn post_message(fx: &TestState, content: &str) -> String {
        fx.state
            .chat
            .send(
                fx.member.id(),
                NewMessage {
                    content: content.to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn messages_are_listed_newest_first() {
        let fx = test_state();
        post_message(&fx, "first").await;
        post_message(&fx, "second").await;
        let app = build_router(fx.state.clone());

        let (status, body) = call(&app, "GET", "/community-chat/messages?limit=10", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"][0]["content"], "second");
        assert_eq!(body["data"][1]["content"], "first");
    }

    #[tokio::test]
    async fn online_count_comes_from_the_hub() {
        let fx = test_state();
        let app = build_router(fx.state.clone());

        let (status, body) = call(&app, "GET", "/community-chat/online", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["count"], 0);
    }

    #[tokio::test]
    async fn delete_requires_token_and_ownership() {
        let fx = test_state();
        let id = post_message(&fx, "mine").await;
        let app = build_router(fx.state.clone());
        let uri = format!("/community-chat/messages/{id}");

        let (status, body) = call(&app, "DELETE", &uri, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);

        let (status, _) = call(&app, "DELETE", &uri, Some("outsider-token"), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(&app, "DELETE", &uri, Some("member-token"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["message"], "Message deleted");

        let (status, _) = call(&app, "DELETE", &uri, Some("member-token"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = call(&app, "GET", "/community-chat/messages", None, None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn ban_endpoints_are_admin_only() {
        let fx = test_state();
        let app = build_router(fx.state.clone());
        let ban = serde_json::json!({ "userId": fx.member.id(), "reason": "spam", "duration": 2 });

        let (status, _) = call(&app, "POST", "/community-chat/admin/ban", Some("member-token"), Some(ban.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(&app, "POST", "/community-chat/admin/ban", Some("admin-token"), Some(ban)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["message"], "User banned");
        assert!(fx.state.chat.is_banned(fx.member.id()).unwrap());

        let uri = format!("/community-chat/admin/ban/{}", fx.member.id());
        let (status, _) = call(&app, "DELETE", &uri, Some("admin-token"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!fx.state.chat.is_banned(fx.member.id()).unwrap());
    }

    #[tokio::test]
    async fn ban_validates_body() {
        let fx = test_state();
        let app = build_router(fx.state.clone());

        let blank = serde_json::json!({ "userId": fx.member.id(), "reason": " " });
        let (status, body) = call(&app, "POST", "/community-chat/admin/ban", Some("admin-token"), Some(blank)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "userId and reason are required");

        let unknown = serde_json::json!({ "userId": "nobody", "reason": "spam" });
        let (status, _) = call(&app, "POST", "/community-chat/admin/ban", Some("admin-token"), Some(unknown)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_reports_online_count() {
        let fx = test_state();
        let app = build_router(fx.state.clone());

        let (status, body) = call(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["online"], 0);
    }
}

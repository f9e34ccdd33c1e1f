use axum::{
    routing::{delete, get, post},
    Router,
};
use lounge_core::config::LoungeConfig;
use lounge_store::{SqliteChatStore, SqliteUserDirectory};
use std::sync::Arc;

use crate::ws::hub::HubHandle;

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: LoungeConfig,
    pub hub: HubHandle,
    pub chat: Arc<SqliteChatStore>,
    pub users: Arc<SqliteUserDirectory>,
}

impl AppState {
    pub fn new(
        config: LoungeConfig,
        hub: HubHandle,
        chat: Arc<SqliteChatStore>,
        users: Arc<SqliteUserDirectory>,
    ) -> Self {
        Self {
            config,
            hub,
            chat,
            users,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/ws/chat", get(crate::ws::connection::chat_ws_handler))
        .route(
            "/community-chat/messages",
            get(crate::http::chat::list_messages),
        )
        .route(
            "/community-chat/messages/{id}",
            delete(crate::http::chat::delete_message),
        )
        .route("/community-chat/online", get(crate::http::chat::online_count))
        .route("/community-chat/admin/ban", post(crate::http::chat::ban_user))
        .route(
            "/community-chat/admin/ban/{user_id}",
            delete(crate::http::chat::unban_user),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) struct TestState {
    pub state: Arc<AppState>,
    pub member: lounge_core::types::ChatUser,
}

/// In-memory state with three users: `member-token`, `outsider-token` and
/// `admin-token`. Must be called inside a Tokio runtime.
#[cfg(test)]
pub(crate) fn test_state() -> TestState {
    use lounge_core::types::UserRole;
    use std::sync::Mutex;

    let conn = rusqlite::Connection::open_in_memory().unwrap();
    lounge_store::init_db(&conn).unwrap();
    let db = Arc::new(Mutex::new(conn));
    let users = Arc::new(SqliteUserDirectory::new(db.clone()));
    let member = users
        .create_user("mika", "Mika", 12, UserRole::User, "member-token")
        .unwrap();
    users
        .create_user("ren", "Ren", 3, UserRole::User, "outsider-token")
        .unwrap();
    users
        .create_user("mod", "Moderator", 99, UserRole::Admin, "admin-token")
        .unwrap();

    let config = LoungeConfig::default();
    let hub = crate::ws::hub::Hub::spawn(config.hub.control_capacity);
    let chat = Arc::new(SqliteChatStore::new(db));
    TestState {
        state: Arc::new(AppState::new(config, hub, chat, users)),
        member,
    }
}

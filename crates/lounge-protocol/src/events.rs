use lounge_core::types::{ChatMessage, UserInfo};
use serde::{Deserialize, Serialize};

/// Server → Client push event.
/// Wire: `{ "type": "online_count", "data": { "count": 3 } }`; `pong` carries no `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A freshly persisted chat message, broadcast to everyone.
    Message(ChatMessage),
    UserJoin {
        user: UserInfo,
    },
    UserLeave {
        #[serde(rename = "userId")]
        user_id: String,
    },
    OnlineCount {
        count: usize,
    },
    /// Recent messages, most recent first. Unicast on join.
    History {
        messages: Vec<ChatMessage>,
    },
    Pong,
    /// Private failure notice for the connection that caused it.
    Error {
        message: String,
    },
    MessageDeleted {
        id: String,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    /// Wire tag, handy for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Message(_) => "message",
            ServerEvent::UserJoin { .. } => "user_join",
            ServerEvent::UserLeave { .. } => "user_leave",
            ServerEvent::OnlineCount { .. } => "online_count",
            ServerEvent::History { .. } => "history",
            ServerEvent::Pong => "pong",
            ServerEvent::Error { .. } => "error",
            ServerEvent::MessageDeleted { .. } => "message_deleted",
        }
    }

    /// Serialize to the JSON text sent over the wire.
    pub fn to_json(&self) -> lounge_core::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

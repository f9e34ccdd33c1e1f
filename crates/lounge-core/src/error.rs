use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoungeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("WebSocket protocol error: {0}")]
    Protocol(String),

    /// The hub control loop is gone; only happens during process shutdown.
    #[error("Broadcast hub is not running")]
    HubClosed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LoungeError {
    /// Short error code string used in logs and HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            LoungeError::Config(_) => "CONFIG_ERROR",
            LoungeError::Protocol(_) => "PROTOCOL_ERROR",
            LoungeError::HubClosed => "HUB_CLOSED",
            LoungeError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, LoungeError>;

use thiserror::Error;

/// Errors raised by the chat store and user directory.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record does not exist (or was soft-deleted).
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("you are banned from chat")]
    Banned,

    #[error("invalid message: {0}")]
    InvalidContent(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("database lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// Text safe to show the end user. Storage internals are not leaked.
    pub fn client_message(&self) -> String {
        match self {
            StoreError::Database(_) | StoreError::Poisoned => "failed to send message".to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

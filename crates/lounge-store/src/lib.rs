//! `lounge-store`: SQLite-backed collaborators for the chat hub.
//!
//! The hub only sees the [`ChatStore`] and [`UserDirectory`] traits; the
//! SQLite implementations here exist so the gateway runs standalone.

pub mod chat;
pub mod db;
pub mod error;
pub mod users;

pub use chat::{ChatStore, SqliteChatStore};
pub use db::init_db;
pub use error::{Result, StoreError};
pub use users::{SqliteUserDirectory, UserDirectory};

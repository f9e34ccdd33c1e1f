use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use lounge_core::types::{level_badge, ChatUser, UserId, UserInfo, UserRole};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info, instrument};

use crate::db::timestamp;
use crate::error::{Result, StoreError};

/// Resolves an already-issued bearer token to a chat identity.
///
/// Issuing tokens and checking passwords belongs to the site's auth service;
/// the hub only needs the lookup.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn resolve_token(&self, token: &str) -> Result<Option<ChatUser>>;
}

/// SQLite user directory, sharing its connection with [`crate::SqliteChatStore`].
pub struct SqliteUserDirectory {
    db: Arc<Mutex<Connection>>,
}

const USER_SELECT_SQL: &str = "SELECT id, username, display_name, level, avatar, role FROM users";

/// Map a SELECT row (column order from USER_SELECT_SQL) to a ChatUser.
pub(crate) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatUser> {
    let level: u32 = row.get(3)?;
    let role: String = row.get(5)?;
    Ok(ChatUser {
        info: UserInfo {
            id: row.get(0)?,
            username: row.get(1)?,
            display_name: row.get(2)?,
            level,
            level_badge: level_badge(level).to_string(),
            avatar: row.get(4)?,
        },
        role: role.parse().unwrap_or_default(),
    })
}

impl SqliteUserDirectory {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Create a user and attach a bearer token to it.
    #[instrument(skip(self, display_name, token))]
    pub fn create_user(
        &self,
        username: &str,
        display_name: &str,
        level: u32,
        role: UserRole,
        token: &str,
    ) -> Result<ChatUser> {
        let id = UserId::new();
        let db = self.lock()?;
        db.execute(
            "INSERT INTO users (id, username, display_name, level, role, token, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                id.as_str(),
                username,
                display_name,
                level,
                role.as_str(),
                token,
                timestamp(Utc::now())
            ],
        )?;
        info!(user_id = %id, "user created");
        Ok(ChatUser {
            info: UserInfo {
                id: id.to_string(),
                username: username.to_string(),
                display_name: display_name.to_string(),
                level,
                level_badge: level_badge(level).to_string(),
                avatar: String::new(),
            },
            role,
        })
    }

    /// Look a user up by id.
    pub fn get(&self, user_id: &str) -> Result<Option<ChatUser>> {
        let db = self.lock()?;
        let user = db
            .query_row(
                &format!("{USER_SELECT_SQL} WHERE id = ?1"),
                [user_id],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }
}

#[async_trait]
impl UserDirectory for SqliteUserDirectory {
    #[instrument(skip_all)]
    async fn resolve_token(&self, token: &str) -> Result<Option<ChatUser>> {
        if token.is_empty() {
            return Ok(None);
        }
        let db = self.lock()?;
        let user = db
            .query_row(
                &format!("{USER_SELECT_SQL} WHERE token = ?1"),
                [token],
                row_to_user,
            )
            .optional()?;
        debug!(found = user.is_some(), "token lookup");
        Ok(user)
    }
}

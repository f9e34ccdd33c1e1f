use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use lounge_core::config::{HISTORY_LIMIT, MAX_MESSAGE_CHARS, MAX_PAGE_SIZE};
use lounge_core::types::{ChatMessage, ChatUser, NewMessage, UserInfo, VideoInfo};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::db::{parse_timestamp, timestamp};
use crate::error::{Result, StoreError};

/// Persistence boundary the hub depends on: store-and-render plus history.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Persist a message from `user_id` and return it rendered for clients.
    async fn send(&self, user_id: &str, message: NewMessage) -> Result<ChatMessage>;

    /// Up to `limit` messages, most recent first, strictly older than
    /// `before` when that message exists.
    async fn recent(&self, limit: usize, before: Option<&str>) -> Result<Vec<ChatMessage>>;
}

/// SQLite chat store. Shares one connection with the user directory so
/// rendered messages can join the author's profile.
pub struct SqliteChatStore {
    db: Arc<Mutex<Connection>>,
}

const MESSAGE_SELECT_SQL: &str = "
    SELECT m.id, m.content, m.created_at, m.reply_to_id,
           u.id, u.username, u.display_name, u.level, u.avatar,
           v.id, v.title, v.thumbnail
    FROM chat_messages m
    JOIN users u ON u.id = m.user_id
    LEFT JOIN videos v ON v.id = m.mentioned_video_id";

/// A message row before its reply target is attached.
struct MessageRow {
    message: ChatMessage,
    reply_to_id: Option<String>,
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    let created_at: String = row.get(2)?;
    let user = row_to_user_at(row, 4)?;
    let video_id: Option<String> = row.get(9)?;
    let mentioned_video = match video_id {
        Some(id) => {
            let title: String = row.get(10)?;
            Some(VideoInfo {
                id,
                code: VideoInfo::code_from_title(&title),
                title,
                thumbnail: row.get(11)?,
            })
        }
        None => None,
    };
    Ok(MessageRow {
        message: ChatMessage {
            id: row.get(0)?,
            user,
            content: row.get(1)?,
            mentioned_video,
            reply_to: None,
            created_at: parse_timestamp(2, &created_at)?,
        },
        reply_to_id: row.get(3)?,
    })
}

/// The user columns sit at an offset inside the joined message row.
fn row_to_user_at(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<UserInfo> {
    let level: u32 = row.get(offset + 3)?;
    Ok(UserInfo {
        id: row.get(offset)?,
        username: row.get(offset + 1)?,
        display_name: row.get(offset + 2)?,
        level,
        level_badge: lounge_core::types::level_badge(level).to_string(),
        avatar: row.get(offset + 4)?,
    })
}

/// Load one message by id and attach its reply target (one level deep).
fn load_message(db: &Connection, id: &str) -> Result<Option<ChatMessage>> {
    let Some(row) = query_message(db, id, false)? else {
        return Ok(None);
    };
    Ok(Some(attach_reply(db, row)?))
}

fn query_message(db: &Connection, id: &str, include_deleted: bool) -> Result<Option<MessageRow>> {
    let sql = if include_deleted {
        format!("{MESSAGE_SELECT_SQL} WHERE m.id = ?1")
    } else {
        format!("{MESSAGE_SELECT_SQL} WHERE m.id = ?1 AND m.is_deleted = 0")
    };
    Ok(db.query_row(&sql, [id], row_to_message).optional()?)
}

fn attach_reply(db: &Connection, row: MessageRow) -> Result<ChatMessage> {
    let MessageRow {
        mut message,
        reply_to_id,
    } = row;
    if let Some(parent_id) = reply_to_id {
        message.reply_to = query_message(db, &parent_id, true)?.map(|p| Box::new(p.message));
    }
    Ok(message)
}

fn is_banned_locked(db: &Connection, user_id: &str) -> Result<bool> {
    let count: i64 = db.query_row(
        "SELECT COUNT(*) FROM chat_bans
         WHERE user_id = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
        rusqlite::params![user_id, timestamp(Utc::now())],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

fn exists(db: &Connection, sql: &str, id: &str) -> Result<bool> {
    Ok(db.query_row(sql, [id], |_| Ok(())).optional()?.is_some())
}

impl SqliteChatStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Register a catalog video so chat messages can mention it.
    pub fn add_video(&self, title: &str, thumbnail: &str) -> Result<VideoInfo> {
        let id = Uuid::now_v7().to_string();
        let db = self.lock()?;
        db.execute(
            "INSERT INTO videos (id, title, thumbnail, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![id, title, thumbnail, timestamp(Utc::now())],
        )?;
        Ok(VideoInfo {
            code: VideoInfo::code_from_title(title),
            id,
            title: title.to_string(),
            thumbnail: thumbnail.to_string(),
        })
    }

    /// Soft-delete a message. Authors may delete their own; admins any.
    #[instrument(skip(self, actor), fields(actor = %actor.id()))]
    pub fn delete_message(&self, message_id: &str, actor: &ChatUser) -> Result<()> {
        let db = self.lock()?;
        let owner: Option<String> = db
            .query_row(
                "SELECT user_id FROM chat_messages WHERE id = ?1 AND is_deleted = 0",
                [message_id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(owner) = owner else {
            return Err(StoreError::NotFound {
                what: "message",
                id: message_id.to_string(),
            });
        };
        if !actor.is_admin() && owner != actor.id() {
            return Err(StoreError::PermissionDenied(
                "you can only delete your own messages".to_string(),
            ));
        }
        db.execute(
            "UPDATE chat_messages SET is_deleted = 1 WHERE id = ?1",
            [message_id],
        )?;
        info!(message_id, "chat message deleted");
        Ok(())
    }

    /// Ban a user from chat, permanently or for `duration_hours`.
    /// Re-banning replaces the previous ban.
    #[instrument(skip(self, reason))]
    pub fn ban_user(
        &self,
        user_id: &str,
        reason: &str,
        banned_by: &str,
        duration_hours: Option<u32>,
    ) -> Result<()> {
        let now = Utc::now();
        let expires_at = duration_hours
            .filter(|h| *h > 0)
            .map(|h| timestamp(now + chrono::Duration::hours(i64::from(h))));
        let db = self.lock()?;
        if !exists(&db, "SELECT 1 FROM users WHERE id = ?1", user_id)? {
            return Err(StoreError::NotFound {
                what: "user",
                id: user_id.to_string(),
            });
        }
        db.execute(
            "INSERT OR REPLACE INTO chat_bans (user_id, reason, banned_by, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![user_id, reason, banned_by, expires_at, timestamp(now)],
        )?;
        info!(user_id, banned_by, "user banned from chat");
        Ok(())
    }

    /// Lift a ban. Unbanning a user who is not banned is not an error.
    #[instrument(skip(self))]
    pub fn unban_user(&self, user_id: &str) -> Result<()> {
        let db = self.lock()?;
        db.execute("DELETE FROM chat_bans WHERE user_id = ?1", [user_id])?;
        info!(user_id, "user unbanned from chat");
        Ok(())
    }

    pub fn is_banned(&self, user_id: &str) -> Result<bool> {
        let db = self.lock()?;
        is_banned_locked(&db, user_id)
    }
}

#[async_trait]
impl ChatStore for SqliteChatStore {
    #[instrument(skip(self, message))]
    async fn send(&self, user_id: &str, message: NewMessage) -> Result<ChatMessage> {
        if message.content.trim().is_empty() {
            return Err(StoreError::InvalidContent("message cannot be empty".to_string()));
        }
        if message.content.chars().count() > MAX_MESSAGE_CHARS {
            return Err(StoreError::InvalidContent(format!(
                "message exceeds {MAX_MESSAGE_CHARS} characters"
            )));
        }

        let db = self.lock()?;
        if is_banned_locked(&db, user_id)? {
            return Err(StoreError::Banned);
        }

        // dangling references are dropped rather than rejected
        let reply_to = match message.reply_to.as_deref() {
            Some(id)
                if exists(
                    &db,
                    "SELECT 1 FROM chat_messages WHERE id = ?1 AND is_deleted = 0",
                    id,
                )? =>
            {
                Some(id)
            }
            _ => None,
        };
        let video = match message.video_id.as_deref() {
            Some(id) if exists(&db, "SELECT 1 FROM videos WHERE id = ?1", id)? => Some(id),
            _ => None,
        };

        let id = Uuid::now_v7().to_string();
        db.execute(
            "INSERT INTO chat_messages
             (id, user_id, content, mentioned_video_id, reply_to_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![id, user_id, message.content, video, reply_to, timestamp(Utc::now())],
        )?;
        info!(message_id = %id, "chat message sent");

        load_message(&db, &id)?.ok_or(StoreError::NotFound {
            what: "message",
            id,
        })
    }

    #[instrument(skip(self))]
    async fn recent(&self, limit: usize, before: Option<&str>) -> Result<Vec<ChatMessage>> {
        let limit = if limit == 0 || limit > MAX_PAGE_SIZE {
            HISTORY_LIMIT
        } else {
            limit
        };

        let db = self.lock()?;
        let cursor: Option<i64> = match before {
            Some(id) => db
                .query_row("SELECT rowid FROM chat_messages WHERE id = ?1", [id], |r| {
                    r.get(0)
                })
                .optional()?,
            None => None,
        };

        let mut stmt = db.prepare(&format!(
            "{MESSAGE_SELECT_SQL}
             WHERE m.is_deleted = 0 AND (?1 IS NULL OR m.rowid < ?1)
             ORDER BY m.rowid DESC
             LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(rusqlite::params![cursor, limit as i64], row_to_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        debug!(count = rows.len(), "loaded chat history");

        rows.into_iter().map(|row| attach_reply(&db, row)).collect()
    }
}

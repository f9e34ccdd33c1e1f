use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

use crate::error::Result;

/// Initialise every table used by the chat subsystem.
///
/// Safe to call on every startup; uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id            TEXT PRIMARY KEY NOT NULL,
            username      TEXT NOT NULL UNIQUE,
            display_name  TEXT NOT NULL,
            avatar        TEXT NOT NULL DEFAULT '',
            level         INTEGER NOT NULL DEFAULT 1,
            role          TEXT NOT NULL DEFAULT 'user',
            token         TEXT UNIQUE,
            created_at    TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS videos (
            id            TEXT PRIMARY KEY NOT NULL,
            title         TEXT NOT NULL,
            thumbnail     TEXT NOT NULL DEFAULT '',
            created_at    TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS chat_messages (
            id                  TEXT PRIMARY KEY NOT NULL,
            user_id             TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            content             TEXT NOT NULL,
            mentioned_video_id  TEXT,
            reply_to_id         TEXT,
            is_deleted          INTEGER NOT NULL DEFAULT 0,
            created_at          TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_chat_messages_user
            ON chat_messages(user_id);
        CREATE TABLE IF NOT EXISTS chat_bans (
            user_id     TEXT PRIMARY KEY NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            reason      TEXT NOT NULL DEFAULT '',
            banned_by   TEXT,
            expires_at  TEXT,
            created_at  TEXT NOT NULL
        );",
    )?;
    Ok(())
}

/// Fixed-width UTC timestamp so stored values compare correctly as text.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

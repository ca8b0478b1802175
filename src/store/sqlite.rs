//! SQLite-backed state store
//!
//! Thread-safe wrapper around a single rusqlite connection. Queries are short
//! and index-backed, so they run inline on the calling task while the
//! connection mutex is held; the mutex is never held across an `.await`.

use super::{BanRecord, MenfessAudit, StateStore, StoreError, UserRecord};
use crate::sqlite_pragma::apply_optimized_pragmas;
use crate::types::{Category, ChatId, UserId};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const SCHEMA: &str = include_str!("../../sql/001_bot_schema.sql");

#[derive(Debug)]
pub struct SqliteStateStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStateStore {
    /// Open (or create) the database file and apply the schema
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Database(format!(
                        "Failed to create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        apply_optimized_pragmas(&conn)?;
        conn.execute_batch(SCHEMA)?;

        log::info!("✅ State store ready at {}", db_path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Volatile database, schema applied. WAL is not available here.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection mutex poisoned".to_string()))
    }

    /// Bans whose expiry is at or before `now`, used by the admin tool
    pub fn list_expired_bans(&self, now: i64) -> Result<Vec<BanRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT chat_id, user_id, reason, created_at, expires_at, strikes, restricted
             FROM bans WHERE expires_at <= ?1 ORDER BY expires_at ASC",
        )?;
        let rows = stmt.query_map(params![now], ban_from_row)?;
        let bans = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(bans)
    }

    /// Number of audit rows for an author
    pub fn audit_count(&self, author_id: UserId) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM menfess_audit WHERE author_id = ?1",
            params![author_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

impl Clone for SqliteStateStore {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
        }
    }
}

fn ban_from_row(row: &Row<'_>) -> rusqlite::Result<BanRecord> {
    Ok(BanRecord {
        chat_id: row.get(0)?,
        user_id: row.get(1)?,
        reason: row.get(2)?,
        created_at: row.get(3)?,
        expires_at: row.get(4)?,
        strikes: row.get(5)?,
        restricted: row.get(6)?,
    })
}

fn parse_category(raw: Option<String>) -> Result<Option<Category>, StoreError> {
    match raw {
        None => Ok(None),
        Some(s) => Category::parse(&s)
            .map(Some)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown category '{}'", s))),
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get_user(&self, user_id: UserId) -> Result<Option<UserRecord>, StoreError> {
        let raw = {
            let conn = self.conn()?;
            conn.query_row(
                "SELECT user_id, handle, welcomed, category FROM users WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, bool>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?
        };

        match raw {
            None => Ok(None),
            Some((id, handle, welcomed, category)) => Ok(Some(UserRecord {
                id,
                handle,
                welcomed,
                category: parse_category(category)?,
            })),
        }
    }

    async fn put_user(&self, user: &UserRecord) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO users (user_id, handle, welcomed, category)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(user_id) DO UPDATE SET
                handle = excluded.handle,
                welcomed = excluded.welcomed,
                category = excluded.category
            "#,
            params![
                user.id,
                user.handle,
                user.welcomed,
                user.category.map(|c| c.as_str()),
            ],
        )?;
        Ok(())
    }

    async fn get_ban(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Result<Option<BanRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT chat_id, user_id, reason, created_at, expires_at, strikes, restricted
             FROM bans WHERE chat_id = ?1 AND user_id = ?2",
        )?;
        let ban = stmt
            .query_row(params![chat_id, user_id], ban_from_row)
            .optional()?;
        Ok(ban)
    }

    async fn put_ban(&self, ban: &BanRecord) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO bans (chat_id, user_id, reason, created_at, expires_at, strikes, restricted)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(chat_id, user_id) DO UPDATE SET
                reason = excluded.reason,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at,
                strikes = excluded.strikes,
                restricted = excluded.restricted
            "#,
            params![
                ban.chat_id,
                ban.user_id,
                ban.reason,
                ban.created_at,
                ban.expires_at,
                ban.strikes,
                ban.restricted,
            ],
        )?;
        Ok(())
    }

    async fn delete_ban(&self, chat_id: ChatId, user_id: UserId) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM bans WHERE chat_id = ?1 AND user_id = ?2",
            params![chat_id, user_id],
        )?;
        Ok(removed > 0)
    }

    async fn list_active_bans(&self) -> Result<Vec<BanRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT chat_id, user_id, reason, created_at, expires_at, strikes, restricted
             FROM bans ORDER BY expires_at ASC",
        )?;
        let rows = stmt.query_map([], ban_from_row)?;
        let bans = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(bans)
    }

    async fn append_audit(&self, entry: &MenfessAudit) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO menfess_audit (author_id, handle, category, body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.author_id,
                entry.handle,
                entry.category.as_str(),
                entry.body,
                entry.created_at,
            ],
        )?;
        Ok(())
    }
}

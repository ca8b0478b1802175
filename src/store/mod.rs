//! Persistent state for users, temporary bans and the menfess audit trail
//!
//! The store is the single source of truth for ban state. Nothing else in
//! the crate caches ban records beyond one tick or one event-handling
//! sequence, so edits made directly in the database (for example by the
//! `ban_admin` tool) are picked up on the next read.
//!
//! Two backends:
//! - `SqliteStateStore` - durable, used by the runtime
//! - `InMemoryStateStore` - volatile, used by tests and dry runs

pub mod memory;
pub mod sqlite;

use crate::types::{Category, ChatId, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use memory::InMemoryStateStore;
pub use sqlite::SqliteStateStore;

#[derive(Debug)]
pub enum StoreError {
    Database(String),
    Corrupt(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Corrupt(e) => write!(f, "Corrupt record: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

/// A user the bot has interacted with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub handle: Option<String>,
    pub welcomed: bool,
    /// Category recorded by the first accepted menfess
    pub category: Option<Category>,
}

impl UserRecord {
    pub fn new(id: UserId, handle: Option<String>) -> Self {
        Self {
            id,
            handle,
            welcomed: false,
            category: None,
        }
    }
}

/// An active temporary ban
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanRecord {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub reason: String,
    pub created_at: i64,
    pub expires_at: i64,
    /// 1 on creation, incremented each time a repeat policy extends the ban
    pub strikes: u32,
    /// `false` until the platform has accepted the restriction
    pub restricted: bool,
}

impl BanRecord {
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    pub fn remaining_secs(&self, now: i64) -> i64 {
        (self.expires_at - now).max(0)
    }
}

/// Audit row written after a menfess has been relayed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenfessAudit {
    pub author_id: UserId,
    pub handle: Option<String>,
    pub category: Category,
    pub body: String,
    pub created_at: i64,
}

/// Key/value and record interface consumed by every component
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_user(&self, user_id: UserId) -> Result<Option<UserRecord>, StoreError>;

    /// Insert or replace a user
    async fn put_user(&self, user: &UserRecord) -> Result<(), StoreError>;

    async fn get_ban(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Result<Option<BanRecord>, StoreError>;

    /// Insert or replace the ban for `(chat_id, user_id)`
    ///
    /// Never creates a second row for the same pair.
    async fn put_ban(&self, ban: &BanRecord) -> Result<(), StoreError>;

    /// Returns `true` if a row was removed
    async fn delete_ban(&self, chat_id: ChatId, user_id: UserId) -> Result<bool, StoreError>;

    /// Every ban not yet lifted, ordered by `expires_at`
    async fn list_active_bans(&self) -> Result<Vec<BanRecord>, StoreError>;

    async fn append_audit(&self, entry: &MenfessAudit) -> Result<(), StoreError>;
}

//! Messaging-platform client seam
//!
//! The bot never talks to the platform transport directly. Everything goes
//! through `PlatformClient`, which a deployment implements on top of its bot
//! API library. The moderation and media code depend only on the contracts
//! documented here.

use crate::types::{ChatId, MediaKind, MessageId, UserId};
use async_trait::async_trait;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub enum PlatformError {
    /// Transport failure (timeout, connection reset, 5xx)
    Network(String),
    /// The platform refused the request (permissions, payload too large, ...)
    Rejected(String),
    /// Chat, user, message or file does not exist
    NotFound(String),
}

impl std::fmt::Display for PlatformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlatformError::Network(e) => write!(f, "Platform network error: {}", e),
            PlatformError::Rejected(e) => write!(f, "Platform rejected request: {}", e),
            PlatformError::NotFound(e) => write!(f, "Platform object not found: {}", e),
        }
    }
}

impl std::error::Error for PlatformError {}

/// Where the bytes of an outgoing media message come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadSource {
    /// Local file produced by the media pipeline
    File(PathBuf),
    /// Media already stored by the platform
    Reference(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMedia {
    pub kind: MediaKind,
    pub source: UploadSource,
    pub caption: Option<String>,
}

#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Send a plain-text message, returns the new message id
    async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<MessageId, PlatformError>;

    async fn delete_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<(), PlatformError>;

    /// Prevent `user_id` from posting in `chat_id` until the unix time `until`
    async fn restrict_user(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        until: i64,
    ) -> Result<(), PlatformError>;

    /// Lift any restriction. Lifting an unrestricted user is not an error.
    async fn unrestrict_user(&self, chat_id: ChatId, user_id: UserId) -> Result<(), PlatformError>;

    async fn upload_media(
        &self,
        chat_id: ChatId,
        media: &OutgoingMedia,
    ) -> Result<MessageId, PlatformError>;

    /// True for chat administrators and the chat creator
    async fn is_chat_admin(&self, chat_id: ChatId, user_id: UserId) -> Result<bool, PlatformError>;

    /// Turn a platform file reference into a downloadable URL
    async fn resolve_file_url(&self, file_ref: &str) -> Result<String, PlatformError>;
}

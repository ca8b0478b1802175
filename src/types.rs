//! Shared identifiers and inbound message shapes
//!
//! These are the platform-neutral views of what the messaging client hands
//! to the dispatcher. Transport-specific fields are stripped before this point.

use serde::{Deserialize, Serialize};

pub type ChatId = i64;
pub type UserId = i64;
pub type MessageId = i64;

/// Author of an inbound message or a member joining a chat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub id: UserId,
    pub handle: Option<String>,
    pub first_name: String,
    pub is_bot: bool,
}

impl Sender {
    /// Name used in chat announcements
    pub fn display_name(&self) -> &str {
        if !self.first_name.is_empty() {
            return &self.first_name;
        }
        self.handle.as_deref().unwrap_or("-")
    }

    /// `@handle` or a placeholder, for audit output only
    pub fn mention(&self) -> String {
        match &self.handle {
            Some(h) => format!("@{}", h),
            None => "(no username)".to_string(),
        }
    }
}

/// Menfess category tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Male,
    Female,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Male, Category::Female];

    /// Exact match against the recognized tags (no `#`, no case folding)
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "male" => Some(Category::Male),
            "female" => Some(Category::Female),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Male => "male",
            Category::Female => "female",
        }
    }

    pub fn hashtag(&self) -> String {
        format!("#{}", self.as_str())
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse media classification used for delivery and conversion decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Photo,
    Video,
    Audio,
    Document,
}

impl MediaKind {
    pub fn from_extension(ext: &str) -> Self {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "bmp" => MediaKind::Photo,
            "mp4" | "mkv" | "webm" | "mov" => MediaKind::Video,
            "mp3" | "m4a" | "aac" | "opus" | "ogg" | "wav" | "flac" => MediaKind::Audio,
            _ => MediaKind::Document,
        }
    }

    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        match essence.split('/').next() {
            Some("image") => Some(MediaKind::Photo),
            Some("video") => Some(MediaKind::Video),
            Some("audio") => Some(MediaKind::Audio),
            _ => None,
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, MediaKind::Audio)
    }
}

/// Media already hosted by the platform and referenced by id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub kind: MediaKind,
    pub file_ref: String,
}

/// A message as seen by the dispatcher
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub sender: Sender,
    pub text: Option<String>,
    pub caption: Option<String>,
    /// Targets of hidden links (rich-text links whose URL is not in the text)
    pub link_targets: Vec<String>,
    pub attachment: Option<Attachment>,
}

impl InboundMessage {
    /// Text body, falling back to the media caption
    pub fn body(&self) -> &str {
        self.text
            .as_deref()
            .or(self.caption.as_deref())
            .unwrap_or("")
    }

    /// Text and caption joined, for link scanning
    pub fn searchable_text(&self) -> String {
        format!(
            "{} {}",
            self.text.as_deref().unwrap_or(""),
            self.caption.as_deref().unwrap_or("")
        )
    }
}

//! Anonymous tagged posts ("menfess")
//!
//! A submission is validated, stripped of its author, and broadcast to the
//! configured channel. The author is kept only in the audit trail (store and
//! log channel). Duplicate submissions are relayed twice; there is no dedup.
//!
//! Submissions from one author are serialized, so the category lock and the
//! daily quota hold under concurrent posts.

use super::quota::{QuotaExceeded, QuotaKind, QuotaTracker, QuotaUsage};
use crate::clock::Clock;
use crate::moderation::keyed_lock::KeyedLocks;
use crate::platform::{OutgoingMedia, PlatformClient, PlatformError, UploadSource};
use crate::store::{MenfessAudit, StateStore, StoreError, UserRecord};
use crate::text::{human_duration, sanitize, CAPTION_LIMIT, MESSAGE_LIMIT};
use crate::types::{Attachment, Category, ChatId, MediaKind, MessageId, Sender, UserId};
use std::sync::Arc;

#[derive(Debug)]
pub enum RelayError {
    /// Category is not exactly one of the recognized tags
    MissingCategory,
    /// Body is empty after trimming
    EmptyBody,
    /// Author already posted under another category
    CategoryMismatch { recorded: Category },
    QuotaExceeded(QuotaExceeded),
    DeliveryFailure(PlatformError),
    Store(StoreError),
}

impl From<StoreError> for RelayError {
    fn from(err: StoreError) -> Self {
        RelayError::Store(err)
    }
}

impl From<QuotaExceeded> for RelayError {
    fn from(err: QuotaExceeded) -> Self {
        RelayError::QuotaExceeded(err)
    }
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayError::MissingCategory => write!(f, "Missing or unknown category tag"),
            RelayError::EmptyBody => write!(f, "Post body is empty"),
            RelayError::CategoryMismatch { recorded } => {
                write!(f, "Author is already recorded as {}", recorded)
            }
            RelayError::QuotaExceeded(e) => write!(f, "{}", e),
            RelayError::DeliveryFailure(e) => write!(f, "Broadcast failed: {}", e),
            RelayError::Store(e) => write!(f, "Relay store error: {}", e),
        }
    }
}

impl std::error::Error for RelayError {}

impl RelayError {
    /// Reply shown to the submitter
    pub fn user_message(&self) -> String {
        match self {
            RelayError::MissingCategory => {
                let tags: Vec<String> = Category::ALL.iter().map(|c| c.hashtag()).collect();
                format!("❌ Post rejected.\nUse {}", tags.join(" or "))
            }
            RelayError::EmptyBody => "❌ Post rejected.\nThe message is empty.".to_string(),
            RelayError::CategoryMismatch { recorded } => format!(
                "❌ Post rejected.\nYour account is already recorded as {}.",
                recorded.hashtag()
            ),
            RelayError::QuotaExceeded(e) => format!(
                "😅 Today's quota for {} is used up.\n⏳ Resets in {}",
                e.kind.label(),
                human_duration(e.resets_in)
            ),
            RelayError::DeliveryFailure(_) => {
                "⚠️ Posting to the channel failed; the admin has been notified.".to_string()
            }
            RelayError::Store(_) => "❌ Could not process the post, try again later.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RelayConfig {
    pub broadcast_chat: ChatId,
    pub log_chat: Option<ChatId>,
    pub owner_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReceipt {
    pub category: Category,
    pub broadcast_message_id: MessageId,
    pub usage: QuotaUsage,
}

impl RelayReceipt {
    pub fn user_message(&self) -> String {
        match (self.usage.limit, self.usage.resets_in) {
            (Some(limit), Some(resets_in)) => format!(
                "✅ Post sent. Used today: {}/{}\n⏳ Resets in {}",
                self.usage.used,
                limit,
                human_duration(resets_in)
            ),
            _ => "✅ Post sent (admin: unlimited).".to_string(),
        }
    }
}

/// Text that reaches the broadcast channel: category tag and body only
pub fn broadcast_text(category: Category, body: &str, limit: usize) -> String {
    sanitize(&format!("{}\n\n{}", category.hashtag(), body.trim()), limit)
}

pub struct Relay {
    store: Arc<dyn StateStore>,
    platform: Arc<dyn PlatformClient>,
    quotas: Arc<QuotaTracker>,
    clock: Arc<dyn Clock>,
    config: RelayConfig,
    authors: KeyedLocks<UserId>,
}

impl Relay {
    pub fn new(
        store: Arc<dyn StateStore>,
        platform: Arc<dyn PlatformClient>,
        quotas: Arc<QuotaTracker>,
        clock: Arc<dyn Clock>,
        config: RelayConfig,
    ) -> Self {
        Self {
            store,
            platform,
            quotas,
            clock,
            config,
            authors: KeyedLocks::new(),
        }
    }

    pub async fn submit(
        &self,
        author: &Sender,
        category: &str,
        body: &str,
        attachment: Option<&Attachment>,
    ) -> Result<RelayReceipt, RelayError> {
        let category = Category::parse(category).ok_or(RelayError::MissingCategory)?;
        if body.trim().is_empty() {
            return Err(RelayError::EmptyBody);
        }

        let _author_guard = self.authors.lock(author.id).await;

        let now = self.clock.now();
        let kind = match attachment {
            Some(_) => QuotaKind::Media,
            None => QuotaKind::Text,
        };

        let mut user = self
            .store
            .get_user(author.id)
            .await?
            .unwrap_or_else(|| UserRecord::new(author.id, author.handle.clone()));
        if let Some(recorded) = user.category {
            if recorded != category {
                return Err(RelayError::CategoryMismatch { recorded });
            }
        }

        let usage = self.quotas.try_consume(author.id, kind, now)?;
        let message_id = match self.broadcast(category, body, attachment).await {
            Ok(id) => id,
            Err(e) => {
                self.quotas.refund(author.id, kind);
                log::error!("❌ Menfess broadcast to {} failed: {}", self.config.broadcast_chat, e);
                self.notify_owner(author, category, body, attachment.is_some(), &e)
                    .await;
                return Err(RelayError::DeliveryFailure(e));
            }
        };

        log::info!("📨 Menfess relayed as {} (message {})", category.hashtag(), message_id);

        if user.category.is_none() || user.handle != author.handle {
            user.category = Some(category);
            if author.handle.is_some() {
                user.handle = author.handle.clone();
            }
            if let Err(e) = self.store.put_user(&user).await {
                log::warn!("⚠️  Category not recorded for user {}: {}", author.id, e);
            }
        }

        let audit = MenfessAudit {
            author_id: author.id,
            handle: author.handle.clone(),
            category,
            body: body.trim().to_string(),
            created_at: now,
        };
        if let Err(e) = self.store.append_audit(&audit).await {
            log::warn!("⚠️  Audit row not written for user {}: {}", author.id, e);
        }
        self.mirror_to_log(author, &audit, attachment).await;

        Ok(RelayReceipt {
            category,
            broadcast_message_id: message_id,
            usage,
        })
    }

    async fn broadcast(
        &self,
        category: Category,
        body: &str,
        attachment: Option<&Attachment>,
    ) -> Result<MessageId, PlatformError> {
        match attachment {
            Some(att) => {
                let media = OutgoingMedia {
                    kind: att.kind,
                    source: UploadSource::Reference(att.file_ref.clone()),
                    caption: Some(broadcast_text(category, body, CAPTION_LIMIT)),
                };
                self.platform
                    .upload_media(self.config.broadcast_chat, &media)
                    .await
            }
            None => {
                let text = broadcast_text(category, body, MESSAGE_LIMIT);
                self.platform
                    .send_message(self.config.broadcast_chat, &text)
                    .await
            }
        }
    }

    async fn notify_owner(
        &self,
        author: &Sender,
        category: Category,
        body: &str,
        has_media: bool,
        error: &PlatformError,
    ) {
        let content = if has_media { "(media attached)" } else { body };
        let text = sanitize(
            &format!(
                "[AUTOFALLBACK] Failed to post menfess to channel ({}).\nUser: {} (id: {})\nCategory: {}\n\nContent:\n{}\n\nError: {}",
                self.config.broadcast_chat,
                author.mention(),
                author.id,
                category.hashtag(),
                content,
                error
            ),
            MESSAGE_LIMIT,
        );
        if let Err(e) = self.platform.send_message(self.config.owner_id, &text).await {
            log::error!("❌ Owner fallback DM failed: {}", e);
        }
    }

    async fn mirror_to_log(&self, author: &Sender, audit: &MenfessAudit, attachment: Option<&Attachment>) {
        let log_chat = match self.config.log_chat {
            Some(chat) => chat,
            None => return,
        };

        let text = format!(
            "👤 Name: {}\n🔗 Username: {}\n🆔 User ID: {}\n⚧ Category: {}\n\n{}",
            author.display_name(),
            author.mention(),
            author.id,
            audit.category.hashtag(),
            audit.body
        );
        let result = match attachment {
            Some(att) if matches!(att.kind, MediaKind::Photo | MediaKind::Video) => {
                let media = OutgoingMedia {
                    kind: att.kind,
                    source: UploadSource::Reference(att.file_ref.clone()),
                    caption: Some(sanitize(&text, CAPTION_LIMIT)),
                };
                self.platform.upload_media(log_chat, &media).await
            }
            _ => {
                self.platform
                    .send_message(log_chat, &sanitize(&text, MESSAGE_LIMIT))
                    .await
            }
        };
        if let Err(e) = result {
            log::warn!("⚠️  Audit mirror to log channel failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::quota::QuotaLimits;
    use crate::store::InMemoryStateStore;
    use crate::relay::quota::QuotaKind;
    use crate::testing::{sender, FixedClock, RecordingPlatform};
    use std::time::Duration;

    const CHANNEL: ChatId = -1001;
    const LOG: ChatId = -1002;
    const OWNER: UserId = 1;

    struct Fixture {
        relay: Relay,
        store: Arc<InMemoryStateStore>,
        platform: Arc<RecordingPlatform>,
        quotas: Arc<QuotaTracker>,
    }

    fn fixture(limits: QuotaLimits) -> Fixture {
        let store = Arc::new(InMemoryStateStore::new());
        let platform = Arc::new(RecordingPlatform::new());
        let quotas = Arc::new(QuotaTracker::new(limits, OWNER));
        let relay = Relay::new(
            store.clone(),
            platform.clone(),
            quotas.clone(),
            Arc::new(FixedClock::new(1_000)),
            RelayConfig {
                broadcast_chat: CHANNEL,
                log_chat: Some(LOG),
                owner_id: OWNER,
            },
        );
        Fixture {
            relay,
            store,
            platform,
            quotas,
        }
    }

    #[tokio::test]
    async fn test_broadcast_carries_no_author_identity() {
        let f = fixture(QuotaLimits::default());
        let mut author = sender(424242, "Secret");
        author.handle = Some("secret_handle".to_string());

        let receipt = f.relay.submit(&author, "male", "hello", None).await.unwrap();
        assert_eq!(receipt.category, Category::Male);

        let broadcast = f.platform.sent_to(CHANNEL);
        assert_eq!(broadcast, vec!["#male\n\nhello"]);
        for text in &broadcast {
            assert!(!text.contains("424242"));
            assert!(!text.contains("secret_handle"));
            assert!(!text.contains("Secret"));
        }

        // The audit trail keeps the author
        assert!(f.platform.sent_to(LOG)[0].contains("424242"));
        assert_eq!(f.store.audit_entries().await[0].author_id, 424242);
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let f = fixture(QuotaLimits::default());
        let author = sender(7, "Ana");

        assert!(matches!(
            f.relay.submit(&author, "other", "hello", None).await,
            Err(RelayError::MissingCategory)
        ));
        assert!(matches!(
            f.relay.submit(&author, "male", "   ", None).await,
            Err(RelayError::EmptyBody)
        ));
        assert!(f.platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_category_is_locked_after_first_post() {
        let f = fixture(QuotaLimits::default());
        let author = sender(7, "Ana");
        f.relay.submit(&author, "female", "hi", None).await.unwrap();

        let err = f.relay.submit(&author, "male", "hi again", None).await.unwrap_err();
        assert!(matches!(
            err,
            RelayError::CategoryMismatch { recorded: Category::Female }
        ));
    }

    #[tokio::test]
    async fn test_duplicates_are_relayed_and_quota_counts() {
        let f = fixture(QuotaLimits {
            text: 2,
            media: 1,
            download: 1,
        });
        let author = sender(7, "Ana");

        let first = f.relay.submit(&author, "male", "same", None).await.unwrap();
        let second = f.relay.submit(&author, "male", "same", None).await.unwrap();
        assert_eq!(first.usage.used, 1);
        assert_eq!(second.usage.used, 2);
        assert_eq!(f.platform.sent_to(CHANNEL).len(), 2);

        let third = f.relay.submit(&author, "male", "same", None).await;
        assert!(matches!(third, Err(RelayError::QuotaExceeded(_))));
    }

    #[tokio::test]
    async fn test_media_post_uses_reference_and_caption() {
        let f = fixture(QuotaLimits::default());
        let attachment = Attachment {
            kind: MediaKind::Photo,
            file_ref: "photo-123".to_string(),
        };
        f.relay
            .submit(&sender(7, "Ana"), "female", "look", Some(&attachment))
            .await
            .unwrap();

        let uploads = f.platform.uploads_to(CHANNEL);
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].source, UploadSource::Reference("photo-123".to_string()));
        assert_eq!(uploads[0].caption.as_deref(), Some("#female\n\nlook"));
    }

    #[tokio::test]
    async fn test_delivery_failure_notifies_owner() {
        let f = fixture(QuotaLimits::default());
        f.platform.fail_send_to(CHANNEL);

        let err = f
            .relay
            .submit(&sender(7, "Ana"), "male", "hello", None)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::DeliveryFailure(_)));

        let owner_dm = f.platform.sent_to(OWNER);
        assert_eq!(owner_dm.len(), 1);
        assert!(owner_dm[0].contains("[AUTOFALLBACK]"));
        // Failed posts do not consume quota or write audit rows
        assert!(f.store.audit_entries().await.is_empty());
        assert_eq!(f.quotas.usage(7, QuotaKind::Text, 1_000).used, 0);
    }

    #[tokio::test]
    async fn test_concurrent_posts_respect_quota() {
        let f = Arc::new(fixture(QuotaLimits {
            text: 1,
            media: 1,
            download: 1,
        }));
        f.platform.set_send_delay(Duration::from_millis(30));

        let mut handles = Vec::new();
        for i in 0..5 {
            let f = f.clone();
            handles.push(tokio::spawn(async move {
                f.relay
                    .submit(&sender(7, "Ana"), "male", &format!("post {}", i), None)
                    .await
            }));
        }
        let mut accepted = 0;
        let mut over_quota = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(RelayError::QuotaExceeded(_)) => over_quota += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(accepted, 1);
        assert_eq!(over_quota, 4);
        assert_eq!(f.platform.sent_to(CHANNEL).len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_posts_lock_one_category() {
        let f = Arc::new(fixture(QuotaLimits::default()));
        f.platform.set_send_delay(Duration::from_millis(20));

        let male = {
            let f = f.clone();
            tokio::spawn(async move { f.relay.submit(&sender(7, "Ana"), "male", "a", None).await })
        };
        let female = {
            let f = f.clone();
            tokio::spawn(async move { f.relay.submit(&sender(7, "Ana"), "female", "b", None).await })
        };
        let results = [male.await.unwrap(), female.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(RelayError::CategoryMismatch { .. }))));
        assert_eq!(f.platform.sent_to(CHANNEL).len(), 1);
    }

    #[tokio::test]
    async fn test_owner_receipt_is_unlimited() {
        let f = fixture(QuotaLimits::default());
        let receipt = f
            .relay
            .submit(&sender(OWNER, "Owner"), "male", "hello", None)
            .await
            .unwrap();
        assert_eq!(receipt.user_message(), "✅ Post sent (admin: unlimited).");
    }
}

//! Routes inbound events to exactly one handler
//!
//! | Event            | Handler                                      |
//! |------------------|----------------------------------------------|
//! | `GroupMessage`   | link guard                                   |
//! | `NewMembers`     | greeter                                      |
//! | `PrivateMessage` | media pipeline if it carries a link, else relay |
//! | `MediaRequest`   | media pipeline                               |
//! | `Admin`          | admin commands                               |
//! | `Help`           | feature list with the configured limits      |
//!
//! Links never reach the broadcast channel: a private message with a link
//! anywhere in its text, caption or rich-text targets is a download request.

use crate::media::{JobOutcome, MediaLimits, MediaPipeline, MediaSource, TargetFormat};
use crate::moderation::{AdminCommand, AdminCommands, AdminOutcome, Greeter, LinkDetector, LinkGuard, LinkVerdict};
use crate::platform::PlatformClient;
use crate::relay::{split_category_tag, QuotaLimits, Relay, RelayError, RelayReceipt};
use crate::text::{sanitize, MESSAGE_LIMIT};
use crate::types::{ChatId, InboundMessage, MessageId, Sender};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// Message posted in a monitored group
    GroupMessage(InboundMessage),
    /// Message sent to the bot directly
    PrivateMessage(InboundMessage),
    NewMembers {
        chat_id: ChatId,
        service_message_id: Option<MessageId>,
        members: Vec<Sender>,
    },
    MediaRequest {
        chat_id: ChatId,
        requester: Sender,
        source: MediaSource,
        target_format: TargetFormat,
    },
    Admin {
        chat_id: ChatId,
        issuer: Sender,
        command: AdminCommand,
    },
    Help {
        chat_id: ChatId,
    },
}

#[derive(Debug)]
pub enum DispatchOutcome {
    Link(LinkVerdict),
    Welcomed(usize),
    Relayed(Result<RelayReceipt, RelayError>),
    Media(JobOutcome),
    Admin(AdminOutcome),
    Help,
}

pub struct Dispatcher {
    link_guard: Arc<LinkGuard>,
    greeter: Arc<Greeter>,
    relay: Arc<Relay>,
    media: Arc<MediaPipeline>,
    admin: Arc<AdminCommands>,
    platform: Arc<dyn PlatformClient>,
}

impl Dispatcher {
    pub fn new(
        link_guard: Arc<LinkGuard>,
        greeter: Arc<Greeter>,
        relay: Arc<Relay>,
        media: Arc<MediaPipeline>,
        admin: Arc<AdminCommands>,
        platform: Arc<dyn PlatformClient>,
    ) -> Self {
        Self {
            link_guard,
            greeter,
            relay,
            media,
            admin,
            platform,
        }
    }

    pub async fn dispatch(&self, event: InboundEvent) -> DispatchOutcome {
        match event {
            InboundEvent::GroupMessage(msg) => {
                DispatchOutcome::Link(self.link_guard.handle_message(&msg).await)
            }
            InboundEvent::NewMembers {
                chat_id,
                service_message_id,
                members,
            } => DispatchOutcome::Welcomed(
                self.greeter
                    .handle_new_members(chat_id, service_message_id, &members)
                    .await,
            ),
            InboundEvent::PrivateMessage(msg) => self.handle_private(msg).await,
            InboundEvent::MediaRequest {
                chat_id,
                requester,
                source,
                target_format,
            } => DispatchOutcome::Media(
                self.media
                    .process(requester.id, chat_id, source, target_format)
                    .await,
            ),
            InboundEvent::Admin {
                chat_id,
                issuer,
                command,
            } => DispatchOutcome::Admin(self.admin.execute(chat_id, &issuer, command).await),
            InboundEvent::Help { chat_id } => {
                let text = help_text(self.media.limits(), self.media.quotas().limits());
                self.reply(chat_id, &text).await;
                DispatchOutcome::Help
            }
        }
    }

    async fn handle_private(&self, msg: InboundMessage) -> DispatchOutcome {
        if let Some((source, target_format)) = media_request(&msg) {
            return DispatchOutcome::Media(
                self.media
                    .process(msg.sender.id, msg.chat_id, source, target_format)
                    .await,
            );
        }

        let (category, body) = split_category_tag(msg.body());
        let result = self
            .relay
            .submit(&msg.sender, &category, &body, msg.attachment.as_ref())
            .await;
        let reply = match &result {
            Ok(receipt) => receipt.user_message(),
            Err(e) => {
                log::info!("Menfess from {} rejected: {}", msg.sender.id, e);
                e.user_message()
            }
        };
        self.reply(msg.chat_id, &reply).await;
        DispatchOutcome::Relayed(result)
    }

    async fn reply(&self, chat_id: ChatId, text: &str) {
        if let Err(e) = self
            .platform
            .send_message(chat_id, &sanitize(text, MESSAGE_LIMIT))
            .await
        {
            log::warn!("⚠️  Reply to chat {} failed: {}", chat_id, e);
        }
    }
}

/// A private message carrying any link is a download request for the first
/// one. A leading `audio` (or `mp3`) asks for audio extraction.
fn media_request(msg: &InboundMessage) -> Option<(MediaSource, TargetFormat)> {
    let link = LinkDetector::extract_links(&msg.searchable_text())
        .into_iter()
        .chain(
            msg.link_targets
                .iter()
                .flat_map(|target| LinkDetector::extract_links(target)),
        )
        .next()?;

    let target = msg
        .body()
        .split_whitespace()
        .next()
        .and_then(TargetFormat::parse)
        .unwrap_or(TargetFormat::Passthrough);
    Some((MediaSource::Url(link.url), target))
}

/// Feature list shown by `Help`
pub fn help_text(media: &MediaLimits, quotas: QuotaLimits) -> String {
    format!(
        "📚 Bot features:\n\n\
         - Menfess via private chat: send text, photo or video tagged #male or #female\n\
         - Send a link in private chat to download it (start with `audio` for MP3)\n\
         - Max file size sent by the bot: {} MB\n\
         - Download limit: {}x per day per user\n\
         - Menfess limit per day: photo/video {}x, text {}x\n\n\
         Admin commands: /tag /ban /kick /unban",
        media.size_limit_bytes / (1024 * 1024),
        quotas.download,
        quotas.media,
        quotas.text
    )
}

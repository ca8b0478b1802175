//! No-links policy for group chats
//!
//! Per message: `Received -> Exempt | Clean | Violation`. A violation deletes
//! the message (best effort) and bans the sender unless already banned. What
//! happens to an already-banned sender is decided by `RepeatOffensePolicy`.

use super::link_detector::LinkDetector;
use super::scheduler::BanScheduler;
use super::types::{EnforcementAction, LinkVerdict, RepeatOffensePolicy, LINK_VIOLATION_REASON};
use crate::platform::PlatformClient;
use crate::text::human_duration;
use crate::types::{ChatId, InboundMessage, UserId};
use chrono::Duration;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct LinkGuardConfig {
    pub punitive_duration: Duration,
    pub repeat_policy: RepeatOffensePolicy,
    /// Post a notice in the chat after a new ban
    pub announce: bool,
}

impl Default for LinkGuardConfig {
    fn default() -> Self {
        Self {
            punitive_duration: Duration::hours(1),
            repeat_policy: RepeatOffensePolicy::NoStack,
            announce: true,
        }
    }
}

pub struct LinkGuard {
    scheduler: Arc<BanScheduler>,
    platform: Arc<dyn PlatformClient>,
    detector: LinkDetector,
    config: LinkGuardConfig,
}

impl LinkGuard {
    pub fn new(
        scheduler: Arc<BanScheduler>,
        platform: Arc<dyn PlatformClient>,
        detector: LinkDetector,
        config: LinkGuardConfig,
    ) -> Self {
        Self {
            scheduler,
            platform,
            detector,
            config,
        }
    }

    pub async fn handle_message(&self, msg: &InboundMessage) -> LinkVerdict {
        if msg.sender.is_bot {
            return LinkVerdict::Exempt;
        }

        let link = match self
            .detector
            .find_disallowed(&msg.searchable_text(), &msg.link_targets)
        {
            Some(link) => link,
            None => return LinkVerdict::Clean,
        };

        // Admin lookup only happens for violations
        match self.platform.is_chat_admin(msg.chat_id, msg.sender.id).await {
            Ok(true) => return LinkVerdict::Exempt,
            Ok(false) => {}
            Err(e) => {
                log::warn!(
                    "⚠️  Admin lookup failed for user {} in chat {}, enforcing anyway: {}",
                    msg.sender.id,
                    msg.chat_id,
                    e
                );
            }
        }

        log::info!(
            "🔗 Link from user {} in chat {}: {}",
            msg.sender.id,
            msg.chat_id,
            link.host
        );

        if let Err(e) = self.platform.delete_message(msg.chat_id, msg.message_id).await {
            log::warn!(
                "⚠️  Could not delete message {} in chat {}: {}",
                msg.message_id,
                msg.chat_id,
                e
            );
        }

        let action = self.enforce(msg.chat_id, msg.sender.id).await;

        if self.config.announce {
            if let EnforcementAction::Banned { expires_at } = action {
                let remaining = expires_at - self.scheduler.now();
                let notice = format!(
                    "🚫 {} has been muted for {}.\nReason: posting links",
                    msg.sender.display_name(),
                    human_duration(remaining)
                );
                if let Err(e) = self.platform.send_message(msg.chat_id, &notice).await {
                    log::warn!("⚠️  Ban notice not sent to chat {}: {}", msg.chat_id, e);
                }
            }
        }

        LinkVerdict::Violation {
            link: link.raw,
            action,
        }
    }

    /// Check-then-ban under the pair lock so the read observes any ban applied
    /// by a concurrent violation from the same user.
    async fn enforce(&self, chat_id: ChatId, user_id: UserId) -> EnforcementAction {
        let _guard = self.scheduler.lock_pair(chat_id, user_id).await;

        // An expired record the tick has not lifted yet no longer protects
        // the sender from a fresh ban
        let now = self.scheduler.now();
        let existing = match self.scheduler.current_ban(chat_id, user_id).await {
            Ok(existing) => existing.filter(|ban| !ban.is_expired(now)),
            Err(e) => {
                log::error!("❌ Ban lookup failed for user {} in chat {}: {}", user_id, chat_id, e);
                return EnforcementAction::BanFailed;
            }
        };

        let base = self.config.punitive_duration;
        match existing {
            None => match self
                .scheduler
                .apply_ban_locked(chat_id, user_id, base, LINK_VIOLATION_REASON)
                .await
            {
                Ok(ban) => EnforcementAction::Banned {
                    expires_at: ban.expires_at,
                },
                Err(e) => {
                    log::error!("❌ Link ban failed for user {} in chat {}: {}", user_id, chat_id, e);
                    EnforcementAction::BanFailed
                }
            },
            Some(current) => {
                let duration = match self.config.repeat_policy.repeat_duration(base, current.strikes) {
                    Some(d) => d,
                    None => {
                        return EnforcementAction::AlreadyBanned {
                            expires_at: current.expires_at,
                        }
                    }
                };

                // Never shorten a longer ban that is already in place
                if now + duration.num_seconds() <= current.expires_at {
                    return EnforcementAction::AlreadyBanned {
                        expires_at: current.expires_at,
                    };
                }

                match self
                    .scheduler
                    .apply_ban_locked(chat_id, user_id, duration, LINK_VIOLATION_REASON)
                    .await
                {
                    Ok(ban) => EnforcementAction::Extended {
                        expires_at: ban.expires_at,
                        strikes: ban.strikes,
                    },
                    Err(e) => {
                        log::error!(
                            "❌ Ban extension failed for user {} in chat {}: {}",
                            user_id,
                            chat_id,
                            e
                        );
                        EnforcementAction::BanFailed
                    }
                }
            }
        }
    }
}

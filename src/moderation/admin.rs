//! Operator commands issued inside a group
//!
//! Commands arrive already parsed. Only the bot owner and chat administrators
//! may run them; everyone else gets a refusal reply. Manual bans go through
//! the scheduler, so they are temporary and expire like link bans.

use super::scheduler::BanScheduler;
use super::types::{BanError, MANUAL_BAN_REASON, MIN_RESTRICT_SECS};
use crate::platform::PlatformClient;
use crate::store::BanRecord;
use crate::text::{human_duration, sanitize, MESSAGE_LIMIT};
use crate::types::{ChatId, Sender, UserId};
use chrono::Duration;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    /// Temporary ban, `None` uses the configured punitive duration
    Ban {
        target: UserId,
        duration: Option<Duration>,
    },
    Unban {
        target: UserId,
    },
    /// Remove from the chat without a lasting ban. An active ban stays in force.
    Kick {
        target: UserId,
    },
    /// Notify a member in the chat, `text` defaults to a generic notice
    Tag {
        target: UserId,
        text: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminOutcome {
    Refused,
    Banned(BanRecord),
    /// Ban recorded but the platform refused the restriction; the scheduler retries it
    BanUnconfirmed(BanRecord),
    Unbanned { had_record: bool },
    Kicked,
    /// Kick on a banned user; the restriction was renewed until the ban expires
    KickedWhileBanned { expires_at: i64 },
    Tagged,
    Failed(String),
}

pub struct AdminCommands {
    scheduler: Arc<BanScheduler>,
    platform: Arc<dyn PlatformClient>,
    owner_id: UserId,
    default_duration: Duration,
}

impl AdminCommands {
    pub fn new(
        scheduler: Arc<BanScheduler>,
        platform: Arc<dyn PlatformClient>,
        owner_id: UserId,
        default_duration: Duration,
    ) -> Self {
        Self {
            scheduler,
            platform,
            owner_id,
            default_duration,
        }
    }

    async fn is_authorized(&self, chat_id: ChatId, issuer: &Sender) -> bool {
        if issuer.id == self.owner_id {
            return true;
        }
        match self.platform.is_chat_admin(chat_id, issuer.id).await {
            Ok(is_admin) => is_admin,
            Err(e) => {
                log::warn!("⚠️  Admin lookup failed for user {}: {}", issuer.id, e);
                false
            }
        }
    }

    /// Run `command` in `chat_id` and reply with the result
    pub async fn execute(
        &self,
        chat_id: ChatId,
        issuer: &Sender,
        command: AdminCommand,
    ) -> AdminOutcome {
        if !self.is_authorized(chat_id, issuer).await {
            self.reply(chat_id, "❌ Only the group owner or admins can use this command.")
                .await;
            return AdminOutcome::Refused;
        }

        log::info!("🛠️  Admin {} in chat {}: {:?}", issuer.id, chat_id, command);

        let (outcome, reply) = match command {
            AdminCommand::Ban { target, duration } => {
                let duration = duration.unwrap_or(self.default_duration);
                match self
                    .scheduler
                    .apply_ban(chat_id, target, duration, MANUAL_BAN_REASON)
                    .await
                {
                    Ok(ban) if ban.restricted => {
                        let text = format!(
                            "✅ User {} banned for {}.",
                            target,
                            human_duration(duration.num_seconds())
                        );
                        (AdminOutcome::Banned(ban), text)
                    }
                    Ok(ban) => {
                        let text = format!(
                            "⚠️ Ban for user {} recorded ({}), but the restriction failed. Retrying automatically.",
                            target,
                            human_duration(duration.num_seconds())
                        );
                        (AdminOutcome::BanUnconfirmed(ban), text)
                    }
                    Err(BanError::InvalidDuration(_)) => (
                        AdminOutcome::Failed("invalid duration".to_string()),
                        "❌ Ban duration must be positive and at most 366 days.".to_string(),
                    ),
                    Err(e) => (
                        AdminOutcome::Failed(e.to_string()),
                        format!("❌ Ban failed: {}", e),
                    ),
                }
            }
            AdminCommand::Unban { target } => match self.scheduler.lift_ban(chat_id, target).await {
                Ok(had_record) => (
                    AdminOutcome::Unbanned { had_record },
                    format!("✅ User {} has been unbanned.", target),
                ),
                Err(e) => (
                    AdminOutcome::Failed(e.to_string()),
                    format!("❌ Unban failed: {}", e),
                ),
            },
            AdminCommand::Kick { target } => match self.kick(chat_id, target).await {
                Ok(None) => (
                    AdminOutcome::Kicked,
                    format!("✅ User {} has been removed.", target),
                ),
                Ok(Some(expires_at)) => (
                    AdminOutcome::KickedWhileBanned { expires_at },
                    format!(
                        "✅ User {} has been removed. Their ban stays for {}.",
                        target,
                        human_duration(expires_at - self.scheduler.now())
                    ),
                ),
                Err(e) => (
                    AdminOutcome::Failed(e.to_string()),
                    format!("❌ Kick failed: {}", e),
                ),
            },
            AdminCommand::Tag { target, text } => {
                let text = text
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| "(tagged by an admin)".to_string());
                let notice = format!("🔔 tg://user?id={}\n\n{}", target, text);
                match self.platform.send_message(chat_id, &sanitize(&notice, MESSAGE_LIMIT)).await {
                    // The notice is the reply
                    Ok(_) => return AdminOutcome::Tagged,
                    Err(e) => (
                        AdminOutcome::Failed(e.to_string()),
                        format!("❌ Could not tag member: {}", e),
                    ),
                }
            }
        };

        self.reply(chat_id, &reply).await;
        outcome
    }

    /// Returns the ban expiry when the target was already banned
    async fn kick(&self, chat_id: ChatId, target: UserId) -> Result<Option<i64>, BanError> {
        let _guard = self.scheduler.lock_pair(chat_id, target).await;
        let now = self.scheduler.now();
        let until = now + MIN_RESTRICT_SECS;

        let active = self
            .scheduler
            .current_ban(chat_id, target)
            .await?
            .filter(|ban| !ban.is_expired(now));
        if let Some(ban) = active {
            // Lifting here would undo the ban; only the scheduler lifts it
            self.platform
                .restrict_user(chat_id, target, ban.expires_at.max(until))
                .await?;
            return Ok(Some(ban.expires_at));
        }

        self.platform.restrict_user(chat_id, target, until).await?;
        self.platform.unrestrict_user(chat_id, target).await?;
        Ok(None)
    }

    async fn reply(&self, chat_id: ChatId, text: &str) {
        if let Err(e) = self.platform.send_message(chat_id, text).await {
            log::warn!("⚠️  Admin reply not sent to chat {}: {}", chat_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStateStore;
    use crate::testing::{sender, FixedClock, PlatformCall, RecordingPlatform};

    const OWNER: UserId = 1;

    fn setup() -> (AdminCommands, Arc<BanScheduler>, Arc<RecordingPlatform>) {
        let store = Arc::new(InMemoryStateStore::new());
        let platform = Arc::new(RecordingPlatform::new());
        let clock = Arc::new(FixedClock::new(0));
        let scheduler = Arc::new(BanScheduler::new(store, platform.clone(), clock));
        let admin = AdminCommands::new(
            scheduler.clone(),
            platform.clone(),
            OWNER,
            Duration::hours(1),
        );
        (admin, scheduler, platform)
    }

    #[tokio::test]
    async fn test_non_admin_is_refused() {
        let (admin, scheduler, _) = setup();
        let outcome = admin
            .execute(-1, &sender(50, "Rando"), AdminCommand::Ban { target: 7, duration: None })
            .await;
        assert_eq!(outcome, AdminOutcome::Refused);
        assert!(!scheduler.is_banned(-1, 7).await.unwrap());
    }

    #[tokio::test]
    async fn test_owner_ban_uses_default_duration() {
        let (admin, scheduler, _) = setup();
        let outcome = admin
            .execute(-1, &sender(OWNER, "Owner"), AdminCommand::Ban { target: 7, duration: None })
            .await;
        match outcome {
            AdminOutcome::Banned(ban) => {
                assert_eq!(ban.expires_at, 3600);
                assert_eq!(ban.reason, MANUAL_BAN_REASON);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(scheduler.is_banned(-1, 7).await.unwrap());
    }

    #[tokio::test]
    async fn test_chat_admin_can_unban() {
        let (admin, scheduler, platform) = setup();
        platform.set_admin(-1, 20);
        scheduler
            .apply_ban(-1, 7, Duration::hours(2), "link-violation")
            .await
            .unwrap();

        let outcome = admin
            .execute(-1, &sender(20, "Mod"), AdminCommand::Unban { target: 7 })
            .await;
        assert_eq!(outcome, AdminOutcome::Unbanned { had_record: true });
        assert!(!scheduler.is_banned(-1, 7).await.unwrap());
    }

    #[tokio::test]
    async fn test_kick_restricts_then_unrestricts_without_record() {
        let (admin, scheduler, platform) = setup();
        let outcome = admin
            .execute(-1, &sender(OWNER, "Owner"), AdminCommand::Kick { target: 7 })
            .await;
        assert_eq!(outcome, AdminOutcome::Kicked);
        assert!(platform
            .calls()
            .contains(&PlatformCall::Restrict { chat_id: -1, user_id: 7, until: MIN_RESTRICT_SECS }));
        assert_eq!(platform.unrestrict_count(-1, 7), 1);
        assert!(!scheduler.is_banned(-1, 7).await.unwrap());
    }

    #[tokio::test]
    async fn test_kick_keeps_active_ban_in_force() {
        let (admin, scheduler, platform) = setup();
        scheduler
            .apply_ban(-1, 7, Duration::hours(1), "link-violation")
            .await
            .unwrap();

        let outcome = admin
            .execute(-1, &sender(OWNER, "Owner"), AdminCommand::Kick { target: 7 })
            .await;

        assert_eq!(outcome, AdminOutcome::KickedWhileBanned { expires_at: 3600 });
        assert_eq!(platform.unrestrict_count(-1, 7), 0);
        assert_eq!(platform.restrict_count(-1, 7), 2);
        assert!(platform
            .calls()
            .iter()
            .filter(|c| matches!(c, PlatformCall::Restrict { user_id: 7, .. }))
            .all(|c| *c == PlatformCall::Restrict { chat_id: -1, user_id: 7, until: 3600 }));
        assert_eq!(scheduler.current_ban(-1, 7).await.unwrap().unwrap().expires_at, 3600);
    }

    #[tokio::test]
    async fn test_ban_reports_unconfirmed_restriction() {
        let (admin, scheduler, platform) = setup();
        platform.fail_restrict(true);

        let outcome = admin
            .execute(-1, &sender(OWNER, "Owner"), AdminCommand::Ban { target: 7, duration: None })
            .await;

        match outcome {
            AdminOutcome::BanUnconfirmed(ban) => assert!(!ban.restricted),
            other => panic!("unexpected outcome: {:?}", other),
        }
        let replies = platform.sent_to(-1);
        assert!(replies[0].starts_with("⚠️"));
        assert!(!replies[0].contains("✅"));

        platform.fail_restrict(false);
        let report = scheduler.tick(10).await.unwrap();
        assert_eq!(report.restricted, 1);
        assert_eq!(platform.restrict_count(-1, 7), 1);
    }

    #[tokio::test]
    async fn test_tag_notifies_member_in_chat() {
        let (admin, _, platform) = setup();
        platform.set_admin(-1, 20);

        let outcome = admin
            .execute(
                -1,
                &sender(20, "Mod"),
                AdminCommand::Tag { target: 7, text: Some("please read the rules".to_string()) },
            )
            .await;
        assert_eq!(outcome, AdminOutcome::Tagged);

        let outcome = admin
            .execute(-1, &sender(20, "Mod"), AdminCommand::Tag { target: 8, text: None })
            .await;
        assert_eq!(outcome, AdminOutcome::Tagged);

        assert_eq!(
            platform.sent_to(-1),
            vec![
                "🔔 tg://user?id=7\n\nplease read the rules".to_string(),
                "🔔 tg://user?id=8\n\n(tagged by an admin)".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_tag_by_non_admin_is_refused() {
        let (admin, _, platform) = setup();
        let outcome = admin
            .execute(-1, &sender(50, "Rando"), AdminCommand::Tag { target: 7, text: None })
            .await;
        assert_eq!(outcome, AdminOutcome::Refused);
        assert!(!platform.sent_to(-1).iter().any(|t| t.contains("tg://user")));
    }

    #[tokio::test]
    async fn test_negative_manual_duration_is_reported() {
        let (admin, _, platform) = setup();
        let outcome = admin
            .execute(
                -1,
                &sender(OWNER, "Owner"),
                AdminCommand::Ban { target: 7, duration: Some(Duration::hours(-1)) },
            )
            .await;
        assert!(matches!(outcome, AdminOutcome::Failed(_)));
        assert!(platform.sent_to(-1).iter().any(|t| t.contains("must be positive")));
    }
}

//! New-member greetings
//!
//! Each human member is greeted once. The `welcomed` flag lives on the user
//! record, so a restart does not re-greet anyone.

use crate::platform::PlatformClient;
use crate::store::{StateStore, StoreError, UserRecord};
use crate::types::{ChatId, MessageId, Sender};
use std::sync::Arc;

pub struct Greeter {
    store: Arc<dyn StateStore>,
    platform: Arc<dyn PlatformClient>,
}

impl Greeter {
    pub fn new(store: Arc<dyn StateStore>, platform: Arc<dyn PlatformClient>) -> Self {
        Self { store, platform }
    }

    /// Greet the members of a join notice. Returns how many were greeted.
    ///
    /// The join service message is removed first to keep the chat tidy.
    pub async fn handle_new_members(
        &self,
        chat_id: ChatId,
        service_message_id: Option<MessageId>,
        members: &[Sender],
    ) -> usize {
        if let Some(message_id) = service_message_id {
            if let Err(e) = self.platform.delete_message(chat_id, message_id).await {
                log::debug!("Join notice {} not deleted in chat {}: {}", message_id, chat_id, e);
            }
        }

        let mut greeted = 0;
        for member in members.iter().filter(|m| !m.is_bot) {
            match self.mark_welcomed(member).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    log::warn!("⚠️  Welcome state unavailable for user {}: {}", member.id, e);
                    continue;
                }
            }

            let text = format!("👋 Welcome {}!", member.display_name());
            match self.platform.send_message(chat_id, &text).await {
                Ok(_) => greeted += 1,
                Err(e) => log::warn!("⚠️  Welcome not sent to chat {}: {}", chat_id, e),
            }
        }
        greeted
    }

    /// Set `welcomed`, returns `false` if it was already set
    async fn mark_welcomed(&self, member: &Sender) -> Result<bool, StoreError> {
        let mut user = self
            .store
            .get_user(member.id)
            .await?
            .unwrap_or_else(|| UserRecord::new(member.id, member.handle.clone()));
        if user.welcomed {
            return Ok(false);
        }
        user.welcomed = true;
        if member.handle.is_some() {
            user.handle = member.handle.clone();
        }
        self.store.put_user(&user).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStateStore;
    use crate::testing::{sender, PlatformCall, RecordingPlatform};

    #[tokio::test]
    async fn test_members_are_greeted_once() {
        let store = Arc::new(InMemoryStateStore::new());
        let platform = Arc::new(RecordingPlatform::new());
        let greeter = Greeter::new(store.clone(), platform.clone());

        let members = vec![sender(1, "Ana"), sender(2, "Budi")];
        assert_eq!(greeter.handle_new_members(-5, Some(99), &members).await, 2);
        assert_eq!(greeter.handle_new_members(-5, None, &members[..1]).await, 0);

        assert!(platform
            .calls()
            .contains(&PlatformCall::Delete { chat_id: -5, message_id: 99 }));
        assert_eq!(platform.sent_to(-5), vec!["👋 Welcome Ana!", "👋 Welcome Budi!"]);
        assert!(store.get_user(1).await.unwrap().unwrap().welcomed);
    }

    #[tokio::test]
    async fn test_bots_are_skipped() {
        let store = Arc::new(InMemoryStateStore::new());
        let platform = Arc::new(RecordingPlatform::new());
        let greeter = Greeter::new(store.clone(), platform.clone());

        let mut bot = sender(3, "helper");
        bot.is_bot = true;
        assert_eq!(greeter.handle_new_members(-5, None, &[bot]).await, 0);
        assert!(store.get_user(3).await.unwrap().is_none());
    }
}

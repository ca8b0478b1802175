use super::{BanRecord, MenfessAudit, StateStore, StoreError, UserRecord};
use crate::types::{ChatId, UserId};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Volatile store with the same semantics as the SQLite backend
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    users: RwLock<HashMap<UserId, UserRecord>>,
    bans: RwLock<HashMap<(ChatId, UserId), BanRecord>>,
    audit: RwLock<Vec<MenfessAudit>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn audit_entries(&self) -> Vec<MenfessAudit> {
        self.audit.read().await.clone()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get_user(&self, user_id: UserId) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.users.read().await.get(&user_id).cloned())
    }

    async fn put_user(&self, user: &UserRecord) -> Result<(), StoreError> {
        self.users.write().await.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_ban(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Result<Option<BanRecord>, StoreError> {
        Ok(self.bans.read().await.get(&(chat_id, user_id)).cloned())
    }

    async fn put_ban(&self, ban: &BanRecord) -> Result<(), StoreError> {
        self.bans
            .write()
            .await
            .insert((ban.chat_id, ban.user_id), ban.clone());
        Ok(())
    }

    async fn delete_ban(&self, chat_id: ChatId, user_id: UserId) -> Result<bool, StoreError> {
        Ok(self.bans.write().await.remove(&(chat_id, user_id)).is_some())
    }

    async fn list_active_bans(&self) -> Result<Vec<BanRecord>, StoreError> {
        let mut bans: Vec<BanRecord> = self.bans.read().await.values().cloned().collect();
        bans.sort_by_key(|b| (b.expires_at, b.chat_id, b.user_id));
        Ok(bans)
    }

    async fn append_audit(&self, entry: &MenfessAudit) -> Result<(), StoreError> {
        self.audit.write().await.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bans_are_keyed_by_pair() {
        let store = InMemoryStateStore::new();
        let mut ban = BanRecord {
            chat_id: -1,
            user_id: 5,
            reason: "manual".to_string(),
            created_at: 0,
            expires_at: 60,
            strikes: 1,
            restricted: true,
        };
        store.put_ban(&ban).await.unwrap();
        ban.chat_id = -2;
        store.put_ban(&ban).await.unwrap();
        ban.expires_at = 120;
        store.put_ban(&ban).await.unwrap();

        let bans = store.list_active_bans().await.unwrap();
        assert_eq!(bans.len(), 2);
        assert_eq!(bans[1].chat_id, -2);
        assert_eq!(bans[1].expires_at, 120);
    }
}

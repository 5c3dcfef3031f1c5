//! Typing indicator store
//!
//! Each typing user is an individually expiring member of the channel's
//! scored set. Clients resend `typing_start` while typing, which refreshes
//! the entry; a client that just stops is dropped after the TTL.

use std::sync::Arc;
use std::time::Duration;

use huddle_shared::{ChannelId, UserId};

use crate::error::RealtimeResult;
use crate::keys;
use crate::store::EphemeralStore;

#[derive(Clone)]
pub struct TypingStore {
    store: Arc<dyn EphemeralStore>,
    ttl: Duration,
}

impl TypingStore {
    pub fn new(store: Arc<dyn EphemeralStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub async fn start(&self, channel_id: &ChannelId, user_id: UserId) -> RealtimeResult<()> {
        self.store
            .scored_add(&keys::typing(channel_id), &user_id.to_string(), self.ttl)
            .await?;
        Ok(())
    }

    /// Returns whether the user was still listed
    pub async fn stop(&self, channel_id: &ChannelId, user_id: UserId) -> RealtimeResult<bool> {
        let removed = self
            .store
            .scored_remove(&keys::typing(channel_id), &user_id.to_string())
            .await?;
        Ok(removed)
    }

    /// Users currently typing in `channel_id`
    pub async fn list_typing(&self, channel_id: &ChannelId) -> RealtimeResult<Vec<UserId>> {
        let members = self.store.scored_live(&keys::typing(channel_id)).await?;
        Ok(members
            .iter()
            .filter_map(|member| member.parse().ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn typing() -> TypingStore {
        TypingStore::new(Arc::new(MemoryStore::new()), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let typing = typing();
        let general = ChannelId::from("general");
        let user_id = UserId::new();

        typing.start(&general, user_id).await.unwrap();
        assert_eq!(typing.list_typing(&general).await.unwrap(), vec![user_id]);
        assert!(typing
            .list_typing(&ChannelId::from("random"))
            .await
            .unwrap()
            .is_empty());

        assert!(typing.stop(&general, user_id).await.unwrap());
        assert!(!typing.stop(&general, user_id).await.unwrap());
        assert!(typing.list_typing(&general).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_lapses_without_resend() {
        let typing = typing();
        let general = ChannelId::from("general");
        let user_id = UserId::new();

        typing.start(&general, user_id).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;

        assert!(typing.list_typing(&general).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resend_refreshes_entry() {
        let typing = typing();
        let general = ChannelId::from("general");
        let steady = UserId::new();
        let idle = UserId::new();

        typing.start(&general, steady).await.unwrap();
        typing.start(&general, idle).await.unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        typing.start(&general, steady).await.unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;

        assert_eq!(typing.list_typing(&general).await.unwrap(), vec![steady]);
    }
}

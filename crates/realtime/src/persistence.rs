//! Message persistence boundary
//!
//! Messages are persisted by a collaborator before anything is broadcast;
//! the realtime side only ever publishes records that already exist.

use async_trait::async_trait;
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use huddle_shared::{ChannelId, HuddleResult, MessageDraft, MessageRecord};

/// Durable message storage
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a draft; returns only once the write is durable
    async fn persist(&self, draft: MessageDraft) -> HuddleResult<MessageRecord>;

    /// Most recent messages of a channel, oldest first
    async fn recent(&self, channel_id: &ChannelId, limit: usize) -> HuddleResult<Vec<MessageRecord>>;
}

/// Process-local message store for development without a database
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    channels: RwLock<HashMap<ChannelId, Vec<MessageRecord>>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn persist(&self, draft: MessageDraft) -> HuddleResult<MessageRecord> {
        let record = MessageRecord {
            id: Uuid::new_v4(),
            channel_id: draft.channel_id,
            user_id: draft.user_id,
            sender_name: draft.sender_name,
            content: draft.content,
            created_at: OffsetDateTime::now_utc(),
        };

        let mut channels = self.channels.write().await;
        channels
            .entry(record.channel_id.clone())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn recent(&self, channel_id: &ChannelId, limit: usize) -> HuddleResult<Vec<MessageRecord>> {
        let channels = self.channels.read().await;
        let messages = channels.get(channel_id).map(Vec::as_slice).unwrap_or_default();
        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_shared::UserId;

    fn draft(channel: &str, content: &str) -> MessageDraft {
        MessageDraft {
            channel_id: ChannelId::from(channel),
            user_id: UserId::new(),
            sender_name: None,
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_recent_returns_latest_oldest_first() {
        let store = InMemoryMessageStore::new();
        for content in ["one", "two", "three"] {
            store.persist(draft("general", content)).await.unwrap();
        }
        store.persist(draft("random", "elsewhere")).await.unwrap();

        let recent = store.recent(&ChannelId::from("general"), 2).await.unwrap();
        let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["two", "three"]);

        assert!(store
            .recent(&ChannelId::from("empty"), 10)
            .await
            .unwrap()
            .is_empty());
    }
}

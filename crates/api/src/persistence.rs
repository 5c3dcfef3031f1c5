//! Postgres message storage

use async_trait::async_trait;
use sqlx::PgPool;

use huddle_realtime::MessageStore;
use huddle_shared::{ChannelId, HuddleError, HuddleResult, MessageDraft, MessageRecord};

/// Messages stored in the `messages` table
#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn storage_error(err: sqlx::Error) -> HuddleError {
    tracing::error!("Database error: {:?}", err);
    HuddleError::Storage(err.to_string())
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn persist(&self, draft: MessageDraft) -> HuddleResult<MessageRecord> {
        let record: MessageRecord = sqlx::query_as(
            r#"
            INSERT INTO messages (id, channel_id, user_id, sender_name, content)
            VALUES (gen_random_uuid(), $1, $2, $3, $4)
            RETURNING id, channel_id, user_id, sender_name, content, created_at
            "#,
        )
        .bind(draft.channel_id.as_str())
        .bind(draft.user_id.0)
        .bind(&draft.sender_name)
        .bind(&draft.content)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(record)
    }

    async fn recent(&self, channel_id: &ChannelId, limit: usize) -> HuddleResult<Vec<MessageRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut records: Vec<MessageRecord> = sqlx::query_as(
            r#"
            SELECT id, channel_id, user_id, sender_name, content, created_at
            FROM messages
            WHERE channel_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(channel_id.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        records.reverse();
        Ok(records)
    }
}

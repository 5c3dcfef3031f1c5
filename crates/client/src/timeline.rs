//! Optimistic message timeline
//!
//! Locally composed messages show up immediately as `Pending` entries with a
//! temporary id. The authoritative copy (an echo from the server, or a
//! re-fetched history page) swaps its id and timestamp into the oldest
//! matching pending entry instead of adding a second row. Entries that are
//! not confirmed within the send timeout become `Failed` and stay that way.

use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::Instant;
use uuid::Uuid;

use huddle_shared::{ChannelId, MessageRecord, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineEntry {
    /// Temporary id while pending, the server id once sent
    pub id: Uuid,
    pub channel_id: ChannelId,
    pub sender_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub status: EntryStatus,
    #[serde(skip)]
    deadline: Option<Instant>,
}

impl TimelineEntry {
    fn from_record(record: &MessageRecord) -> Self {
        Self {
            id: record.id,
            channel_id: record.channel_id.clone(),
            sender_id: record.user_id,
            sender_name: record.sender_name.clone(),
            content: record.content.clone(),
            created_at: record.created_at,
            status: EntryStatus::Sent,
            deadline: None,
        }
    }

    fn matches(&self, record: &MessageRecord) -> bool {
        self.status == EntryStatus::Pending
            && self.sender_id == record.user_id
            && self.channel_id == record.channel_id
            && self.content == record.content
    }
}

/// What applying an authoritative record did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoOutcome {
    /// A pending entry with this temporary id was confirmed
    Confirmed(Uuid),
    /// No pending entry matched; the record was appended
    Appended,
    /// The server id was already known
    Duplicate,
}

#[derive(Debug)]
pub struct Timeline {
    entries: Vec<TimelineEntry>,
    known_ids: HashSet<Uuid>,
    send_timeout: Duration,
}

impl Timeline {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            entries: Vec::new(),
            known_ids: HashSet::new(),
            send_timeout,
        }
    }

    /// Add a locally composed message, returning its temporary id
    pub fn push_pending(
        &mut self,
        channel_id: ChannelId,
        sender_id: UserId,
        sender_name: Option<String>,
        content: String,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.entries.push(TimelineEntry {
            id,
            channel_id,
            sender_id,
            sender_name,
            content,
            created_at: OffsetDateTime::now_utc(),
            status: EntryStatus::Pending,
            deadline: Some(Instant::now() + self.send_timeout),
        });
        id
    }

    pub fn apply_echo(&mut self, record: &MessageRecord) -> EchoOutcome {
        if !self.known_ids.insert(record.id) {
            return EchoOutcome::Duplicate;
        }

        // Entries are in insertion order, so the first match is the oldest
        match self.entries.iter_mut().find(|e| e.matches(record)) {
            Some(entry) => {
                let temp_id = entry.id;
                entry.id = record.id;
                entry.created_at = record.created_at;
                entry.status = EntryStatus::Sent;
                entry.deadline = None;
                EchoOutcome::Confirmed(temp_id)
            }
            None => {
                self.entries.push(TimelineEntry::from_record(record));
                EchoOutcome::Appended
            }
        }
    }

    /// Mark pending entries past their deadline as failed, returning their ids
    pub fn expire(&mut self) -> Vec<Uuid> {
        let now = Instant::now();
        let mut failed = Vec::new();
        for entry in &mut self.entries {
            if entry.status == EntryStatus::Pending && entry.deadline.is_some_and(|d| d <= now) {
                entry.status = EntryStatus::Failed;
                entry.deadline = None;
                failed.push(entry.id);
            }
        }
        failed
    }

    /// Merge a re-fetched page of persisted messages
    ///
    /// Returns how many records changed the timeline.
    pub fn reconcile(&mut self, records: &[MessageRecord]) -> usize {
        records
            .iter()
            .filter(|record| self.apply_echo(record) != EchoOutcome::Duplicate)
            .count()
    }

    /// Whether `id` names an entry that is still awaiting confirmation
    pub fn is_pending(&self, id: Uuid) -> bool {
        self.get(id).is_some_and(|e| e.status == EntryStatus::Pending)
    }

    pub fn get(&self, id: Uuid) -> Option<&TimelineEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn entries(&self, channel_id: &ChannelId) -> Vec<TimelineEntry> {
        self.entries
            .iter()
            .filter(|e| &e.channel_id == channel_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(channel: &str, user_id: UserId, content: &str) -> MessageRecord {
        MessageRecord {
            id: Uuid::new_v4(),
            channel_id: ChannelId::from(channel),
            user_id,
            sender_name: None,
            content: content.to_string(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn test_echo_replaces_oldest_pending_in_place() {
        let mut timeline = Timeline::new(Duration::from_secs(10));
        let user_id = UserId::new();
        let channel = ChannelId::from("general");

        let first = timeline.push_pending(channel.clone(), user_id, None, "hi".to_string());
        let second = timeline.push_pending(channel.clone(), user_id, None, "hi".to_string());

        let echo = record("general", user_id, "hi");
        assert_eq!(timeline.apply_echo(&echo), EchoOutcome::Confirmed(first));

        let entries = timeline.entries(&channel);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, echo.id);
        assert_eq!(entries[0].status, EntryStatus::Sent);
        assert_eq!(entries[0].created_at, echo.created_at);
        assert_eq!(entries[1].id, second);
        assert_eq!(entries[1].status, EntryStatus::Pending);
    }

    #[tokio::test]
    async fn test_duplicate_echo_ignored() {
        let mut timeline = Timeline::new(Duration::from_secs(10));
        let user_id = UserId::new();
        timeline.push_pending(ChannelId::from("general"), user_id, None, "hi".to_string());

        let echo = record("general", user_id, "hi");
        assert!(matches!(timeline.apply_echo(&echo), EchoOutcome::Confirmed(_)));
        assert_eq!(timeline.apply_echo(&echo), EchoOutcome::Duplicate);
        assert_eq!(timeline.len(), 1);
    }

    #[tokio::test]
    async fn test_echo_from_other_sender_appended() {
        let mut timeline = Timeline::new(Duration::from_secs(10));
        let me = UserId::new();
        let pending = timeline.push_pending(ChannelId::from("general"), me, None, "hi".to_string());

        let theirs = record("general", UserId::new(), "hi");
        assert_eq!(timeline.apply_echo(&theirs), EchoOutcome::Appended);
        assert!(timeline.is_pending(pending));
        assert_eq!(timeline.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_entry_fails_after_timeout() {
        let mut timeline = Timeline::new(Duration::from_secs(10));
        let user_id = UserId::new();
        let id = timeline.push_pending(ChannelId::from("general"), user_id, None, "hi".to_string());

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(timeline.expire().is_empty());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(timeline.expire(), vec![id]);
        assert_eq!(timeline.get(id).map(|e| e.status), Some(EntryStatus::Failed));

        // A late echo does not revive the failed entry
        assert_eq!(
            timeline.apply_echo(&record("general", user_id, "hi")),
            EchoOutcome::Appended
        );
        assert_eq!(timeline.get(id).map(|e| e.status), Some(EntryStatus::Failed));
    }

    #[tokio::test]
    async fn test_reconcile_merges_history() {
        let mut timeline = Timeline::new(Duration::from_secs(10));
        let user_id = UserId::new();
        let pending = timeline.push_pending(ChannelId::from("general"), user_id, None, "mine".to_string());

        let history = vec![
            record("general", UserId::new(), "earlier"),
            record("general", user_id, "mine"),
        ];
        assert_eq!(timeline.reconcile(&history), 2);
        assert_eq!(timeline.reconcile(&history), 0);

        assert!(timeline.get(pending).is_none());
        assert_eq!(timeline.len(), 2);
        assert!(timeline
            .entries(&ChannelId::from("general"))
            .iter()
            .all(|e| e.status == EntryStatus::Sent));
    }
}

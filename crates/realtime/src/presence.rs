//! Presence tracker
//!
//! Presence is per user, not per connection: a user is online while any of
//! their connections keeps heartbeating. Records carry a TTL so a client that
//! vanishes without a disconnect decays to offline on its own.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

use huddle_shared::{PresenceRecord, PresenceStatus, UserId};

use crate::error::RealtimeResult;
use crate::keys;
use crate::registry::ConnectionRegistry;
use crate::store::EphemeralStore;

#[derive(Clone)]
pub struct PresenceTracker {
    store: Arc<dyn EphemeralStore>,
    ttl: Duration,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn EphemeralStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Upsert a user's presence with a fresh TTL
    pub async fn set_presence(
        &self,
        user_id: UserId,
        status: PresenceStatus,
        status_message: Option<String>,
    ) -> RealtimeResult<PresenceRecord> {
        let record = PresenceRecord {
            user_id,
            status,
            status_message,
            last_seen: Some(OffsetDateTime::now_utc()),
        };
        self.write(&record).await?;

        tracing::debug!(user_id = %user_id, status = %status, "Presence updated");
        Ok(record)
    }

    /// Current presence; missing, expired, or unreadable records are offline
    pub async fn get_presence(&self, user_id: UserId) -> PresenceRecord {
        match self.read(user_id).await {
            Ok(Some(record)) => record,
            Ok(None) => PresenceRecord::offline(user_id),
            Err(e) => {
                tracing::warn!(error = %e, user_id = %user_id, "Failed to read presence");
                PresenceRecord::offline(user_id)
            }
        }
    }

    /// Refresh a user's TTL
    ///
    /// Keeps the current status and never rewrites an available record.
    /// Returns the new record if the user was not online before, so the
    /// caller can announce the change.
    pub async fn heartbeat(&self, user_id: UserId) -> RealtimeResult<Option<PresenceRecord>> {
        let key = keys::presence(&user_id);

        if !self.store.touch(&key, self.ttl).await? {
            let record = Self::online(user_id);
            if self
                .store
                .put_if_absent(&key, &serde_json::to_string(&record)?, self.ttl)
                .await?
            {
                self.index(&record).await?;
                return Ok(Some(record));
            }
        }

        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };
        let current: PresenceRecord = serde_json::from_str(&raw)?;
        if current.status.is_available() {
            self.index(&current).await?;
            return Ok(None);
        }

        // Stored offline: come back online unless another writer got there first
        let record = Self::online(user_id);
        if self
            .store
            .compare_and_put(&key, &raw, &serde_json::to_string(&record)?, self.ttl)
            .await?
        {
            self.index(&record).await?;
            return Ok(Some(record));
        }
        Ok(None)
    }

    /// Re-evaluate presence after one of the user's connections went away
    ///
    /// Only a user with no live connections goes offline. A connection that
    /// registers while the offline record is being written puts the previous
    /// record back. Returns the offline record when that is a change.
    pub async fn connection_removed(
        &self,
        user_id: UserId,
        registry: &ConnectionRegistry,
    ) -> RealtimeResult<Option<PresenceRecord>> {
        if !registry.connections_of(&user_id).await?.is_empty() {
            return Ok(None);
        }

        let previous = self.read(user_id).await?;
        let offline = PresenceRecord {
            last_seen: Some(OffsetDateTime::now_utc()),
            ..PresenceRecord::offline(user_id)
        };
        let offline_raw = serde_json::to_string(&offline)?;
        self.store
            .put(&keys::presence(&user_id), &offline_raw, self.ttl)
            .await?;
        self.index(&offline).await?;

        if !registry.connections_of(&user_id).await?.is_empty() {
            let restored = match previous {
                Some(record) if record.status.is_available() => record,
                _ => Self::online(user_id),
            };
            if self
                .store
                .compare_and_put(
                    &keys::presence(&user_id),
                    &offline_raw,
                    &serde_json::to_string(&restored)?,
                    self.ttl,
                )
                .await?
            {
                self.index(&restored).await?;
            }
            tracing::debug!(user_id = %user_id, "Connection registered while going offline");
            return Ok(None);
        }

        tracing::debug!(user_id = %user_id, status = %offline.status, "Presence updated");
        match previous {
            Some(PresenceRecord {
                status: PresenceStatus::Offline,
                ..
            }) => Ok(None),
            _ => Ok(Some(offline)),
        }
    }

    /// Users with live, non-offline presence
    pub async fn online_users(&self) -> RealtimeResult<Vec<UserId>> {
        let members = self.store.scored_live(keys::ONLINE_USERS).await?;
        Ok(members
            .iter()
            .filter_map(|member| match member.parse::<UserId>() {
                Ok(user_id) => Some(user_id),
                Err(_) => {
                    tracing::warn!(member = %member, "Ignoring malformed online user entry");
                    None
                }
            })
            .collect())
    }

    /// Records of every online user, for the initial presence frame
    pub async fn snapshot(&self) -> RealtimeResult<Vec<PresenceRecord>> {
        let users = self.online_users().await?;
        let records = join_all(users.into_iter().map(|user_id| self.get_presence(user_id))).await;
        Ok(records
            .into_iter()
            .filter(|record| record.status.is_available())
            .collect())
    }

    async fn read(&self, user_id: UserId) -> RealtimeResult<Option<PresenceRecord>> {
        match self.store.get(&keys::presence(&user_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn online(user_id: UserId) -> PresenceRecord {
        PresenceRecord {
            user_id,
            status: PresenceStatus::Online,
            status_message: None,
            last_seen: Some(OffsetDateTime::now_utc()),
        }
    }

    async fn write(&self, record: &PresenceRecord) -> RealtimeResult<()> {
        let raw = serde_json::to_string(record)?;
        self.store
            .put(&keys::presence(&record.user_id), &raw, self.ttl)
            .await?;
        self.index(record).await
    }

    /// Keep the online-users index in step with a record's status
    async fn index(&self, record: &PresenceRecord) -> RealtimeResult<()> {
        let member = record.user_id.to_string();
        if record.status.is_available() {
            self.store
                .scored_add(keys::ONLINE_USERS, &member, self.ttl)
                .await?;
        } else {
            self.store.scored_remove(keys::ONLINE_USERS, &member).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use huddle_shared::ConnectionId;

    fn tracker() -> PresenceTracker {
        fixture().0
    }

    fn fixture() -> (PresenceTracker, ConnectionRegistry) {
        let store: Arc<dyn EphemeralStore> = Arc::new(MemoryStore::new());
        (
            PresenceTracker::new(store.clone(), Duration::from_secs(300)),
            ConnectionRegistry::new(store, Duration::from_secs(3600)),
        )
    }

    #[tokio::test]
    async fn test_unknown_user_is_offline() {
        let tracker = tracker();
        let user_id = UserId::new();
        assert_eq!(
            tracker.get_presence(user_id).await,
            PresenceRecord::offline(user_id)
        );
    }

    #[tokio::test]
    async fn test_set_and_get_presence() {
        let tracker = tracker();
        let user_id = UserId::new();

        tracker
            .set_presence(user_id, PresenceStatus::Busy, Some("Focusing".into()))
            .await
            .unwrap();

        let record = tracker.get_presence(user_id).await;
        assert_eq!(record.status, PresenceStatus::Busy);
        assert_eq!(record.status_message.as_deref(), Some("Focusing"));
        assert!(record.last_seen.is_some());
        assert_eq!(tracker.online_users().await.unwrap(), vec![user_id]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_presence_expires_to_offline() {
        let tracker = tracker();
        let user_id = UserId::new();
        tracker
            .set_presence(user_id, PresenceStatus::Online, None)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(301)).await;

        assert_eq!(tracker.get_presence(user_id).await.status, PresenceStatus::Offline);
        assert!(tracker.online_users().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_keeps_status_and_extends_ttl() {
        let tracker = tracker();
        let user_id = UserId::new();

        let first = tracker.heartbeat(user_id).await.unwrap();
        assert_eq!(first.map(|r| r.status), Some(PresenceStatus::Online));

        tracker
            .set_presence(user_id, PresenceStatus::Away, None)
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(200)).await;
        assert!(tracker.heartbeat(user_id).await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(200)).await;
        assert_eq!(tracker.get_presence(user_id).await.status, PresenceStatus::Away);
        assert_eq!(tracker.online_users().await.unwrap(), vec![user_id]);
    }

    #[tokio::test]
    async fn test_heartbeat_never_reverts_another_devices_status() {
        let tracker = tracker();
        let user_id = UserId::new();
        tracker.heartbeat(user_id).await.unwrap();

        // Another device changes status between two heartbeats of this one
        tracker
            .set_presence(user_id, PresenceStatus::Busy, Some("focus".into()))
            .await
            .unwrap();
        assert!(tracker.heartbeat(user_id).await.unwrap().is_none());

        let record = tracker.get_presence(user_id).await;
        assert_eq!(record.status, PresenceStatus::Busy);
        assert_eq!(record.status_message.as_deref(), Some("focus"));
    }

    #[tokio::test]
    async fn test_heartbeat_brings_offline_user_back() {
        let tracker = tracker();
        let user_id = UserId::new();
        tracker
            .set_presence(user_id, PresenceStatus::Offline, None)
            .await
            .unwrap();

        let record = tracker.heartbeat(user_id).await.unwrap().unwrap();
        assert_eq!(record.status, PresenceStatus::Online);
        assert_eq!(tracker.online_users().await.unwrap(), vec![user_id]);
        assert!(tracker.heartbeat(user_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_connection_removed_only_offline_when_last() {
        let (tracker, registry) = fixture();
        let user_id = UserId::new();
        let first = ConnectionId::new();
        let second = ConnectionId::new();
        registry.register(first.clone(), user_id, None).await.unwrap();
        registry.register(second.clone(), user_id, None).await.unwrap();
        tracker.heartbeat(user_id).await.unwrap();

        registry.unregister(&first).await.unwrap();
        assert!(tracker
            .connection_removed(user_id, &registry)
            .await
            .unwrap()
            .is_none());
        assert_eq!(tracker.get_presence(user_id).await.status, PresenceStatus::Online);

        registry.unregister(&second).await.unwrap();
        let offline = tracker
            .connection_removed(user_id, &registry)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(offline.status, PresenceStatus::Offline);
        assert!(offline.last_seen.is_some());
        assert!(tracker.online_users().await.unwrap().is_empty());

        // Already offline: nothing new to announce
        assert!(tracker
            .connection_removed(user_id, &registry)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_reconnect_before_presence_update_stays_online() {
        let (tracker, registry) = fixture();
        let user_id = UserId::new();
        let old = ConnectionId::new();
        registry.register(old.clone(), user_id, None).await.unwrap();
        tracker
            .set_presence(user_id, PresenceStatus::Away, None)
            .await
            .unwrap();

        // The old connection is gone, then the user reconnects before the
        // presence update for the old one runs
        let removed = registry.unregister(&old).await.unwrap().unwrap();
        assert_eq!(removed.remaining_connections, 0);
        registry
            .register(ConnectionId::new(), user_id, None)
            .await
            .unwrap();
        tracker.heartbeat(user_id).await.unwrap();

        assert!(tracker
            .connection_removed(user_id, &registry)
            .await
            .unwrap()
            .is_none());
        assert_eq!(tracker.get_presence(user_id).await.status, PresenceStatus::Away);
        assert_eq!(tracker.online_users().await.unwrap(), vec![user_id]);
    }

    /// Registers a connection for `user_id` right after the presence key is
    /// next written, the way a concurrent reconnect would
    struct ReconnectOnWrite {
        inner: Arc<MemoryStore>,
        pending: std::sync::Mutex<Option<(ConnectionRegistry, UserId)>>,
    }

    #[async_trait::async_trait]
    impl EphemeralStore for ReconnectOnWrite {
        async fn put(&self, key: &str, value: &str, ttl: Duration) -> crate::store::StoreResult<()> {
            self.inner.put(key, value, ttl).await?;
            let pending = self.pending.lock().unwrap().take();
            if let Some((registry, user_id)) = pending {
                if key == keys::presence(&user_id) {
                    registry
                        .register(ConnectionId::new(), user_id, None)
                        .await
                        .unwrap();
                }
            }
            Ok(())
        }
        async fn replace(&self, key: &str, value: &str) -> crate::store::StoreResult<bool> {
            self.inner.replace(key, value).await
        }
        async fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> crate::store::StoreResult<bool> {
            self.inner.put_if_absent(key, value, ttl).await
        }
        async fn compare_and_put(
            &self,
            key: &str,
            expected: &str,
            value: &str,
            ttl: Duration,
        ) -> crate::store::StoreResult<bool> {
            self.inner.compare_and_put(key, expected, value, ttl).await
        }
        async fn touch(&self, key: &str, ttl: Duration) -> crate::store::StoreResult<bool> {
            self.inner.touch(key, ttl).await
        }
        async fn get(&self, key: &str) -> crate::store::StoreResult<Option<String>> {
            self.inner.get(key).await
        }
        async fn delete(&self, key: &str) -> crate::store::StoreResult<bool> {
            self.inner.delete(key).await
        }
        async fn set_add(&self, key: &str, member: &str, ttl: Option<Duration>) -> crate::store::StoreResult<()> {
            self.inner.set_add(key, member, ttl).await
        }
        async fn set_remove(&self, key: &str, member: &str) -> crate::store::StoreResult<bool> {
            self.inner.set_remove(key, member).await
        }
        async fn set_members(&self, key: &str) -> crate::store::StoreResult<Vec<String>> {
            self.inner.set_members(key).await
        }
        async fn scored_add(&self, key: &str, member: &str, ttl: Duration) -> crate::store::StoreResult<()> {
            self.inner.scored_add(key, member, ttl).await
        }
        async fn scored_remove(&self, key: &str, member: &str) -> crate::store::StoreResult<bool> {
            self.inner.scored_remove(key, member).await
        }
        async fn scored_live(&self, key: &str) -> crate::store::StoreResult<Vec<String>> {
            self.inner.scored_live(key).await
        }
    }

    #[tokio::test]
    async fn test_reconnect_while_going_offline_restores_presence() {
        let inner = Arc::new(MemoryStore::new());
        let registry = ConnectionRegistry::new(inner.clone(), Duration::from_secs(3600));
        let store = Arc::new(ReconnectOnWrite {
            inner,
            pending: std::sync::Mutex::new(None),
        });
        let tracker = PresenceTracker::new(store.clone(), Duration::from_secs(300));

        let user_id = UserId::new();
        tracker
            .set_presence(user_id, PresenceStatus::Busy, Some("focus".into()))
            .await
            .unwrap();
        *store.pending.lock().unwrap() = Some((registry.clone(), user_id));

        assert!(tracker
            .connection_removed(user_id, &registry)
            .await
            .unwrap()
            .is_none());
        assert_eq!(registry.connections_of(&user_id).await.unwrap().len(), 1);

        let record = tracker.get_presence(user_id).await;
        assert_eq!(record.status, PresenceStatus::Busy);
        assert_eq!(record.status_message.as_deref(), Some("focus"));
        assert_eq!(tracker.online_users().await.unwrap(), vec![user_id]);
    }

    #[tokio::test]
    async fn test_snapshot_lists_available_users() {
        let (tracker, registry) = fixture();
        let online = UserId::new();
        let gone = UserId::new();
        tracker.heartbeat(online).await.unwrap();
        tracker.heartbeat(gone).await.unwrap();
        tracker.connection_removed(gone, &registry).await.unwrap();

        let snapshot = tracker.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].user_id, online);
    }
}

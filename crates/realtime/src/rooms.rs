//! Room membership index
//!
//! Maps a channel to the connections currently viewing it. The connection
//! row's `active_channel_id` is authoritative; the per-room buckets are an
//! index over it and tolerate being briefly out of date.

use huddle_shared::{ChannelId, ConnectionId};

use crate::error::{RealtimeError, RealtimeResult};
use crate::keys;
use crate::registry::{Connection, ConnectionRegistry};

#[derive(Clone)]
pub struct RoomIndex {
    registry: ConnectionRegistry,
}

impl RoomIndex {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Make `channel_id` the connection's only active room
    pub async fn join(
        &self,
        connection_id: &ConnectionId,
        channel_id: &ChannelId,
    ) -> RealtimeResult<Connection> {
        let previous = self
            .registry
            .lookup(connection_id)
            .await?
            .ok_or_else(|| RealtimeError::UnknownConnection(connection_id.clone()))?;

        // Row first: a reader of the old bucket now sees a mismatch and
        // prunes, and the new bucket never lists a row pointing elsewhere
        let updated = self
            .registry
            .set_active_channel(connection_id, Some(channel_id.clone()))
            .await?
            .ok_or_else(|| RealtimeError::UnknownConnection(connection_id.clone()))?;

        let store = self.registry.store();
        if let Some(prev) = previous.active_channel_id.as_ref().filter(|p| *p != channel_id) {
            store.set_remove(&keys::room(prev), connection_id.as_str()).await?;
        }
        store
            .set_add(
                &keys::room(channel_id),
                connection_id.as_str(),
                Some(self.registry.ttl()),
            )
            .await?;

        tracing::debug!(
            connection_id = %connection_id,
            channel_id = %channel_id,
            previous_channel = ?previous.active_channel_id,
            "Connection joined room"
        );

        Ok(updated)
    }

    /// Leave a room; a no-op if the connection is not in it
    pub async fn leave(
        &self,
        connection_id: &ConnectionId,
        channel_id: &ChannelId,
    ) -> RealtimeResult<()> {
        let store = self.registry.store();
        let removed = store
            .set_remove(&keys::room(channel_id), connection_id.as_str())
            .await?;

        if let Some(connection) = self.registry.lookup(connection_id).await? {
            if connection.active_channel_id.as_ref() == Some(channel_id) {
                self.registry.set_active_channel(connection_id, None).await?;
            }
        }

        if removed {
            tracing::debug!(
                connection_id = %connection_id,
                channel_id = %channel_id,
                "Connection left room"
            );
        }
        Ok(())
    }

    /// Live connections in a room
    pub async fn members_of(&self, channel_id: &ChannelId) -> RealtimeResult<Vec<ConnectionId>> {
        self.registry.list_by_channel(channel_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EphemeralStore, MemoryStore};
    use huddle_shared::UserId;
    use std::sync::Arc;
    use std::time::Duration;

    fn rooms() -> (ConnectionRegistry, RoomIndex) {
        let registry =
            ConnectionRegistry::new(Arc::new(MemoryStore::new()), Duration::from_secs(3600));
        (registry.clone(), RoomIndex::new(registry))
    }

    #[tokio::test]
    async fn test_join_moves_between_rooms() {
        let (registry, rooms) = rooms();
        let general = ChannelId::from("general");
        let random = ChannelId::from("random");
        let id = ConnectionId::new();
        registry
            .register(id.clone(), UserId::new(), Some(general.clone()))
            .await
            .unwrap();

        let conn = rooms.join(&id, &random).await.unwrap();
        assert_eq!(conn.active_channel_id, Some(random.clone()));

        assert!(rooms.members_of(&general).await.unwrap().is_empty());
        assert_eq!(rooms.members_of(&random).await.unwrap(), vec![id]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_room_bucket_expires_with_its_rows() {
        let store = Arc::new(MemoryStore::new());
        let registry = ConnectionRegistry::new(store.clone(), Duration::from_secs(3600));
        let rooms = RoomIndex::new(registry.clone());
        let general = ChannelId::from("general");
        let random = ChannelId::from("random");
        let first = ConnectionId::new();
        let second = ConnectionId::new();
        registry
            .register(first, UserId::new(), Some(general.clone()))
            .await
            .unwrap();
        registry.register(second.clone(), UserId::new(), None).await.unwrap();
        rooms.join(&second, &random).await.unwrap();

        tokio::time::advance(Duration::from_secs(3601)).await;

        // Nothing has read the buckets, yet the store no longer holds them
        assert!(store
            .set_members(&keys::room(&general))
            .await
            .unwrap()
            .is_empty());
        assert!(store
            .set_members(&keys::room(&random))
            .await
            .unwrap()
            .is_empty());
        store.purge_expired().await;
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_join_same_room_twice() {
        let (registry, rooms) = rooms();
        let general = ChannelId::from("general");
        let id = ConnectionId::new();
        registry.register(id.clone(), UserId::new(), None).await.unwrap();

        rooms.join(&id, &general).await.unwrap();
        rooms.join(&id, &general).await.unwrap();
        assert_eq!(rooms.members_of(&general).await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_join_unknown_connection() {
        let (_, rooms) = rooms();
        let err = rooms
            .join(&ConnectionId::from("nobody"), &ChannelId::from("general"))
            .await
            .unwrap_err();
        assert!(matches!(err, RealtimeError::UnknownConnection(id) if id.as_str() == "nobody"));
    }

    #[tokio::test]
    async fn test_leave_is_idempotent() {
        let (registry, rooms) = rooms();
        let general = ChannelId::from("general");
        let id = ConnectionId::new();
        registry
            .register(id.clone(), UserId::new(), Some(general.clone()))
            .await
            .unwrap();

        rooms.leave(&id, &general).await.unwrap();
        rooms.leave(&id, &general).await.unwrap();

        assert!(rooms.members_of(&general).await.unwrap().is_empty());
        let conn = registry.lookup(&id).await.unwrap().unwrap();
        assert!(conn.active_channel_id.is_none());
    }

    #[tokio::test]
    async fn test_leave_other_room_keeps_active() {
        let (registry, rooms) = rooms();
        let general = ChannelId::from("general");
        let id = ConnectionId::new();
        registry
            .register(id.clone(), UserId::new(), Some(general.clone()))
            .await
            .unwrap();

        rooms.leave(&id, &ChannelId::from("random")).await.unwrap();

        assert_eq!(rooms.members_of(&general).await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_leave_unknown_connection_is_noop() {
        let (_, rooms) = rooms();
        rooms
            .leave(&ConnectionId::new(), &ChannelId::from("general"))
            .await
            .unwrap();
    }
}

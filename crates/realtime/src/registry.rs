//! Connection registry
//!
//! The registry exclusively owns connection identity. Each live transport
//! link has one row with a hard TTL; rows whose disconnect was never observed
//! simply expire. Room buckets and the per-user index only hold ids and are
//! pruned lazily whenever a read finds an id without a matching row.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

use huddle_shared::{ChannelId, ConnectionId, UserId};

use crate::error::RealtimeResult;
use crate::keys;
use crate::store::EphemeralStore;

/// A registered connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    /// At most one active room per connection
    pub active_channel_id: Option<ChannelId>,
    #[serde(with = "time::serde::rfc3339")]
    pub connected_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub ttl_expiry: OffsetDateTime,
}

/// Result of removing a connection row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unregistered {
    pub connection: Connection,
    /// Live connections the same user still has
    pub remaining_connections: usize,
}

/// Registry of live connections
#[derive(Clone)]
pub struct ConnectionRegistry {
    store: Arc<dyn EphemeralStore>,
    ttl: Duration,
}

impl ConnectionRegistry {
    pub fn new(store: Arc<dyn EphemeralStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub(crate) fn store(&self) -> &Arc<dyn EphemeralStore> {
        &self.store
    }

    /// Hard lifetime of a connection row
    pub(crate) fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record a connection; re-registering the same id overwrites the row
    pub async fn register(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        channel_id: Option<ChannelId>,
    ) -> RealtimeResult<Connection> {
        let connected_at = OffsetDateTime::now_utc();
        let connection = Connection {
            connection_id,
            user_id,
            active_channel_id: channel_id,
            connected_at,
            ttl_expiry: connected_at + self.ttl,
        };

        let row = serde_json::to_string(&connection)?;
        let id = connection.connection_id.as_str();
        self.store
            .put(&keys::connection(&connection.connection_id), &row, self.ttl)
            .await?;
        self.store
            .set_add(&keys::user_connections(&user_id), id, Some(self.ttl))
            .await?;
        if let Some(channel_id) = &connection.active_channel_id {
            // Buckets never outlive the newest row they index
            self.store
                .set_add(&keys::room(channel_id), id, Some(self.ttl))
                .await?;
        }

        tracing::debug!(
            connection_id = %connection.connection_id,
            user_id = %user_id,
            channel_id = ?connection.active_channel_id,
            "Connection registered"
        );

        Ok(connection)
    }

    /// Remove a connection row, cascading best-effort to its room bucket and
    /// user index
    ///
    /// Returns `None` if the row was already gone, so concurrent callers
    /// observe exactly one successful deregistration.
    pub async fn unregister(
        &self,
        connection_id: &ConnectionId,
    ) -> RealtimeResult<Option<Unregistered>> {
        let Some(connection) = self.lookup(connection_id).await? else {
            return Ok(None);
        };
        if !self.store.delete(&keys::connection(connection_id)).await? {
            return Ok(None);
        }

        if let Some(channel_id) = &connection.active_channel_id {
            if let Err(e) = self
                .store
                .set_remove(&keys::room(channel_id), connection_id.as_str())
                .await
            {
                tracing::warn!(
                    error = %e,
                    connection_id = %connection_id,
                    channel_id = %channel_id,
                    "Failed to remove connection from room; will be pruned on read"
                );
            }
        }
        if let Err(e) = self
            .store
            .set_remove(
                &keys::user_connections(&connection.user_id),
                connection_id.as_str(),
            )
            .await
        {
            tracing::warn!(
                error = %e,
                connection_id = %connection_id,
                "Failed to remove connection from user index; will be pruned on read"
            );
        }

        let remaining_connections = self.connections_of(&connection.user_id).await?.len();

        tracing::debug!(
            connection_id = %connection_id,
            user_id = %connection.user_id,
            remaining_connections,
            "Connection unregistered"
        );

        Ok(Some(Unregistered {
            connection,
            remaining_connections,
        }))
    }

    /// Look up a connection; expired or missing rows are `None`
    pub async fn lookup(&self, connection_id: &ConnectionId) -> RealtimeResult<Option<Connection>> {
        match self.store.get(&keys::connection(connection_id)).await? {
            Some(row) => Ok(Some(serde_json::from_str(&row)?)),
            None => Ok(None),
        }
    }

    /// Connections whose active room is `channel_id`
    pub async fn list_by_channel(&self, channel_id: &ChannelId) -> RealtimeResult<Vec<ConnectionId>> {
        let key = keys::room(channel_id);
        let ids = self.store.set_members(&key).await?;

        let live = self
            .retain_live(&key, ids, |connection| {
                connection.active_channel_id.as_ref() == Some(channel_id)
            })
            .await?;
        Ok(live)
    }

    /// Live connections owned by `user_id`
    pub async fn connections_of(&self, user_id: &UserId) -> RealtimeResult<Vec<ConnectionId>> {
        let key = keys::user_connections(user_id);
        let ids = self.store.set_members(&key).await?;

        self.retain_live(&key, ids, |connection| connection.user_id == *user_id)
            .await
    }

    /// Point a connection at a new active room (or none), keeping its TTL
    ///
    /// Returns `None` if the connection no longer exists.
    pub async fn set_active_channel(
        &self,
        connection_id: &ConnectionId,
        channel_id: Option<ChannelId>,
    ) -> RealtimeResult<Option<Connection>> {
        let Some(mut connection) = self.lookup(connection_id).await? else {
            return Ok(None);
        };
        connection.active_channel_id = channel_id;

        let row = serde_json::to_string(&connection)?;
        if self
            .store
            .replace(&keys::connection(connection_id), &row)
            .await?
        {
            Ok(Some(connection))
        } else {
            Ok(None)
        }
    }

    /// Keep ids of `index_key` that still have a row accepted by `belongs`,
    /// pruning the rest from the index
    async fn retain_live<F>(
        &self,
        index_key: &str,
        ids: Vec<String>,
        belongs: F,
    ) -> RealtimeResult<Vec<ConnectionId>>
    where
        F: Fn(&Connection) -> bool,
    {
        let ids: Vec<ConnectionId> = ids.into_iter().map(ConnectionId::from).collect();
        let rows = join_all(ids.iter().map(|id| self.lookup(id))).await;

        let mut live = Vec::with_capacity(ids.len());
        for (id, row) in ids.into_iter().zip(rows) {
            match row? {
                Some(connection) if belongs(&connection) => live.push(id),
                _ => {
                    tracing::debug!(
                        connection_id = %id,
                        index = %index_key,
                        "Pruning stale index entry"
                    );
                    self.store.set_remove(index_key, id.as_str()).await?;
                }
            }
        }
        Ok(live)
    }
}

//! Realtime hub
//!
//! The single entry point used by transport gateways and collaborators. It
//! ties connection lifecycle, room membership, presence, and typing to the
//! frames each change produces.

use std::sync::Arc;

use huddle_shared::{
    ChannelId, ClientEvent, ConnectionId, MessageDraft, MessageRecord, OutboundMessage,
    PresenceRecord, PresenceStatus, ServerEvent, UserId,
};

use crate::config::RealtimeConfig;
use crate::dispatcher::{DeliveryReport, Dispatcher};
use crate::error::{RealtimeError, RealtimeResult};
use crate::links::LinkTable;
use crate::persistence::MessageStore;
use crate::presence::PresenceTracker;
use crate::registry::{Connection, ConnectionRegistry, Unregistered};
use crate::rooms::RoomIndex;
use crate::store::EphemeralStore;
use crate::typing::TypingStore;

/// Display name used when a typing client does not send one
const DEFAULT_TYPING_NAME: &str = "Someone";

/// Longest accepted message body, in characters
pub const MAX_CONTENT_LENGTH: usize = 10_000;

#[derive(Clone)]
pub struct Hub {
    registry: ConnectionRegistry,
    rooms: RoomIndex,
    presence: PresenceTracker,
    typing: TypingStore,
    dispatcher: Dispatcher,
    links: Arc<dyn LinkTable>,
    messages: Arc<dyn MessageStore>,
}

impl Hub {
    pub fn new(
        store: Arc<dyn EphemeralStore>,
        links: Arc<dyn LinkTable>,
        messages: Arc<dyn MessageStore>,
        config: RealtimeConfig,
    ) -> Self {
        let registry = ConnectionRegistry::new(store.clone(), config.connection_ttl);
        let presence = PresenceTracker::new(store.clone(), config.presence_ttl);
        let dispatcher = Dispatcher::new(registry.clone(), presence.clone(), links.clone());

        Self {
            rooms: RoomIndex::new(registry.clone()),
            typing: TypingStore::new(store, config.typing_ttl),
            registry,
            presence,
            dispatcher,
            links,
            messages,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn rooms(&self) -> &RoomIndex {
        &self.rooms
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn typing(&self) -> &TypingStore {
        &self.typing
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn messages(&self) -> &Arc<dyn MessageStore> {
        &self.messages
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Register a freshly opened connection whose link is already attached
    ///
    /// Sends `connected` and the presence snapshot to the new connection and
    /// announces the user if they just came online.
    pub async fn connect(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        channel_id: Option<ChannelId>,
    ) -> RealtimeResult<Connection> {
        let connection = self
            .registry
            .register(connection_id.clone(), user_id, channel_id)
            .await?;
        let came_online = self.presence.heartbeat(user_id).await?;

        let connected = OutboundMessage::new(ServerEvent::Connected {
            connection_id: connection_id.clone(),
        });
        // A dead link here is deregistered by the dispatcher
        if self.dispatcher.deliver_to(&connection_id, &connected).await.is_err() {
            return Ok(connection);
        }

        let users = self.presence.snapshot().await?;
        let snapshot = OutboundMessage::new(ServerEvent::PresenceState { users });
        let _ = self.dispatcher.deliver_to(&connection_id, &snapshot).await;

        if let Some(record) = came_online {
            self.announce_presence(&record).await?;
        }

        tracing::info!(
            connection_id = %connection_id,
            user_id = %user_id,
            channel_id = ?connection.active_channel_id,
            "Client connected"
        );

        Ok(connection)
    }

    /// Remove a connection that closed cleanly
    ///
    /// Returns `None` if it was already gone.
    pub async fn disconnect(&self, connection_id: &ConnectionId) -> RealtimeResult<Option<Unregistered>> {
        self.links.detach(connection_id).await;
        let Some(removed) = self.registry.unregister(connection_id).await? else {
            return Ok(None);
        };
        let user_id = removed.connection.user_id;

        if let Some(channel_id) = &removed.connection.active_channel_id {
            self.stop_typing(connection_id, channel_id, user_id).await?;
        }

        if let Some(offline) = self
            .presence
            .connection_removed(user_id, &self.registry)
            .await?
        {
            self.announce_presence(&offline).await?;
        }

        tracing::info!(
            connection_id = %connection_id,
            user_id = %user_id,
            remaining_connections = removed.remaining_connections,
            "Client disconnected"
        );

        Ok(Some(removed))
    }

    // =========================================================================
    // Client events
    // =========================================================================

    /// Apply one client event on behalf of a connection
    pub async fn handle(&self, connection_id: &ConnectionId, event: ClientEvent) -> RealtimeResult<()> {
        let connection = self
            .registry
            .lookup(connection_id)
            .await?
            .ok_or_else(|| RealtimeError::UnknownConnection(connection_id.clone()))?;
        let user_id = connection.user_id;

        tracing::debug!(
            connection_id = %connection_id,
            event = event.kind(),
            "Handling client event"
        );

        match event {
            ClientEvent::Join { channel_id } => {
                self.rooms.join(connection_id, &channel_id).await?;
            }
            ClientEvent::Leave { channel_id } => {
                self.rooms.leave(connection_id, &channel_id).await?;
            }
            ClientEvent::Message {
                channel_id,
                content,
                sender_id,
                sender_name,
            } => {
                if sender_id.is_some_and(|sender| sender != user_id) {
                    return Err(RealtimeError::Rejected(
                        "Sender does not match the connection's user".to_string(),
                    ));
                }
                let draft = MessageDraft {
                    channel_id: channel_id.clone(),
                    user_id,
                    sender_name,
                    content,
                };
                let record = self.post_message(draft, Some(connection_id)).await?;
                // Already persisted and broadcast, so the sender still gets its ack
                if let Err(e) = self.stop_typing(connection_id, &channel_id, user_id).await {
                    tracing::warn!(
                        error = %e,
                        connection_id = %connection_id,
                        channel_id = %channel_id,
                        "Failed to clear typing after message"
                    );
                }

                let accepted = OutboundMessage::for_channel(
                    channel_id,
                    ServerEvent::MessageAccepted { message: record },
                );
                let _ = self.dispatcher.deliver_to(connection_id, &accepted).await;
            }
            ClientEvent::TypingStart {
                channel_id,
                user_name,
            } => {
                self.typing.start(&channel_id, user_id).await?;
                let frame = OutboundMessage::for_channel(
                    channel_id.clone(),
                    ServerEvent::TypingStart {
                        user_id,
                        user_name: user_name.unwrap_or_else(|| DEFAULT_TYPING_NAME.to_string()),
                    },
                )
                .from_sender(connection_id.clone());
                self.dispatcher
                    .publish(&channel_id, &frame, Some(connection_id))
                    .await?;
            }
            ClientEvent::TypingStop { channel_id } => {
                self.stop_typing(connection_id, &channel_id, user_id).await?;
            }
            ClientEvent::SetPresence {
                status,
                status_message,
            } => {
                self.set_presence(user_id, status, status_message).await?;
            }
            ClientEvent::Ping => {
                if let Some(record) = self.presence.heartbeat(user_id).await? {
                    self.announce_presence(&record).await?;
                }
                let pong = OutboundMessage::new(ServerEvent::Pong);
                let _ = self.dispatcher.deliver_to(connection_id, &pong).await;
            }
        }

        Ok(())
    }

    /// Tell one connection that its last event failed
    pub async fn send_error(&self, connection_id: &ConnectionId, message: impl Into<String>) {
        let frame = OutboundMessage::new(ServerEvent::Error {
            message: message.into(),
        });
        let _ = self.dispatcher.deliver_to(connection_id, &frame).await;
    }

    // =========================================================================
    // Collaborator entry points
    // =========================================================================

    /// Broadcast an already persisted message to its room
    pub async fn publish_record(
        &self,
        record: &MessageRecord,
        exclude: Option<&ConnectionId>,
    ) -> RealtimeResult<DeliveryReport> {
        let mut frame = OutboundMessage::for_channel(
            record.channel_id.clone(),
            ServerEvent::Message {
                message: record.clone(),
            },
        );
        if let Some(sender) = exclude {
            frame = frame.from_sender(sender.clone());
        }

        self.dispatcher
            .publish(&record.channel_id, &frame, exclude)
            .await
    }

    /// Persist a draft, then broadcast the stored record
    ///
    /// Empty or overlong content is rejected before anything is stored.
    pub async fn post_message(
        &self,
        draft: MessageDraft,
        exclude: Option<&ConnectionId>,
    ) -> RealtimeResult<MessageRecord> {
        validate_content(&draft.content)?;
        let record = self.messages.persist(draft).await?;
        self.publish_record(&record, exclude).await?;
        Ok(record)
    }

    /// Set a user's presence and announce it
    pub async fn set_presence(
        &self,
        user_id: UserId,
        status: PresenceStatus,
        status_message: Option<String>,
    ) -> RealtimeResult<PresenceRecord> {
        let record = self
            .presence
            .set_presence(user_id, status, status_message)
            .await?;
        self.announce_presence(&record).await?;
        Ok(record)
    }

    async fn announce_presence(&self, record: &PresenceRecord) -> RealtimeResult<()> {
        let frame = OutboundMessage::new(ServerEvent::presence_update(record));
        self.dispatcher.publish_global(&frame).await?;
        Ok(())
    }

    async fn stop_typing(
        &self,
        connection_id: &ConnectionId,
        channel_id: &ChannelId,
        user_id: UserId,
    ) -> RealtimeResult<()> {
        if !self.typing.stop(channel_id, user_id).await? {
            return Ok(());
        }

        let frame = OutboundMessage::for_channel(channel_id.clone(), ServerEvent::TypingStop { user_id })
            .from_sender(connection_id.clone());
        self.dispatcher
            .publish(channel_id, &frame, Some(connection_id))
            .await?;
        Ok(())
    }
}

fn validate_content(content: &str) -> RealtimeResult<()> {
    if content.trim().is_empty() {
        return Err(RealtimeError::Rejected("Message content is empty".to_string()));
    }
    if content.chars().count() > MAX_CONTENT_LENGTH {
        return Err(RealtimeError::Rejected(format!(
            "Content too long (max {} characters)",
            MAX_CONTENT_LENGTH
        )));
    }
    Ok(())
}

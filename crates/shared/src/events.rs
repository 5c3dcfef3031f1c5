//! Realtime wire events
//!
//! Client-to-server and server-to-client events are closed tagged unions, so
//! every handler matches them exhaustively. Frames are JSON objects tagged by
//! `type`.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::types::{
    ChannelId, ConnectionId, MessageRecord, PresenceRecord, PresenceStatus, UserId,
};

// =============================================================================
// Client-to-Server Events
// =============================================================================

/// Events sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Make `channel_id` the connection's active room
    Join { channel_id: ChannelId },

    /// Leave a room
    Leave { channel_id: ChannelId },

    /// Post a message to a room (persisted before it is broadcast)
    Message {
        channel_id: ChannelId,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_id: Option<UserId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_name: Option<String>,
    },

    /// Keystroke in a room; resent while the user keeps typing
    TypingStart {
        channel_id: ChannelId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
    },

    /// Explicit end of typing
    TypingStop { channel_id: ChannelId },

    /// Set the user's presence status
    SetPresence {
        status: PresenceStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status_message: Option<String>,
    },

    /// Heartbeat; refreshes presence
    Ping,
}

impl ClientEvent {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Leave { .. } => "leave",
            Self::Message { .. } => "message",
            Self::TypingStart { .. } => "typing_start",
            Self::TypingStop { .. } => "typing_stop",
            Self::SetPresence { .. } => "set_presence",
            Self::Ping => "ping",
        }
    }
}

// =============================================================================
// Server-to-Client Events
// =============================================================================

/// Events sent from server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Connection acknowledged
    Connected { connection_id: ConnectionId },

    /// Full presence snapshot, sent once on connect
    PresenceState { users: Vec<PresenceRecord> },

    /// One user's presence changed
    PresenceUpdate {
        user_id: UserId,
        status: PresenceStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status_message: Option<String>,
    },

    /// A persisted message
    Message { message: MessageRecord },

    /// Acknowledges the sender's own message once persisted
    MessageAccepted { message: MessageRecord },

    /// User started typing in the envelope's room
    TypingStart { user_id: UserId, user_name: String },

    /// User stopped typing in the envelope's room
    TypingStop { user_id: UserId },

    /// Heartbeat response
    Pong,

    /// Error message
    Error { message: String },
}

impl ServerEvent {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::PresenceState { .. } => "presence_state",
            Self::PresenceUpdate { .. } => "presence_update",
            Self::Message { .. } => "message",
            Self::MessageAccepted { .. } => "message_accepted",
            Self::TypingStart { .. } => "typing_start",
            Self::TypingStop { .. } => "typing_stop",
            Self::Pong => "pong",
            Self::Error { .. } => "error",
        }
    }

    pub fn presence_update(record: &PresenceRecord) -> Self {
        Self::PresenceUpdate {
            user_id: record.user_id,
            status: record.status,
            status_message: record.status_message.clone(),
        }
    }
}

// =============================================================================
// Fan-out Envelope
// =============================================================================

/// Wire envelope used for fan-out
///
/// `type` and the payload fields come from the flattened [`ServerEvent`].
/// Event variants never reuse the envelope's field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    #[serde(flatten)]
    pub event: ServerEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<ChannelId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_connection_id: Option<ConnectionId>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl OutboundMessage {
    /// Envelope not scoped to a room
    pub fn new(event: ServerEvent) -> Self {
        Self {
            event,
            channel_id: None,
            sender_connection_id: None,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// Envelope scoped to a room
    pub fn for_channel(channel_id: ChannelId, event: ServerEvent) -> Self {
        Self {
            channel_id: Some(channel_id),
            ..Self::new(event)
        }
    }

    pub fn from_sender(mut self, connection_id: ConnectionId) -> Self {
        self.sender_connection_id = Some(connection_id);
        self
    }
}

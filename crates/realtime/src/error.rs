//! Realtime error types

use huddle_shared::{ConnectionId, HuddleError};

use crate::store::StoreError;

/// Errors raised by realtime operations
///
/// None of these are fatal to the process; each is scoped to one
/// connection, user, or message.
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The connection has no registry row (never existed, disconnected, or expired)
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Collaborator(#[from] HuddleError),
}

pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Failure to deliver one frame to one receiver
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No link is known for the connection
    #[error("Connection is gone")]
    Gone,

    /// The link exists but its receiving side has shut down
    #[error("Connection link is closed")]
    Closed,

    /// Gateway or network failure that says nothing about the link itself
    #[error("Transport failure: {0}")]
    Http(String),
}

impl TransportError {
    /// Whether the receiver should be deregistered
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Gone | Self::Closed)
    }
}

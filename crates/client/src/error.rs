//! Client error types

/// Error type for client session operations
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Invalid server URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    /// The session task has stopped; no further commands are accepted
    #[error("Session closed")]
    SessionClosed,
}

impl ClientError {
    /// Returns true if a new connection attempt may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::WebSocket(_) => true,
            ClientError::Connect(_) => true,

            ClientError::InvalidUrl(_) => false,
            ClientError::UnsupportedScheme(_) => false,
            ClientError::Json(_) => false,
            ClientError::SessionClosed => false,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

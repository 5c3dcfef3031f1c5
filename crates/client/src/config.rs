//! Client session settings

use std::time::Duration;

use huddle_shared::UserId;

/// Delay before the first reconnect attempt
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Ceiling on any single reconnect delay
pub const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Reconnect attempts after a link drops, before giving up
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: usize = 6;

/// How long an optimistic message may stay unconfirmed
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Ping cadence; must stay well below the server's presence TTL
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// The user this session acts as
    pub user_id: UserId,
    /// Display name attached to messages and typing indicators
    pub display_name: Option<String>,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub max_reconnect_attempts: usize,
    pub send_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl ClientConfig {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            display_name: None,
            reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            reconnect_max_delay: DEFAULT_RECONNECT_MAX_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

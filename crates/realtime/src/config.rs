//! Realtime timeouts

use std::time::Duration;

/// Hard ceiling on a connection row, independent of any heartbeat
pub const DEFAULT_CONNECTION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Presence record lifetime without a heartbeat
pub const DEFAULT_PRESENCE_TTL: Duration = Duration::from_secs(5 * 60);

/// Typing entry lifetime without a resend
pub const DEFAULT_TYPING_TTL: Duration = Duration::from_secs(5);

/// Bound on one frame POST to a managed gateway
pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);

/// TTLs applied by the realtime components
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RealtimeConfig {
    pub connection_ttl: Duration,
    pub presence_ttl: Duration,
    pub typing_ttl: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            connection_ttl: DEFAULT_CONNECTION_TTL,
            presence_ttl: DEFAULT_PRESENCE_TTL,
            typing_ttl: DEFAULT_TYPING_TTL,
        }
    }
}

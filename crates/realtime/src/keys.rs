//! Store key layout
//!
//! Every backend uses the same keys, so a Redis instance can be inspected
//! with the same names the code uses.

use huddle_shared::{ChannelId, ConnectionId, UserId};

/// Scored set of users with live presence
pub const ONLINE_USERS: &str = "presence:online";

/// JSON connection row
pub fn connection(connection_id: &ConnectionId) -> String {
    format!("conn:{}", connection_id)
}

/// Set of connection ids whose active room is `channel_id`
pub fn room(channel_id: &ChannelId) -> String {
    format!("room:{}", channel_id)
}

/// Set of connection ids owned by `user_id`
pub fn user_connections(user_id: &UserId) -> String {
    format!("user:{}:conns", user_id)
}

/// JSON presence record
pub fn presence(user_id: &UserId) -> String {
    format!("presence:{}", user_id)
}

/// Scored set of users typing in `channel_id`
pub fn typing(channel_id: &ChannelId) -> String {
    format!("typing:{}", channel_id)
}

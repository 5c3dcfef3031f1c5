//! Channel message routes
//!
//! Messages are persisted first and broadcast second; a client that misses
//! a broadcast recovers by re-fetching the channel's recent messages.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;

use huddle_shared::{ChannelId, ConnectionId, MessageDraft, MessageRecord, UserId};

use crate::{
    error::ApiResult,
    routes::require_user,
    state::AppState,
};

/// Header naming the sender's own connection, which is skipped by the
/// broadcast
pub const CONNECTION_ID_HEADER: &str = "x-connection-id";

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub user_id: UserId,
    #[serde(default)]
    pub sender_name: Option<String>,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    pub limit: Option<usize>,
}

/// Persist a message and broadcast it to the channel
///
/// Content limits are enforced by the hub, the same as for socket clients.
pub async fn post_message(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<PostMessageRequest>,
) -> ApiResult<(StatusCode, Json<MessageRecord>)> {
    require_user(&state, &headers, req.user_id)?;

    let exclude = headers
        .get(CONNECTION_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(ConnectionId::from);

    let draft = MessageDraft {
        channel_id: ChannelId::from(channel_id),
        user_id: req.user_id,
        sender_name: req.sender_name,
        content: req.content,
    };
    let record = state.hub.post_message(draft, exclude.as_ref()).await?;

    tracing::info!(
        message_id = %record.id,
        channel_id = %record.channel_id,
        user_id = %record.user_id,
        "Message posted"
    );

    Ok((StatusCode::CREATED, Json(record)))
}

/// Recent messages of a channel, oldest first
pub async fn list_messages(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    Query(query): Query<ListMessagesQuery>,
) -> ApiResult<Json<Vec<MessageRecord>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let messages = state
        .hub
        .messages()
        .recent(&ChannelId::from(channel_id), limit)
        .await?;
    Ok(Json(messages))
}

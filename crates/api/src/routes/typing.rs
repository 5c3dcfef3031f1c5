//! Typing indicator routes

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use huddle_shared::{ChannelId, UserId};

use crate::{error::ApiResult, state::AppState};

#[derive(Debug, Serialize)]
pub struct TypingResponse {
    pub channel_id: ChannelId,
    pub users: Vec<UserId>,
}

/// Users currently typing in a channel
pub async fn list_typing(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> ApiResult<Json<TypingResponse>> {
    let channel_id = ChannelId::from(channel_id);
    let users = state.hub.typing().list_typing(&channel_id).await?;
    Ok(Json(TypingResponse { channel_id, users }))
}

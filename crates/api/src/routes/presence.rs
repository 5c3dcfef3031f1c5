//! Presence routes

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;

use huddle_shared::{PresenceRecord, PresenceStatus, UserId};

use crate::{error::ApiResult, routes::require_user, state::AppState};

#[derive(Debug, Deserialize)]
pub struct SetPresenceRequest {
    pub status: PresenceStatus,
    #[serde(default)]
    pub status_message: Option<String>,
}

/// Current presence of a user (offline when unknown)
pub async fn get_presence(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Json<PresenceRecord> {
    Json(state.hub.presence().get_presence(user_id).await)
}

/// Set a user's presence and announce it to every connected client
pub async fn set_presence(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    headers: HeaderMap,
    Json(req): Json<SetPresenceRequest>,
) -> ApiResult<Json<PresenceRecord>> {
    require_user(&state, &headers, user_id)?;

    let record = state
        .hub
        .set_presence(user_id, req.status, req.status_message)
        .await?;

    tracing::info!(user_id = %user_id, status = %record.status, "User presence updated");
    Ok(Json(record))
}

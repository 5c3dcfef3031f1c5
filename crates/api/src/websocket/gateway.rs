//! Managed gateway callbacks
//!
//! When `GATEWAY_ENDPOINT` is set the sockets are held by an external
//! gateway. It reports each socket's connect, frames and disconnect here,
//! and the hub answers through `GatewayLinks`.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;

use huddle_realtime::RealtimeError;
use huddle_shared::{ChannelId, ClientEvent, ConnectionId, UserId};

use crate::{
    error::{ApiError, ApiResult},
    routes::messages::CONNECTION_ID_HEADER,
    state::AppState,
    websocket::handler::client_message,
};

#[derive(Debug, Deserialize)]
pub struct GatewayConnectRequest {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
}

#[derive(Debug, Deserialize)]
pub struct GatewayDisconnectRequest {
    pub connection_id: ConnectionId,
}

/// A socket opened at the gateway
///
/// Same authentication as `/ws`: the token must belong to `user_id` when a
/// JWT secret is configured.
pub async fn connect(
    State(state): State<AppState>,
    Json(req): Json<GatewayConnectRequest>,
) -> ApiResult<StatusCode> {
    if let Some(jwt) = &state.jwt {
        let token = req.token.as_deref().ok_or(ApiError::Unauthorized)?;
        jwt.authorize(token, req.user_id).map_err(|e| {
            tracing::warn!(error = %e, user_id = %req.user_id, "Gateway connect rejected");
            ApiError::InvalidToken
        })?;
    }

    state
        .hub
        .connect(req.connection_id, req.user_id, req.channel_id)
        .await?;
    Ok(StatusCode::OK)
}

/// A socket closed at the gateway
pub async fn disconnect(
    State(state): State<AppState>,
    Json(req): Json<GatewayDisconnectRequest>,
) -> ApiResult<StatusCode> {
    state.hub.disconnect(&req.connection_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// One client frame relayed by the gateway
///
/// Failures are reported to the client as an `error` frame; the gateway
/// only sees `410 Gone` once the connection has no registry row.
pub async fn event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<StatusCode> {
    let connection_id = headers
        .get(CONNECTION_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(ConnectionId::from)
        .ok_or_else(|| ApiError::BadRequest(format!("Missing {} header", CONNECTION_ID_HEADER)))?;

    let event = match serde_json::from_str::<ClientEvent>(&body) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = ?e, connection_id = %connection_id, "Failed to parse client event");
            state.hub.send_error(&connection_id, "Invalid event format").await;
            return Ok(StatusCode::OK);
        }
    };

    let kind = event.kind();
    match state.hub.handle(&connection_id, event).await {
        Ok(()) => Ok(StatusCode::OK),
        Err(RealtimeError::UnknownConnection(_)) => Ok(StatusCode::GONE),
        Err(e) => {
            tracing::warn!(
                error = %e,
                connection_id = %connection_id,
                event = kind,
                "Failed to handle client event"
            );
            state.hub.send_error(&connection_id, client_message(&e)).await;
            Ok(StatusCode::OK)
        }
    }
}

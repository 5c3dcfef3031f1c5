//! WebSocket handler for Axum
//!
//! Each socket gets a writer task draining its link channel, while the
//! reading side parses client events and hands them to the hub.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::Response,
};
use futures::{stream::StreamExt, SinkExt};
use serde::Deserialize;

use huddle_realtime::RealtimeError;
use huddle_shared::{ChannelId, ClientEvent, ConnectionId, UserId};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    user_id: UserId,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    channel_id: Option<ChannelId>,
}

/// WebSocket handler - upgrades HTTP connection to WebSocket
///
/// When a JWT secret is configured the `token` query parameter is required
/// and must belong to `user_id`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WebSocketQuery>,
) -> Result<Response, StatusCode> {
    if let Some(jwt) = &state.jwt {
        let Some(token) = params.token.as_deref() else {
            tracing::warn!(user_id = %params.user_id, "WebSocket auth failed: missing token");
            return Err(StatusCode::UNAUTHORIZED);
        };
        if let Err(e) = jwt.authorize(token, params.user_id) {
            tracing::warn!(error = %e, user_id = %params.user_id, "WebSocket auth failed");
            return Err(StatusCode::UNAUTHORIZED);
        }
    }

    tracing::info!(user_id = %params.user_id, "WebSocket connection upgrade requested");

    Ok(ws.on_upgrade(move |socket| {
        handle_socket(socket, params.user_id, params.channel_id, state)
    }))
}

/// Handle individual WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    user_id: UserId,
    channel_id: Option<ChannelId>,
    state: AppState,
) {
    let (mut sender, mut receiver) = socket.split();
    let connection_id = ConnectionId::new();
    let mut rx = state.links.attach(connection_id.clone()).await;

    // Writer runs before connect so the handshake frames have somewhere to go
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match serde_json::to_string(&frame) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to serialize WebSocket frame");
                }
            }
        }
    });

    match state.hub.connect(connection_id.clone(), user_id, channel_id).await {
        Ok(_) => read_events(&mut receiver, &connection_id, &state).await,
        Err(e) => {
            tracing::error!(error = %e, user_id = %user_id, "Failed to register connection");
        }
    }

    // Cleanup on disconnect
    tracing::info!(connection_id = %connection_id, user_id = %user_id, "WebSocket connection closing");
    if let Err(e) = state.hub.disconnect(&connection_id).await {
        tracing::error!(error = %e, connection_id = %connection_id, "Failed to deregister connection");
    }

    send_task.abort();
}

async fn read_events(
    receiver: &mut futures::stream::SplitStream<WebSocket>,
    connection_id: &ConnectionId,
    state: &AppState,
) {
    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(error = %e, connection_id = %connection_id, "WebSocket read failed");
                break;
            }
        };

        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    let kind = event.kind();
                    if let Err(e) = state.hub.handle(connection_id, event).await {
                        tracing::warn!(
                            error = %e,
                            connection_id = %connection_id,
                            event = kind,
                            "Failed to handle client event"
                        );
                        state.hub.send_error(connection_id, client_message(&e)).await;

                        // The row expired under a still-open socket
                        if matches!(e, RealtimeError::UnknownConnection(_)) {
                            break;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        error = ?e,
                        message = %text,
                        "Failed to parse client event"
                    );
                    state.hub.send_error(connection_id, "Invalid event format").await;
                }
            },
            Message::Close(_) => {
                tracing::info!(connection_id = %connection_id, "WebSocket close frame received");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Axum handles ping/pong automatically
            }
            Message::Binary(_) => {}
        }
    }
}

/// Error text safe to show a client
pub(crate) fn client_message(err: &RealtimeError) -> String {
    match err {
        RealtimeError::Rejected(reason) => reason.clone(),
        RealtimeError::UnknownConnection(_) => "Connection expired, please reconnect".to_string(),
        _ => "Failed to process event".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_optional_fields() {
        let user_id = UserId::new();
        let query: WebSocketQuery =
            serde_json::from_value(serde_json::json!({ "user_id": user_id.0 })).unwrap();
        assert_eq!(query.user_id, user_id);
        assert!(query.token.is_none());
        assert!(query.channel_id.is_none());
    }

    #[test]
    fn test_client_message_hides_internals() {
        assert_eq!(
            client_message(&RealtimeError::Rejected("Message content is empty".into())),
            "Message content is empty"
        );
        let internal = RealtimeError::Serialization(
            serde_json::from_str::<u8>("nope").unwrap_err(),
        );
        assert_eq!(client_message(&internal), "Failed to process event");
    }
}

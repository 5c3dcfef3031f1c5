//! API routes

pub mod health;
pub mod messages;
pub mod presence;
pub mod typing;

use axum::{
    extract::DefaultBodyLimit,
    http::{header::AUTHORIZATION, HeaderMap},
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use huddle_shared::UserId;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
    websocket::{gateway, ws_handler},
};

/// Check the bearer token of a request acting as `user_id`
///
/// Always passes when no JWT secret is configured.
pub fn require_user(state: &AppState, headers: &HeaderMap, user_id: UserId) -> ApiResult<()> {
    let Some(jwt) = &state.jwt else {
        return Ok(());
    };

    let token = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    jwt.authorize(token.trim(), user_id).map_err(|e| {
        tracing::warn!(error = %e, user_id = %user_id, "Bearer token rejected");
        match e {
            crate::auth::JwtError::SubjectMismatch => ApiError::Forbidden,
            _ => ApiError::InvalidToken,
        }
    })?;
    Ok(())
}

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness));

    // Sockets are accepted here, or held by a managed gateway that calls back
    let websocket_routes = if state.config.gateway_endpoint.is_some() {
        Router::new()
            .route("/gateway/connect", post(gateway::connect))
            .route("/gateway/disconnect", post(gateway::disconnect))
            .route("/gateway/events", post(gateway::event))
    } else {
        // Auth handled in handler via query parameter
        Router::new().route("/ws", get(ws_handler))
    };

    let api_v1_routes = Router::new()
        .route(
            "/channels/:channel_id/messages",
            get(messages::list_messages).post(messages::post_message),
        )
        .route("/channels/:channel_id/typing", get(typing::list_typing))
        .route(
            "/presence/:user_id",
            get(presence::get_presence).put(presence::set_presence),
        );

    // Combine all routes
    Router::new()
        .merge(health_routes)
        .merge(websocket_routes)
        .nest("/api/v1", api_v1_routes)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

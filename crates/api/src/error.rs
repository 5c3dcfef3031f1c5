//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use huddle_realtime::RealtimeError;
use huddle_shared::HuddleError;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication errors
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Authentication required")]
    Unauthorized,
    #[error("Insufficient permissions")]
    Forbidden,

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),

    // Resource errors
    #[error("Resource not found")]
    NotFound,

    // Internal errors
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
    #[error("Service unavailable")]
    ServiceUnavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Authentication
            ApiError::InvalidToken => (StatusCode::UNAUTHORIZED, "INVALID_TOKEN", self.to_string()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN", self.to_string()),

            // Validation
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),

            // Resources
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),

            // Internal
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR", "Database error".to_string()),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", self.to_string()),
            ApiError::ServiceUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", self.to_string()),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound,
            _ => ApiError::Database(err.to_string()),
        }
    }
}

impl From<HuddleError> for ApiError {
    fn from(err: HuddleError) -> Self {
        match err {
            HuddleError::Auth(_) => ApiError::Unauthorized,
            HuddleError::NotFound(_) => ApiError::NotFound,
            HuddleError::Validation(msg) => ApiError::Validation(msg),
            HuddleError::Storage(msg) => {
                tracing::error!(error = %msg, "Storage error");
                ApiError::Database(msg)
            }
            HuddleError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                ApiError::Internal
            }
        }
    }
}

impl From<RealtimeError> for ApiError {
    fn from(err: RealtimeError) -> Self {
        match err {
            RealtimeError::UnknownConnection(id) => {
                ApiError::BadRequest(format!("Unknown connection: {}", id))
            }
            RealtimeError::Rejected(msg) => ApiError::Validation(msg),
            RealtimeError::Collaborator(err) => err.into(),
            RealtimeError::Store(e) => {
                tracing::error!(error = %e, "Ephemeral store unavailable");
                ApiError::ServiceUnavailable
            }
            RealtimeError::Serialization(e) => {
                tracing::error!(error = %e, "Corrupt realtime state");
                ApiError::Internal
            }
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_shared::ConnectionId;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::InvalidToken.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Validation("empty".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_realtime_error_mapping() {
        let err: ApiError = RealtimeError::UnknownConnection(ConnectionId::from("c1")).into();
        assert!(matches!(err, ApiError::BadRequest(msg) if msg.contains("c1")));

        let err: ApiError = RealtimeError::Collaborator(HuddleError::Storage("down".into())).into();
        assert!(matches!(err, ApiError::Database(_)));
    }
}

//! Huddle API Library
//!
//! This crate contains the server components: configuration, bearer
//! validation, the WebSocket gateway, and the REST routes collaborators use.

pub mod auth;
pub mod config;
pub mod error;
pub mod persistence;
pub mod routes;
pub mod state;
pub mod websocket;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use persistence::PgMessageStore;
pub use state::AppState;

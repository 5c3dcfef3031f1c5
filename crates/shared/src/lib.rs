//! Huddle Shared Types and Utilities
//!
//! This crate contains ids, wire events, errors, and database helpers shared
//! by the realtime core, the API server, and the client.

pub mod db;
pub mod error;
pub mod events;
pub mod types;

pub use db::*;
pub use error::*;
pub use events::*;
pub use types::*;

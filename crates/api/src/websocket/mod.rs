//! WebSocket gateway
//!
//! Accepts client sockets, attaches each to an in-process link, and feeds
//! its events to the realtime hub. Behind a managed gateway the sockets live
//! elsewhere and [`gateway`] receives their lifecycle callbacks instead. Room membership, presence and typing all
//! live in the hub's shared store rather than here.

pub mod gateway;
pub mod handler;

pub use handler::ws_handler;

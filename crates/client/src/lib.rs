//! Huddle Client
//!
//! Consumer-side session manager: connects over WebSocket, reconnects with
//! backoff, replays room membership, and reconciles optimistic sends with the
//! server's authoritative copies.

pub mod backoff;
pub mod config;
pub mod error;
pub mod session;
pub mod subscribers;
pub mod timeline;
pub mod ws;

pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use session::{Connector, Link, Session, SessionEvent, SessionStatus};
pub use subscribers::{Subscribers, Subscription};
pub use timeline::{EchoOutcome, EntryStatus, Timeline, TimelineEntry};
pub use ws::WsConnector;

//! Huddle Realtime
//!
//! Connection registry, room membership, presence, typing indicators, and
//! broadcast fan-out. All shared state lives behind [`EphemeralStore`], so
//! any number of handler instances can serve the same users.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod hub;
pub mod keys;
pub mod links;
pub mod persistence;
pub mod presence;
pub mod registry;
pub mod rooms;
pub mod store;
pub mod typing;

pub use config::RealtimeConfig;
pub use dispatcher::{DeliveryOutcome, DeliveryReport, Dispatcher};
pub use error::{RealtimeError, RealtimeResult, TransportError};
pub use hub::Hub;
pub use links::{GatewayLinks, LinkTable, LocalLinks};
pub use persistence::{InMemoryMessageStore, MessageStore};
pub use presence::PresenceTracker;
pub use registry::{Connection, ConnectionRegistry, Unregistered};
pub use rooms::RoomIndex;
pub use store::{EphemeralStore, MemoryStore, RedisStore, StoreError};
pub use typing::TypingStore;

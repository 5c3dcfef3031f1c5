//! Ephemeral shared state
//!
//! All realtime state (connections, rooms, presence, typing) lives behind
//! [`EphemeralStore`] rather than in handler memory, so independent handler
//! instances observe the same view. Every operation is a single atomic
//! primitive of the backend; callers never read-modify-write a shared value.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;
use std::time::Duration;

/// Storage backend error
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Key {0} holds a value of another kind")]
    WrongType(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Key-value store with automatic expiry
///
/// Three value kinds are used: plain text values, sets, and scored sets whose
/// members each carry their own expiry. Expired values and members are never
/// returned, whether or not anything has purged them yet.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// Set `key` to `value`, expiring after `ttl`
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Overwrite an existing `key`, keeping its remaining TTL
    ///
    /// Returns false (and writes nothing) if the key is absent.
    async fn replace(&self, key: &str, value: &str) -> StoreResult<bool>;

    /// Set `key` to `value` only if it is absent; true if written
    async fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// Set `key` to `value` only while it still holds `expected`; true if
    /// written
    async fn compare_and_put(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl: Duration,
    ) -> StoreResult<bool>;

    /// Reset the TTL of an existing `key` without touching its value
    ///
    /// Returns false if the key is absent.
    async fn touch(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Delete `key`; true only for the caller that actually removed it
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Add `member` to the set at `key`, optionally (re)setting the key's TTL
    async fn set_add(&self, key: &str, member: &str, ttl: Option<Duration>) -> StoreResult<()>;

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Members of the set at `key`, sorted
    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Add or refresh `member` in the scored set at `key` with its own TTL
    async fn scored_add(&self, key: &str, member: &str, ttl: Duration) -> StoreResult<()>;

    async fn scored_remove(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Unexpired members of the scored set at `key`, sorted
    ///
    /// Lapsed members are dropped in the same operation.
    async fn scored_live(&self, key: &str) -> StoreResult<Vec<String>>;
}

//! Redis-backed ephemeral store
//!
//! Shared by every server instance (or stateless gateway invocation). Text
//! values use `SET .. PX`, sets use `SADD`/`SREM`, and scored sets are sorted
//! sets whose score is the member's expiry in unix milliseconds.

use ::redis::aio::ConnectionManager;
use async_trait::async_trait;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::{EphemeralStore, StoreResult};

/// Store backed by a Redis connection manager (reconnects automatically)
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis at `redis_url`
    pub async fn connect(redis_url: &str) -> StoreResult<Self> {
        let client = ::redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        tracing::info!("Connected to Redis ephemeral store");
        Ok(Self { manager })
    }

    pub fn from_manager(manager: ConnectionManager) -> Self {
        Self { manager }
    }
}

/// `SET key value PX ttl` only while `key` still holds the expected value
const COMPARE_AND_PUT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
    return 1
end
return 0
";

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl EphemeralStore for RedisStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        let _: () = ::redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn replace(&self, key: &str, value: &str) -> StoreResult<bool> {
        let mut conn = self.manager.clone();
        // Nil reply when the key does not exist
        let reply: Option<String> = ::redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("XX")
            .arg("KEEPTTL")
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = ::redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn compare_and_put(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let mut conn = self.manager.clone();
        let written: i64 = ::redis::Script::new(COMPARE_AND_PUT)
            .key(key)
            .arg(expected)
            .arg(value)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(written == 1)
    }

    async fn touch(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.manager.clone();
        let touched: i64 = ::redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(touched == 1)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = ::redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.manager.clone();
        let removed: i64 = ::redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn set_add(&self, key: &str, member: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        let mut pipe = ::redis::pipe();
        pipe.atomic().cmd("SADD").arg(key).arg(member).ignore();
        if let Some(ttl) = ttl {
            pipe.cmd("PEXPIRE").arg(key).arg(ttl_millis(ttl)).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.manager.clone();
        let removed: i64 = ::redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.manager.clone();
        let mut members: Vec<String> = ::redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        members.sort();
        Ok(members)
    }

    async fn scored_add(&self, key: &str, member: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        let expires_at = now_millis() + ttl_millis(ttl);
        // Every member of a key shares the same TTL, so the newest member
        // bounds the whole key
        let _: () = ::redis::pipe()
            .atomic()
            .cmd("ZADD")
            .arg(key)
            .arg(expires_at)
            .arg(member)
            .ignore()
            .cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn scored_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.manager.clone();
        let now = now_millis();
        let (score,): (Option<f64>,) = ::redis::pipe()
            .atomic()
            .cmd("ZSCORE")
            .arg(key)
            .arg(member)
            .cmd("ZREM")
            .arg(key)
            .arg(member)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(score.is_some_and(|expires_at| expires_at > now as f64))
    }

    async fn scored_live(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.manager.clone();
        let now = now_millis();
        let (mut members,): (Vec<String>,) = ::redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(now)
            .ignore()
            .cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg(format!("({}", now))
            .arg("+inf")
            .query_async(&mut conn)
            .await?;
        members.sort();
        Ok(members)
    }
}

//! In-memory ephemeral store
//!
//! Single-process backend for development and tests. Expiry is measured with
//! `tokio::time::Instant`, so paused-clock tests can advance past TTLs.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::{EphemeralStore, StoreError, StoreResult};

#[derive(Debug)]
enum Value {
    Text(String),
    Set(HashSet<String>),
    /// member -> expiry
    Scored(HashMap<String, Instant>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Thread-safe in-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired keys and lapsed scored members (call periodically for
    /// memory management; reads never depend on it)
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();

        entries.retain(|_, entry| !entry.is_expired(now));
        for entry in entries.values_mut() {
            if let Value::Scored(members) = &mut entry.value {
                members.retain(|_, expires_at| now < *expires_at);
            }
        }
        entries.retain(|_, entry| match &entry.value {
            Value::Set(members) => !members.is_empty(),
            Value::Scored(members) => !members.is_empty(),
            Value::Text(_) => true,
        });

        before - entries.len()
    }

    /// Number of keys currently held, expired or not
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Live entry for `key` in a write-locked map, dropping it if expired
fn live_entry<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    if entries.get(key).is_some_and(|e| e.is_expired(Instant::now())) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

#[async_trait]
impl EphemeralStore for MemoryStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry::new(Value::Text(value.to_string()), Some(ttl)),
        );
        Ok(())
    }

    async fn replace(&self, key: &str, value: &str) -> StoreResult<bool> {
        let mut entries = self.entries.write().await;
        match live_entry(&mut entries, key) {
            Some(entry) => match &mut entry.value {
                Value::Text(text) => {
                    *text = value.to_string();
                    Ok(true)
                }
                _ => Err(StoreError::WrongType(key.to_string())),
            },
            None => Ok(false),
        }
    }

    async fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut entries = self.entries.write().await;
        if live_entry(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry::new(Value::Text(value.to_string()), Some(ttl)),
        );
        Ok(true)
    }

    async fn compare_and_put(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let mut entries = self.entries.write().await;
        let Some(entry) = live_entry(&mut entries, key) else {
            return Ok(false);
        };
        match &mut entry.value {
            Value::Text(text) if text == expected => {
                *text = value.to_string();
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            Value::Text(_) => Ok(false),
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn touch(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut entries = self.entries.write().await;
        match live_entry(&mut entries, key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if entry.is_expired(Instant::now()) => Ok(None),
            Some(Entry {
                value: Value::Text(text),
                ..
            }) => Ok(Some(text.clone())),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut entries = self.entries.write().await;
        Ok(match entries.remove(key) {
            Some(entry) => !entry.is_expired(Instant::now()),
            None => false,
        })
    }

    async fn set_add(&self, key: &str, member: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        if live_entry(&mut entries, key).is_none() {
            entries.insert(key.to_string(), Entry::new(Value::Set(HashSet::new()), None));
        }
        let entry = entries
            .get_mut(key)
            .ok_or_else(|| StoreError::WrongType(key.to_string()))?;

        match &mut entry.value {
            Value::Set(members) => {
                members.insert(member.to_string());
            }
            _ => return Err(StoreError::WrongType(key.to_string())),
        }
        if let Some(ttl) = ttl {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut entries = self.entries.write().await;
        let Some(entry) = live_entry(&mut entries, key) else {
            return Ok(false);
        };
        let removed = match &mut entry.value {
            Value::Set(members) => members.remove(member),
            _ => return Err(StoreError::WrongType(key.to_string())),
        };
        if matches!(&entry.value, Value::Set(members) if members.is_empty()) {
            entries.remove(key);
        }
        Ok(removed)
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if entry.is_expired(Instant::now()) => Ok(Vec::new()),
            Some(Entry {
                value: Value::Set(members),
                ..
            }) => {
                let mut members: Vec<String> = members.iter().cloned().collect();
                members.sort();
                Ok(members)
            }
            Some(_) => Err(StoreError::WrongType(key.to_string())),
            None => Ok(Vec::new()),
        }
    }

    async fn scored_add(&self, key: &str, member: &str, ttl: Duration) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        if live_entry(&mut entries, key).is_none() {
            entries.insert(
                key.to_string(),
                Entry::new(Value::Scored(HashMap::new()), None),
            );
        }
        match entries.get_mut(key).map(|entry| &mut entry.value) {
            Some(Value::Scored(members)) => {
                members.insert(member.to_string(), Instant::now() + ttl);
                Ok(())
            }
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn scored_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut entries = self.entries.write().await;
        let Some(entry) = live_entry(&mut entries, key) else {
            return Ok(false);
        };
        match &mut entry.value {
            Value::Scored(members) => {
                let live = members
                    .remove(member)
                    .is_some_and(|expires_at| Instant::now() < expires_at);
                Ok(live)
            }
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn scored_live(&self, key: &str) -> StoreResult<Vec<String>> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let Some(entry) = live_entry(&mut entries, key) else {
            return Ok(Vec::new());
        };
        let live = match &mut entry.value {
            Value::Scored(members) => {
                members.retain(|_, expires_at| now < *expires_at);
                let mut live: Vec<String> = members.keys().cloned().collect();
                live.sort();
                live
            }
            _ => return Err(StoreError::WrongType(key.to_string())),
        };
        if live.is_empty() {
            entries.remove(key);
        }
        Ok(live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_put_expires_after_ttl() {
        let store = MemoryStore::new();
        store.put("k", "v", Duration::from_secs(10)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_keeps_ttl() {
        let store = MemoryStore::new();
        assert!(!store.replace("k", "v").await.unwrap());

        store.put("k", "v1", Duration::from_secs(10)).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(store.replace("k", "v2").await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));

        // Original deadline still applies
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_extends_without_rewriting() {
        let store = MemoryStore::new();
        assert!(!store.touch("k", Duration::from_secs(10)).await.unwrap());

        store.put("k", "v1", Duration::from_secs(10)).await.unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(store.replace("k", "v2").await.unwrap());
        assert!(store.touch("k", Duration::from_secs(10)).await.unwrap());

        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_conditional_puts() {
        let store = MemoryStore::new();
        assert!(store.put_if_absent("k", "v1", Duration::from_secs(10)).await.unwrap());
        assert!(!store.put_if_absent("k", "v2", Duration::from_secs(10)).await.unwrap());

        assert!(!store
            .compare_and_put("k", "stale", "v3", Duration::from_secs(10))
            .await
            .unwrap());
        assert!(store
            .compare_and_put("k", "v1", "v3", Duration::from_secs(10))
            .await
            .unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v3"));

        // An expired key counts as absent
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!store
            .compare_and_put("k", "v3", "v4", Duration::from_secs(10))
            .await
            .unwrap());
        assert!(store.put_if_absent("k", "v5", Duration::from_secs(10)).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_reports_single_winner() {
        let store = MemoryStore::new();
        store.put("k", "v", Duration::from_secs(10)).await.unwrap();
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_operations() {
        let store = MemoryStore::new();
        store.set_add("s", "b", None).await.unwrap();
        store.set_add("s", "a", None).await.unwrap();
        store.set_add("s", "a", None).await.unwrap();
        assert_eq!(store.set_members("s").await.unwrap(), vec!["a", "b"]);

        assert!(store.set_remove("s", "a").await.unwrap());
        assert!(!store.set_remove("s", "a").await.unwrap());
        assert!(store.set_remove("s", "b").await.unwrap());
        assert!(store.set_members("s").await.unwrap().is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scored_members_expire_individually() {
        let store = MemoryStore::new();
        store.scored_add("z", "early", Duration::from_secs(5)).await.unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;
        store.scored_add("z", "late", Duration::from_secs(5)).await.unwrap();

        assert_eq!(store.scored_live("z").await.unwrap(), vec!["early", "late"]);

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(store.scored_live("z").await.unwrap(), vec!["late"]);

        // Refresh keeps the member alive
        store.scored_add("z", "late", Duration::from_secs(5)).await.unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(store.scored_live("z").await.unwrap(), vec!["late"]);
    }

    #[tokio::test]
    async fn test_wrong_type_is_an_error() {
        let store = MemoryStore::new();
        store.put("k", "v", Duration::from_secs(10)).await.unwrap();
        assert!(matches!(
            store.set_add("k", "m", None).await,
            Err(StoreError::WrongType(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = MemoryStore::new();
        store.put("short", "v", Duration::from_secs(1)).await.unwrap();
        store.put("long", "v", Duration::from_secs(100)).await.unwrap();
        store.scored_add("z", "m", Duration::from_secs(1)).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired().await, 2);
        assert_eq!(store.len().await, 1);
    }
}

//! Shared key-value state store with TTL semantics
//!
//! Circuit breaker state is kept behind [`StateStore`] so it can live in an
//! in-memory map for a single process group or in a distributed cache in
//! production. Implementations must provide read-after-write consistency
//! within a process and an atomic [`StateStore::increment`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::clock::{to_chrono, Clock, SystemClock};
use crate::error::{WardenError, WardenResult};

/// Key-value store consumed by the circuit breakers
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read a live value
    async fn get(&self, key: &str) -> WardenResult<Option<Value>>;

    /// Write a value, expiring after `ttl` when given
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> WardenResult<()>;

    async fn delete(&self, key: &str) -> WardenResult<()>;

    /// Atomically add one to an integer value, creating it at 1 when absent
    /// or expired. The entry's TTL is refreshed to `ttl`.
    async fn increment(&self, key: &str, ttl: Duration) -> WardenResult<i64>;
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl StoredEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Process-local [`StateStore`] backed by a sharded map
#[derive(Debug, Clone)]
pub struct InMemoryStateStore {
    entries: Arc<DashMap<String, StoredEntry>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            clock,
        }
    }

    fn expiry(&self, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        ttl.map(|ttl| now.checked_add_signed(to_chrono(ttl)).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries.iter().filter(|e| e.value().is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            debug!("Purged {} expired state entries", purged);
        }
        purged
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, key: &str) -> WardenResult<Option<Value>> {
        let now = self.clock.now();
        let live = self
            .entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone());

        if live.is_none() {
            self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        }
        Ok(live)
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> WardenResult<()> {
        let expires_at = self.expiry(ttl);
        self.entries
            .insert(key.to_string(), StoredEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> WardenResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn increment(&self, key: &str, ttl: Duration) -> WardenResult<i64> {
        let now = self.clock.now();
        let expires_at = self.expiry(Some(ttl));

        // The entry guard holds the shard lock for the whole read-modify-write.
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| StoredEntry {
                value: Value::from(0),
                expires_at,
            });

        let current = if entry.is_live(now) {
            match &entry.value {
                Value::Number(n) => n.as_i64().ok_or_else(|| {
                    WardenError::invalid_input(key, "stored counter is not an integer")
                })?,
                other => {
                    return Err(WardenError::invalid_input(
                        key,
                        format!("cannot increment non-integer value {}", other),
                    ))
                }
            }
        } else {
            0
        };

        let next = current.saturating_add(1);
        entry.value = Value::from(next);
        entry.expires_at = expires_at;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store_with_clock() -> (InMemoryStateStore, ManualClock) {
        let clock = ManualClock::starting_now();
        (InMemoryStateStore::with_clock(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let (store, _) = store_with_clock();
        store.set("a", Value::from("open"), None).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(Value::from("open")));

        store.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_values_expire_after_ttl() {
        let (store, clock) = store_with_clock();
        store
            .set("a", Value::from(1), Some(Duration::from_secs(10)))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(9));
        assert!(store.get("a").await.unwrap().is_some());

        clock.advance(Duration::from_secs(2));
        assert!(store.get("a").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_increment_restarts_after_expiry() {
        let (store, clock) = store_with_clock();
        let ttl = Duration::from_secs(300);
        assert_eq!(store.increment("f", ttl).await.unwrap(), 1);
        assert_eq!(store.increment("f", ttl).await.unwrap(), 2);

        clock.advance(Duration::from_secs(301));
        assert_eq!(store.increment("f", ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_increment_rejects_non_integer() {
        let (store, _) = store_with_clock();
        store.set("s", Value::from("closed"), None).await.unwrap();
        assert!(store.increment("s", Duration::from_secs(1)).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(InMemoryStateStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    store.increment("c", Duration::from_secs(60)).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.get("c").await.unwrap(), Some(Value::from(400)));
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (store, clock) = store_with_clock();
        store
            .set("short", Value::Null, Some(Duration::from_secs(1)))
            .await
            .unwrap();
        store.set("long", Value::Null, None).await.unwrap();
        clock.advance(Duration::from_secs(2));
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }
}

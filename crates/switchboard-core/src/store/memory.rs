//! In-process [`QualityStore`] backed by a `DashMap`.
//!
//! Expiry is lazy: an expired entry is treated as absent and removed on the next
//! access. [`MemoryStore::purge_expired`] sweeps entries nobody touches again and
//! is driven by [`MemoryStore::spawn_sweeper`].
//!
//! Deadlines use `tokio::time::Instant` so tests can advance time with
//! `tokio::time::pause`/`advance`.

use super::{QualityStore, StoreError};
use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use std::{collections::VecDeque, sync::Arc, time::Duration};
use tokio::{sync::broadcast, time::Instant};
use tracing::debug;

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn text(value: &str, ttl: Option<Duration>) -> Self {
        Self { value: Value::Text(value.to_string()), expires_at: ttl.map(|t| Instant::now() + t) }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// Concurrent in-memory key/value store with per-key TTL.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredEntry>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-expired) keys.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.value().is_expired(now)).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Spawns a background task that purges expired entries every `interval`
    /// until `shutdown` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = store.purge_expired();
                        if removed > 0 {
                            debug!(removed, "purged expired quality store entries");
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }

    /// Drops `key` if it has expired. Called at the top of every operation so the
    /// rest of the method only ever sees live entries.
    fn evict_if_expired(&self, key: &str) {
        let now = Instant::now();
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
    }
}

#[async_trait]
impl QualityStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.evict_if_expired(key);
        match self.entries.get(key) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                Value::Text(text) => Ok(Some(text.clone())),
                Value::List(_) => Err(StoreError::WrongType(key.to_string())),
            },
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), StoredEntry::text(value, Some(ttl)));
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.evict_if_expired(key);
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(StoredEntry::text(value, Some(ttl)));
                Ok(true)
            }
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.evict_if_expired(key);
        Ok(self.entries.contains_key(key))
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        self.evict_if_expired(key);
        let mut entry =
            self.entries.entry(key.to_string()).or_insert_with(|| StoredEntry::text("0", None));
        let Value::Text(text) = &entry.value else {
            return Err(StoreError::WrongType(key.to_string()));
        };
        let current: i64 = text.parse().map_err(|_| StoreError::WrongType(key.to_string()))?;
        let next = current.saturating_add(1);
        entry.value = Value::Text(next.to_string());
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.evict_if_expired(key);
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        self.evict_if_expired(key);
        Ok(self.entries.remove(key).is_some())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<usize, StoreError> {
        self.evict_if_expired(key);
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| StoredEntry { value: Value::List(VecDeque::new()), expires_at: None });
        match &mut entry.value {
            Value::List(list) => {
                list.push_back(value.to_string());
                Ok(list.len())
            }
            Value::Text(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.evict_if_expired(key);
        let Some(mut entry) = self.entries.get_mut(key) else {
            return Ok(None);
        };
        let popped = match &mut entry.value {
            Value::List(list) => list.pop_front(),
            Value::Text(_) => return Err(StoreError::WrongType(key.to_string())),
        };
        let now_empty = matches!(&entry.value, Value::List(list) if list.is_empty());
        drop(entry);
        if now_empty {
            self.entries.remove_if(key, |_, e| matches!(&e.value, Value::List(l) if l.is_empty()));
        }
        Ok(popped)
    }

    async fn llen(&self, key: &str) -> Result<usize, StoreError> {
        self.evict_if_expired(key);
        match self.entries.get(key) {
            None => Ok(0),
            Some(entry) => match &entry.value {
                Value::List(list) => Ok(list.len()),
                Value::Text(_) => Err(StoreError::WrongType(key.to_string())),
            },
        }
    }
}

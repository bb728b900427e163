//! Shared quality store.
//!
//! A TTL-capable key/value store holding per-actor service logs, failure flags,
//! error counters, sync-filter results and the pending metrics batch. Every
//! component that reads or writes quality data goes through [`QualityStore`], so
//! several gateway processes can share one backend.
//!
//! Updates through this trait are not transactional. Counters and service logs
//! feed a statistical ranking, so interleaved or lost updates between processes
//! are tolerated.
//!
//! [`MemoryStore`] is the in-process implementation used by single-node
//! deployments and tests.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by a [`QualityStore`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key holds a value of a different kind than the operation expects
    /// (e.g. `incr` on a list, or on a non-integer string).
    #[error("wrong value type for key {0}")]
    WrongType(String),

    /// The backend could not be reached or failed to execute the command.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Key/value contract of the shared quality store.
#[async_trait]
pub trait QualityStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Sets `key` to `value`, expiring after `ttl`.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Sets `key` only if it does not exist. Returns `true` if the value was set.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Increments an integer key, creating it at 1 (without expiry) if absent.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Sets the expiry of an existing key. Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Removes `key`. Returns `true` if it existed.
    async fn del(&self, key: &str) -> Result<bool, StoreError>;

    /// Appends to the list at `key`, returning the new length.
    async fn rpush(&self, key: &str, value: &str) -> Result<usize, StoreError>;

    /// Pops the head of the list at `key`.
    async fn lpop(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn llen(&self, key: &str) -> Result<usize, StoreError>;
}

/// Key layout shared by all quality-store writers.
pub mod keys {
    #[must_use]
    pub fn service_log(blockchain: &str, actor: &str) -> String {
        format!("{blockchain}-{actor}-service")
    }

    #[must_use]
    pub fn failure_flag(blockchain: &str, actor: &str) -> String {
        format!("{blockchain}-{actor}-failure")
    }

    #[must_use]
    pub fn error_counter(blockchain: &str, actor: &str) -> String {
        format!("{blockchain}-{actor}-errors")
    }

    #[must_use]
    pub fn sync_cache(blockchain: &str, node_set_hash: &str) -> String {
        format!("sync-{blockchain}-{node_set_hash}")
    }

    #[must_use]
    pub fn sync_lock(blockchain: &str, node_set_hash: &str) -> String {
        format!("lock-{}", sync_cache(blockchain, node_set_hash))
    }

    #[must_use]
    pub fn metrics_batch(process_id: &str) -> String {
        format!("metrics-{process_id}")
    }

    #[must_use]
    pub fn metrics_batch_age(process_id: &str) -> String {
        format!("metrics-{process_id}-age")
    }
}

//! Sync-consistency filter.
//!
//! Narrows a session's node set to nodes believed to be at a consistent chain
//! height. The verification itself is delegated to a [`LivenessProbe`]; the
//! filter only coordinates it across the process pool:
//!
//! - a result cached per (blockchain, node set) is reused for
//!   `cache_ttl_seconds`;
//! - an atomic set-if-absent lock ensures at most one verification is in
//!   flight per key; callers that lose the race get the unfiltered set.
//!
//! The filter never fails. Any store error returns the full candidate set.

use crate::{
    store::{keys, QualityStore},
    types::Node,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// How long a filtered node list is reused (default: 300).
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,

    /// Lifetime of the in-flight verification lock (default: 10).
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_seconds: u64,
}

fn default_cache_ttl() -> u64 {
    300
}
fn default_lock_ttl() -> u64 {
    10
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { cache_ttl_seconds: default_cache_ttl(), lock_ttl_seconds: default_lock_ttl() }
    }
}

/// Decides which nodes of a set are in sync.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn verify(&self, nodes: &[Node], blockchain: &str, sync_check: &str) -> Vec<Node>;
}

/// Probe that keeps every node.
#[derive(Debug, Default, Clone, Copy)]
pub struct RetainAll;

#[async_trait]
impl LivenessProbe for RetainAll {
    async fn verify(&self, nodes: &[Node], _blockchain: &str, _sync_check: &str) -> Vec<Node> {
        nodes.to_vec()
    }
}

/// Hex SHA-256 of the sorted, newline-joined node public keys.
///
/// Independent of the order the nodes were supplied in.
#[must_use]
pub fn node_set_hash(nodes: &[Node]) -> String {
    let mut keys: Vec<&str> = nodes.iter().map(|n| n.public_key.as_str()).collect();
    keys.sort_unstable();
    hex::encode(Sha256::digest(keys.join("\n").as_bytes()))
}

pub struct SyncFilter {
    store: Arc<dyn QualityStore>,
    probe: Arc<dyn LivenessProbe>,
    config: SyncConfig,
}

impl SyncFilter {
    #[must_use]
    pub fn new(store: Arc<dyn QualityStore>, probe: Arc<dyn LivenessProbe>, config: SyncConfig) -> Self {
        Self { store, probe, config }
    }

    /// Filter with the [`RetainAll`] probe.
    #[must_use]
    pub fn with_default_probe(store: Arc<dyn QualityStore>, config: SyncConfig) -> Self {
        Self::new(store, Arc::new(RetainAll), config)
    }

    /// Returns the subset of `nodes` considered in sync for `blockchain`.
    pub async fn consensus_filter(
        &self,
        nodes: &[Node],
        blockchain: &str,
        sync_check: &str,
    ) -> Vec<Node> {
        if nodes.is_empty() {
            return Vec::new();
        }

        let hash = node_set_hash(nodes);
        let cache_key = keys::sync_cache(blockchain, &hash);

        match self.store.get(&cache_key).await {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<Node>>(&raw) {
                Ok(cached) => {
                    debug!(blockchain, nodes = cached.len(), "sync filter cache hit");
                    return cached;
                }
                Err(e) => warn!(key = %cache_key, error = %e, "discarding malformed sync cache entry"),
            },
            Ok(None) => {}
            Err(e) => {
                warn!(blockchain, error = %e, "sync cache unavailable, skipping filter");
                return nodes.to_vec();
            }
        }

        let lock_key = keys::sync_lock(blockchain, &hash);
        let lock_ttl = Duration::from_secs(self.config.lock_ttl_seconds);
        match self.store.set_nx_ex(&lock_key, "true", lock_ttl).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(blockchain, "sync check already in flight, using unfiltered nodes");
                return nodes.to_vec();
            }
            Err(e) => {
                warn!(blockchain, error = %e, "failed to acquire sync lock");
                return nodes.to_vec();
            }
        }

        let filtered = self.probe.verify(nodes, blockchain, sync_check).await;
        info!(
            blockchain,
            candidates = nodes.len(),
            in_sync = filtered.len(),
            "sync check completed"
        );

        match serde_json::to_string(&filtered) {
            Ok(serialized) => {
                let ttl = Duration::from_secs(self.config.cache_ttl_seconds);
                if let Err(e) = self.store.set_ex(&cache_key, &serialized, ttl).await {
                    warn!(blockchain, error = %e, "failed to cache sync result");
                }
            }
            Err(e) => warn!(blockchain, error = %e, "failed to serialize sync result"),
        }

        filtered
    }
}

//! Entity lookup.
//!
//! The administrative entity store is an external collaborator; the gateway
//! only reads from it through [`BlockchainRegistry`] and [`ApplicationRegistry`].
//! [`StaticRegistry`] serves both from configuration, and [`BlockchainCache`]
//! puts a short-lived cache in front of blockchain lookups, which happen on
//! every relay.

use crate::types::{Application, Blockchain, LoadBalancer};
use async_trait::async_trait;
use moka::future::Cache;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait BlockchainRegistry: Send + Sync {
    /// Looks up a blockchain by id, hash or alias.
    async fn find(&self, alias: &str) -> Result<Option<Blockchain>, RegistryError>;
}

#[async_trait]
pub trait ApplicationRegistry: Send + Sync {
    async fn find(&self, id: &str) -> Result<Option<Application>, RegistryError>;

    async fn find_load_balancer(&self, id: &str) -> Result<Option<LoadBalancer>, RegistryError>;
}

/// Registry answering from fixed entity lists.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    blockchains: Vec<Blockchain>,
    applications: Vec<Application>,
    load_balancers: Vec<LoadBalancer>,
}

impl StaticRegistry {
    #[must_use]
    pub fn new(
        blockchains: Vec<Blockchain>,
        applications: Vec<Application>,
        load_balancers: Vec<LoadBalancer>,
    ) -> Self {
        Self { blockchains, applications, load_balancers }
    }
}

#[async_trait]
impl BlockchainRegistry for StaticRegistry {
    async fn find(&self, alias: &str) -> Result<Option<Blockchain>, RegistryError> {
        Ok(self.blockchains.iter().find(|b| b.matches(alias)).cloned())
    }
}

#[async_trait]
impl ApplicationRegistry for StaticRegistry {
    async fn find(&self, id: &str) -> Result<Option<Application>, RegistryError> {
        Ok(self.applications.iter().find(|a| a.id == id).cloned())
    }

    async fn find_load_balancer(&self, id: &str) -> Result<Option<LoadBalancer>, RegistryError> {
        Ok(self.load_balancers.iter().find(|lb| lb.id == id).cloned())
    }
}

/// Caches blockchain lookups for one second.
///
/// Misses are not cached, so a chain added to the registry is picked up on the
/// next request.
pub struct BlockchainCache {
    registry: Arc<dyn BlockchainRegistry>,
    cache: Cache<String, Blockchain>,
}

impl BlockchainCache {
    pub const TTL: Duration = Duration::from_secs(1);

    #[must_use]
    pub fn new(registry: Arc<dyn BlockchainRegistry>) -> Self {
        Self::with_ttl(registry, Self::TTL)
    }

    #[must_use]
    pub fn with_ttl(registry: Arc<dyn BlockchainRegistry>, ttl: Duration) -> Self {
        Self { registry, cache: Cache::builder().max_capacity(10_000).time_to_live(ttl).build() }
    }

    /// Resolves an alias to its blockchain. Registry failures resolve to `None`.
    pub async fn resolve(&self, alias: &str) -> Option<Blockchain> {
        let key = alias.to_ascii_lowercase();
        if let Some(hit) = self.cache.get(&key).await {
            return Some(hit);
        }

        match self.registry.find(alias).await {
            Ok(Some(blockchain)) => {
                self.cache.insert(key, blockchain.clone()).await;
                Some(blockchain)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(alias, error = %e, "blockchain lookup failed");
                None
            }
        }
    }
}

/// Extracts the blockchain alias from a `Host` header value: the first DNS
/// label, without any port.
#[must_use]
pub fn blockchain_alias_from_host(host: &str) -> Option<&str> {
    let without_port = host.rsplit_once(':').map_or(host, |(name, port)| {
        if port.chars().all(|c| c.is_ascii_digit()) {
            name
        } else {
            host
        }
    });
    without_port.split('.').next().filter(|label| !label.is_empty())
}

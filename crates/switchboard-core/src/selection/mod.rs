//! Selection engine ("cherry picker").
//!
//! Picks which application of a load balancer, or which node of a session,
//! should serve a relay. Both selections share one algorithm:
//!
//! 1. Build a [`CandidateEntry`] per candidate from its service log, failure flag
//!    and error counter in the [`QualityStore`].
//! 2. [`rank`] the entries and [`build_weighted_pool`] from the ranking.
//! 3. Flag newly shelved actors as failing.
//! 4. Draw uniformly from the pool, or from the unweighted candidate list when
//!    every candidate was shelved.
//!
//! The engine is also the only writer of post-relay quality data
//! ([`CherryPicker::update_service_quality`]), which closes the feedback loop
//! between relay outcomes and future selections.
//!
//! Store failures never surface to callers: an actor whose data cannot be read is
//! ranked as untested, and failed writes are logged and dropped.

pub mod ranking;
pub mod service_log;

pub use ranking::{build_weighted_pool, rank, CandidateEntry, WeightedPool};
pub use service_log::ServiceLog;

use crate::{
    store::{keys, QualityStore},
    types::{Node, RESULT_SUCCESS},
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

/// Configuration for the selection engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Attempts without a success after which an application is shelved (default: 15).
    #[serde(default = "default_application_max_failures")]
    pub application_max_failures: u64,

    /// Attempts without a success after which a node is shelved (default: 1).
    #[serde(default = "default_node_max_failures")]
    pub node_max_failures: u64,

    /// TTL of application-level service logs in seconds (default: 900).
    #[serde(default = "default_application_log_ttl")]
    pub application_log_ttl_seconds: u64,

    /// TTL of node-level service logs in seconds (default: 7200).
    #[serde(default = "default_node_log_ttl")]
    pub node_log_ttl_seconds: u64,

    /// TTL of failure flags in seconds (default: 30 days).
    #[serde(default = "default_failure_flag_ttl")]
    pub failure_flag_ttl_seconds: u64,

    /// TTL of error counters in seconds (default: 3600).
    #[serde(default = "default_error_counter_ttl")]
    pub error_counter_ttl_seconds: u64,
}

fn default_application_max_failures() -> u64 {
    15
}
fn default_node_max_failures() -> u64 {
    1
}
fn default_application_log_ttl() -> u64 {
    900
}
fn default_node_log_ttl() -> u64 {
    7200
}
fn default_failure_flag_ttl() -> u64 {
    30 * 24 * 60 * 60
}
fn default_error_counter_ttl() -> u64 {
    3600
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            application_max_failures: default_application_max_failures(),
            node_max_failures: default_node_max_failures(),
            application_log_ttl_seconds: default_application_log_ttl(),
            node_log_ttl_seconds: default_node_log_ttl(),
            failure_flag_ttl_seconds: default_failure_flag_ttl(),
            error_counter_ttl_seconds: default_error_counter_ttl(),
        }
    }
}

/// Ranks and draws applications or nodes using shared quality data.
pub struct CherryPicker {
    store: Arc<dyn QualityStore>,
    config: SelectionConfig,
}

impl CherryPicker {
    #[must_use]
    pub fn new(store: Arc<dyn QualityStore>, config: SelectionConfig) -> Self {
        Self { store, config }
    }

    /// Chooses one application of a load balancer.
    ///
    /// Returns `None` only when `applications` is empty.
    pub async fn select_application(
        &self,
        group_id: &str,
        applications: &[String],
        blockchain: &str,
    ) -> Option<String> {
        let max_failures = self.config.application_max_failures;
        let index = self.select_index(applications, blockchain, max_failures).await?;
        debug!(
            load_balancer = group_id,
            application = %applications[index],
            blockchain,
            "application selected"
        );
        Some(applications[index].clone())
    }

    /// Chooses one node of a session for an application.
    ///
    /// Returns `None` only when `nodes` is empty.
    pub async fn select_node(
        &self,
        application_id: &str,
        nodes: &[Node],
        blockchain: &str,
    ) -> Option<Node> {
        let ids: Vec<String> = nodes.iter().map(|n| n.public_key.clone()).collect();
        let max_failures = self.config.node_max_failures;
        let index = self.select_index(&ids, blockchain, max_failures).await?;
        debug!(
            application = application_id,
            service_node = %nodes[index].public_key,
            blockchain,
            "node selected"
        );
        Some(nodes[index].clone())
    }

    /// Builds the ranked candidate list for `ids`.
    pub async fn ranked_candidates(
        &self,
        ids: &[String],
        blockchain: &str,
        max_failures_per_period: u64,
    ) -> Vec<CandidateEntry> {
        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            entries.push(self.candidate_entry(id, blockchain, max_failures_per_period).await);
        }
        rank(&mut entries);
        entries
    }

    async fn select_index(
        &self,
        ids: &[String],
        blockchain: &str,
        max_failures_per_period: u64,
    ) -> Option<usize> {
        if ids.is_empty() {
            return None;
        }

        let ranked = self.ranked_candidates(ids, blockchain, max_failures_per_period).await;
        let pool = build_weighted_pool(&ranked, max_failures_per_period);

        for shelved in &pool.shelved {
            self.shelve(blockchain, shelved).await;
        }

        if pool.members.is_empty() {
            warn!(blockchain, candidates = ids.len(), "all candidates shelved, selecting unweighted");
            return Some(rand::rng().random_range(0..ids.len()));
        }

        let chosen = &pool.members[rand::rng().random_range(0..pool.members.len())];
        ids.iter().position(|id| id == chosen)
    }

    async fn candidate_entry(
        &self,
        id: &str,
        blockchain: &str,
        max_failures_per_period: u64,
    ) -> CandidateEntry {
        let flagged = self.is_flagged(blockchain, id).await;
        let errors = self.error_count(blockchain, id).await;
        let failing = flagged || errors >= max_failures_per_period;

        match self.service_log(blockchain, id).await {
            Some(log) => CandidateEntry {
                id: id.to_string(),
                attempts: log.attempts(),
                success_rate: log.success_rate(),
                average_success_latency: log.average_success_latency,
                failing,
            },
            None => CandidateEntry::untested(id, failing),
        }
    }

    /// Reads an actor's service log. Unreadable or corrupt logs count as absent.
    pub async fn service_log(&self, blockchain: &str, actor: &str) -> Option<ServiceLog> {
        let key = keys::service_log(blockchain, actor);
        match self.store.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(log) => Some(log),
                Err(e) => {
                    warn!(key = %key, error = %e, "discarding malformed service log");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to read service log");
                None
            }
        }
    }

    /// Returns `true` if the actor carries a failure flag.
    pub async fn is_flagged(&self, blockchain: &str, actor: &str) -> bool {
        match self.store.get(&keys::failure_flag(blockchain, actor)).await {
            Ok(flag) => flag.as_deref() == Some("true"),
            Err(e) => {
                warn!(blockchain, actor, error = %e, "failed to read failure flag");
                false
            }
        }
    }

    /// Current transport error count for an actor.
    pub async fn error_count(&self, blockchain: &str, actor: &str) -> u64 {
        match self.store.get(&keys::error_counter(blockchain, actor)).await {
            Ok(Some(raw)) => raw.parse().unwrap_or(0),
            Ok(None) => 0,
            Err(e) => {
                warn!(blockchain, actor, error = %e, "failed to read error counter");
                0
            }
        }
    }

    async fn shelve(&self, blockchain: &str, actor: &str) {
        if self.is_flagged(blockchain, actor).await {
            return;
        }
        let ttl = Duration::from_secs(self.config.failure_flag_ttl_seconds);
        match self.store.set_ex(&keys::failure_flag(blockchain, actor), "true", ttl).await {
            Ok(()) => warn!(blockchain, actor, "actor shelved after repeated failures"),
            Err(e) => warn!(blockchain, actor, error = %e, "failed to set failure flag"),
        }
    }

    /// Increments the transport error counter of an actor.
    pub async fn increment_error(&self, blockchain: &str, actor: &str) {
        let key = keys::error_counter(blockchain, actor);
        let ttl = Duration::from_secs(self.config.error_counter_ttl_seconds);
        let result = async {
            let count = self.store.incr(&key).await?;
            self.store.expire(&key, ttl).await?;
            Ok::<_, crate::store::StoreError>(count)
        }
        .await;

        match result {
            Ok(count) => debug!(blockchain, actor, count, "error counter incremented"),
            Err(e) => warn!(blockchain, actor, error = %e, "failed to increment error counter"),
        }
    }

    /// Resets the transport error counter of an actor.
    pub async fn clear_errors(&self, blockchain: &str, actor: &str) {
        if let Err(e) = self.store.del(&keys::error_counter(blockchain, actor)).await {
            warn!(blockchain, actor, error = %e, "failed to clear error counter");
        }
    }

    /// Records one relay outcome against both the application and the node.
    ///
    /// `elapsed_seconds` is the wall time of the relay attempt.
    pub async fn update_service_quality(
        &self,
        blockchain: &str,
        application_id: &str,
        node_id: &str,
        elapsed_seconds: f64,
        result: u16,
    ) {
        let config = &self.config;
        self.update_actor(
            blockchain,
            application_id,
            elapsed_seconds,
            result,
            Duration::from_secs(config.application_log_ttl_seconds),
        )
        .await;
        self.update_actor(
            blockchain,
            node_id,
            elapsed_seconds,
            result,
            Duration::from_secs(config.node_log_ttl_seconds),
        )
        .await;
    }

    async fn update_actor(
        &self,
        blockchain: &str,
        actor: &str,
        elapsed_seconds: f64,
        result: u16,
        ttl: Duration,
    ) {
        let log = match self.service_log(blockchain, actor).await {
            Some(mut log) => {
                log.record(result, elapsed_seconds);
                log
            }
            None => ServiceLog::first(result, elapsed_seconds),
        };

        let serialized = match serde_json::to_string(&log) {
            Ok(s) => s,
            Err(e) => {
                warn!(blockchain, actor, error = %e, "failed to serialize service log");
                return;
            }
        };

        if let Err(e) =
            self.store.set_ex(&keys::service_log(blockchain, actor), &serialized, ttl).await
        {
            warn!(blockchain, actor, error = %e, "failed to write service log");
            return;
        }

        if result == RESULT_SUCCESS {
            if let Err(e) = self.store.del(&keys::failure_flag(blockchain, actor)).await {
                warn!(blockchain, actor, error = %e, "failed to clear failure flag");
            }
            self.clear_errors(blockchain, actor).await;
        }
    }
}

//! Relay dispatch.
//!
//! [`RelayDispatcher::send_relay`] drives one client request to completion:
//!
//! ```text
//! resolve chain ─► normalize payload ─► ┌─ budget check ─► authorize ─► session ─► sync filter ─► select node ─► dispatch ─► classify ─┐
//!                                       └──────────────────────────── failure (500 / 503), retries left ─────────────────────────────┘
//!                                       retries exhausted ─► fallback endpoint ─► terminal 504
//! ```
//!
//! Attempts within a request are strictly sequential. Every attempt, whether
//! it succeeds or fails, is reported to the [`MetricsRecorder`], which in turn
//! feeds node selection.

pub mod auth;
pub mod errors;
pub mod fallback;
pub mod payload;

pub use auth::{AuthError, CallerCredentials, SecretKeyCipher};
pub use errors::RelayError;
pub use fallback::FallbackPool;
pub use payload::{NormalizedPayload, RelayBody};

use crate::{
    client::{RelayAttempt, RelayClient},
    metrics::{MetricsRecorder, RelayMetric},
    registry::BlockchainCache,
    selection::CherryPicker,
    sync::SyncFilter,
    types::{
        Application, Blockchain, RESULT_ENFORCEMENT_FAILURE, RESULT_SUCCESS,
        RESULT_TRANSPORT_FAILURE,
    },
};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Retries after the first attempt (default: 3).
    #[serde(default = "default_relay_retries")]
    pub relay_retries: u32,

    /// Overall budget for a request in milliseconds (default: 10000).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Budget for a single node attempt in milliseconds (default: 4000).
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,

    /// Endpoints tried once all attempts have failed.
    #[serde(default)]
    pub fallback_urls: Vec<String>,

    /// Budget for the fallback request in milliseconds (default: 60000).
    #[serde(default = "default_fallback_timeout_ms")]
    pub fallback_timeout_ms: u64,

    /// Hex AES-256 key used to decrypt stored secret keys.
    #[serde(default)]
    pub secret_key_cipher: Option<String>,
}

fn default_relay_retries() -> u32 {
    3
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_attempt_timeout_ms() -> u64 {
    4_000
}
fn default_fallback_timeout_ms() -> u64 {
    60_000
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            relay_retries: default_relay_retries(),
            request_timeout_ms: default_request_timeout_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            fallback_urls: Vec::new(),
            fallback_timeout_ms: default_fallback_timeout_ms(),
            secret_key_cipher: None,
        }
    }
}

impl RelayConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    #[must_use]
    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_timeout_ms)
    }
}

/// How the caller addressed the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayType {
    Application,
    LoadBalancer,
}

impl fmt::Display for RelayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Application => "APP",
            Self::LoadBalancer => "LB",
        })
    }
}

/// Everything needed to serve one client request.
#[derive(Debug, Clone)]
pub struct RelayRequest {
    /// Caller-visible correlation id, echoed in `X-Request-ID`.
    pub request_id: String,
    pub relay_type: RelayType,
    /// Application or load balancer id, matching `relay_type`.
    pub type_id: String,
    /// Host label or explicit blockchain identifier.
    pub blockchain_alias: String,
    pub application: Application,
    pub raw_payload: String,
    pub path: Option<String>,
    pub http_method: String,
    pub caller: CallerCredentials,
    /// Overrides the configured overall budget.
    pub request_timeout: Option<Duration>,
    /// Overrides the configured per-attempt budget.
    pub attempt_timeout: Option<Duration>,
    /// Overrides the configured retry count.
    pub relay_retries: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelayResponse {
    pub body: RelayBody,
    /// Node that served the relay; `None` when served by a fallback endpoint.
    pub service_node: Option<String>,
    pub fallback: bool,
    /// Canonical hash of the resolved chain.
    pub blockchain: String,
}

/// Shared per-request state for the attempts of one relay.
struct RelayContext<'a> {
    request: &'a RelayRequest,
    blockchain: &'a Blockchain,
    payload: &'a NormalizedPayload,
}

impl RelayContext<'_> {
    fn metric(
        &self,
        service_node: Option<String>,
        relay_start: Instant,
        result: u16,
        bytes: usize,
        fallback: bool,
        error: Option<String>,
    ) -> RelayMetric {
        let app = &self.request.application;
        RelayMetric {
            request_id: self.request.request_id.clone(),
            application_id: app.id.clone(),
            app_public_key: app.public_key.clone(),
            blockchain: self.blockchain.hash.clone(),
            service_node,
            relay_start,
            result,
            bytes,
            delivered: result == RESULT_SUCCESS,
            fallback,
            method: self.payload.method.clone(),
            error,
        }
    }
}

pub struct RelayDispatcher {
    blockchains: BlockchainCache,
    client: Arc<dyn RelayClient>,
    picker: Arc<CherryPicker>,
    sync: Arc<SyncFilter>,
    metrics: Arc<MetricsRecorder>,
    fallback: Option<FallbackPool>,
    cipher: Option<SecretKeyCipher>,
    config: RelayConfig,
}

impl RelayDispatcher {
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCipherKey`] if a configured secret key cipher
    /// is not a valid AES-256 key.
    pub fn new(
        blockchains: BlockchainCache,
        client: Arc<dyn RelayClient>,
        picker: Arc<CherryPicker>,
        sync: Arc<SyncFilter>,
        metrics: Arc<MetricsRecorder>,
        config: RelayConfig,
    ) -> Result<Self, AuthError> {
        let cipher = config
            .secret_key_cipher
            .as_deref()
            .filter(|key| !key.is_empty())
            .map(SecretKeyCipher::from_hex)
            .transpose()?;
        Ok(Self { blockchains, client, picker, sync, metrics, fallback: None, cipher, config })
    }

    #[must_use]
    pub fn with_fallback(mut self, pool: FallbackPool) -> Self {
        self.fallback = (!pool.is_empty()).then_some(pool);
        self
    }

    #[must_use]
    pub fn picker(&self) -> &Arc<CherryPicker> {
        &self.picker
    }

    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Resolves a host label or identifier through the blockchain cache.
    pub async fn resolve_blockchain(&self, alias: &str) -> Option<Blockchain> {
        self.blockchains.resolve(alias).await
    }

    /// Serves one request.
    ///
    /// # Errors
    ///
    /// Returns a terminal [`RelayError`]; see [`RelayError::status_code`].
    pub async fn send_relay(&self, request: RelayRequest) -> Result<RelayResponse, RelayError> {
        let started = Instant::now();

        let blockchain = self
            .blockchains
            .resolve(&request.blockchain_alias)
            .await
            .ok_or_else(|| RelayError::UnknownBlockchain(request.blockchain_alias.clone()))?;
        let payload = NormalizedPayload::parse(&request.raw_payload)?;

        let budget = request.request_timeout.unwrap_or_else(|| self.config.request_timeout());
        let attempt_timeout = request.attempt_timeout.unwrap_or_else(|| self.config.attempt_timeout());
        let retries = request.relay_retries.unwrap_or(self.config.relay_retries);
        let ctx = RelayContext { request: &request, blockchain: &blockchain, payload: &payload };

        for attempt in 0..=retries {
            let elapsed = started.elapsed();
            if elapsed >= budget {
                warn!(
                    request_id = %request.request_id,
                    relay_type = %request.relay_type,
                    type_id = %request.type_id,
                    blockchain = %blockchain.hash,
                    attempt,
                    elapsed_ms = elapsed.as_millis(),
                    "relay budget exhausted"
                );
                return Err(RelayError::OverallTimeout);
            }

            auth::authorize(&request.application.settings, &request.caller, self.cipher.as_ref())
                .inspect_err(|e| {
                    warn!(
                        request_id = %request.request_id,
                        relay_type = %request.relay_type,
                        type_id = %request.type_id,
                        error = %e,
                        "relay rejected"
                    );
                })?;

            let attempt_budget = attempt_timeout.min(budget - elapsed);
            if let Some(response) = self.attempt(&ctx, attempt_budget).await {
                return Ok(response);
            }
            debug!(
                request_id = %request.request_id,
                relay_type = %request.relay_type,
                type_id = %request.type_id,
                attempt,
                retries,
                "relay attempt failed"
            );
        }

        if let Some(response) = self.try_fallback(&ctx).await {
            return Ok(response);
        }
        Err(RelayError::AttemptsExhausted)
    }

    /// One pass through session lookup, filtering, selection and dispatch.
    /// Returns `None` after recording the failure.
    async fn attempt(&self, ctx: &RelayContext<'_>, budget: Duration) -> Option<RelayResponse> {
        let request = ctx.request;
        let blockchain = ctx.blockchain;
        let app = &request.application;
        let relay_start = Instant::now();

        let nodes = match self.client.session_nodes(&app.credential, &blockchain.hash).await {
            Ok(nodes) => nodes,
            Err(e) => {
                self.record_failure(ctx, None, relay_start, RESULT_TRANSPORT_FAILURE, e.to_string())
                    .await;
                return None;
            }
        };

        let nodes = match &blockchain.sync_check {
            Some(check) if !nodes.is_empty() => {
                self.sync.consensus_filter(&nodes, &blockchain.hash, check).await
            }
            _ => nodes,
        };

        let Some(node) = self.picker.select_node(&app.id, &nodes, &blockchain.hash).await else {
            self.record_failure(
                ctx,
                None,
                relay_start,
                RESULT_TRANSPORT_FAILURE,
                "no nodes available in session".to_string(),
            )
            .await;
            return None;
        };

        let relay_attempt = RelayAttempt {
            request_id: request.request_id.clone(),
            node: node.clone(),
            blockchain: blockchain.hash.clone(),
            credential: app.credential.clone(),
            payload: ctx.payload.body.clone(),
            path: request.path.clone(),
            http_method: request.http_method.clone(),
            timeout: budget,
        };

        let outcome = tokio::time::timeout(budget, self.client.relay(&relay_attempt))
            .await
            .unwrap_or(Err(crate::client::RelayClientError::Timeout));

        match outcome {
            Ok(relayed) => {
                match payload::enforce_response(&relayed.payload, blockchain.enforces_json()) {
                    Ok(body) => {
                        self.picker.clear_errors(&blockchain.hash, &node.public_key).await;
                        let metric = ctx.metric(
                            Some(node.public_key.clone()),
                            relay_start,
                            RESULT_SUCCESS,
                            relayed.payload.len(),
                            false,
                            None,
                        );
                        self.metrics.record_metric(metric).await;
                        Some(RelayResponse {
                            body,
                            service_node: Some(node.public_key),
                            fallback: false,
                            blockchain: blockchain.hash.clone(),
                        })
                    }
                    Err(reason) => {
                        self.picker.increment_error(&blockchain.hash, &node.public_key).await;
                        self.record_failure(
                            ctx,
                            Some(node.public_key),
                            relay_start,
                            RESULT_ENFORCEMENT_FAILURE,
                            reason,
                        )
                        .await;
                        None
                    }
                }
            }
            Err(e) => {
                self.picker.increment_error(&blockchain.hash, &node.public_key).await;
                self.record_failure(
                    ctx,
                    Some(node.public_key),
                    relay_start,
                    RESULT_TRANSPORT_FAILURE,
                    e.to_string(),
                )
                .await;
                None
            }
        }
    }

    async fn record_failure(
        &self,
        ctx: &RelayContext<'_>,
        service_node: Option<String>,
        relay_start: Instant,
        result: u16,
        error: String,
    ) {
        let metric = ctx.metric(service_node, relay_start, result, error.len(), false, Some(error));
        self.metrics.record_metric(metric).await;
    }

    async fn try_fallback(&self, ctx: &RelayContext<'_>) -> Option<RelayResponse> {
        let pool = self.fallback.as_ref()?;
        if !self.client.is_usable() {
            warn!(request_id = %ctx.request.request_id, "protocol client unusable, skipping fallback");
            return None;
        }
        let url = pool.pick()?;
        let relay_start = Instant::now();

        let outcome = pool
            .send(url, ctx.request.path.as_deref(), &ctx.request.http_method, &ctx.payload.body)
            .await
            .map_err(|e| e.to_string())
            .and_then(|raw| {
                payload::enforce_response(&raw, ctx.blockchain.enforces_json())
                    .map(|body| (body, raw.len()))
            });

        match outcome {
            Ok((body, bytes)) => {
                let metric = ctx.metric(None, relay_start, RESULT_SUCCESS, bytes, true, None);
                self.metrics.record_metric(metric).await;
                Some(RelayResponse {
                    body,
                    service_node: None,
                    fallback: true,
                    blockchain: ctx.blockchain.hash.clone(),
                })
            }
            Err(reason) => {
                warn!(
                    request_id = %ctx.request.request_id,
                    relay_type = %ctx.request.relay_type,
                    type_id = %ctx.request.type_id,
                    blockchain = %ctx.blockchain.hash,
                    error = %reason,
                    "fallback relay failed"
                );
                None
            }
        }
    }
}

//! Fixtures and collaborators shared by the integration tests.

use async_trait::async_trait;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use switchboard_core::{
    client::RelayClient,
    config::AppConfig,
    metrics::{MetricRow, MetricsSink, SinkError},
    relay::{CallerCredentials, RelayRequest, RelayType},
    runtime::SwitchboardRuntime,
    store::{keys, QualityStore},
    sync::LivenessProbe,
    types::{Application, Blockchain, ClientCredential, EnforceResult, GatewaySettings, Node},
};
use uuid::Uuid;

pub const CHAIN_HASH: &str = "0021";
pub const CHAIN_ALIAS: &str = "eth-mainnet";
pub const APP_ID: &str = "app-1";
pub const PROCESS_ID: &str = "itest";

/// Mainnet-like chain with JSON enforcement and no sync check.
#[must_use]
pub fn test_blockchain() -> Blockchain {
    Blockchain {
        id: "ethereum-mainnet".to_string(),
        hash: CHAIN_HASH.to_string(),
        aliases: vec![CHAIN_ALIAS.to_string()],
        enforce_result: Some(EnforceResult::Json),
        sync_check: None,
        metadata: Default::default(),
    }
}

#[must_use]
pub fn test_application(id: &str, settings: GatewaySettings) -> Application {
    Application {
        id: id.to_string(),
        public_key: format!("{id}-pk"),
        credential: ClientCredential {
            version: "0.0.1".to_string(),
            client_public_key: format!("{id}-client"),
            application_public_key: format!("{id}-pk"),
            application_signature: "sig".to_string(),
        },
        settings,
        metadata: Default::default(),
    }
}

#[must_use]
pub fn nodes(keys: &[&str]) -> Vec<Node> {
    keys.iter().map(|k| Node::new(*k, format!("http://{k}.invalid"))).collect()
}

/// Config with an in-memory metrics database, one chain and one open application.
#[must_use]
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.metrics.database_url = "sqlite::memory:".to_string();
    config.metrics.process_id = PROCESS_ID.to_string();
    config.metrics.flush_interval_seconds = 3600;
    config.relay.request_timeout_ms = 2_000;
    config.relay.attempt_timeout_ms = 500;
    config.blockchains = vec![test_blockchain()];
    config.applications = vec![test_application(APP_ID, GatewaySettings::default())];
    config
}

/// A request for `application` on the test chain.
#[must_use]
pub fn relay_request(application: Application, payload: &str) -> RelayRequest {
    RelayRequest {
        request_id: Uuid::new_v4().to_string(),
        relay_type: RelayType::Application,
        type_id: application.id.clone(),
        blockchain_alias: CHAIN_ALIAS.to_string(),
        application,
        raw_payload: payload.to_string(),
        path: None,
        http_method: "POST".to_string(),
        caller: CallerCredentials::default(),
        request_timeout: None,
        attempt_timeout: None,
        relay_retries: None,
    }
}

pub const BLOCK_NUMBER_REQUEST: &str = r#"{"jsonrpc":"2.0","id":1,"method":"eth_blockNumber","params":[]}"#;
/// Keys in serde_json order, so an enforced (re-serialized) body compares equal.
pub const BLOCK_NUMBER_RESPONSE: &str = r#"{"id":1,"jsonrpc":"2.0","result":"0x10"}"#;

/// Sink that keeps every batch in memory.
#[derive(Default)]
pub struct RecordingSink {
    batches: Mutex<Vec<Vec<MetricRow>>>,
    delay: Duration,
}

impl RecordingSink {
    /// Holds each insert for `delay` before recording it, like a slow database.
    #[must_use]
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay, ..Default::default() }
    }

    #[must_use]
    pub fn rows(&self) -> Vec<MetricRow> {
        self.batches.lock().unwrap().iter().flatten().cloned().collect()
    }

    #[must_use]
    pub fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

#[async_trait]
impl MetricsSink for RecordingSink {
    async fn bulk_insert(&self, rows: &[MetricRow]) -> Result<(), SinkError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.batches.lock().unwrap().push(rows.to_vec());
        Ok(())
    }
}

/// Sink whose database is always unreachable.
pub struct FailingSink;

#[async_trait]
impl MetricsSink for FailingSink {
    async fn bulk_insert(&self, _rows: &[MetricRow]) -> Result<(), SinkError> {
        Err(SinkError::Database("connection refused".to_string()))
    }
}

/// Probe that keeps the first `keep` nodes, counting invocations.
pub struct CountingProbe {
    keep: usize,
    delay: Duration,
    calls: AtomicUsize,
}

impl CountingProbe {
    #[must_use]
    pub fn new(keep: usize) -> Self {
        Self { keep, delay: Duration::ZERO, calls: AtomicUsize::new(0) }
    }

    /// Holds each verification for `delay`, keeping the lock held meanwhile.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LivenessProbe for CountingProbe {
    async fn verify(&self, nodes: &[Node], _blockchain: &str, _sync_check: &str) -> Vec<Node> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        nodes.iter().take(self.keep).cloned().collect()
    }
}

/// Builds a runtime around a scripted client and in-memory sink.
pub async fn build_runtime(
    config: AppConfig,
    client: Arc<dyn RelayClient>,
    sink: Arc<dyn MetricsSink>,
) -> SwitchboardRuntime {
    SwitchboardRuntime::builder()
        .with_config(config)
        .with_relay_client(client)
        .with_metrics_sink(sink)
        .disable_store_sweeper()
        .disable_metrics_flusher()
        .build()
        .await
        .expect("Failed to build runtime")
}

/// Drains the metric rows queued for the test process.
pub async fn drain_queued_metrics(runtime: &SwitchboardRuntime) -> Vec<MetricRow> {
    let store = runtime.components().store();
    let key = keys::metrics_batch(&runtime.config().metrics.process_id);
    let mut rows = Vec::new();
    while let Some(raw) = store.lpop(&key).await.unwrap() {
        rows.push(serde_json::from_str(&raw).unwrap());
    }
    rows
}

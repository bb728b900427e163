//! Builder for initializing the gateway runtime from configuration.

use crate::{
    client::{HttpClient, RelayClient, StaticSessionClient},
    config::AppConfig,
    metrics::{MetricsRecorder, MetricsSink, SqliteMetricsSink},
    registry::{BlockchainCache, StaticRegistry},
    relay::{FallbackPool, RelayDispatcher},
    selection::CherryPicker,
    store::MemoryStore,
    sync::{LivenessProbe, RetainAll, SyncFilter},
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{lifecycle::SwitchboardRuntime, SwitchboardComponents};

/// Errors that can occur during runtime initialization.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// The metrics database could not be opened or migrated.
    #[error("Failed to initialize metrics sink: {0}")]
    MetricsInitialization(String),

    #[error("Runtime initialization failed: {0}")]
    Initialization(String),
}

#[derive(Clone)]
struct RuntimeOptions {
    shutdown_channel_capacity: usize,
    enable_store_sweeper: bool,
    enable_metrics_flusher: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            shutdown_channel_capacity: 16,
            enable_store_sweeper: true,
            enable_metrics_flusher: true,
        }
    }
}

/// Builder for constructing a [`SwitchboardRuntime`].
///
/// Every collaborator defaults to what the configuration describes; the
/// `with_*` overrides exist so integration tests can swap in scripted
/// clients, probes and sinks.
pub struct SwitchboardRuntimeBuilder {
    config: Option<AppConfig>,
    options: RuntimeOptions,
    relay_client: Option<Arc<dyn RelayClient>>,
    probe: Option<Arc<dyn LivenessProbe>>,
    sink: Option<Arc<dyn MetricsSink>>,
}

impl SwitchboardRuntimeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: None,
            options: RuntimeOptions::default(),
            relay_client: None,
            probe: None,
            sink: None,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replaces the session client built from `[[sessions]]`.
    #[must_use]
    pub fn with_relay_client(mut self, client: Arc<dyn RelayClient>) -> Self {
        self.relay_client = Some(client);
        self
    }

    #[must_use]
    pub fn with_liveness_probe(mut self, probe: Arc<dyn LivenessProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Replaces the SQLite sink opened from `metrics.database_url`.
    #[must_use]
    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Sets custom shutdown channel capacity (default: 16).
    #[must_use]
    pub fn with_shutdown_channel_capacity(mut self, capacity: usize) -> Self {
        self.options.shutdown_channel_capacity = capacity;
        self
    }

    #[must_use]
    pub fn disable_store_sweeper(mut self) -> Self {
        self.options.enable_store_sweeper = false;
        self
    }

    /// Leaves queued metric rows in place until a relay or shutdown flushes them.
    #[must_use]
    pub fn disable_metrics_flusher(mut self) -> Self {
        self.options.enable_metrics_flusher = false;
        self
    }

    /// Builds the runtime, wiring every component and starting background tasks.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] if configuration is missing or invalid, or a
    /// component fails to initialize.
    pub async fn build(self) -> Result<SwitchboardRuntime, RuntimeError> {
        let config = self.config.ok_or_else(|| {
            RuntimeError::ConfigValidation("No configuration provided".to_string())
        })?;
        config.validate().map_err(RuntimeError::ConfigValidation)?;

        info!(
            blockchains = config.blockchains.len(),
            applications = config.applications.len(),
            load_balancers = config.load_balancers.len(),
            fallback_urls = config.relay.fallback_urls.len(),
            "Initializing switchboard runtime"
        );

        let (shutdown_tx, _) = broadcast::channel::<()>(self.options.shutdown_channel_capacity);

        let store = Arc::new(MemoryStore::new());
        let sweeper = self.options.enable_store_sweeper.then(|| {
            store.spawn_sweeper(config.store.sweep_interval(), shutdown_tx.subscribe())
        });
        debug!(sweeper_enabled = sweeper.is_some(), "Quality store initialized");

        let picker = Arc::new(CherryPicker::new(store.clone(), config.selection.clone()));

        let probe = self.probe.unwrap_or_else(|| Arc::new(RetainAll));
        let sync = Arc::new(SyncFilter::new(store.clone(), probe, config.sync.clone()));
        debug!("Sync filter initialized");

        let sink: Arc<dyn MetricsSink> = match self.sink {
            Some(sink) => sink,
            None => Arc::new(
                SqliteMetricsSink::new(&config.metrics.database_url)
                    .await
                    .map_err(|e| RuntimeError::MetricsInitialization(e.to_string()))?,
            ),
        };
        let metrics = Arc::new(MetricsRecorder::new(
            store.clone(),
            sink,
            picker.clone(),
            config.metrics.clone(),
        ));
        let flusher =
            self.options.enable_metrics_flusher.then(|| metrics.spawn_flusher(shutdown_tx.subscribe()));
        debug!(
            process_id = %config.metrics.process_id,
            flusher_enabled = flusher.is_some(),
            "Metrics recorder initialized"
        );

        let http = Arc::new(
            HttpClient::with_config(config.http.clone())
                .map_err(|e| RuntimeError::Initialization(format!("HTTP client: {e}")))?,
        );
        let relay_client = self.relay_client.unwrap_or_else(|| {
            Arc::new(StaticSessionClient::new(http.clone(), config.sessions_by_blockchain()))
        });

        let registry = Arc::new(StaticRegistry::new(
            config.blockchains.clone(),
            config.applications.clone(),
            config.load_balancers.clone(),
        ));
        let blockchains = BlockchainCache::new(registry.clone());

        let fallback = FallbackPool::new(
            config.relay.fallback_urls.clone(),
            http,
            config.relay.fallback_timeout(),
        );
        let dispatcher = Arc::new(
            RelayDispatcher::new(
                blockchains,
                relay_client,
                picker.clone(),
                sync.clone(),
                metrics.clone(),
                config.relay.clone(),
            )
            .map_err(|e| RuntimeError::Initialization(format!("Relay dispatcher: {e}")))?
            .with_fallback(fallback),
        );
        info!(
            relay_retries = config.relay.relay_retries,
            request_timeout_ms = config.relay.request_timeout_ms,
            "Relay dispatcher initialized"
        );

        let components =
            SwitchboardComponents::new(store, picker, sync, metrics, registry, dispatcher);
        let tasks = [("store sweeper", sweeper), ("metrics flusher", flusher)]
            .into_iter()
            .filter_map(|(name, task)| task.map(|task| (name, task)))
            .collect();
        let runtime = SwitchboardRuntime::new(components, shutdown_tx, config, tasks);

        info!("Switchboard runtime initialization complete");
        Ok(runtime)
    }
}

impl Default for SwitchboardRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

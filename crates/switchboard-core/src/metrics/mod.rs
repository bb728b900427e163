//! Relay metrics recorder.
//!
//! Every relay outcome, successful or not, goes through
//! [`MetricsRecorder::record_metric`], which:
//!
//! 1. logs the outcome (`info` for successes, `error` otherwise);
//! 2. updates the Prometheus counters;
//! 3. appends a [`MetricRow`] to this process's pending batch in the
//!    quality store. Once the batch is older than the flush interval it is
//!    drained and written to the [`MetricsSink`] in one bulk insert on a
//!    background task, so a slow sink never delays the relay;
//! 4. feeds the outcome back into node selection when a node served it.
//!
//! Recording never fails: store and sink errors are logged and dropped.

pub mod prometheus;
pub mod sink;

pub use prometheus::prometheus_handle;
pub use sink::{MetricRow, MetricsSink, SinkError, SqliteMetricsSink};

use crate::{
    selection::CherryPicker,
    store::{keys, QualityStore, StoreError},
    types::RESULT_SUCCESS,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinSet,
    time::Instant,
};
use tracing::{debug, error, info, warn};

/// The age marker outlives any sane flush interval; it only guards against a
/// marker left behind by a crashed process.
const BATCH_AGE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Identifies this process's pending batch in the shared store.
    #[serde(default = "default_process_id")]
    pub process_id: String,

    /// Minimum batch age before it is flushed, in seconds (default: 10).
    #[serde(default = "default_flush_interval")]
    pub flush_interval_seconds: u64,

    /// Durable metrics database (default: `sqlite://switchboard-metrics.db`).
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

fn default_process_id() -> String {
    std::process::id().to_string()
}
fn default_flush_interval() -> u64 {
    10
}
fn default_database_url() -> String {
    "sqlite://switchboard-metrics.db".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            process_id: default_process_id(),
            flush_interval_seconds: default_flush_interval(),
            database_url: default_database_url(),
        }
    }
}

/// One relay outcome as reported by the dispatcher.
#[derive(Debug, Clone)]
pub struct RelayMetric {
    pub request_id: String,
    pub application_id: String,
    pub app_public_key: String,
    /// Canonical blockchain hash.
    pub blockchain: String,
    /// Node that served (or failed) the attempt, if any.
    pub service_node: Option<String>,
    pub relay_start: Instant,
    pub result: u16,
    pub bytes: usize,
    pub delivered: bool,
    pub fallback: bool,
    pub method: String,
    pub error: Option<String>,
}

pub struct MetricsRecorder {
    store: Arc<dyn QualityStore>,
    sink: Arc<dyn MetricsSink>,
    picker: Arc<CherryPicker>,
    config: MetricsConfig,
    /// Batch writes in flight. Sink latency stays off the relay path.
    writes: Mutex<JoinSet<()>>,
}

impl MetricsRecorder {
    #[must_use]
    pub fn new(
        store: Arc<dyn QualityStore>,
        sink: Arc<dyn MetricsSink>,
        picker: Arc<CherryPicker>,
        config: MetricsConfig,
    ) -> Self {
        Self { store, sink, picker, config, writes: Mutex::new(JoinSet::new()) }
    }

    pub async fn record_metric(&self, metric: RelayMetric) {
        let elapsed = metric.relay_start.elapsed().as_secs_f64();
        Self::log_outcome(&metric, elapsed);
        prometheus::record_relay(&metric.blockchain, metric.result, elapsed, metric.fallback);

        let row = MetricRow {
            timestamp: Utc::now(),
            app_public_key: metric.app_public_key.clone(),
            blockchain: metric.blockchain.clone(),
            service_node: metric.service_node.clone(),
            elapsed_time: elapsed,
            result: metric.result,
            bytes: u64::try_from(metric.bytes).unwrap_or(u64::MAX),
            method: metric.method.clone(),
        };
        if let Err(e) = self.enqueue(row).await {
            warn!(request_id = %metric.request_id, error = %e, "failed to queue relay metric");
        }

        if let Some(node) = &metric.service_node {
            self.picker
                .update_service_quality(
                    &metric.blockchain,
                    &metric.application_id,
                    node,
                    elapsed,
                    metric.result,
                )
                .await;
        }
    }

    /// Writes every queued row regardless of batch age, then waits for all
    /// in-flight batch writes. Called on shutdown.
    pub async fn flush_pending(&self) {
        match self.drain_batch().await {
            Ok(rows) if !rows.is_empty() => write_batch(self.sink.as_ref(), &rows).await,
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to drain queued relay metrics"),
        }

        let mut writes = std::mem::take(&mut *self.writes.lock().await);
        while let Some(joined) = writes.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "relay metrics write task failed");
            }
        }
    }

    /// Flushes the queued batch if it is due. Lets a quiet gateway persist
    /// rows without waiting for the next relay.
    pub async fn flush_if_due(&self) {
        match self.take_due_batch().await {
            Ok(rows) if !rows.is_empty() => write_batch(self.sink.as_ref(), &rows).await,
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to flush queued relay metrics"),
        }
    }

    /// Spawns a task that calls [`Self::flush_if_due`] once per flush interval
    /// (at least every second) until `shutdown` fires.
    pub fn spawn_flusher(
        self: &Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let recorder = Arc::clone(self);
        let period = Duration::from_secs(self.config.flush_interval_seconds.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => recorder.flush_if_due().await,
                    _ = shutdown.recv() => break,
                }
            }
        })
    }

    fn log_outcome(metric: &RelayMetric, elapsed: f64) {
        let service_node = metric.service_node.as_deref().unwrap_or_default();
        let error = metric.error.as_deref().unwrap_or_default();
        if metric.result == RESULT_SUCCESS {
            info!(
                request_id = %metric.request_id,
                application_id = %metric.application_id,
                blockchain = %metric.blockchain,
                service_node,
                method = %metric.method,
                elapsed_time = elapsed,
                result = metric.result,
                bytes = metric.bytes,
                delivered = metric.delivered,
                fallback = metric.fallback,
                "relay succeeded"
            );
        } else {
            error!(
                request_id = %metric.request_id,
                application_id = %metric.application_id,
                blockchain = %metric.blockchain,
                service_node,
                method = %metric.method,
                elapsed_time = elapsed,
                result = metric.result,
                bytes = metric.bytes,
                delivered = metric.delivered,
                fallback = metric.fallback,
                error,
                "relay failed"
            );
        }
    }

    fn batch_key(&self) -> String {
        keys::metrics_batch(&self.config.process_id)
    }

    fn age_key(&self) -> String {
        keys::metrics_batch_age(&self.config.process_id)
    }

    async fn batch_is_due(&self) -> Result<bool, StoreError> {
        let now_ms = Utc::now().timestamp_millis();
        let interval_ms =
            i64::try_from(self.config.flush_interval_seconds.saturating_mul(1000)).unwrap_or(i64::MAX);
        let started_ms = self.store.get(&self.age_key()).await?.and_then(|v| v.parse::<i64>().ok());
        Ok(started_ms.is_some_and(|started| now_ms.saturating_sub(started) >= interval_ms))
    }

    async fn take_due_batch(&self) -> Result<Vec<MetricRow>, StoreError> {
        let pending = self.store.llen(&self.batch_key()).await?;
        if pending == 0 || !self.batch_is_due().await? {
            return Ok(Vec::new());
        }
        self.drain_batch().await
    }

    /// Pops every queued row and clears the batch age.
    async fn drain_batch(&self) -> Result<Vec<MetricRow>, StoreError> {
        let batch_key = self.batch_key();
        let mut rows = Vec::new();
        while let Some(raw) = self.store.lpop(&batch_key).await? {
            match serde_json::from_str::<MetricRow>(&raw) {
                Ok(queued) => rows.push(queued),
                Err(e) => warn!(error = %e, "dropping malformed queued metric"),
            }
        }
        self.store.del(&self.age_key()).await?;
        Ok(rows)
    }

    /// Appends `row` to the pending batch, or drains the batch and hands it to
    /// a background write together with `row` once the batch is old enough.
    async fn enqueue(&self, row: MetricRow) -> Result<(), StoreError> {
        let pending = self.store.llen(&self.batch_key()).await?;
        if pending > 0 && self.batch_is_due().await? {
            let mut rows = self.drain_batch().await?;
            rows.push(row);
            self.spawn_write(rows).await;
            return Ok(());
        }

        let serialized = serde_json::to_string(&row).map_err(|e| StoreError::Backend(e.to_string()))?;
        self.store.rpush(&self.batch_key(), &serialized).await?;
        let now_ms = Utc::now().timestamp_millis().to_string();
        // the age marks the batch's first row; an existing marker is kept
        self.store.set_nx_ex(&self.age_key(), &now_ms, BATCH_AGE_TTL).await?;
        Ok(())
    }

    async fn spawn_write(&self, rows: Vec<MetricRow>) {
        let sink = Arc::clone(&self.sink);
        let mut writes = self.writes.lock().await;
        while writes.try_join_next().is_some() {}
        writes.spawn(async move { write_batch(sink.as_ref(), &rows).await });
    }
}

async fn write_batch(sink: &dyn MetricsSink, rows: &[MetricRow]) {
    match sink.bulk_insert(rows).await {
        Ok(()) => {
            prometheus::record_flush("ok");
            debug!(rows = rows.len(), "flushed relay metrics");
        }
        Err(e) => {
            prometheus::record_flush("error");
            error!(rows = rows.len(), error = %e, "failed to write relay metrics batch");
        }
    }
}

//! Prometheus exposition for relay counters.
//!
//! Counters are emitted through the `metrics` facade; this module owns the
//! process-wide recorder whose handle renders them at `/metrics`.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the global recorder on first call and returns its handle.
///
/// If another recorder is already installed, a detached recorder is used so
/// rendering still works, but facade metrics will not reach it.
pub fn prometheus_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(
                    "Using fallback Prometheus recorder (install error: {e}) - metrics may not be globally visible"
                );
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn record_relay(blockchain: &str, result: u16, elapsed_seconds: f64, fallback: bool) {
    let blockchain = blockchain.to_string();
    counter!("relay_requests_total", "blockchain" => blockchain.clone(), "result" => result.to_string())
        .increment(1);
    histogram!("relay_duration_seconds", "blockchain" => blockchain.clone()).record(elapsed_seconds);
    if fallback {
        counter!("relay_fallback_total", "blockchain" => blockchain).increment(1);
    }
}

pub(crate) fn record_flush(outcome: &'static str) {
    counter!("relay_metrics_flush_total", "outcome" => outcome).increment(1);
}

//! Core component container for the gateway runtime.

use crate::{
    metrics::MetricsRecorder, registry::StaticRegistry, relay::RelayDispatcher,
    selection::CherryPicker, store::MemoryStore, sync::SyncFilter,
};
use std::sync::Arc;

/// Container for all initialized gateway components.
///
/// Everything is behind `Arc`, so the container is cheap to clone into
/// request handlers.
#[derive(Clone)]
pub struct SwitchboardComponents {
    store: Arc<MemoryStore>,
    picker: Arc<CherryPicker>,
    sync: Arc<SyncFilter>,
    metrics: Arc<MetricsRecorder>,
    registry: Arc<StaticRegistry>,
    dispatcher: Arc<RelayDispatcher>,
}

impl SwitchboardComponents {
    #[must_use]
    pub fn new(
        store: Arc<MemoryStore>,
        picker: Arc<CherryPicker>,
        sync: Arc<SyncFilter>,
        metrics: Arc<MetricsRecorder>,
        registry: Arc<StaticRegistry>,
        dispatcher: Arc<RelayDispatcher>,
    ) -> Self {
        Self { store, picker, sync, metrics, registry, dispatcher }
    }

    /// Returns the shared quality store.
    #[must_use]
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    #[must_use]
    pub fn picker(&self) -> &Arc<CherryPicker> {
        &self.picker
    }

    #[must_use]
    pub fn sync(&self) -> &Arc<SyncFilter> {
        &self.sync
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    /// Returns the entity registry backing blockchain, application and load
    /// balancer lookups.
    #[must_use]
    pub fn registry(&self) -> &Arc<StaticRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<RelayDispatcher> {
        &self.dispatcher
    }
}

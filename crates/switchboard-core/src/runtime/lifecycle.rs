//! Runtime lifecycle: background tasks and graceful shutdown.

use crate::{config::AppConfig, relay::RelayDispatcher};
use std::sync::Arc;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, error, info, warn};

use super::{builder::SwitchboardRuntimeBuilder, SwitchboardComponents};

/// Owns the initialized components and their background tasks.
///
/// Shutdown is coordinated over a broadcast channel; [`Self::shutdown`]
/// signals every subscriber, waits for the background tasks to stop and
/// writes any metric rows still queued.
pub struct SwitchboardRuntime {
    components: SwitchboardComponents,
    shutdown_tx: broadcast::Sender<()>,
    config: AppConfig,
    background_tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl SwitchboardRuntime {
    #[must_use]
    pub fn builder() -> SwitchboardRuntimeBuilder {
        SwitchboardRuntimeBuilder::new()
    }

    pub(super) fn new(
        components: SwitchboardComponents,
        shutdown_tx: broadcast::Sender<()>,
        config: AppConfig,
        background_tasks: Vec<(&'static str, JoinHandle<()>)>,
    ) -> Self {
        Self { components, shutdown_tx, config, background_tasks }
    }

    #[must_use]
    pub fn components(&self) -> &SwitchboardComponents {
        &self.components
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Convenience accessor for the relay dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<RelayDispatcher> {
        self.components.dispatcher()
    }

    /// Creates a new shutdown receiver for tasks owned outside the runtime,
    /// such as the HTTP server.
    #[must_use]
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signals every background task, waits for them, then flushes queued
    /// relay metrics to the sink.
    pub async fn shutdown(self) {
        info!("Initiating switchboard runtime shutdown");
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!(error = %e, "Failed to send shutdown signal (no receivers)");
        }
        for (name, task) in self.background_tasks {
            match task.await {
                Ok(()) => debug!(task = name, "Background task stopped"),
                Err(e) if e.is_cancelled() => debug!(task = name, "Background task cancelled"),
                Err(e) => error!(task = name, error = %e, "Background task failed"),
            }
        }

        self.components.metrics().flush_pending().await;
        info!("Switchboard runtime shutdown complete");
    }
}

const _: () = {
    const fn assert_send<T: Send>() {}
    const fn assert_sync<T: Sync>() {}
    let _ = assert_send::<SwitchboardRuntime>;
    let _ = assert_sync::<SwitchboardRuntime>;
};

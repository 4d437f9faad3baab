use std::sync::Arc;

use evalctl_config::Config;
use evalctl_dispatcher::Dispatcher;
use evalctl_eventbus::EventBus;
use evalctl_queue::TaskQueue;
use evalctl_storage::StorageService;

use crate::metrics::Metrics;
use crate::pending::PendingMarkers;

/// Shared axum state (C8). Everything here is cheap to clone — the router
/// holds one `Arc<AppState>`, not one per handler.
pub struct AppState {
    pub storage: Arc<dyn StorageService>,
    pub queue: Arc<dyn TaskQueue>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub event_bus: Arc<dyn EventBus>,
    pub pending: PendingMarkers,
    pub metrics: Metrics,
    pub config: Config,
}

impl AppState {
    pub fn new(
        storage: Arc<dyn StorageService>,
        queue: Arc<dyn TaskQueue>,
        dispatcher: Arc<dyn Dispatcher>,
        event_bus: Arc<dyn EventBus>,
        config: Config,
    ) -> Self {
        Self {
            storage,
            queue,
            dispatcher,
            event_bus,
            pending: PendingMarkers::new(),
            metrics: Metrics::new(),
            config,
        }
    }

    /// Ready only once every resilient client reports connected
    /// (SPEC_FULL.md "Readiness/liveness probes").
    pub async fn is_ready(&self) -> bool {
        self.queue.is_ready().await && self.dispatcher.is_ready().await && self.event_bus.is_ready().await
    }
}

use std::sync::Arc;

use clap::Parser;
use evalctl_api::{router, AppState};
use evalctl_config::{CommonArgs, Config};
use evalctl_dispatcher::{Dispatcher, KubeDispatcher};
use evalctl_eventbus::{EventBus, InMemoryEventBus, RedisEventBus};
use evalctl_queue::{InMemoryQueue, RedisQueue, TaskQueue};
use evalctl_storage::{
    BlobOffloadingStorage, CachingStorage, InMemoryBlobStore, InMemoryStorage, SledStorage, StorageService,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "evalctl-api", about = "Evaluation submission API (C8)")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    config.apply_overrides(&cli.common);

    let event_bus: Arc<dyn EventBus> = if config.event_bus_url.starts_with("redis://") {
        Arc::new(RedisEventBus::new(&config.event_bus_url)?)
    } else {
        Arc::new(InMemoryEventBus::new())
    };

    // The API never executes workloads itself; it only needs a dispatcher
    // handle to forward cancellation (§4.9 `DELETE /evaluations/{id}`), so
    // it never calls `start_image_refresh`.
    let dispatcher: Arc<dyn Dispatcher> = Arc::new(KubeDispatcher::new(
        config.cluster_namespace.clone(),
        "evalctl",
        event_bus.clone(),
        config.allow_sandbox_fallback,
    ));

    if config.broker_url.starts_with("redis://") {
        let queue = Arc::new(RedisQueue::new(&config.broker_url)?);
        run_with_storage(config, queue, dispatcher, event_bus).await
    } else {
        let queue = Arc::new(InMemoryQueue::new());
        run_with_storage(config, queue, dispatcher, event_bus).await
    }
}

async fn run_with_storage<Q: TaskQueue + 'static>(
    config: Config,
    queue: Arc<Q>,
    dispatcher: Arc<dyn Dispatcher>,
    event_bus: Arc<dyn EventBus>,
) -> anyhow::Result<()> {
    if config.storage_url.starts_with("sled:") {
        let path = config.storage_url.trim_start_matches("sled:");
        let storage = Arc::new(SledStorage::open(std::path::Path::new(path))?);
        let storage = Arc::new(BlobOffloadingStorage::new(storage, Arc::new(InMemoryBlobStore::new())));
        let storage = Arc::new(CachingStorage::new(storage));
        serve(config, queue, dispatcher, event_bus, storage).await
    } else {
        let storage = Arc::new(InMemoryStorage::new());
        let storage = Arc::new(BlobOffloadingStorage::new(storage, Arc::new(InMemoryBlobStore::new())));
        let storage = Arc::new(CachingStorage::new(storage));
        serve(config, queue, dispatcher, event_bus, storage).await
    }
}

async fn serve<Q: TaskQueue + 'static, S: StorageService + 'static>(
    config: Config,
    queue: Arc<Q>,
    dispatcher: Arc<dyn Dispatcher>,
    event_bus: Arc<dyn EventBus>,
    storage: Arc<S>,
) -> anyhow::Result<()> {
    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(storage, queue, dispatcher, event_bus, config));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(%bind_addr, "evalctl-api listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received, draining in-flight requests");
}

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use evalctl_config::{CommonArgs, Config};
use evalctl_dispatcher::{Dispatcher, KubeDispatcher};
use evalctl_eventbus::{EventBus, InMemoryEventBus, RedisEventBus};
use evalctl_queue::{InMemoryQueue, RedisQueue, TaskQueue};
use evalctl_storage::{BlobOffloadingStorage, CachingStorage, InMemoryBlobStore, InMemoryStorage, SledStorage, StorageService};
use evalctl_worker::EvaluationWorker;
use tracing_subscriber::EnvFilter;

const IMAGE_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Parser)]
#[command(name = "evalctl-worker", about = "Evaluation task worker (C7)")]
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

    let kube_dispatcher = KubeDispatcher::new(
        config.cluster_namespace.clone(),
        "evalctl",
        event_bus.clone(),
        config.allow_sandbox_fallback,
    );
    kube_dispatcher.start_image_refresh(IMAGE_REFRESH_INTERVAL);
    let dispatcher: Arc<dyn Dispatcher> = Arc::new(kube_dispatcher);

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
        run(config, queue, dispatcher, event_bus, storage).await
    } else {
        let storage = Arc::new(InMemoryStorage::new());
        let storage = Arc::new(BlobOffloadingStorage::new(storage, Arc::new(InMemoryBlobStore::new())));
        let storage = Arc::new(CachingStorage::new(storage));
        run(config, queue, dispatcher, event_bus, storage).await
    }
}

async fn run<Q: TaskQueue + 'static, S: StorageService + 'static>(
    config: Config,
    queue: Arc<Q>,
    dispatcher: Arc<dyn Dispatcher>,
    event_bus: Arc<dyn EventBus>,
    storage: Arc<S>,
) -> anyhow::Result<()> {
    let health_dispatcher = dispatcher.clone();
    let health_event_bus = event_bus.clone();
    let worker = Arc::new(EvaluationWorker::new(queue, dispatcher, storage, event_bus));

    let health_worker = worker.clone();
    evalctl_config::spawn_health_server_with_metrics(
        config.health_bind_addr.clone(),
        move || {
            let dispatcher = health_dispatcher.clone();
            let event_bus = health_event_bus.clone();
            async move { dispatcher.is_ready().await && event_bus.is_ready().await }
        },
        move || health_worker.metrics.render(),
    );

    worker.run().await;
    Ok(())
}

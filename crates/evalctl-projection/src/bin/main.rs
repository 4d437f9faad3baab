use std::sync::Arc;

use clap::Parser;
use evalctl_config::{CommonArgs, Config};
use evalctl_eventbus::{EventBus, InMemoryEventBus, RedisEventBus};
use evalctl_projection::ProjectionWorker;
use evalctl_storage::{BlobOffloadingStorage, CachingStorage, InMemoryBlobStore, InMemoryStorage, SledStorage};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "evalctl-projection", about = "Storage-projection worker (C5)")]
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

    {
        let event_bus = event_bus.clone();
        evalctl_config::spawn_health_server(config.health_bind_addr.clone(), move || {
            let event_bus = event_bus.clone();
            async move { event_bus.is_ready().await }
        });
    }

    if config.storage_url.starts_with("sled:") {
        let path = config.storage_url.trim_start_matches("sled:");
        let storage = Arc::new(SledStorage::open(std::path::Path::new(path))?);
        let storage = Arc::new(BlobOffloadingStorage::new(storage, Arc::new(InMemoryBlobStore::new())));
        let storage = Arc::new(CachingStorage::new(storage));
        run(event_bus, storage).await
    } else {
        let storage = Arc::new(InMemoryStorage::new());
        let storage = Arc::new(BlobOffloadingStorage::new(storage, Arc::new(InMemoryBlobStore::new())));
        let storage = Arc::new(CachingStorage::new(storage));
        run(event_bus, storage).await
    }
}

async fn run<S: evalctl_storage::StorageService + 'static>(
    event_bus: Arc<dyn EventBus>,
    storage: Arc<S>,
) -> anyhow::Result<()> {
    let worker = ProjectionWorker::new(event_bus, storage);
    worker.run().await?;
    Ok(())
}

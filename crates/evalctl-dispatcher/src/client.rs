use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

/// Wraps [`kube::Client`] with a background reconnect loop so dispatcher
/// boot never fails permanently when the cluster API is briefly
/// unreachable (§4.6 "Resilience"). `is_ready` reflects the last connect
/// attempt; callers degrade their readiness probe from it rather than
/// failing hard.
#[derive(Clone)]
pub struct ResilientClusterClient {
    client: Arc<std::sync::RwLock<Option<kube::Client>>>,
    ready: Arc<AtomicBool>,
}

impl ResilientClusterClient {
    /// Spawns the connect-and-retry loop; returns immediately even if the
    /// first attempt fails.
    pub fn spawn(retry_interval: Duration) -> Self {
        let client = Arc::new(std::sync::RwLock::new(None));
        let ready = Arc::new(AtomicBool::new(false));

        let client_handle = client.clone();
        let ready_handle = ready.clone();
        tokio::spawn(async move {
            loop {
                match kube::Client::try_default().await {
                    Ok(new_client) => {
                        *client_handle.write().expect("client lock poisoned") = Some(new_client);
                        ready_handle.store(true, Ordering::Relaxed);
                    }
                    Err(err) => {
                        warn!(error = %err, "cluster client unavailable, will retry");
                        ready_handle.store(false, Ordering::Relaxed);
                    }
                }
                tokio::time::sleep(retry_interval).await;
            }
        });

        Self { client, ready }
    }

    pub fn get(&self) -> Option<kube::Client> {
        self.client.read().expect("client lock poisoned").clone()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

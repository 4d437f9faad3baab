use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use evalctl_types::{channels, EvaluationEvent};
use redis::AsyncCommands;
use tokio_stream::{Stream, StreamExt};
use tracing::warn;

use crate::bus::EventBus;
use crate::error::EventBusError;

/// Cross-process event bus over Redis pub/sub. The dispatcher and
/// projection worker run in separate processes, so in-memory broadcast
/// alone can't carry events between them (§4.3, §5 "stateless" components
/// that still need a shared transport).
///
/// Boot must not fail permanently if the bus is briefly unreachable (§4.6
/// "Resilience") — `connected` tracks liveness for the readiness probe
/// while a background reconnect keeps retrying.
pub struct RedisEventBus {
    client: redis::Client,
    connected: Arc<AtomicBool>,
}

impl RedisEventBus {
    pub fn new(url: &str) -> Result<Self, EventBusError> {
        let client = redis::Client::open(url).map_err(|e| EventBusError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            connected: Arc::new(AtomicBool::new(false)),
        })
    }

    async fn publish_connection(&self) -> Result<redis::aio::MultiplexedConnection, EventBusError> {
        match self.client.get_multiplexed_async_connection().await {
            Ok(conn) => {
                self.connected.store(true, Ordering::Relaxed);
                Ok(conn)
            }
            Err(e) => {
                self.connected.store(false, Ordering::Relaxed);
                warn!(error = %e, "event bus connection failed");
                Err(EventBusError::Unavailable(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, event: EvaluationEvent) -> Result<(), EventBusError> {
        let channel = channels::channel_for(event.kind);
        let payload = serde_json::to_string(&event).map_err(|source| EventBusError::Publish {
            channel: channel.to_string(),
            source,
        })?;
        let mut conn = self.publish_connection().await?;
        conn.publish::<_, _, ()>(channel, payload)
            .await
            .map_err(|e| EventBusError::Unavailable(e.to_string()))
    }

    async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<Pin<Box<dyn Stream<Item = EvaluationEvent> + Send>>, EventBusError> {
        let pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| EventBusError::Unavailable(e.to_string()))?;
        let mut pubsub = pubsub;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| EventBusError::Unavailable(e.to_string()))?;

        let stream = pubsub.into_on_message().filter_map(|msg| {
            let raw: String = msg.get_payload().ok()?;
            serde_json::from_str::<EvaluationEvent>(&raw).ok()
        });
        Ok(Box::pin(stream))
    }

    async fn is_ready(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

use std::pin::Pin;

use async_trait::async_trait;
use dashmap::DashMap;
use evalctl_types::{channels, EvaluationEvent};
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};

use crate::bus::EventBus;
use crate::error::EventBusError;

const CHANNEL_CAPACITY: usize = 1024;

/// In-process event bus over [`tokio::sync::broadcast`], one channel per
/// named topic in [`channels::ALL_CHANNELS`]. Used in single-process test
/// setups and as the reference implementation against which
/// [`crate::redis::RedisEventBus`] is behaviourally checked.
pub struct InMemoryEventBus {
    channels: DashMap<String, broadcast::Sender<EvaluationEvent>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        let channels = DashMap::new();
        for &name in channels::ALL_CHANNELS {
            let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
            channels.insert(name.to_string(), tx);
        }
        Self { channels }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<EvaluationEvent> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: EvaluationEvent) -> Result<(), EventBusError> {
        let channel = channels::channel_for(event.kind);
        let sender = self.sender(channel);
        // No subscribers is not an error — broadcast fan-out is
        // best-effort within a running process.
        let _ = sender.send(event);
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<Pin<Box<dyn Stream<Item = EvaluationEvent> + Send>>, EventBusError> {
        let receiver = self.sender(channel).subscribe();
        let stream = BroadcastStream::new(receiver).filter_map(|item| item.ok());
        Ok(Box::pin(stream))
    }

    async fn is_ready(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use evalctl_types::{channels, EvalId, EventKind};
    use tokio_stream::StreamExt;

    use super::*;

    #[tokio::test]
    async fn published_event_reaches_a_prior_subscriber() {
        let bus = InMemoryEventBus::new();
        let mut stream = bus.subscribe(channels::EVALUATION_SUBMITTED).await.unwrap();

        let event = EvaluationEvent::new(EvalId::generate(), EventKind::Submitted, "evalctl-api");
        bus.publish(event.clone()).await.unwrap();

        let received = stream.next().await.unwrap();
        assert_eq!(received.event_id, event.event_id);
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_error() {
        let bus = InMemoryEventBus::new();
        let event = EvaluationEvent::new(EvalId::generate(), EventKind::Completed, "evalctl-dispatcher");
        assert!(bus.publish(event).await.is_ok());
    }
}

use async_trait::async_trait;
use evalctl_types::EvaluationEvent;
use tokio_stream::Stream;

use crate::error::EventBusError;

/// Typed pub/sub over named channels (C3). Delivery is at-least-once;
/// subscribers must tolerate redelivery (§4.3, §9 "resilient clients").
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish `event` to the channel its kind maps to
    /// ([`evalctl_types::channels::channel_for`]).
    async fn publish(&self, event: EvaluationEvent) -> Result<(), EventBusError>;

    /// Subscribe to a single named channel, returning a stream of
    /// envelopes. Subscribing to a channel with no publishers yet is not
    /// an error — the stream simply waits.
    async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<std::pin::Pin<Box<dyn Stream<Item = EvaluationEvent> + Send>>, EventBusError>;

    /// `true` once the bus has a live connection (feeds a component's
    /// readiness probe, per SPEC_FULL.md's "Readiness/liveness probes").
    async fn is_ready(&self) -> bool;
}

use async_trait::async_trait;
use evalctl_types::{ErrorKind, EvalId};

use crate::error::QueueError;
use crate::item::{Claim, DeadLetter, QueueItem};

/// Durable FIFO-per-priority queue with ack/retry/DLQ (C4, §4.4).
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, item: QueueItem) -> Result<(), QueueError>;

    /// Claim the next available item, applying the fairness-by-polling
    /// drain order (high before normal before low, with a periodic
    /// fairness step). Returns `None` if nothing is claimable right now.
    async fn claim(&self) -> Result<Option<Claim>, QueueError>;

    /// Acknowledge successful processing, releasing the visibility hold.
    async fn ack(&self, delivery_id: uuid::Uuid) -> Result<(), QueueError>;

    /// Nack a retryable failure; re-enqueues with a bumped `attempt` and
    /// `not_before` computed by the backoff policy, or moves the item to
    /// the DLQ once `retry_max_attempts` is exhausted.
    async fn nack(&self, delivery_id: uuid::Uuid, error: ErrorKind) -> Result<(), QueueError>;

    /// A task not yet claimed is removed outright; a claimed task is
    /// marked revoked so the consumer aborts cooperatively (§4.4).
    async fn revoke(&self, eval_id: &EvalId) -> Result<(), QueueError>;

    /// `true` if `eval_id`'s current claim has been revoked. Consumers
    /// check this before step 3 and between polls (§4.7 step 5).
    async fn is_revoked(&self, eval_id: &EvalId) -> Result<bool, QueueError>;

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, QueueError>;

    async fn is_ready(&self) -> bool;
}

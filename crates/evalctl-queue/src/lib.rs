//! Task queue (C4): durable FIFO-per-priority dispatch with ack/retry/DLQ.

pub mod backoff;
pub mod error;
pub mod item;
pub mod memory;
pub mod queue;
pub mod redis_queue;

pub use backoff::backoff_seconds;
pub use error::QueueError;
pub use item::{AttemptRecord, Claim, DeadLetter, QueueItem};
pub use memory::InMemoryQueue;
pub use queue::TaskQueue;
pub use redis_queue::RedisQueue;

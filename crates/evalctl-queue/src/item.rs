use chrono::{DateTime, Utc};
use evalctl_types::{EvalId, ErrorKind, Priority};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Internal to C4 (§3.1 `QueueItem`). `payload_ref` is opaque to the
/// queue — it's whatever the submission API stashed (here, the
/// evaluation request needed to re-dispatch on retry).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueItem {
    pub eval_id: EvalId,
    pub priority: Priority,
    pub attempt: u32,
    pub not_before: DateTime<Utc>,
    pub payload_ref: serde_json::Value,
}

impl QueueItem {
    pub fn new(eval_id: EvalId, priority: Priority, payload_ref: serde_json::Value) -> Self {
        Self {
            eval_id,
            priority,
            attempt: 0,
            not_before: Utc::now(),
            payload_ref,
        }
    }
}

/// A claimed item handed to a consumer, carrying the broker-assigned
/// delivery tag needed to ack/nack it.
#[derive(Clone, Debug)]
pub struct Claim {
    pub item: QueueItem,
    pub delivery_id: Uuid,
}

/// A task that exhausted its retries (§4.4, §7 "DLQ"): original payload,
/// every attempt's error, and the final classification.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeadLetter {
    pub item: QueueItem,
    pub attempts: Vec<AttemptRecord>,
    pub final_error: ErrorKind,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub error: ErrorKind,
    pub at: DateTime<Utc>,
}

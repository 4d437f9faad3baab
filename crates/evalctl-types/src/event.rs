use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::id::EvalId;

/// The nine lifecycle kinds plus the two bookkeeping kinds (§3.1, §4.3).
/// Maps 1:1 to the event bus channel names in [`crate::channels`] — no
/// component should format a channel name from a string literal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Submitted,
    Queued,
    Provisioning,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
    /// A queue-internal retry bump (§3.3's `queued → queued` self-loop).
    RetryScheduled,
    /// Retries exhausted; task moved to the dead-letter queue (§7 "DLQ").
    Dlq,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Queued => "queued",
            Self::Provisioning => "provisioning",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::RetryScheduled => "retry_scheduled",
            Self::Dlq => "dlq",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable lifecycle record (§3.1 `EvaluationEvent`). The event log for a
/// given `eval_id` is append-only and totally ordered by append sequence
/// (§5); `event_id` is the idempotency key for [`crate::EventKind`]
/// redelivery — `AppendEvent` with a duplicate `event_id` is a no-op.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationEvent {
    pub event_id: Uuid,
    pub eval_id: EvalId,
    pub kind: EventKind,
    pub at: DateTime<Utc>,
    /// Free-form fields specific to `kind` (exit_code, error_kind, preview,
    /// ...). Deliberately untyped here — C1 fixes the envelope shape, not
    /// the payload shape, per §4.3's "carries only identifiers + kind +
    /// timestamps, not full code or output".
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Component name that produced this event (e.g. "evalctl-dispatcher").
    pub producer: String,
}

impl EvaluationEvent {
    pub fn new(eval_id: EvalId, kind: EventKind, producer: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            eval_id,
            kind,
            at: Utc::now(),
            payload: serde_json::Value::Null,
            producer: producer.into(),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_round_trips_through_json() {
        for kind in [
            EventKind::Submitted,
            EventKind::Queued,
            EventKind::Provisioning,
            EventKind::Running,
            EventKind::Completed,
            EventKind::Failed,
            EventKind::Timeout,
            EventKind::Cancelled,
            EventKind::RetryScheduled,
            EventKind::Dlq,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            let back: EventKind = serde_json::from_str(&json).unwrap();
            assert_eq!(kind, back);
        }
    }

    #[test]
    fn retry_scheduled_serializes_as_snake_case() {
        let json = serde_json::to_string(&EventKind::RetryScheduled).unwrap();
        assert_eq!(json, "\"retry_scheduled\"");
    }

    #[test]
    fn new_event_defaults_to_null_payload() {
        let ev = EvaluationEvent::new(
            EvalId::generate(),
            EventKind::Submitted,
            "evalctl-api",
        );
        assert!(ev.payload.is_null());
        assert_eq!(ev.producer, "evalctl-api");
    }
}

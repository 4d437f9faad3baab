//! Replay support: folding a sequence of [`EvaluationEvent`]s into a final
//! status, the same way the projection worker (C5) does at recovery or
//! when validating an event log end to end.
//!
//! Two modes:
//! - [`apply`]: O(1) per event, used at append time by C5 (§4.8).
//! - [`derive_status`]: O(n) full replay, used for recovery and auditing.

use evalctl_types::{EvaluationEvent, EvaluationStatus};

use crate::outcome::Outcome;
use crate::transitions::next;

/// One step of replay: apply a single event's kind to `current`, returning
/// the new status (unchanged on `Noop`/`Conflict`) and the outcome that
/// produced it. Callers append the anomaly flag from [`Outcome::is_anomaly`]
/// onto the stored event.
pub fn apply(current: EvaluationStatus, event: &EvaluationEvent) -> (EvaluationStatus, Outcome) {
    let outcome = next(current, event.kind);
    let status = match &outcome {
        Outcome::Transitioned { new_status, .. } => *new_status,
        Outcome::Noop(_) | Outcome::Conflict(_) => current,
    };
    (status, outcome)
}

/// Fold an entire event log (ascending `at`, tie-broken by `event_id` per
/// §4.2) into its final status, starting from `Submitted`. Anomalous
/// events (out-of-order jumps, stale deliveries, second-terminal conflicts)
/// are collected alongside their index for diagnostics; they do not change
/// the fact that the fold always reaches the highest-precedence status
/// observed (§8's `reduce(precedence_max, filter(monotonic_allowed, E))`).
pub fn derive_status(events: &[EvaluationEvent]) -> (EvaluationStatus, Vec<usize>) {
    let mut status = EvaluationStatus::Submitted;
    let mut anomalous_indices = Vec::new();

    for (index, event) in events.iter().enumerate() {
        let (next_status, outcome) = apply(status, event);
        status = next_status;
        if outcome.is_anomaly() {
            anomalous_indices.push(index);
        }
    }

    (status, anomalous_indices)
}

#[cfg(test)]
mod tests {
    use evalctl_types::{EvalId, EventKind};

    use super::*;

    fn event(kind: EventKind) -> EvaluationEvent {
        EvaluationEvent::new(EvalId::generate(), kind, "test")
    }

    #[test]
    fn derive_status_reaches_terminal_via_out_of_order_events() {
        let events = vec![
            event(EventKind::Submitted),
            event(EventKind::Queued),
            event(EventKind::Completed),
            event(EventKind::Running),
        ];
        let (status, anomalies) = derive_status(&events);
        assert_eq!(status, EvaluationStatus::Completed);
        assert_eq!(anomalies, vec![2, 3]);
    }

    #[test]
    fn derive_status_on_clean_happy_path_has_no_anomalies() {
        let events = vec![
            event(EventKind::Submitted),
            event(EventKind::Queued),
            event(EventKind::Provisioning),
            event(EventKind::Running),
            event(EventKind::Completed),
        ];
        let (status, anomalies) = derive_status(&events);
        assert_eq!(status, EvaluationStatus::Completed);
        assert!(anomalies.is_empty());
    }
}

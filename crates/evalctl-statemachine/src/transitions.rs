use evalctl_types::{EventKind, EvaluationStatus};

use crate::outcome::{ConflictReason, NoopReason, Outcome};

/// The status an event implies in isolation, ignoring the current status.
/// `RetryScheduled` implies `Queued` (the §3.3 self-loop); `Dlq` implies
/// `Failed` (§7: a DLQ'd task's terminal status is failed).
fn target_status(event: EventKind) -> EvaluationStatus {
    match event {
        EventKind::Submitted => EvaluationStatus::Submitted,
        EventKind::Queued | EventKind::RetryScheduled => EvaluationStatus::Queued,
        EventKind::Provisioning => EvaluationStatus::Provisioning,
        EventKind::Running => EvaluationStatus::Running,
        EventKind::Completed => EvaluationStatus::Completed,
        EventKind::Failed | EventKind::Dlq => EvaluationStatus::Failed,
        EventKind::Timeout => EvaluationStatus::Timeout,
        EventKind::Cancelled => EvaluationStatus::Cancelled,
    }
}

/// `true` if `(current, event)` is one of the literal edges enumerated in
/// §3.3's transition table (as opposed to a jump accepted only via the
/// precedence rule).
fn is_table_edge(current: EvaluationStatus, event: EventKind) -> bool {
    use EvaluationStatus::*;
    matches!(
        (current, event),
        (Submitted, EventKind::Queued)
            | (Queued, EventKind::Provisioning)
            | (Queued, EventKind::Cancelled)
            | (Queued, EventKind::RetryScheduled)
            | (Provisioning, EventKind::Running)
            | (Provisioning, EventKind::Failed)
            | (Provisioning, EventKind::Cancelled)
            | (Running, EventKind::Completed)
            | (Running, EventKind::Failed)
            | (Running, EventKind::Timeout)
            | (Running, EventKind::Cancelled)
    )
}

/// The single place the precedence + monotonicity rules live (§4.5, C9).
/// Pure: callers pass the observed state and incoming event kind and get
/// back either the transitioned state or a `noop`/`conflict` marker.
pub fn next(current: EvaluationStatus, event: EventKind) -> Outcome {
    let target = target_status(event);

    if current.is_terminal() {
        return if target.is_terminal() {
            Outcome::Conflict(ConflictReason::SecondTerminalEvent {
                first: current,
                attempted: target,
            })
        } else {
            Outcome::Noop(NoopReason::AlreadyTerminal {
                current,
                attempted: target,
            })
        };
    }

    // Any terminal event ends a non-terminal evaluation outright — this is
    // how an out-of-order `completed` arriving before `running` still
    // lands the evaluation on `completed` (§8 scenario 6).
    if target.is_terminal() {
        return Outcome::Transitioned {
            new_status: target,
            anomaly: !is_table_edge(current, event),
        };
    }

    if target.precedence() > current.precedence() || (event == EventKind::RetryScheduled && target == current) {
        return Outcome::Transitioned {
            new_status: target,
            anomaly: !is_table_edge(current, event),
        };
    }

    Outcome::Noop(NoopReason::Stale {
        current,
        attempted: target,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_follows_table_edges_without_anomaly() {
        let steps = [
            (EvaluationStatus::Submitted, EventKind::Queued, EvaluationStatus::Queued),
            (EvaluationStatus::Queued, EventKind::Provisioning, EvaluationStatus::Provisioning),
            (EvaluationStatus::Provisioning, EventKind::Running, EvaluationStatus::Running),
            (EvaluationStatus::Running, EventKind::Completed, EvaluationStatus::Completed),
        ];
        for (current, event, expected) in steps {
            match next(current, event) {
                Outcome::Transitioned { new_status, anomaly } => {
                    assert_eq!(new_status, expected);
                    assert!(!anomaly);
                }
                other => panic!("expected transition, got {other:?}"),
            }
        }
    }

    #[test]
    fn retry_scheduled_is_a_queued_self_loop_without_anomaly() {
        let outcome = next(EvaluationStatus::Queued, EventKind::RetryScheduled);
        assert_eq!(
            outcome,
            Outcome::Transitioned {
                new_status: EvaluationStatus::Queued,
                anomaly: false,
            }
        );
    }

    #[test]
    fn out_of_order_completed_before_running_lands_on_completed_with_anomaly() {
        // current is still `provisioning` when `completed` arrives early.
        let outcome = next(EvaluationStatus::Provisioning, EventKind::Completed);
        assert_eq!(
            outcome,
            Outcome::Transitioned {
                new_status: EvaluationStatus::Completed,
                anomaly: true,
            }
        );
    }

    #[test]
    fn non_terminal_event_after_terminal_is_dropped() {
        let outcome = next(EvaluationStatus::Completed, EventKind::Running);
        assert!(matches!(outcome, Outcome::Noop(NoopReason::AlreadyTerminal { .. })));
    }

    #[test]
    fn second_terminal_event_is_a_conflict_and_keeps_the_first() {
        let outcome = next(EvaluationStatus::Completed, EventKind::Failed);
        assert_eq!(
            outcome,
            Outcome::Conflict(ConflictReason::SecondTerminalEvent {
                first: EvaluationStatus::Completed,
                attempted: EvaluationStatus::Failed,
            })
        );
    }

    #[test]
    fn stale_backwards_event_is_a_noop() {
        let outcome = next(EvaluationStatus::Running, EventKind::Queued);
        assert!(matches!(outcome, Outcome::Noop(NoopReason::Stale { .. })));
    }

    #[test]
    fn duplicate_same_status_event_is_a_noop() {
        let outcome = next(EvaluationStatus::Queued, EventKind::Queued);
        assert!(matches!(outcome, Outcome::Noop(NoopReason::Stale { .. })));
    }
}

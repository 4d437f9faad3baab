use evalctl_types::EvaluationStatus;

/// Result of feeding one event through [`crate::transitions::next`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The event moved the evaluation to `new_status`. `anomaly` is set when
    /// the move was accepted via the precedence rule (§3.3) rather than a
    /// literal edge in the §3.3 transition table — still correct, but worth
    /// recording so operators can see out-of-order delivery happened.
    Transitioned {
        new_status: EvaluationStatus,
        anomaly: bool,
    },
    /// The event changed nothing. Always logged as an anomaly (§3.3: "any
    /// attempted transition not listed is a no-op and MUST be logged").
    Noop(NoopReason),
    /// A second terminal event arrived for an already-terminal evaluation.
    /// The first terminal status is kept (sticky, first-arriver wins); this
    /// is always logged as an anomaly.
    Conflict(ConflictReason),
}

impl Outcome {
    /// Whether this outcome must be recorded with the anomaly flag on the
    /// appended event (§3.3, §4.8 step 2).
    pub fn is_anomaly(&self) -> bool {
        match self {
            Self::Transitioned { anomaly, .. } => *anomaly,
            Self::Noop(_) | Self::Conflict(_) => true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NoopReason {
    /// The evaluation already reached a terminal status; non-terminal
    /// events that arrive afterward are dropped (monotonicity invariant).
    AlreadyTerminal {
        current: EvaluationStatus,
        attempted: EvaluationStatus,
    },
    /// The event's implied status is not ahead of the current one by
    /// precedence (a duplicate or a stale/backwards delivery).
    Stale {
        current: EvaluationStatus,
        attempted: EvaluationStatus,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConflictReason {
    SecondTerminalEvent {
        first: EvaluationStatus,
        attempted: EvaluationStatus,
    },
}

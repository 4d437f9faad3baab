use serde::{Deserialize, Serialize};

/// Lifecycle status of an [`crate::Evaluation`].
///
/// Ordering matters: [`EvaluationStatus::precedence`] encodes the
/// highest-reached-state rule from the status state machine — incoming
/// events are accepted in any order, and the stored status always reflects
/// the highest-precedence non-terminal status observed, or the first
/// terminal status observed (terminal is sticky, see §3.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    Submitted,
    Queued,
    Provisioning,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl EvaluationStatus {
    /// Rank used for the highest-reached-state rule among non-terminal
    /// statuses. Terminal statuses are not compared by precedence — they
    /// are sticky by first-arrival instead (see [`Self::is_terminal`]).
    pub fn precedence(self) -> u8 {
        match self {
            Self::Submitted => 0,
            Self::Queued => 1,
            Self::Provisioning => 2,
            Self::Running => 3,
            Self::Completed | Self::Failed | Self::Timeout | Self::Cancelled => 4,
        }
    }

    /// Terminal statuses never transition again (monotonicity invariant).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Timeout | Self::Cancelled
        )
    }

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
        }
    }
}

impl std::fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_is_monotonic_along_the_happy_path() {
        let ordered = [
            EvaluationStatus::Submitted,
            EvaluationStatus::Queued,
            EvaluationStatus::Provisioning,
            EvaluationStatus::Running,
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0].precedence() < pair[1].precedence());
        }
    }

    #[test]
    fn all_terminal_variants_share_precedence_and_report_terminal() {
        let terminals = [
            EvaluationStatus::Completed,
            EvaluationStatus::Failed,
            EvaluationStatus::Timeout,
            EvaluationStatus::Cancelled,
        ];
        for status in terminals {
            assert!(status.is_terminal());
            assert_eq!(status.precedence(), 4);
        }
        assert!(!EvaluationStatus::Running.is_terminal());
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::id::EvalId;
use crate::status::EvaluationStatus;

/// Execution priority (§3.1). Ordered: `Low < Normal < High`, used by C4's
/// fairness-by-polling drain order, not as a strict scheduler guarantee.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Evaluation language. `Python` is the only variant in the initial set
/// (§3.1); `Other` keeps the enum extensible without a breaking change,
/// per C1's "extensible" requirement. Serializes as a plain lowercase
/// string on the wire (`"python"`, `"rust"`, ...).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Language {
    Python,
    Other(String),
}

impl Language {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Python => "python",
            Self::Other(s) => s.as_str(),
        }
    }
}

impl From<&str> for Language {
    fn from(raw: &str) -> Self {
        match raw {
            "python" => Self::Python,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl Serialize for Language {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Language {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Language::from(raw.as_str()))
    }
}

/// Requested CPU/memory for a workload (§3.1, §4.6). Platform maxima are
/// enforced by the dispatcher and validated by C8 at submission time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub cpu_millicores: u32,
    pub memory_mib: u32,
}

impl Resources {
    /// Dispatcher request floor (§4.6: "request = 0.25 CPU / 256 MiB").
    pub const REQUEST_FLOOR: Resources = Resources {
        cpu_millicores: 250,
        memory_mib: 256,
    };

    /// Dispatcher default limit when the caller doesn't specify one
    /// (§4.6: "limit = resources or 0.5 CPU / 512 MiB").
    pub const DEFAULT_LIMIT: Resources = Resources {
        cpu_millicores: 500,
        memory_mib: 512,
    };
}

/// The unit of work (§3.1). Exclusively owned by the storage service (§3.2)
/// — every other component holds a transient projection of this shape and
/// must not treat it as authoritative.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub eval_id: EvalId,
    pub code: String,
    pub language: Language,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_tag: Option<String>,
    pub timeout_seconds: u32,
    pub priority: Priority,
    pub resources: Resources,
    pub status: EvaluationStatus,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_identity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Evaluation {
    /// `true` when §3.4's `exit_code is null iff status ∈ non-terminal ∪
    /// {cancelled before running}` holds for the current record.
    pub fn exit_code_invariant_holds(&self) -> bool {
        if self.status.is_terminal() {
            if self.status == EvaluationStatus::Cancelled && self.started_at.is_none() {
                self.exit_code.is_none()
            } else {
                true
            }
        } else {
            self.exit_code.is_none()
        }
    }

    /// `true` when §3.4's timestamp ordering (`terminated_at ≥ started_at ≥
    /// submitted_at` when present) holds.
    pub fn timestamp_ordering_holds(&self) -> bool {
        if let Some(started) = self.started_at {
            if started < self.submitted_at {
                return false;
            }
        }
        if let (Some(terminated), Some(started)) = (self.terminated_at, self.started_at) {
            if terminated < started {
                return false;
            }
        }
        if let (Some(terminated), None) = (self.terminated_at, self.started_at) {
            if terminated < self.submitted_at {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_matches_spec_drain_order() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
    }

    #[test]
    fn language_as_str_for_extensible_variant() {
        assert_eq!(Language::Python.as_str(), "python");
        assert_eq!(Language::Other("rust".into()).as_str(), "rust");
    }

    #[test]
    fn exit_code_invariant_flags_non_terminal_with_exit_code() {
        let mut eval = sample_evaluation();
        eval.status = EvaluationStatus::Running;
        eval.exit_code = Some(0);
        assert!(!eval.exit_code_invariant_holds());
    }

    #[test]
    fn exit_code_invariant_allows_terminal_with_exit_code() {
        let mut eval = sample_evaluation();
        eval.status = EvaluationStatus::Completed;
        eval.exit_code = Some(0);
        assert!(eval.exit_code_invariant_holds());
    }

    fn sample_evaluation() -> Evaluation {
        Evaluation {
            eval_id: EvalId::generate(),
            code: "print('hi')".into(),
            language: Language::Python,
            image_tag: None,
            timeout_seconds: 30,
            priority: Priority::Normal,
            resources: Resources::DEFAULT_LIMIT,
            status: EvaluationStatus::Submitted,
            submitted_at: Utc::now(),
            started_at: None,
            terminated_at: None,
            output_preview: None,
            output_location: None,
            exit_code: None,
            error_kind: None,
            executor_identity: None,
            deleted_at: None,
        }
    }
}

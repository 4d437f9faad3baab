use evalctl_types::{EvalId, Language, Priority, Resources};

/// Inputs to [`crate::dispatcher::Dispatcher::execute`] (§4.6).
#[derive(Clone, Debug)]
pub struct ExecuteRequest {
    pub eval_id: EvalId,
    pub code: String,
    pub language: Language,
    pub timeout_seconds: u32,
    pub resources: Resources,
    pub priority: Priority,
}

/// Immediate return from `Execute` — the watch continues after this (§4.6:
/// "Returns: immediately with `{eval_id, provisioning}`").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecuteAck {
    pub eval_id: EvalId,
    pub sandbox_fallback_used: bool,
    pub network_policy_enforced: bool,
}

/// The dispatcher's last-observed state for an evaluation's workload,
/// polled by C7 (§4.7 step 3) at a 10 s cadence.
#[derive(Clone, Debug, PartialEq)]
pub enum WorkloadState {
    Provisioning,
    Running,
    CompletedSuccess {
        exit_code: i32,
        stdout: Option<String>,
        stderr: Option<String>,
    },
    CompletedFailure {
        exit_code: i32,
        stdout: Option<String>,
        stderr: Option<String>,
    },
    TimedOut,
    CancelledExternally,
}

impl WorkloadState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Provisioning | Self::Running)
    }
}

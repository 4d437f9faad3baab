use chrono::{DateTime, Utc};
use evalctl_types::{ErrorKind, EvaluationStatus, Language};

/// Filter for `ListEvaluations` (§4.2).
#[derive(Clone, Debug, Default)]
pub struct ListFilter {
    pub status: Option<EvaluationStatus>,
    pub language: Option<Language>,
    pub since: Option<DateTime<Utc>>,
    pub include_deleted: bool,
}

/// A page of results plus whether more are available (§4.2).
#[derive(Clone, Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
}

/// Whitelisted, partial update to an evaluation record (§4.2
/// `UpdateEvaluation`). Only the fields named here may be patched; status
/// transitions are validated against the current status via C9 by the
/// caller before the patch reaches storage.
#[derive(Clone, Debug, Default)]
pub struct EvaluationPatch {
    pub status: Option<EvaluationStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub terminated_at: Option<DateTime<Utc>>,
    pub output: Option<Vec<u8>>,
    pub exit_code: Option<i32>,
    pub error_kind: Option<ErrorKind>,
    pub executor_identity: Option<String>,
    pub image_tag: Option<String>,
}

/// Result of `Statistics()` (§4.2).
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct Statistics {
    pub counts_by_status: std::collections::BTreeMap<String, u64>,
    pub throughput_last_24h: u64,
    pub average_duration_seconds: Option<f64>,
}

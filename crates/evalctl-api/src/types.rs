use evalctl_types::{EvalId, Evaluation, EvaluationStatus, Language, Resources};
use serde::{Deserialize, Serialize};

/// `POST /evaluations` request body (§6).
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub eval_id: Option<String>,
    pub code: String,
    pub language: String,
    #[serde(default)]
    pub timeout_seconds: Option<u32>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub resources: Option<ResourcesDto>,
    #[serde(default)]
    pub allow_null_bytes: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ResourcesDto {
    pub cpu_millicores: u32,
    pub memory_mib: u32,
}

impl From<ResourcesDto> for Resources {
    fn from(dto: ResourcesDto) -> Self {
        Resources {
            cpu_millicores: dto.cpu_millicores,
            memory_mib: dto.memory_mib,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub eval_id: EvalId,
    pub status: EvaluationStatus,
}

/// Returned by `GET /evaluations/{id}` while storage hasn't caught up yet
/// but the pending marker (§4.9) is still live.
#[derive(Debug, Serialize)]
pub struct PendingResponse {
    pub eval_id: EvalId,
    pub status: &'static str,
}

/// Ceiling on `ListQuery::limit` (§4.9 "list endpoints are bounded").
pub const MAX_LIST_LIMIT: usize = 500;
const DEFAULT_LIST_LIMIT: usize = 50;

#[derive(Debug, Deserialize, Default)]
pub struct ListQuery {
    pub status: Option<EvaluationStatus>,
    pub language: Option<String>,
    pub since: Option<chrono::DateTime<chrono::Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ListQuery {
    pub fn language(&self) -> Option<Language> {
        self.language.as_deref().map(Language::from)
    }

    /// Clamped to `[1, MAX_LIST_LIMIT]`, defaulting to `DEFAULT_LIST_LIMIT`.
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
    }
}

#[derive(Debug, Serialize)]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
pub struct BulkSubmitRequest {
    pub evaluations: Vec<SubmitRequest>,
}

#[derive(Debug, Serialize)]
pub struct BulkSubmitResponse {
    pub results: Vec<BulkSubmitResult>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum BulkSubmitResult {
    Ok(SubmitResponse),
    Err { error_kind: evalctl_types::ErrorKind, message: String },
}

pub type EvaluationView = Evaluation;

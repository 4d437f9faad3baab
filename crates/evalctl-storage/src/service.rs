use async_trait::async_trait;
use evalctl_types::{EvalId, Evaluation, EvaluationEvent};

use crate::error::StorageError;
use crate::types::{EvaluationPatch, ListFilter, Page, Statistics};

/// The canonical read/write API for evaluation records (C2, §4.2). All
/// operations return structured [`StorageError`]s; `Evaluation` is
/// exclusively owned by whatever implements this trait (§3.2).
#[async_trait]
pub trait StorageService: Send + Sync {
    async fn create_evaluation(&self, record: Evaluation) -> Result<Evaluation, StorageError>;

    async fn get_evaluation(&self, eval_id: &EvalId) -> Result<Evaluation, StorageError>;

    /// Applies only whitelisted fields (`patch`) and rejects
    /// terminal→non-terminal transitions (§4.2). Atomic with respect to
    /// status: implementations check-and-set against the current status.
    async fn update_evaluation(
        &self,
        eval_id: &EvalId,
        patch: EvaluationPatch,
    ) -> Result<Evaluation, StorageError>;

    async fn list_evaluations(
        &self,
        filter: ListFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Page<Evaluation>, StorageError>;

    /// Idempotent on `event_id`: a duplicate append is a no-op success.
    async fn append_event(&self, event: EvaluationEvent) -> Result<(), StorageError>;

    async fn get_events(
        &self,
        eval_id: &EvalId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EvaluationEvent>, StorageError>;

    async fn bulk_create(
        &self,
        records: Vec<Evaluation>,
    ) -> Vec<Result<Evaluation, StorageError>>;

    async fn running_evaluations(&self) -> Result<Vec<Evaluation>, StorageError>;

    async fn statistics(&self) -> Result<Statistics, StorageError>;

    async fn soft_delete(&self, eval_id: &EvalId) -> Result<(), StorageError>;

    async fn restore(&self, eval_id: &EvalId) -> Result<(), StorageError>;

    /// Queryable view over events appended with the anomaly flag set
    /// (SPEC_FULL.md "Anomaly log" — a direct consequence of §3.3/§4.8's
    /// requirement to log unlisted transitions, not a new data source).
    async fn list_anomalies(
        &self,
        eval_id: Option<&EvalId>,
        limit: usize,
        offset: usize,
    ) -> Result<Page<EvaluationEvent>, StorageError>;

    /// Full output bytes regardless of whether `output_location` is set on
    /// the record (§8 scenario 7: "fetching via the storage service yields
    /// the complete output"). The base reference implementations have no
    /// blob backing and report unavailable; [`crate::offload::BlobOffloadingStorage`]
    /// is the implementation that actually answers this.
    async fn get_output(&self, eval_id: &EvalId) -> Result<Option<Vec<u8>>, StorageError> {
        let _ = eval_id;
        Err(StorageError::BlobUnavailable("no blob store configured".into()))
    }
}

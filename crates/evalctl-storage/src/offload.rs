use std::sync::Arc;

use async_trait::async_trait;
use evalctl_types::{EvalId, Evaluation, EvaluationEvent};

use crate::blob::{blob_key, BlobStore};
use crate::error::StorageError;
use crate::service::StorageService;
use crate::types::{EvaluationPatch, ListFilter, Page, Statistics};

/// Writes every evaluation's full output to the [`BlobStore`] under its
/// deterministic key, unconditionally of size, so [`StorageService::get_output`]
/// always has a complete copy to return (§8 scenario 7) even though
/// `output_location` on the public record is only populated once the
/// output exceeds `blob_threshold_bytes` (§3.4, §6 "keyed by eval_id/output").
pub struct BlobOffloadingStorage<S> {
    inner: Arc<S>,
    blobs: Arc<dyn BlobStore>,
}

impl<S: StorageService> BlobOffloadingStorage<S> {
    pub fn new(inner: Arc<S>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { inner, blobs }
    }
}

#[async_trait]
impl<S: StorageService> StorageService for BlobOffloadingStorage<S> {
    async fn create_evaluation(&self, record: Evaluation) -> Result<Evaluation, StorageError> {
        self.inner.create_evaluation(record).await
    }

    async fn get_evaluation(&self, eval_id: &EvalId) -> Result<Evaluation, StorageError> {
        self.inner.get_evaluation(eval_id).await
    }

    async fn update_evaluation(
        &self,
        eval_id: &EvalId,
        patch: EvaluationPatch,
    ) -> Result<Evaluation, StorageError> {
        if let Some(output) = &patch.output {
            self.blobs.put(eval_id, output).await?;
        }
        self.inner.update_evaluation(eval_id, patch).await
    }

    async fn list_evaluations(
        &self,
        filter: ListFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Page<Evaluation>, StorageError> {
        self.inner.list_evaluations(filter, limit, offset).await
    }

    async fn append_event(&self, event: EvaluationEvent) -> Result<(), StorageError> {
        self.inner.append_event(event).await
    }

    async fn get_events(
        &self,
        eval_id: &EvalId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EvaluationEvent>, StorageError> {
        self.inner.get_events(eval_id, limit, offset).await
    }

    async fn bulk_create(&self, records: Vec<Evaluation>) -> Vec<Result<Evaluation, StorageError>> {
        self.inner.bulk_create(records).await
    }

    async fn running_evaluations(&self) -> Result<Vec<Evaluation>, StorageError> {
        self.inner.running_evaluations().await
    }

    async fn statistics(&self) -> Result<Statistics, StorageError> {
        self.inner.statistics().await
    }

    async fn soft_delete(&self, eval_id: &EvalId) -> Result<(), StorageError> {
        self.inner.soft_delete(eval_id).await
    }

    async fn restore(&self, eval_id: &EvalId) -> Result<(), StorageError> {
        self.inner.restore(eval_id).await
    }

    async fn list_anomalies(
        &self,
        eval_id: Option<&EvalId>,
        limit: usize,
        offset: usize,
    ) -> Result<Page<EvaluationEvent>, StorageError> {
        self.inner.list_anomalies(eval_id, limit, offset).await
    }

    async fn get_output(&self, eval_id: &EvalId) -> Result<Option<Vec<u8>>, StorageError> {
        match self.blobs.get(&blob_key(eval_id)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(StorageError::BlobUnavailable(_)) => Ok(None),
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use evalctl_types::{EvaluationStatus, Language, Priority, Resources};

    use super::*;
    use crate::blob::InMemoryBlobStore;
    use crate::memory::InMemoryStorage;

    fn sample(eval_id: EvalId) -> Evaluation {
        Evaluation {
            eval_id,
            code: "print(1)".into(),
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

    #[tokio::test]
    async fn large_output_is_fetchable_in_full_after_offload() {
        let storage = BlobOffloadingStorage::new(Arc::new(InMemoryStorage::new()), Arc::new(InMemoryBlobStore::new()));
        let eval_id = EvalId::generate();
        storage.create_evaluation(sample(eval_id.clone())).await.unwrap();

        let big = vec![b'x'; 5 * 1024 * 1024];
        storage
            .update_evaluation(
                &eval_id,
                EvaluationPatch {
                    status: Some(EvaluationStatus::Completed),
                    terminated_at: Some(Utc::now()),
                    exit_code: Some(0),
                    output: Some(big.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let record = storage.get_evaluation(&eval_id).await.unwrap();
        assert!(record.output_location.is_some());
        assert!(record.output_preview.unwrap().len() <= 1024);

        let full = storage.get_output(&eval_id).await.unwrap().unwrap();
        assert_eq!(full, big);
    }
}

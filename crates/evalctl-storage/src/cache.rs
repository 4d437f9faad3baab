use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use evalctl_types::{EvalId, Evaluation, EvaluationEvent};

use crate::error::StorageError;
use crate::service::StorageService;
use crate::types::{EvaluationPatch, ListFilter, Page, Statistics};

/// Non-terminal cache entries expire quickly; §4.2: "non-terminal records
/// have TTL ≤ 2 s".
const NON_TERMINAL_TTL: Duration = Duration::from_secs(2);

enum Expiry {
    /// Terminal records are cacheable without TTL (§4.2).
    Never,
    At(Instant),
}

struct CacheEntry {
    record: Evaluation,
    expiry: Expiry,
}

impl CacheEntry {
    fn is_stale(&self) -> bool {
        match self.expiry {
            Expiry::Never => false,
            Expiry::At(when) => Instant::now() >= when,
        }
    }
}

/// Read-through cache in front of GETs (§4.2). Writes invalidate; cache
/// misses never serve a stale terminal state because terminal records are
/// cached without expiry and only ever replaced, never evicted by time.
pub struct CachingStorage<S> {
    inner: Arc<S>,
    cache: DashMap<EvalId, CacheEntry>,
}

impl<S: StorageService> CachingStorage<S> {
    pub fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
        }
    }

    fn cache_insert(&self, record: Evaluation) {
        let expiry = if record.status.is_terminal() {
            Expiry::Never
        } else {
            Expiry::At(Instant::now() + NON_TERMINAL_TTL)
        };
        self.cache.insert(record.eval_id.clone(), CacheEntry { record, expiry });
    }

    fn invalidate(&self, eval_id: &EvalId) {
        self.cache.remove(eval_id);
    }
}

#[async_trait]
impl<S: StorageService> StorageService for CachingStorage<S> {
    async fn create_evaluation(&self, record: Evaluation) -> Result<Evaluation, StorageError> {
        let created = self.inner.create_evaluation(record).await?;
        self.cache_insert(created.clone());
        Ok(created)
    }

    async fn get_evaluation(&self, eval_id: &EvalId) -> Result<Evaluation, StorageError> {
        if let Some(entry) = self.cache.get(eval_id) {
            if !entry.is_stale() {
                return Ok(entry.record.clone());
            }
        }
        let record = self.inner.get_evaluation(eval_id).await?;
        self.cache_insert(record.clone());
        Ok(record)
    }

    async fn update_evaluation(
        &self,
        eval_id: &EvalId,
        patch: EvaluationPatch,
    ) -> Result<Evaluation, StorageError> {
        self.invalidate(eval_id);
        let updated = self.inner.update_evaluation(eval_id, patch).await?;
        self.cache_insert(updated.clone());
        Ok(updated)
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
        let mut results = Vec::with_capacity(records.len());
        for record in records {
            results.push(self.create_evaluation(record).await);
        }
        results
    }

    async fn running_evaluations(&self) -> Result<Vec<Evaluation>, StorageError> {
        self.inner.running_evaluations().await
    }

    async fn statistics(&self) -> Result<Statistics, StorageError> {
        self.inner.statistics().await
    }

    async fn soft_delete(&self, eval_id: &EvalId) -> Result<(), StorageError> {
        self.invalidate(eval_id);
        self.inner.soft_delete(eval_id).await
    }

    async fn restore(&self, eval_id: &EvalId) -> Result<(), StorageError> {
        self.invalidate(eval_id);
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
        self.inner.get_output(eval_id).await
    }
}

#[cfg(test)]
mod tests {
    use evalctl_types::{EvaluationStatus, Language, Priority, Resources};

    use super::*;
    use crate::memory::InMemoryStorage;

    fn sample(eval_id: EvalId, status: EvaluationStatus) -> Evaluation {
        Evaluation {
            eval_id,
            code: "print('hi')".into(),
            language: Language::Python,
            image_tag: None,
            timeout_seconds: 30,
            priority: Priority::Normal,
            resources: Resources::DEFAULT_LIMIT,
            status,
            submitted_at: chrono::Utc::now(),
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
    async fn write_invalidates_cached_read() {
        let cache = CachingStorage::new(Arc::new(InMemoryStorage::new()));
        let eval_id = EvalId::generate();
        cache
            .create_evaluation(sample(eval_id.clone(), EvaluationStatus::Submitted))
            .await
            .unwrap();
        cache.get_evaluation(&eval_id).await.unwrap();

        cache
            .update_evaluation(
                &eval_id,
                EvaluationPatch {
                    status: Some(EvaluationStatus::Queued),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let refreshed = cache.get_evaluation(&eval_id).await.unwrap();
        assert_eq!(refreshed.status, EvaluationStatus::Queued);
    }

    #[tokio::test]
    async fn terminal_records_are_cached_without_expiry() {
        let cache = CachingStorage::new(Arc::new(InMemoryStorage::new()));
        let eval_id = EvalId::generate();
        cache
            .create_evaluation(sample(eval_id.clone(), EvaluationStatus::Completed))
            .await
            .unwrap();
        let entry = cache.cache.get(&eval_id).unwrap();
        assert!(matches!(entry.expiry, Expiry::Never));
    }
}

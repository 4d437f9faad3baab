use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use evalctl_types::{EvalId, Evaluation, EvaluationEvent, EvaluationStatus};
use uuid::Uuid;

use crate::error::StorageError;
use crate::event_log::is_anomaly;
use crate::service::StorageService;
use crate::types::{EvaluationPatch, ListFilter, Page, Statistics};

/// Reference implementation of [`StorageService`]: one process, one
/// `DashMap`. Used in tests and as the behavioural baseline the
/// `sled`-backed implementation is checked against.
#[derive(Default)]
pub struct InMemoryStorage {
    records: DashMap<EvalId, Evaluation>,
    events: DashMap<EvalId, Mutex<Vec<EvaluationEvent>>>,
    seen_event_ids: DashMap<Uuid, ()>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(filter: &ListFilter, record: &Evaluation) -> bool {
        if !filter.include_deleted && record.deleted_at.is_some() {
            return false;
        }
        if let Some(status) = filter.status {
            if record.status != status {
                return false;
            }
        }
        if let Some(language) = &filter.language {
            if &record.language != language {
                return false;
            }
        }
        if let Some(since) = filter.since {
            if record.submitted_at < since {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl StorageService for InMemoryStorage {
    async fn create_evaluation(&self, record: Evaluation) -> Result<Evaluation, StorageError> {
        // §3.4: duplicate submission with the same eval_id is idempotent.
        if let Some(existing) = self.records.get(&record.eval_id) {
            return Ok(existing.clone());
        }
        self.records.insert(record.eval_id.clone(), record.clone());
        Ok(record)
    }

    async fn get_evaluation(&self, eval_id: &EvalId) -> Result<Evaluation, StorageError> {
        self.records
            .get(eval_id)
            .map(|r| r.clone())
            .ok_or_else(|| StorageError::NotFound(eval_id.clone()))
    }

    async fn update_evaluation(
        &self,
        eval_id: &EvalId,
        patch: EvaluationPatch,
    ) -> Result<Evaluation, StorageError> {
        let mut entry = self
            .records
            .get_mut(eval_id)
            .ok_or_else(|| StorageError::NotFound(eval_id.clone()))?;

        if entry.status.is_terminal() {
            if let Some(new_status) = patch.status {
                if new_status != entry.status {
                    return Err(StorageError::InvalidTransition {
                        eval_id: eval_id.clone(),
                        reason: format!("{} is terminal, cannot move to {new_status}", entry.status),
                    });
                }
            }
        }

        if let Some(status) = patch.status {
            entry.status = status;
        }
        if let Some(started_at) = patch.started_at {
            entry.started_at = Some(started_at);
        }
        if let Some(terminated_at) = patch.terminated_at {
            entry.terminated_at = Some(terminated_at);
        }
        if let Some(exit_code) = patch.exit_code {
            entry.exit_code = Some(exit_code);
        }
        if let Some(error_kind) = patch.error_kind {
            entry.error_kind = Some(error_kind);
        }
        if let Some(identity) = patch.executor_identity {
            entry.executor_identity = Some(identity);
        }
        if let Some(image_tag) = patch.image_tag {
            entry.image_tag = Some(image_tag);
        }
        if let Some(output) = patch.output {
            apply_output(&mut entry, &output);
        }

        Ok(entry.clone())
    }

    async fn list_evaluations(
        &self,
        filter: ListFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Page<Evaluation>, StorageError> {
        let mut matching: Vec<Evaluation> = self
            .records
            .iter()
            .map(|e| e.value().clone())
            .filter(|record| Self::matches(&filter, record))
            .collect();
        matching.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));

        let total = matching.len();
        let items: Vec<Evaluation> = matching.into_iter().skip(offset).take(limit).collect();
        let has_more = offset + items.len() < total;
        Ok(Page { items, has_more })
    }

    async fn append_event(&self, event: EvaluationEvent) -> Result<(), StorageError> {
        if self.seen_event_ids.contains_key(&event.event_id) {
            return Ok(());
        }
        self.seen_event_ids.insert(event.event_id, ());
        let log = self.events.entry(event.eval_id.clone()).or_default();
        log.lock().expect("event log mutex poisoned").push(event);
        Ok(())
    }

    async fn get_events(
        &self,
        eval_id: &EvalId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EvaluationEvent>, StorageError> {
        let Some(log) = self.events.get(eval_id) else {
            return Ok(Vec::new());
        };
        let guard = log.lock().expect("event log mutex poisoned");
        let mut sorted = guard.clone();
        sorted.sort_by(|a, b| a.at.cmp(&b.at).then_with(|| a.event_id.cmp(&b.event_id)));
        Ok(sorted.into_iter().skip(offset).take(limit).collect())
    }

    async fn bulk_create(&self, records: Vec<Evaluation>) -> Vec<Result<Evaluation, StorageError>> {
        let mut results = Vec::with_capacity(records.len());
        for record in records {
            results.push(self.create_evaluation(record).await);
        }
        results
    }

    async fn running_evaluations(&self) -> Result<Vec<Evaluation>, StorageError> {
        Ok(self
            .records
            .iter()
            .map(|e| e.value().clone())
            .filter(|r| {
                matches!(
                    r.status,
                    EvaluationStatus::Queued | EvaluationStatus::Provisioning | EvaluationStatus::Running
                )
            })
            .collect())
    }

    async fn statistics(&self) -> Result<Statistics, StorageError> {
        let mut counts = std::collections::BTreeMap::new();
        let mut throughput = 0u64;
        let mut durations = Vec::new();
        let day_ago = Utc::now() - chrono::Duration::hours(24);

        for entry in self.records.iter() {
            let record = entry.value();
            *counts.entry(record.status.as_str().to_string()).or_insert(0u64) += 1;
            if record.status.is_terminal() && record.submitted_at >= day_ago {
                throughput += 1;
            }
            if let (Some(started), Some(terminated)) = (record.started_at, record.terminated_at) {
                durations.push((terminated - started).num_milliseconds() as f64 / 1000.0);
            }
        }

        let average_duration_seconds = if durations.is_empty() {
            None
        } else {
            Some(durations.iter().sum::<f64>() / durations.len() as f64)
        };

        Ok(Statistics {
            counts_by_status: counts,
            throughput_last_24h: throughput,
            average_duration_seconds,
        })
    }

    async fn soft_delete(&self, eval_id: &EvalId) -> Result<(), StorageError> {
        let mut entry = self
            .records
            .get_mut(eval_id)
            .ok_or_else(|| StorageError::NotFound(eval_id.clone()))?;
        entry.deleted_at = Some(Utc::now());
        Ok(())
    }

    async fn restore(&self, eval_id: &EvalId) -> Result<(), StorageError> {
        let mut entry = self
            .records
            .get_mut(eval_id)
            .ok_or_else(|| StorageError::NotFound(eval_id.clone()))?;
        entry.deleted_at = None;
        Ok(())
    }

    async fn list_anomalies(
        &self,
        eval_id: Option<&EvalId>,
        limit: usize,
        offset: usize,
    ) -> Result<Page<EvaluationEvent>, StorageError> {
        let mut matches: Vec<EvaluationEvent> = Vec::new();
        match eval_id {
            Some(id) => {
                if let Some(log) = self.events.get(id) {
                    let guard = log.lock().expect("event log mutex poisoned");
                    matches.extend(guard.iter().filter(|e| is_anomaly(e)).cloned());
                }
            }
            None => {
                for entry in self.events.iter() {
                    let guard = entry.value().lock().expect("event log mutex poisoned");
                    matches.extend(guard.iter().filter(|e| is_anomaly(e)).cloned());
                }
            }
        }
        matches.sort_by(|a, b| a.at.cmp(&b.at));
        let total = matches.len();
        let items: Vec<_> = matches.into_iter().skip(offset).take(limit).collect();
        let has_more = offset + items.len() < total;
        Ok(Page { items, has_more })
    }
}

fn apply_output(entry: &mut Evaluation, output: &[u8]) {
    use evalctl_types::limits::{BLOB_THRESHOLD_BYTES, PREVIEW_BYTES};

    entry.output_preview = Some(crate::preview::truncate_preview(output, PREVIEW_BYTES));
    if output.len() > BLOB_THRESHOLD_BYTES {
        // The blob write itself happens in the caller (C2's `UpdateEvaluation`
        // wrapper that owns the `BlobStore`); here we just record that it
        // will be offloaded. See `CachingStorage`/binary wiring.
        entry.output_location = Some(crate::blob::blob_key(&entry.eval_id));
    }
}

#[cfg(test)]
mod tests {
    use evalctl_types::{EventKind, Language, Priority, Resources};

    use super::*;

    fn sample(eval_id: EvalId) -> Evaluation {
        Evaluation {
            eval_id,
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

    #[tokio::test]
    async fn duplicate_create_is_idempotent() {
        let storage = InMemoryStorage::new();
        let eval_id = EvalId::generate();
        let first = storage.create_evaluation(sample(eval_id.clone())).await.unwrap();
        let second = storage.create_evaluation(sample(eval_id)).await.unwrap();
        assert_eq!(first.submitted_at, second.submitted_at);
    }

    #[tokio::test]
    async fn terminal_to_non_terminal_update_is_rejected() {
        let storage = InMemoryStorage::new();
        let eval_id = EvalId::generate();
        let mut record = sample(eval_id.clone());
        record.status = EvaluationStatus::Completed;
        storage.create_evaluation(record).await.unwrap();

        let result = storage
            .update_evaluation(
                &eval_id,
                EvaluationPatch {
                    status: Some(EvaluationStatus::Running),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(StorageError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn duplicate_event_id_is_a_single_log_entry() {
        let storage = InMemoryStorage::new();
        let eval_id = EvalId::generate();
        let event = EvaluationEvent::new(eval_id.clone(), EventKind::Submitted, "evalctl-api");
        storage.append_event(event.clone()).await.unwrap();
        storage.append_event(event).await.unwrap();
        let events = storage.get_events(&eval_id, 100, 0).await.unwrap();
        assert_eq!(events.len(), 1);
    }
}

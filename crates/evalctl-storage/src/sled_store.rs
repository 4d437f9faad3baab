use async_trait::async_trait;
use chrono::Utc;
use evalctl_types::{EvalId, Evaluation, EvaluationEvent, EvaluationStatus};

use crate::error::StorageError;
use crate::event_log::is_anomaly;
use crate::service::StorageService;
use crate::types::{EvaluationPatch, ListFilter, Page, Statistics};

/// Durable single-node implementation backed by `sled`. Two trees:
/// `evaluations` (key = `eval_id`, value = JSON `Evaluation`) and `events`
/// (key = `eval_id/event_id`, value = JSON `EvaluationEvent`) so a given
/// eval's log can be range-scanned by key prefix.
pub struct SledStorage {
    evaluations: sled::Tree,
    events: sled::Tree,
}

impl SledStorage {
    pub fn open(path: &std::path::Path) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(|e| StorageError::Unavailable(e.to_string()))?;
        let evaluations = db
            .open_tree("evaluations")
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        let events = db
            .open_tree("events")
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(Self { evaluations, events })
    }

    fn load(&self, eval_id: &EvalId) -> Result<Option<Evaluation>, StorageError> {
        let Some(raw) = self
            .evaluations
            .get(eval_id.as_str())
            .map_err(|e| StorageError::Unavailable(e.to_string()))?
        else {
            return Ok(None);
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| StorageError::Unavailable(e.to_string()))
    }

    fn store(&self, record: &Evaluation) -> Result<(), StorageError> {
        let raw = serde_json::to_vec(record).map_err(|e| StorageError::Unavailable(e.to_string()))?;
        self.evaluations
            .insert(record.eval_id.as_str(), raw)
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(())
    }

    fn event_key(eval_id: &EvalId, event_id: uuid::Uuid) -> String {
        format!("{eval_id}/{event_id}")
    }
}

/// Applies a whitelisted patch to `record`, rejecting a status change away
/// from a terminal status (§4.2).
fn apply_patch(eval_id: &EvalId, mut record: Evaluation, patch: &EvaluationPatch) -> Result<Evaluation, StorageError> {
    if record.status.is_terminal() {
        if let Some(new_status) = patch.status {
            if new_status != record.status {
                return Err(StorageError::InvalidTransition {
                    eval_id: eval_id.clone(),
                    reason: format!("{} is terminal, cannot move to {new_status}", record.status),
                });
            }
        }
    }

    if let Some(status) = patch.status {
        record.status = status;
    }
    if let Some(started_at) = patch.started_at {
        record.started_at = Some(started_at);
    }
    if let Some(terminated_at) = patch.terminated_at {
        record.terminated_at = Some(terminated_at);
    }
    if let Some(exit_code) = patch.exit_code {
        record.exit_code = Some(exit_code);
    }
    if let Some(error_kind) = patch.error_kind {
        record.error_kind = Some(error_kind);
    }
    if let Some(identity) = &patch.executor_identity {
        record.executor_identity = Some(identity.clone());
    }
    if let Some(image_tag) = &patch.image_tag {
        record.image_tag = Some(image_tag.clone());
    }
    if let Some(output) = &patch.output {
        use evalctl_types::limits::{BLOB_THRESHOLD_BYTES, PREVIEW_BYTES};
        record.output_preview = Some(crate::preview::truncate_preview(output, PREVIEW_BYTES));
        if output.len() > BLOB_THRESHOLD_BYTES {
            record.output_location = Some(crate::blob::blob_key(eval_id));
        }
    }

    Ok(record)
}

#[async_trait]
impl StorageService for SledStorage {
    async fn create_evaluation(&self, record: Evaluation) -> Result<Evaluation, StorageError> {
        if let Some(existing) = self.load(&record.eval_id)? {
            return Ok(existing);
        }
        self.store(&record)?;
        Ok(record)
    }

    async fn get_evaluation(&self, eval_id: &EvalId) -> Result<Evaluation, StorageError> {
        self.load(eval_id)?.ok_or_else(|| StorageError::NotFound(eval_id.clone()))
    }

    /// Check-and-set via `sled::Tree::compare_and_swap` (§4.2 "transactional
    /// check-and-set"): read-modify-write against the tree's own CAS
    /// primitive rather than load-then-store, matching the atomicity
    /// `InMemoryStorage::update_evaluation` gets for free from
    /// `DashMap::get_mut`'s shard lock. A racing writer on the same
    /// `eval_id` (e.g. a worker's terminal update racing a projection-worker
    /// patch) loses the race and retries against the new current value
    /// instead of silently clobbering it.
    async fn update_evaluation(
        &self,
        eval_id: &EvalId,
        patch: EvaluationPatch,
    ) -> Result<Evaluation, StorageError> {
        loop {
            let current = self
                .evaluations
                .get(eval_id.as_str())
                .map_err(|e| StorageError::Unavailable(e.to_string()))?
                .ok_or_else(|| StorageError::NotFound(eval_id.clone()))?;
            let record: Evaluation =
                serde_json::from_slice(&current).map_err(|e| StorageError::Unavailable(e.to_string()))?;

            let updated = apply_patch(eval_id, record, &patch)?;
            let new_raw = serde_json::to_vec(&updated).map_err(|e| StorageError::Unavailable(e.to_string()))?;

            let swapped = self
                .evaluations
                .compare_and_swap(eval_id.as_str(), Some(current), Some(new_raw))
                .map_err(|e| StorageError::Unavailable(e.to_string()))?;
            match swapped {
                Ok(()) => return Ok(updated),
                Err(_) => continue,
            }
        }
    }

    async fn list_evaluations(
        &self,
        filter: ListFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Page<Evaluation>, StorageError> {
        let mut matching = Vec::new();
        for entry in self.evaluations.iter() {
            let (_, raw) = entry.map_err(|e| StorageError::Unavailable(e.to_string()))?;
            let record: Evaluation =
                serde_json::from_slice(&raw).map_err(|e| StorageError::Unavailable(e.to_string()))?;
            if !filter.include_deleted && record.deleted_at.is_some() {
                continue;
            }
            if let Some(status) = filter.status {
                if record.status != status {
                    continue;
                }
            }
            if let Some(language) = &filter.language {
                if &record.language != language {
                    continue;
                }
            }
            if let Some(since) = filter.since {
                if record.submitted_at < since {
                    continue;
                }
            }
            matching.push(record);
        }
        matching.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        let total = matching.len();
        let items: Vec<_> = matching.into_iter().skip(offset).take(limit).collect();
        let has_more = offset + items.len() < total;
        Ok(Page { items, has_more })
    }

    async fn append_event(&self, event: EvaluationEvent) -> Result<(), StorageError> {
        let key = Self::event_key(&event.eval_id, event.event_id);
        if self
            .events
            .get(&key)
            .map_err(|e| StorageError::Unavailable(e.to_string()))?
            .is_some()
        {
            return Ok(());
        }
        let raw = serde_json::to_vec(&event).map_err(|e| StorageError::Unavailable(e.to_string()))?;
        self.events
            .insert(key, raw)
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn get_events(
        &self,
        eval_id: &EvalId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EvaluationEvent>, StorageError> {
        let prefix = format!("{eval_id}/");
        let mut events = Vec::new();
        for entry in self.events.scan_prefix(prefix.as_bytes()) {
            let (_, raw) = entry.map_err(|e| StorageError::Unavailable(e.to_string()))?;
            events.push(
                serde_json::from_slice::<EvaluationEvent>(&raw)
                    .map_err(|e| StorageError::Unavailable(e.to_string()))?,
            );
        }
        events.sort_by(|a, b| a.at.cmp(&b.at).then_with(|| a.event_id.cmp(&b.event_id)));
        Ok(events.into_iter().skip(offset).take(limit).collect())
    }

    async fn bulk_create(&self, records: Vec<Evaluation>) -> Vec<Result<Evaluation, StorageError>> {
        let mut results = Vec::with_capacity(records.len());
        for record in records {
            results.push(self.create_evaluation(record).await);
        }
        results
    }

    async fn running_evaluations(&self) -> Result<Vec<Evaluation>, StorageError> {
        let page = self
            .list_evaluations(ListFilter::default(), usize::MAX, 0)
            .await?;
        Ok(page
            .items
            .into_iter()
            .filter(|r| {
                matches!(
                    r.status,
                    EvaluationStatus::Queued | EvaluationStatus::Provisioning | EvaluationStatus::Running
                )
            })
            .collect())
    }

    async fn statistics(&self) -> Result<Statistics, StorageError> {
        let page = self
            .list_evaluations(
                ListFilter {
                    include_deleted: true,
                    ..Default::default()
                },
                usize::MAX,
                0,
            )
            .await?;
        let mut counts = std::collections::BTreeMap::new();
        let mut throughput = 0u64;
        let mut durations = Vec::new();
        let day_ago = Utc::now() - chrono::Duration::hours(24);
        for record in &page.items {
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
        let mut record = self.load(eval_id)?.ok_or_else(|| StorageError::NotFound(eval_id.clone()))?;
        record.deleted_at = Some(Utc::now());
        self.store(&record)
    }

    async fn restore(&self, eval_id: &EvalId) -> Result<(), StorageError> {
        let mut record = self.load(eval_id)?.ok_or_else(|| StorageError::NotFound(eval_id.clone()))?;
        record.deleted_at = None;
        self.store(&record)
    }

    async fn list_anomalies(
        &self,
        eval_id: Option<&EvalId>,
        limit: usize,
        offset: usize,
    ) -> Result<Page<EvaluationEvent>, StorageError> {
        let mut matches = Vec::new();
        let prefix = eval_id.map(|id| format!("{id}/")).unwrap_or_default();
        for entry in self.events.scan_prefix(prefix.as_bytes()) {
            let (_, raw) = entry.map_err(|e| StorageError::Unavailable(e.to_string()))?;
            let event: EvaluationEvent =
                serde_json::from_slice(&raw).map_err(|e| StorageError::Unavailable(e.to_string()))?;
            if is_anomaly(&event) {
                matches.push(event);
            }
        }
        matches.sort_by(|a, b| a.at.cmp(&b.at));
        let total = matches.len();
        let items: Vec<_> = matches.into_iter().skip(offset).take(limit).collect();
        let has_more = offset + items.len() < total;
        Ok(Page { items, has_more })
    }
}

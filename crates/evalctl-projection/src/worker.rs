use std::sync::Arc;

use evalctl_eventbus::EventBus;
use evalctl_statemachine::Outcome;
use evalctl_storage::{EvaluationPatch, StorageError, StorageService};
use evalctl_types::{
    channels, ErrorKind, Evaluation, EvaluationEvent, EvaluationStatus, EventKind, Language, Priority, Resources,
};
use futures::stream::StreamExt;
use tracing::{info, warn};

/// Durable read-model builder (C5, §4.8). Subscribes to every
/// `evaluation:*` channel and folds each event into the storage record via
/// C9's precedence rule, so clients never read dispatcher memory directly.
pub struct ProjectionWorker<S> {
    event_bus: Arc<dyn EventBus>,
    storage: Arc<S>,
}

impl<S: StorageService + 'static> ProjectionWorker<S> {
    pub fn new(event_bus: Arc<dyn EventBus>, storage: Arc<S>) -> Self {
        Self { event_bus, storage }
    }

    /// Subscribes to all channels and processes events until a subscribe
    /// call fails; callers typically run this inside a restart loop.
    pub async fn run(&self) -> Result<(), StorageError> {
        let mut streams = Vec::with_capacity(channels::ALL_CHANNELS.len());
        for channel in channels::ALL_CHANNELS {
            match self.event_bus.subscribe(channel).await {
                Ok(stream) => streams.push(stream),
                Err(err) => warn!(channel, error = %err, "failed to subscribe, skipping channel"),
            }
        }
        let mut merged = futures::stream::select_all(streams);

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("shutdown signal received, stopping projection loop");
                    break;
                }
                next = merged.next() => {
                    match next {
                        Some(event) => {
                            if let Err(err) = self.apply(event).await {
                                warn!(error = %err, "failed to apply event to the read model");
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        Ok(())
    }

    /// The per-event fold described by §4.8: load (creating on
    /// `submitted` if absent), compute the next state via C9, patch on
    /// acceptance or flag the anomaly and stop.
    async fn apply(&self, event: EvaluationEvent) -> Result<(), StorageError> {
        let current = match self.storage.get_evaluation(&event.eval_id).await {
            Ok(record) => Some(record),
            Err(StorageError::NotFound(_)) => None,
            Err(other) => return Err(other),
        };

        let current = match current {
            Some(record) => record,
            None if event.kind == EventKind::Submitted => {
                let record = minimal_record_from_submission(&event);
                self.storage.create_evaluation(record).await?
            }
            None => {
                // Any other kind arriving before `submitted` is itself an
                // anomaly (ordering violation worse than a stale/duplicate
                // transition) — log it against a synthetic record-less
                // entry and stop; there is nothing to patch yet.
                let mut anomaly = event.clone();
                evalctl_storage::event_log::mark_anomaly(&mut anomaly);
                self.storage.append_event(anomaly).await?;
                return Ok(());
            }
        };

        let outcome = evalctl_statemachine::next(current.status, event.kind);

        let mut to_append = event.clone();
        if outcome.is_anomaly() {
            evalctl_storage::event_log::mark_anomaly(&mut to_append);
        }

        match outcome {
            Outcome::Noop(_) | Outcome::Conflict(_) => {
                self.storage.append_event(to_append).await?;
            }
            Outcome::Transitioned { new_status, .. } => {
                let patch = patch_for(new_status, &event);
                self.storage.update_evaluation(&event.eval_id, patch).await?;
                self.storage.append_event(to_append).await?;
                info!(eval_id = %event.eval_id, status = %new_status, "projected transition");
            }
        }
        Ok(())
    }
}

fn patch_for(new_status: EvaluationStatus, event: &EvaluationEvent) -> EvaluationPatch {
    let mut patch = EvaluationPatch {
        status: Some(new_status),
        ..Default::default()
    };

    match event.kind {
        EventKind::Running => patch.started_at = Some(event.at),
        EventKind::Completed | EventKind::Failed => {
            patch.terminated_at = Some(event.at);
            patch.exit_code = event.payload.get("exit_code").and_then(|v| v.as_i64()).map(|v| v as i32);
            if let Some(stdout) = event.payload.get("stdout").and_then(|v| v.as_str()) {
                patch.output = Some(stdout.as_bytes().to_vec());
            }
            if event.kind == EventKind::Failed {
                patch.error_kind = Some(ErrorKind::ExecutionFailed);
            }
        }
        EventKind::Timeout => {
            patch.terminated_at = Some(event.at);
            patch.error_kind = Some(ErrorKind::ExecutionTimeout);
        }
        EventKind::Cancelled => {
            patch.terminated_at = Some(event.at);
            patch.error_kind = Some(ErrorKind::Cancelled);
        }
        _ => {}
    }
    patch
}

/// Best-effort reconstruction for the rare path where a `submitted` event
/// arrives without a prior `CreateEvaluation` call (§4.8 "create if event is
/// submitted"). The normal path has C8 create the record directly; this
/// exists so replay/redelivery from a cold projection converges too.
fn minimal_record_from_submission(event: &EvaluationEvent) -> Evaluation {
    let code = event.payload.get("code").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    let language = event
        .payload
        .get("language")
        .and_then(|v| v.as_str())
        .map(Language::from)
        .unwrap_or(Language::Python);
    let timeout_seconds = event
        .payload
        .get("timeout_seconds")
        .and_then(|v| v.as_u64())
        .map(|v| v as u32)
        .unwrap_or(evalctl_types::limits::DEFAULT_TIMEOUT_SECONDS);
    let priority = event
        .payload
        .get("priority")
        .and_then(|v| v.as_str())
        .map(|p| match p {
            "high" => Priority::High,
            "low" => Priority::Low,
            _ => Priority::Normal,
        })
        .unwrap_or_default();

    Evaluation {
        eval_id: event.eval_id.clone(),
        code,
        language,
        image_tag: None,
        timeout_seconds,
        priority,
        resources: Resources::DEFAULT_LIMIT,
        status: EvaluationStatus::Submitted,
        submitted_at: event.at,
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

#[cfg(test)]
mod tests {
    use evalctl_eventbus::InMemoryEventBus;
    use evalctl_storage::InMemoryStorage;
    use evalctl_types::EvalId;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn submitted_event_creates_a_minimal_record_when_absent() {
        let bus = Arc::new(InMemoryEventBus::new());
        let storage = Arc::new(InMemoryStorage::new());
        let worker = ProjectionWorker::new(bus, storage.clone());

        let eval_id = EvalId::generate();
        let event = EvaluationEvent::new(eval_id.clone(), EventKind::Submitted, "evalctl-api")
            .with_payload(json!({ "code": "print(1)", "language": "python", "timeout_seconds": 30 }));
        worker.apply(event).await.unwrap();

        let record = storage.get_evaluation(&eval_id).await.unwrap();
        assert_eq!(record.status, EvaluationStatus::Submitted);
        assert_eq!(record.code, "print(1)");
    }

    #[tokio::test]
    async fn out_of_order_completed_then_running_lands_on_completed_with_anomaly() {
        let bus = Arc::new(InMemoryEventBus::new());
        let storage = Arc::new(InMemoryStorage::new());
        let worker = ProjectionWorker::new(bus, storage.clone());

        let eval_id = EvalId::generate();
        worker
            .apply(
                EvaluationEvent::new(eval_id.clone(), EventKind::Submitted, "evalctl-api")
                    .with_payload(json!({ "code": "x", "language": "python" })),
            )
            .await
            .unwrap();
        worker
            .apply(
                EvaluationEvent::new(eval_id.clone(), EventKind::Completed, "evalctl-dispatcher")
                    .with_payload(json!({ "exit_code": 0 })),
            )
            .await
            .unwrap();
        worker
            .apply(EvaluationEvent::new(eval_id.clone(), EventKind::Running, "evalctl-dispatcher"))
            .await
            .unwrap();

        let record = storage.get_evaluation(&eval_id).await.unwrap();
        assert_eq!(record.status, EvaluationStatus::Completed);

        let anomalies = storage.list_anomalies(Some(&eval_id), 10, 0).await.unwrap();
        assert_eq!(anomalies.items.len(), 1);
        assert_eq!(anomalies.items[0].kind, EventKind::Running);
    }
}

use std::sync::Arc;
use std::time::Duration;

use evalctl_dispatcher::{Dispatcher, ExecuteRequest, WorkloadState};
use evalctl_eventbus::EventBus;
use evalctl_queue::{Claim, TaskQueue};
use evalctl_storage::{EvaluationPatch, StorageService};
use evalctl_types::{ErrorKind, EvaluationEvent, EvaluationStatus, EventKind};
use serde_json::json;
use tracing::{info, warn};

use crate::metrics::Metrics;

const PRODUCER: &str = "evalctl-worker";
const POLL_INTERVAL: Duration = Duration::from_secs(10);
const POLL_OVERRUN_SLACK_SECONDS: u64 = 60;
const CLAIM_IDLE_BACKOFF: Duration = Duration::from_millis(500);

/// Evaluation task worker (C7, §4.7): dequeues claims, drives them through
/// the dispatcher, and converges storage + the event log on the terminal
/// outcome. Every state-changing call is keyed by `eval_id` + transition so
/// broker redelivery leaves the system in the same place (§4.7
/// "Idempotency").
pub struct EvaluationWorker<Q, S> {
    queue: Arc<Q>,
    dispatcher: Arc<dyn Dispatcher>,
    storage: Arc<S>,
    event_bus: Arc<dyn EventBus>,
    pub metrics: Metrics,
}

impl<Q: TaskQueue + 'static, S: StorageService + 'static> EvaluationWorker<Q, S> {
    pub fn new(queue: Arc<Q>, dispatcher: Arc<dyn Dispatcher>, storage: Arc<S>, event_bus: Arc<dyn EventBus>) -> Self {
        Self {
            queue,
            dispatcher,
            storage,
            event_bus,
            metrics: Metrics::new(),
        }
    }

    /// Runs until SIGINT, claiming one task at a time. A real deployment
    /// runs several of these concurrently; each claim is independent. On
    /// shutdown, the loop stops claiming new work but lets an in-flight
    /// `process` finish rather than aborting it mid-evaluation.
    pub async fn run(&self) {
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("shutdown signal received, no longer claiming new work");
                    break;
                }
                claimed = self.queue.claim() => {
                    match claimed {
                        Ok(Some(claim)) => self.process(claim).await,
                        Ok(None) => tokio::time::sleep(CLAIM_IDLE_BACKOFF).await,
                        Err(err) => {
                            warn!(error = %err, "claim failed, backing off");
                            tokio::time::sleep(CLAIM_IDLE_BACKOFF).await;
                        }
                    }
                }
            }
        }
    }

    async fn process(&self, claim: Claim) {
        let eval_id = claim.item.eval_id.clone();

        self.publish(&eval_id, EventKind::Provisioning, serde_json::Value::Null).await;
        let _ = self
            .storage
            .update_evaluation(
                &eval_id,
                EvaluationPatch {
                    status: Some(EvaluationStatus::Provisioning),
                    ..Default::default()
                },
            )
            .await;

        if self.is_revoked(&eval_id).await {
            self.cancel(&eval_id, claim.delivery_id).await;
            return;
        }

        let timeout_seconds = claim
            .item
            .payload_ref
            .get("timeout_seconds")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .unwrap_or(evalctl_types::limits::DEFAULT_TIMEOUT_SECONDS);

        let request = ExecuteRequest {
            eval_id: eval_id.clone(),
            code: claim.item.payload_ref.get("code").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            language: claim
                .item
                .payload_ref
                .get("language")
                .and_then(|v| v.as_str())
                .map(evalctl_types::Language::from)
                .unwrap_or(evalctl_types::Language::Python),
            timeout_seconds,
            resources: evalctl_types::Resources::DEFAULT_LIMIT,
            priority: claim.item.priority,
        };

        match self.dispatcher.execute(request).await {
            Ok(_ack) => {}
            Err(err) if err.kind().is_retryable() => {
                warn!(eval_id = %eval_id, error = %err, "execute failed, nacking for retry");
                let _ = self.queue.nack(claim.delivery_id, err.kind()).await;
                return;
            }
            Err(err) => {
                warn!(eval_id = %eval_id, error = %err, "execute failed terminally");
                self.publish(&eval_id, EventKind::Failed, json!({ "error_kind": err.kind() })).await;
                let _ = self
                    .storage
                    .update_evaluation(
                        &eval_id,
                        EvaluationPatch {
                            status: Some(EvaluationStatus::Failed),
                            terminated_at: Some(chrono::Utc::now()),
                            error_kind: Some(err.kind()),
                            ..Default::default()
                        },
                    )
                    .await;
                let _ = self.queue.ack(claim.delivery_id).await;
                self.metrics.record_terminal(EvaluationStatus::Failed);
                return;
            }
        }

        self.poll_to_terminal(&eval_id, claim.delivery_id, timeout_seconds).await;
    }

    /// §4.7 step 3: poll the dispatcher at a 10 s cadence, bounded by
    /// `timeout_seconds + 60 s`. Step 5: check for revocation before the
    /// first poll and between every subsequent one.
    async fn poll_to_terminal(&self, eval_id: &evalctl_types::EvalId, delivery_id: uuid::Uuid, timeout_seconds: u32) {
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(u64::from(timeout_seconds) + POLL_OVERRUN_SLACK_SECONDS);

        loop {
            if self.is_revoked(eval_id).await {
                self.cancel(eval_id, delivery_id).await;
                return;
            }

            if tokio::time::Instant::now() >= deadline {
                self.publish(eval_id, EventKind::Timeout, serde_json::Value::Null).await;
                let _ = self
                    .storage
                    .update_evaluation(
                        eval_id,
                        EvaluationPatch {
                            status: Some(EvaluationStatus::Timeout),
                            terminated_at: Some(chrono::Utc::now()),
                            error_kind: Some(ErrorKind::ExecutionTimeout),
                            ..Default::default()
                        },
                    )
                    .await;
                let _ = self.queue.ack(delivery_id).await;
                self.metrics.record_terminal(EvaluationStatus::Timeout);
                return;
            }

            match self.dispatcher.poll_state(eval_id).await {
                Some(state) if state.is_terminal() => {
                    self.finish(eval_id, delivery_id, state).await;
                    return;
                }
                _ => tokio::time::sleep(POLL_INTERVAL).await,
            }
        }
    }

    async fn finish(&self, eval_id: &evalctl_types::EvalId, delivery_id: uuid::Uuid, state: WorkloadState) {
        let (status, kind, exit_code, output, error_kind) = match state {
            WorkloadState::CompletedSuccess { exit_code, stdout, .. } => {
                (EvaluationStatus::Completed, EventKind::Completed, Some(exit_code), stdout, None)
            }
            WorkloadState::CompletedFailure { exit_code, stdout, .. } => {
                (EvaluationStatus::Failed, EventKind::Failed, Some(exit_code), stdout, Some(ErrorKind::ExecutionFailed))
            }
            WorkloadState::TimedOut => (EvaluationStatus::Timeout, EventKind::Timeout, None, None, Some(ErrorKind::ExecutionTimeout)),
            WorkloadState::CancelledExternally => (EvaluationStatus::Cancelled, EventKind::Cancelled, None, None, Some(ErrorKind::Cancelled)),
            WorkloadState::Provisioning | WorkloadState::Running => unreachable!("caller guarantees a terminal state"),
        };

        let _ = self
            .storage
            .update_evaluation(
                eval_id,
                EvaluationPatch {
                    status: Some(status),
                    terminated_at: Some(chrono::Utc::now()),
                    exit_code,
                    output: output.map(|s| s.into_bytes()),
                    error_kind,
                    ..Default::default()
                },
            )
            .await;
        self.publish(eval_id, kind, json!({ "exit_code": exit_code })).await;
        let _ = self.queue.ack(delivery_id).await;
        self.metrics.record_terminal(status);
        info!(eval_id = %eval_id, status = %status, "evaluation reached a terminal state");
    }

    async fn cancel(&self, eval_id: &evalctl_types::EvalId, delivery_id: uuid::Uuid) {
        let _ = self.dispatcher.cancel(eval_id).await;
        self.publish(eval_id, EventKind::Cancelled, serde_json::Value::Null).await;
        let _ = self
            .storage
            .update_evaluation(
                eval_id,
                EvaluationPatch {
                    status: Some(EvaluationStatus::Cancelled),
                    terminated_at: Some(chrono::Utc::now()),
                    error_kind: Some(ErrorKind::Cancelled),
                    ..Default::default()
                },
            )
            .await;
        let _ = self.queue.ack(delivery_id).await;
        self.metrics.record_terminal(EvaluationStatus::Cancelled);
    }

    async fn is_revoked(&self, eval_id: &evalctl_types::EvalId) -> bool {
        self.queue.is_revoked(eval_id).await.unwrap_or(false)
    }

    async fn publish(&self, eval_id: &evalctl_types::EvalId, kind: EventKind, payload: serde_json::Value) {
        let event = EvaluationEvent::new(eval_id.clone(), kind, PRODUCER).with_payload(payload);
        if let Err(err) = self.event_bus.publish(event).await {
            warn!(eval_id = %eval_id, error = %err, "failed to publish worker event");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use dashmap::DashMap;
    use evalctl_dispatcher::{DispatchError, ExecuteAck};
    use evalctl_eventbus::InMemoryEventBus;
    use evalctl_queue::InMemoryQueue;
    use evalctl_storage::InMemoryStorage;
    use evalctl_types::{EvalId, Evaluation, EvaluationStatus, Language, Priority};

    use super::*;

    /// Drives [`WorkloadState`] by hand so a test can script the exact
    /// sequence a real dispatcher would observe asynchronously.
    struct FakeDispatcher {
        states: DashMap<EvalId, WorkloadState>,
        fail_execute: Mutex<Option<DispatchError>>,
        cancelled: DashMap<EvalId, ()>,
    }

    impl FakeDispatcher {
        fn new() -> Self {
            Self {
                states: DashMap::new(),
                fail_execute: Mutex::new(None),
                cancelled: DashMap::new(),
            }
        }

        fn set_state(&self, eval_id: &EvalId, state: WorkloadState) {
            self.states.insert(eval_id.clone(), state);
        }
    }

    #[async_trait::async_trait]
    impl Dispatcher for FakeDispatcher {
        async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteAck, DispatchError> {
            if let Some(err) = self.fail_execute.lock().unwrap().take() {
                return Err(err);
            }
            // Tests pre-seed the terminal state they want observed; don't
            // clobber it the way a real dispatcher's fresh Job would.
            self.states.entry(request.eval_id.clone()).or_insert(WorkloadState::Running);
            Ok(ExecuteAck {
                eval_id: request.eval_id,
                sandbox_fallback_used: false,
                network_policy_enforced: true,
            })
        }

        async fn poll_state(&self, eval_id: &EvalId) -> Option<WorkloadState> {
            self.states.get(eval_id).map(|entry| entry.value().clone())
        }

        async fn cancel(&self, eval_id: &EvalId) -> Result<(), DispatchError> {
            self.cancelled.insert(eval_id.clone(), ());
            self.states.insert(eval_id.clone(), WorkloadState::CancelledExternally);
            Ok(())
        }

        async fn is_ready(&self) -> bool {
            true
        }
    }

    fn seed_record(eval_id: &EvalId) -> Evaluation {
        Evaluation {
            eval_id: eval_id.clone(),
            code: "print(1)".into(),
            language: Language::Python,
            image_tag: None,
            timeout_seconds: 30,
            priority: Priority::Normal,
            resources: evalctl_types::Resources::DEFAULT_LIMIT,
            status: EvaluationStatus::Queued,
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

    async fn enqueue(queue: &InMemoryQueue, eval_id: &EvalId) {
        queue
            .enqueue(evalctl_queue::QueueItem::new(
                eval_id.clone(),
                Priority::Normal,
                serde_json::json!({ "code": "print(1)", "language": "python", "timeout_seconds": 30 }),
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn successful_run_patches_storage_to_completed_and_acks() {
        let eval_id = EvalId::generate();
        let storage = Arc::new(InMemoryStorage::new());
        storage.create_evaluation(seed_record(&eval_id)).await.unwrap();

        let queue = Arc::new(InMemoryQueue::new());
        enqueue(&queue, &eval_id).await;

        let dispatcher = Arc::new(FakeDispatcher::new());
        dispatcher.set_state(
            &eval_id,
            WorkloadState::CompletedSuccess {
                exit_code: 0,
                stdout: Some("1\n".into()),
                stderr: None,
            },
        );

        let event_bus: Arc<dyn EventBus> = Arc::new(InMemoryEventBus::new());
        let worker = EvaluationWorker::new(queue.clone(), dispatcher.clone(), storage.clone(), event_bus);

        let claim = queue.claim().await.unwrap().unwrap();
        worker.process(claim).await;

        let record = storage.get_evaluation(&eval_id).await.unwrap();
        assert_eq!(record.status, EvaluationStatus::Completed);
        assert_eq!(record.exit_code, Some(0));
        assert!(record.terminated_at.is_some());
        assert!(queue.dead_letters().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_retryable_execute_failure_marks_failed_without_touching_dispatcher_state() {
        let eval_id = EvalId::generate();
        let storage = Arc::new(InMemoryStorage::new());
        storage.create_evaluation(seed_record(&eval_id)).await.unwrap();

        let queue = Arc::new(InMemoryQueue::new());
        enqueue(&queue, &eval_id).await;

        let dispatcher = Arc::new(FakeDispatcher::new());
        *dispatcher.fail_execute.lock().unwrap() = Some(DispatchError::InvalidRequest("bad code".into()));

        let event_bus: Arc<dyn EventBus> = Arc::new(InMemoryEventBus::new());
        let worker = EvaluationWorker::new(queue.clone(), dispatcher.clone(), storage.clone(), event_bus);

        let claim = queue.claim().await.unwrap().unwrap();
        worker.process(claim).await;

        let record = storage.get_evaluation(&eval_id).await.unwrap();
        assert_eq!(record.status, EvaluationStatus::Failed);
        assert_eq!(record.error_kind, Some(ErrorKind::InvalidRequest));
    }

    #[tokio::test]
    async fn revoked_task_is_cancelled_instead_of_dispatched() {
        let eval_id = EvalId::generate();
        let storage = Arc::new(InMemoryStorage::new());
        storage.create_evaluation(seed_record(&eval_id)).await.unwrap();

        let queue = Arc::new(InMemoryQueue::new());
        enqueue(&queue, &eval_id).await;

        let dispatcher = Arc::new(FakeDispatcher::new());
        let event_bus: Arc<dyn EventBus> = Arc::new(InMemoryEventBus::new());
        let worker = EvaluationWorker::new(queue.clone(), dispatcher.clone(), storage.clone(), event_bus);

        // Claim before revoking: a revoke against an unclaimed item removes
        // it outright rather than marking it, so the in-flight claim is
        // what `is_revoked` needs to see.
        let claim = queue.claim().await.unwrap().unwrap();
        queue.revoke(&eval_id).await.unwrap();
        worker.process(claim).await;

        assert!(dispatcher.cancelled.contains_key(&eval_id));
        let record = storage.get_evaluation(&eval_id).await.unwrap();
        assert_eq!(record.status, EvaluationStatus::Cancelled);
    }
}

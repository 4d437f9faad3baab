use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use serde_json::json;
use tracing::{info, warn};

use async_trait::async_trait;
use evalctl_types::{EvalId, EventKind};

use crate::client::ResilientClusterClient;
use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;
use crate::image::ImageCache;
use crate::types::{ExecuteAck, ExecuteRequest, WorkloadState};
use crate::workload::{self, EVAL_ID_LABEL};

const PRODUCER: &str = "evalctl-dispatcher";
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const LOG_RETRY_ATTEMPTS: u32 = 3;
const LOG_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Kubernetes-backed [`Dispatcher`]. One Job per evaluation, a background
/// task per `execute` call polls Job/Pod status and publishes the
/// corresponding lifecycle event (§4.6 "Watch loop").
pub struct KubeDispatcher {
    cluster: ResilientClusterClient,
    namespace: String,
    image_prefix_cache: Arc<ImageCache>,
    event_bus: Arc<dyn evalctl_eventbus::EventBus>,
    states: Arc<DashMap<EvalId, WorkloadState>>,
    allow_sandbox_fallback: bool,
}

impl KubeDispatcher {
    pub fn new(
        namespace: impl Into<String>,
        image_prefix: impl Into<String>,
        event_bus: Arc<dyn evalctl_eventbus::EventBus>,
        allow_sandbox_fallback: bool,
    ) -> Self {
        Self {
            cluster: ResilientClusterClient::spawn(Duration::from_secs(5)),
            namespace: namespace.into(),
            image_prefix_cache: Arc::new(ImageCache::new(image_prefix)),
            event_bus,
            states: Arc::new(DashMap::new()),
            allow_sandbox_fallback,
        }
    }

    /// Spawns the periodic image-tag refresh (§4.6 "on startup and on a
    /// periodic refresh"). Safe to call once after construction.
    pub fn start_image_refresh(&self, interval: Duration) {
        let cluster = self.cluster.clone();
        let cache = self.image_prefix_cache.clone();
        tokio::spawn(async move {
            loop {
                if let Some(client) = cluster.get() {
                    if let Err(err) = cache.refresh(client).await {
                        warn!(error = %err, "image cache refresh failed");
                    }
                }
                tokio::time::sleep(interval).await;
            }
        });
    }

    /// Watches a single Job/Pod to completion, updating `states` and
    /// publishing events as they occur (§4.6 "Watch loop"). Runs as its
    /// own task so `execute` can return immediately.
    async fn watch(
        client: kube::Client,
        namespace: String,
        eval_id: EvalId,
        timeout_seconds: u32,
        states: Arc<DashMap<EvalId, WorkloadState>>,
        event_bus: Arc<dyn evalctl_eventbus::EventBus>,
    ) {
        let jobs: Api<Job> = Api::namespaced(client.clone(), &namespace);
        let pods: Api<Pod> = Api::namespaced(client, &namespace);
        let job_name = format!("evalctl-eval-{}", eval_id.as_str().to_lowercase());
        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_seconds as u64 + 60);

        let mut announced_running = false;

        loop {
            if tokio::time::Instant::now() >= deadline {
                states.insert(eval_id.clone(), WorkloadState::TimedOut);
                let event = evalctl_types::EvaluationEvent::new(eval_id.clone(), EventKind::Timeout, PRODUCER);
                let _ = event_bus.publish(event).await;
                return;
            }

            let job = match jobs.get(&job_name).await {
                Ok(job) => job,
                Err(kube::Error::Api(resp)) if resp.code == 404 => {
                    states.insert(eval_id.clone(), WorkloadState::CancelledExternally);
                    let event = evalctl_types::EvaluationEvent::new(eval_id.clone(), EventKind::Cancelled, PRODUCER);
                    let _ = event_bus.publish(event).await;
                    return;
                }
                Err(err) => {
                    warn!(eval_id = %eval_id, error = %err, "job status poll failed, will retry");
                    tokio::time::sleep(POLL_INTERVAL).await;
                    continue;
                }
            };

            let status = job.status.unwrap_or_default();

            if !announced_running && status.active.unwrap_or(0) > 0 {
                announced_running = true;
                states.insert(eval_id.clone(), WorkloadState::Running);
                let event = evalctl_types::EvaluationEvent::new(eval_id.clone(), EventKind::Running, PRODUCER);
                let _ = event_bus.publish(event).await;
            }

            if status.succeeded.unwrap_or(0) > 0 {
                let (stdout, stderr) = fetch_logs(&pods, &eval_id).await;
                states.insert(
                    eval_id.clone(),
                    WorkloadState::CompletedSuccess {
                        exit_code: 0,
                        stdout: stdout.clone(),
                        stderr: stderr.clone(),
                    },
                );
                let event = evalctl_types::EvaluationEvent::new(eval_id.clone(), EventKind::Completed, PRODUCER)
                    .with_payload(json!({ "exit_code": 0, "stdout": stdout, "stderr": stderr }));
                let _ = event_bus.publish(event).await;
                return;
            }

            if status.failed.unwrap_or(0) > 0 {
                let (stdout, stderr) = fetch_logs(&pods, &eval_id).await;
                let exit_code = exit_code_from_pods(&pods, &eval_id).await.unwrap_or(1);
                states.insert(
                    eval_id.clone(),
                    WorkloadState::CompletedFailure {
                        exit_code,
                        stdout: stdout.clone(),
                        stderr: stderr.clone(),
                    },
                );
                let event = evalctl_types::EvaluationEvent::new(eval_id.clone(), EventKind::Failed, PRODUCER)
                    .with_payload(json!({ "exit_code": exit_code, "stdout": stdout, "stderr": stderr }));
                let _ = event_bus.publish(event).await;
                return;
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// Retries briefly because a fast-exiting workload's logs may still be
/// flushing when the watch fires (§4.6 "Log capture for fast-exiting
/// workloads"). Empty output is surfaced as `None`, not `Some("")`, so the
/// distinction between "no output" and "output not captured" survives.
async fn fetch_logs(pods: &Api<Pod>, eval_id: &EvalId) -> (Option<String>, Option<String>) {
    let selector = format!("{EVAL_ID_LABEL}={}", eval_id.as_str());
    for attempt in 0..LOG_RETRY_ATTEMPTS {
        let list = pods.list(&ListParams::default().labels(&selector)).await;
        if let Ok(list) = list {
            if let Some(pod) = list.items.into_iter().next() {
                let name = pod.metadata.name.clone().unwrap_or_default();
                let stdout = pods.logs(&name, &LogParams::default()).await.ok();
                let stderr = None; // container stdout/stderr are interleaved in a single stream here
                let stdout = stdout.filter(|s| !s.is_empty());
                return (stdout, stderr);
            }
        }
        if attempt + 1 < LOG_RETRY_ATTEMPTS {
            tokio::time::sleep(LOG_RETRY_DELAY).await;
        }
    }
    (None, None)
}

async fn exit_code_from_pods(pods: &Api<Pod>, eval_id: &EvalId) -> Option<i32> {
    let selector = format!("{EVAL_ID_LABEL}={}", eval_id.as_str());
    let list = pods.list(&ListParams::default().labels(&selector)).await.ok()?;
    let pod = list.items.into_iter().next()?;
    let statuses = pod.status?.container_statuses?;
    let terminated = statuses.into_iter().find_map(|cs| cs.state?.terminated)?;
    Some(terminated.exit_code)
}

#[async_trait]
impl Dispatcher for KubeDispatcher {
    async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteAck, DispatchError> {
        let client = self
            .cluster
            .get()
            .ok_or_else(|| DispatchError::ClusterUnavailable("no cluster client available".into()))?;

        let image = self
            .image_prefix_cache
            .resolve(&request.language)
            .ok_or(DispatchError::NoImage)?;

        let jobs: Api<Job> = Api::namespaced(client.clone(), &self.namespace);
        let network_policies: Api<k8s_openapi::api::networking::v1::NetworkPolicy> =
            Api::namespaced(client.clone(), &self.namespace);

        let mut job = workload::build_job(
            &request.eval_id,
            &image,
            &request.code,
            request.timeout_seconds,
            request.priority,
            request.resources,
        );

        let mut sandbox_fallback_used = false;
        if let Err(err) = jobs.create(&PostParams::default(), &job).await {
            // Only a missing sandbox `RuntimeClass` is eligible for fallback;
            // quota/forbidden/cluster-unavailable errors must surface as-is
            // even when fallback is allowed, since retrying without the
            // sandbox wouldn't fix any of those.
            let is_missing_runtime_class = err.to_string().contains("RuntimeClass");
            if !self.allow_sandbox_fallback || !is_missing_runtime_class {
                return Err(err.into());
            }
            workload::strip_sandbox_runtime_class(&mut job);
            sandbox_fallback_used = true;
            jobs.create(&PostParams::default(), &job).await?;
            info!(eval_id = %request.eval_id, "created without sandboxed runtime class (fallback)");
        }

        let policy = workload::build_default_deny_network_policy(&request.eval_id);
        let network_policy_enforced = network_policies.create(&PostParams::default(), &policy).await.is_ok();

        self.states.insert(request.eval_id.clone(), WorkloadState::Provisioning);

        tokio::spawn(Self::watch(
            client,
            self.namespace.clone(),
            request.eval_id.clone(),
            request.timeout_seconds,
            self.states.clone(),
            self.event_bus.clone(),
        ));

        Ok(ExecuteAck {
            eval_id: request.eval_id,
            sandbox_fallback_used,
            network_policy_enforced,
        })
    }

    async fn poll_state(&self, eval_id: &EvalId) -> Option<WorkloadState> {
        self.states.get(eval_id).map(|entry| entry.value().clone())
    }

    async fn cancel(&self, eval_id: &EvalId) -> Result<(), DispatchError> {
        let client = self
            .cluster
            .get()
            .ok_or_else(|| DispatchError::ClusterUnavailable("no cluster client available".into()))?;
        let jobs: Api<Job> = Api::namespaced(client, &self.namespace);
        let job_name = format!("evalctl-eval-{}", eval_id.as_str().to_lowercase());
        match jobs.delete(&job_name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn is_ready(&self) -> bool {
        self.cluster.is_ready()
    }
}

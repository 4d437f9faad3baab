use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, PodSecurityContext, PodSpec, PodTemplateSpec, ResourceRequirements, SecurityContext,
};
use k8s_openapi::api::networking::v1::{NetworkPolicy, NetworkPolicySpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use evalctl_types::{EvalId, Priority, Resources};

/// TTL applied to a finished Job so its logs remain fetchable for a short
/// window after completion (§4.6: "TTL after completion (5 min)").
const JOB_TTL_SECONDS: i32 = 300;
const TERMINATION_GRACE_SECONDS: i64 = 1;

pub const EVAL_ID_LABEL: &str = "eval-id";
pub const PRIORITY_LABEL: &str = "priority";

fn job_name(eval_id: &EvalId) -> String {
    format!("evalctl-eval-{}", eval_id.as_str().to_lowercase())
}

fn priority_label(priority: Priority) -> &'static str {
    match priority {
        Priority::Low => "low",
        Priority::Normal => "normal",
        Priority::High => "high",
    }
}

fn resource_requirements(request: Resources, limit: Resources) -> ResourceRequirements {
    let mut requests = BTreeMap::new();
    requests.insert("cpu".to_string(), Quantity(format!("{}m", request.cpu_millicores)));
    requests.insert("memory".to_string(), Quantity(format!("{}Mi", request.memory_mib)));
    let mut limits = BTreeMap::new();
    limits.insert("cpu".to_string(), Quantity(format!("{}m", limit.cpu_millicores)));
    limits.insert("memory".to_string(), Quantity(format!("{}Mi", limit.memory_mib)));
    ResourceRequirements {
        requests: Some(requests),
        limits: Some(limits),
        ..Default::default()
    }
}

/// Builds the one-shot workload for an evaluation (§4.6 "Workload
/// specification"): non-root, read-only root filesystem, all capabilities
/// dropped, no privilege escalation, `restartPolicy=Never`, a prompt
/// `terminationGracePeriodSeconds` so deadlines bite quickly.
pub fn build_job(
    eval_id: &EvalId,
    image: &str,
    code: &str,
    timeout_seconds: u32,
    priority: Priority,
    limit: Resources,
) -> Job {
    let mut labels = BTreeMap::new();
    labels.insert(EVAL_ID_LABEL.to_string(), eval_id.as_str().to_string());
    labels.insert(PRIORITY_LABEL.to_string(), priority_label(priority).to_string());

    let security_context = SecurityContext {
        run_as_non_root: Some(true),
        read_only_root_filesystem: Some(true),
        allow_privilege_escalation: Some(false),
        capabilities: Some(k8s_openapi::api::core::v1::Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            add: None,
        }),
        ..Default::default()
    };

    let container = Container {
        name: "eval".to_string(),
        image: Some(image.to_string()),
        env: Some(vec![EnvVar {
            name: "EVALCTL_CODE".to_string(),
            value: Some(code.to_string()),
            ..Default::default()
        }]),
        resources: Some(resource_requirements(Resources::REQUEST_FLOOR, limit)),
        security_context: Some(security_context),
        ..Default::default()
    };

    let pod_spec = PodSpec {
        containers: vec![container],
        restart_policy: Some("Never".to_string()),
        active_deadline_seconds: Some(timeout_seconds as i64),
        termination_grace_period_seconds: Some(TERMINATION_GRACE_SECONDS),
        security_context: Some(PodSecurityContext {
            run_as_non_root: Some(true),
            ..Default::default()
        }),
        // Sandboxed runtime class (gVisor/Kata or equivalent). The cluster
        // may not register this RuntimeClass; `allow_sandbox_fallback`
        // decides whether the dispatcher drops this field and proceeds.
        runtime_class_name: Some("sandboxed".to_string()),
        ..Default::default()
    };

    Job {
        metadata: ObjectMeta {
            name: Some(job_name(eval_id)),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            ttl_seconds_after_finished: Some(JOB_TTL_SECONDS),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// Drop the sandboxed runtime class from an already-built job, used when
/// the cluster doesn't offer one and `allow_sandbox_fallback` permits it
/// (§4.6: "this fallback is logged and returned in the response metadata").
pub fn strip_sandbox_runtime_class(job: &mut Job) {
    if let Some(spec) = job.spec.as_mut() {
        if let Some(pod_spec) = spec.template.spec.as_mut() {
            pod_spec.runtime_class_name = None;
        }
    }
}

/// Default-deny ingress/egress NetworkPolicy applied alongside the Job
/// (§4.6: "A default-deny NetworkPolicy is applied to the evaluation pod").
pub fn build_default_deny_network_policy(eval_id: &EvalId) -> NetworkPolicy {
    let mut selector_labels = BTreeMap::new();
    selector_labels.insert(EVAL_ID_LABEL.to_string(), eval_id.as_str().to_string());

    NetworkPolicy {
        metadata: ObjectMeta {
            name: Some(format!("{}-deny-all", job_name(eval_id))),
            ..Default::default()
        },
        spec: Some(NetworkPolicySpec {
            pod_selector: LabelSelector {
                match_labels: Some(selector_labels),
                ..Default::default()
            },
            policy_types: Some(vec!["Ingress".to_string(), "Egress".to_string()]),
            ingress: None,
            egress: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_name_is_lowercase_and_stable_for_an_eval_id() {
        let eval_id = EvalId::parse("Eval-001").unwrap();
        assert_eq!(job_name(&eval_id), "evalctl-eval-eval-001");
    }

    #[test]
    fn build_job_sets_hardening_fields() {
        let eval_id = EvalId::generate();
        let job = build_job(&eval_id, "evalctl/python:abcdef012345", "print(1)", 30, Priority::Normal, Resources::DEFAULT_LIMIT);
        let pod_spec = job.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod_spec.restart_policy.as_deref(), Some("Never"));
        assert_eq!(pod_spec.active_deadline_seconds, Some(30));
        let container = &pod_spec.containers[0];
        let sc = container.security_context.as_ref().unwrap();
        assert_eq!(sc.run_as_non_root, Some(true));
        assert_eq!(sc.read_only_root_filesystem, Some(true));
        assert_eq!(sc.allow_privilege_escalation, Some(false));
    }

    #[test]
    fn strip_sandbox_runtime_class_clears_the_field() {
        let eval_id = EvalId::generate();
        let mut job = build_job(&eval_id, "img", "code", 30, Priority::Normal, Resources::DEFAULT_LIMIT);
        strip_sandbox_runtime_class(&mut job);
        assert!(job.spec.unwrap().template.spec.unwrap().runtime_class_name.is_none());
    }
}

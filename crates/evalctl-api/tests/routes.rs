use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use evalctl_api::{router, AppState};
use evalctl_config::Config;
use evalctl_dispatcher::{DispatchError, Dispatcher, ExecuteAck, ExecuteRequest, WorkloadState};
use evalctl_eventbus::InMemoryEventBus;
use evalctl_queue::InMemoryQueue;
use evalctl_storage::InMemoryStorage;
use evalctl_types::EvalId;
use serde_json::{json, Value};
use tower::ServiceExt;

struct NoopDispatcher;

#[async_trait]
impl Dispatcher for NoopDispatcher {
    async fn execute(&self, _request: ExecuteRequest) -> Result<ExecuteAck, DispatchError> {
        unreachable!("the API never dispatches directly")
    }
    async fn poll_state(&self, _eval_id: &EvalId) -> Option<WorkloadState> {
        None
    }
    async fn cancel(&self, _eval_id: &EvalId) -> Result<(), DispatchError> {
        Ok(())
    }
    async fn is_ready(&self) -> bool {
        true
    }
}

fn config() -> Config {
    Config {
        max_code_size_bytes: 65_536,
        max_timeout_seconds: 600,
        default_timeout_seconds: 30,
        max_concurrent_evaluations: 20,
        blob_threshold_bytes: 1_048_576,
        preview_bytes: 1024,
        broker_url: "mem://".into(),
        event_bus_url: "mem://".into(),
        storage_url: "mem://".into(),
        cluster_namespace: "default".into(),
        allow_sandbox_fallback: true,
        retry_max_attempts: 3,
        retry_base_seconds: 2,
        retry_cap_seconds: 60,
        bind_addr: "0.0.0.0:8080".into(),
        health_bind_addr: "0.0.0.0:9090".into(),
    }
}

fn test_app() -> axum::Router {
    let state = Arc::new(AppState::new(
        Arc::new(InMemoryStorage::new()),
        Arc::new(InMemoryQueue::new()),
        Arc::new(NoopDispatcher),
        Arc::new(InMemoryEventBus::new()),
        config(),
    ));
    router(state)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn submit_then_fetch_round_trips_through_the_pending_marker() {
    let app = test_app();

    let submit_req = Request::builder()
        .method("POST")
        .uri("/evaluations")
        .header("content-type", "application/json")
        .body(Body::from(json!({"code": "print(1)", "language": "python"}).to_string()))
        .unwrap();
    let response = app.clone().oneshot(submit_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    let eval_id = body["eval_id"].as_str().unwrap().to_string();
    assert_eq!(body["status"], "submitted");

    let get_req = Request::builder()
        .method("GET")
        .uri(format!("/evaluations/{eval_id}"))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(get_req).await.unwrap();
    // Storage already has the record (§4.9's create happens inline), so
    // this resolves to 200 rather than the 202-pending path.
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["eval_id"], eval_id);
    assert_eq!(body["status"], "submitted");
}

#[tokio::test]
async fn empty_code_is_rejected_with_400() {
    let app = test_app();
    let request = Request::builder()
        .method("POST")
        .uri("/evaluations")
        .header("content-type", "application/json")
        .body(Body::from(json!({"code": "", "language": "python"}).to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error_kind"], "invalid_request");
}

#[tokio::test]
async fn unknown_id_with_no_pending_marker_is_404() {
    let app = test_app();
    let request = Request::builder()
        .method("GET")
        .uri(format!("/evaluations/{}", EvalId::generate()))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancelling_an_unknown_evaluation_is_still_a_202() {
    let app = test_app();
    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/evaluations/{}", EvalId::generate()))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn healthz_and_readyz_report_ok_with_in_memory_backends() {
    let app = test_app();
    for path in ["/healthz", "/readyz"] {
        let request = Request::builder().uri(path).body(Body::empty()).unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{path}");
    }
}

#[tokio::test]
async fn bulk_submit_reports_per_item_results() {
    let app = test_app();
    let request = Request::builder()
        .method("POST")
        .uri("/evaluations:bulk")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "evaluations": [
                    {"code": "print(1)", "language": "python"},
                    {"code": "", "language": "python"},
                ]
            })
            .to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert!(results[0].get("eval_id").is_some());
    assert!(results[1].get("error_kind").is_some());
}

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use evalctl_queue::QueueItem;
use evalctl_storage::ListFilter;
use tower_http::trace::TraceLayer;
use evalctl_types::{
    EvalId, Evaluation, EvaluationEvent, EvaluationStatus, EventKind, Language, Resources,
};

use crate::error::ApiError;
use crate::pending::PendingMarkers;
use crate::state::AppState;
use crate::types::{
    BulkSubmitRequest, BulkSubmitResponse, BulkSubmitResult, ListQuery, PageResponse, PendingResponse,
    SubmitRequest, SubmitResponse,
};
use crate::validation::{self, parse_priority};

const PRODUCER: &str = "evalctl-api";

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/evaluations", post(submit).get(list))
        .route("/evaluations:bulk", post(submit_bulk))
        .route("/evaluations/running", get(running))
        .route("/evaluations/{id}", get(get_one).delete(cancel))
        .route("/statistics", get(statistics))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_text))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn submit(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let response = submit_one(&state, req).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn submit_bulk(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BulkSubmitRequest>,
) -> Json<BulkSubmitResponse> {
    let mut results = Vec::with_capacity(req.evaluations.len());
    for one in req.evaluations {
        match submit_one(&state, one).await {
            Ok(resp) => results.push(BulkSubmitResult::Ok(resp)),
            Err(err) => results.push(BulkSubmitResult::Err {
                error_kind: err.kind,
                message: err.message,
            }),
        }
    }
    Json(BulkSubmitResponse { results })
}

/// Shared by `submit` and `submit_bulk`: validate, mint an id if absent,
/// create the storage record, enqueue, publish `submitted` (§4.9).
async fn submit_one(state: &AppState, req: SubmitRequest) -> Result<SubmitResponse, ApiError> {
    validation::validate_submission(&req, &state.config)?;

    let eval_id = match &req.eval_id {
        Some(raw) => EvalId::parse(raw.clone())
            .map_err(|_| ApiError::new(evalctl_types::ErrorKind::InvalidRequest, "eval_id is not URL-safe"))?,
        None => EvalId::generate(),
    };

    let language = validation::parse_language(&req.language);
    let priority = parse_priority(req.priority.as_deref())?;
    let timeout_seconds = req.timeout_seconds.unwrap_or(state.config.default_timeout_seconds);
    let resources: Resources = req.resources.map(Into::into).unwrap_or(Resources::DEFAULT_LIMIT);

    let record = Evaluation {
        eval_id: eval_id.clone(),
        code: req.code.clone(),
        language: language.clone(),
        image_tag: None,
        timeout_seconds,
        priority,
        resources,
        status: EvaluationStatus::Submitted,
        submitted_at: chrono::Utc::now(),
        started_at: None,
        terminated_at: None,
        output_preview: None,
        output_location: None,
        exit_code: None,
        error_kind: None,
        executor_identity: None,
        deleted_at: None,
    };
    state.storage.create_evaluation(record).await?;

    state.pending.mark(eval_id.clone());

    let payload_ref = serde_json::json!({
        "code": req.code,
        "language": language.as_str(),
        "timeout_seconds": timeout_seconds,
        "priority": priority,
    });
    state.queue.enqueue(QueueItem::new(eval_id.clone(), priority, payload_ref)).await?;

    let event = EvaluationEvent::new(eval_id.clone(), EventKind::Submitted, PRODUCER);
    let _ = state.event_bus.publish(event).await;

    state.metrics.record_submitted();

    Ok(SubmitResponse {
        eval_id,
        status: EvaluationStatus::Submitted,
    })
}

enum GetOneResponse {
    Found(Evaluation),
    Pending(PendingResponse),
}

impl axum::response::IntoResponse for GetOneResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            Self::Found(record) => Json(record).into_response(),
            Self::Pending(body) => (StatusCode::ACCEPTED, Json(body)).into_response(),
        }
    }
}

async fn get_one(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<GetOneResponse, ApiError> {
    let eval_id = parse_id(&id)?;
    match state.storage.get_evaluation(&eval_id).await {
        Ok(record) => Ok(GetOneResponse::Found(record)),
        Err(evalctl_storage::StorageError::NotFound(_)) if is_pending(&state.pending, &eval_id) => {
            Ok(GetOneResponse::Pending(PendingResponse {
                eval_id,
                status: "queued",
            }))
        }
        Err(err) => Err(err.into()),
    }
}

fn is_pending(pending: &PendingMarkers, eval_id: &EvalId) -> bool {
    pending.is_pending(eval_id)
}

async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<PageResponse<Evaluation>>, ApiError> {
    let filter = ListFilter {
        status: query.status,
        language: query.language(),
        since: query.since,
        include_deleted: false,
    };
    let limit = query.limit();
    let offset = query.offset.unwrap_or(0);
    let page = state.storage.list_evaluations(filter, limit, offset).await?;
    Ok(Json(PageResponse {
        items: page.items,
        has_more: page.has_more,
    }))
}

async fn running(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Evaluation>>, ApiError> {
    Ok(Json(state.storage.running_evaluations().await?))
}

async fn statistics(State(state): State<Arc<AppState>>) -> Result<Json<evalctl_storage::Statistics>, ApiError> {
    Ok(Json(state.storage.statistics().await?))
}

/// §4.9 `DELETE /evaluations/{id}`: idempotent cancellation. Revoking an
/// already-terminal or already-revoked task is not an error.
async fn cancel(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    let eval_id = parse_id(&id)?;
    let _ = state.queue.revoke(&eval_id).await;
    let _ = state.dispatcher.cancel(&eval_id).await;
    Ok(StatusCode::ACCEPTED)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn readyz(State(state): State<Arc<AppState>>) -> StatusCode {
    if state.is_ready().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metrics_text(State(state): State<Arc<AppState>>) -> String {
    state.metrics.render()
}

fn parse_id(raw: &str) -> Result<EvalId, ApiError> {
    EvalId::parse(raw.to_string()).map_err(|_| ApiError::new(evalctl_types::ErrorKind::InvalidRequest, "invalid eval_id"))
}

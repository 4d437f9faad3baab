use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use evalctl_types::ErrorKind;
use serde::Serialize;

/// Wire-level error body (§7 "Propagation policy": C8 maps a typed error
/// to an HTTP status via `ErrorKind::http_status`).
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error_kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<evalctl_storage::StorageError> for ApiError {
    fn from(err: evalctl_storage::StorageError) -> Self {
        use evalctl_storage::StorageError::*;
        let kind = match &err {
            Conflict(_) => ErrorKind::Conflict,
            NotFound(_) => ErrorKind::NotFound,
            InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Unavailable(_) | BlobUnavailable(_) => ErrorKind::StorageUnavailable,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<evalctl_queue::QueueError> for ApiError {
    fn from(err: evalctl_queue::QueueError) -> Self {
        Self::new(ErrorKind::BrokerUnavailable, err.to_string())
    }
}

impl From<evalctl_dispatcher::DispatchError> for ApiError {
    fn from(err: evalctl_dispatcher::DispatchError) -> Self {
        let kind = err.kind();
        Self::new(kind, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            error_kind: self.kind,
            message: self.message,
            details: self.details,
        };
        (status, Json(body)).into_response()
    }
}

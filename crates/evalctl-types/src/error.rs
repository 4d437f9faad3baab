use serde::{Deserialize, Serialize};

/// Wire-level error identifier (spec §7). Stable across releases — clients
/// match on this string, not on `message`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    PayloadTooLarge,
    NotFound,
    Conflict,
    InvalidTransition,
    QuotaExceeded,
    ClusterUnavailable,
    NoImage,
    StorageUnavailable,
    BrokerUnavailable,
    ExecutionFailed,
    ExecutionTimeout,
    Cancelled,
}

impl ErrorKind {
    /// Whether a retry loop may reasonably attempt this operation again
    /// (the "locally recoverable" column of the §7 table).
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::QuotaExceeded
                | Self::ClusterUnavailable
                | Self::NoImage
                | Self::StorageUnavailable
                | Self::BrokerUnavailable
        )
    }

    /// The HTTP status C8 maps this kind to (§7 table). Terminal evaluation
    /// outcomes are not API errors — they're returned as 200 with a
    /// `status` field — so this only matters if a caller mistakenly wraps
    /// one as an error.
    pub fn http_status(self) -> u16 {
        match self {
            Self::InvalidRequest => 400,
            Self::PayloadTooLarge => 413,
            Self::NotFound => 404,
            Self::Conflict | Self::InvalidTransition => 409,
            Self::QuotaExceeded => 429,
            Self::ClusterUnavailable
            | Self::NoImage
            | Self::StorageUnavailable
            | Self::BrokerUnavailable => 503,
            Self::ExecutionFailed | Self::ExecutionTimeout | Self::Cancelled => 200,
        }
    }
}

/// A typed, structured error carried across component boundaries.
///
/// Cross-component failures propagate as this type; C8 maps `kind` to an
/// HTTP status via [`ErrorKind::http_status`].
#[derive(Clone, Debug, thiserror::Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct ControlPlaneError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ControlPlaneError {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds_match_spec_table() {
        assert!(ErrorKind::ClusterUnavailable.is_retryable());
        assert!(ErrorKind::NoImage.is_retryable());
        assert!(!ErrorKind::InvalidRequest.is_retryable());
        assert!(!ErrorKind::ExecutionFailed.is_retryable());
    }

    #[test]
    fn http_status_matches_spec_table() {
        assert_eq!(ErrorKind::PayloadTooLarge.http_status(), 413);
        assert_eq!(ErrorKind::NotFound.http_status(), 404);
        assert_eq!(ErrorKind::Conflict.http_status(), 409);
        assert_eq!(ErrorKind::InvalidTransition.http_status(), 409);
        assert_eq!(ErrorKind::QuotaExceeded.http_status(), 429);
        assert_eq!(ErrorKind::StorageUnavailable.http_status(), 503);
    }
}

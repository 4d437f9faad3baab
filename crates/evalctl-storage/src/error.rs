use evalctl_types::EvalId;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("evaluation {0} already exists")]
    Conflict(EvalId),
    #[error("evaluation {0} not found")]
    NotFound(EvalId),
    #[error("invalid transition for {eval_id}: {reason}")]
    InvalidTransition { eval_id: EvalId, reason: String },
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("blob backend unavailable: {0}")]
    BlobUnavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    #[error("claim {0} not found or already acked")]
    UnknownClaim(uuid::Uuid),
    #[error("task for {0} has been revoked")]
    Revoked(evalctl_types::EvalId),
}

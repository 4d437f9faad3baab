#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("event bus unreachable: {0}")]
    Unavailable(String),
    #[error("failed to publish to channel {channel}: {source}")]
    Publish {
        channel: String,
        #[source]
        source: serde_json::Error,
    },
}

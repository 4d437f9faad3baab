//! Named event bus channels (§4.3). The only place a channel name is
//! spelled as a string literal — everywhere else goes through
//! [`channel_for`] or these constants, per C1's "no string literals for
//! statuses or channels" rule.

use crate::event::EventKind;

pub const EVALUATION_SUBMITTED: &str = "evaluation:submitted";
pub const EVALUATION_QUEUED: &str = "evaluation:queued";
pub const EVALUATION_PROVISIONING: &str = "evaluation:provisioning";
pub const EVALUATION_RUNNING: &str = "evaluation:running";
pub const EVALUATION_COMPLETED: &str = "evaluation:completed";
pub const EVALUATION_FAILED: &str = "evaluation:failed";
pub const EVALUATION_TIMEOUT: &str = "evaluation:timeout";
pub const EVALUATION_CANCELLED: &str = "evaluation:cancelled";
pub const EVALUATION_RETRY: &str = "evaluation:retry";
pub const EVALUATION_DLQ: &str = "evaluation:dlq";

/// All channels, in the order §4.3 lists them. A storage-projection worker
/// subscribes to every one of these.
pub const ALL_CHANNELS: &[&str] = &[
    EVALUATION_SUBMITTED,
    EVALUATION_QUEUED,
    EVALUATION_PROVISIONING,
    EVALUATION_RUNNING,
    EVALUATION_COMPLETED,
    EVALUATION_FAILED,
    EVALUATION_TIMEOUT,
    EVALUATION_CANCELLED,
    EVALUATION_RETRY,
    EVALUATION_DLQ,
];

/// The channel an [`EventKind`] publishes to. `RetryScheduled` publishes to
/// `evaluation:retry` (distinct from the `queued` channel, since it's
/// consumed by operators watching for retry storms, not by C5's ordinary
/// projection path) and `Dlq` to `evaluation:dlq`.
pub fn channel_for(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Submitted => EVALUATION_SUBMITTED,
        EventKind::Queued => EVALUATION_QUEUED,
        EventKind::Provisioning => EVALUATION_PROVISIONING,
        EventKind::Running => EVALUATION_RUNNING,
        EventKind::Completed => EVALUATION_COMPLETED,
        EventKind::Failed => EVALUATION_FAILED,
        EventKind::Timeout => EVALUATION_TIMEOUT,
        EventKind::Cancelled => EVALUATION_CANCELLED,
        EventKind::RetryScheduled => EVALUATION_RETRY,
        EventKind::Dlq => EVALUATION_DLQ,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_event_kind_maps_to_a_listed_channel() {
        for kind in [
            EventKind::Submitted,
            EventKind::Queued,
            EventKind::Provisioning,
            EventKind::Running,
            EventKind::Completed,
            EventKind::Failed,
            EventKind::Timeout,
            EventKind::Cancelled,
            EventKind::RetryScheduled,
            EventKind::Dlq,
        ] {
            assert!(ALL_CHANNELS.contains(&channel_for(kind)));
        }
    }
}

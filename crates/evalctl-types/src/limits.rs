//! Numeric limits and defaults from §6 "Configuration". These are the
//! hard-coded fallbacks `evalctl-config` uses when an environment variable
//! is unset; every component reads limits through this module rather than
//! re-declaring a magic number (§4.1).

/// Hard ceiling on submitted code size, in bytes.
pub const MAX_CODE_SIZE_BYTES: usize = 1_048_576;

/// Upper bound on `timeout_seconds`.
pub const MAX_TIMEOUT_SECONDS: u32 = 600;

/// Default `timeout_seconds` when the caller omits it.
pub const DEFAULT_TIMEOUT_SECONDS: u32 = 30;

/// Namespace-wide ResourceQuota ceiling on concurrent evaluations.
pub const MAX_CONCURRENT_EVALUATIONS: u32 = 20;

/// Output size above which the full payload is offloaded to blob storage.
pub const BLOB_THRESHOLD_BYTES: usize = 1_048_576;

/// Inline preview length kept on the record itself.
pub const PREVIEW_BYTES: usize = 1024;

/// Maximum queue delivery attempts before a task is moved to the DLQ.
pub const RETRY_MAX_ATTEMPTS: u32 = 3;

/// Base of the exponential backoff, in seconds (`base^attempt`, §4.4).
pub const RETRY_BASE_SECONDS: u64 = 2;

/// Backoff delay ceiling, in seconds.
pub const RETRY_CAP_SECONDS: u64 = 60;

/// Jitter applied to backoff delays, as a fraction (±20%, §4.4).
pub const RETRY_JITTER_FRACTION: f64 = 0.20;

/// Lower bound on `timeout_seconds`.
pub const MIN_TIMEOUT_SECONDS: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fall_within_their_own_bounds() {
        assert!(DEFAULT_TIMEOUT_SECONDS >= MIN_TIMEOUT_SECONDS);
        assert!(DEFAULT_TIMEOUT_SECONDS <= MAX_TIMEOUT_SECONDS);
        assert!(PREVIEW_BYTES <= BLOB_THRESHOLD_BYTES);
    }
}

use rand::Rng;

/// Exponential backoff, capped and jittered (§4.4: "delays 2^n seconds
/// capped at 60 s, jittered ±20%, up to 3 attempts"). `attempt` is
/// 0-indexed (the first retry is `attempt = 0`).
pub fn backoff_seconds(attempt: u32, base_seconds: u64, cap_seconds: u64, jitter_fraction: f64) -> u64 {
    let exp = base_seconds.saturating_pow(attempt.min(32));
    let capped = exp.min(cap_seconds);
    let jitter_span = (capped as f64 * jitter_fraction).round() as i64;
    if jitter_span == 0 {
        return capped;
    }
    let offset = rand::rng().random_range(-jitter_span..=jitter_span);
    (capped as i64 + offset).max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_capped_and_within_jitter_bounds() {
        for attempt in 0..6 {
            let delay = backoff_seconds(attempt, 2, 60, 0.20);
            let ideal = 2u64.saturating_pow(attempt).min(60);
            let span = (ideal as f64 * 0.20).round() as u64;
            assert!(delay <= ideal + span);
            assert!(delay + span >= ideal.saturating_sub(span));
        }
    }

    #[test]
    fn backoff_never_exceeds_cap_plus_jitter() {
        let delay = backoff_seconds(10, 2, 60, 0.20);
        assert!(delay <= 60 + (60.0 * 0.20).round() as u64);
    }
}

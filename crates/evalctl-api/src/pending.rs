use std::time::{Duration, Instant};

use dashmap::DashMap;
use evalctl_types::EvalId;

const MARKER_TTL: Duration = Duration::from_secs(30);

/// Short-TTL marker written at enqueue time so `GET /evaluations/{id}`
/// can answer 202 instead of 404 while C5's projection hasn't yet created
/// the storage record (§4.9 "Pending marker" — closes the race where
/// immediate polling after submission returned 404).
pub struct PendingMarkers {
    markers: DashMap<EvalId, Instant>,
}

impl PendingMarkers {
    pub fn new() -> Self {
        Self { markers: DashMap::new() }
    }

    pub fn mark(&self, eval_id: EvalId) {
        self.markers.insert(eval_id, Instant::now());
    }

    /// `true` if a live (non-expired) marker exists. Expired markers are
    /// swept out on the read path rather than via a background timer.
    pub fn is_pending(&self, eval_id: &EvalId) -> bool {
        // Map before matching so the shard guard from `get` is dropped
        // before a possible `remove` on the same key.
        let elapsed = self.markers.get(eval_id).map(|at| at.elapsed());
        match elapsed {
            Some(e) if e < MARKER_TTL => true,
            Some(_) => {
                self.markers.remove(eval_id);
                false
            }
            None => false,
        }
    }

    pub fn clear(&self, eval_id: &EvalId) {
        self.markers.remove(eval_id);
    }
}

impl Default for PendingMarkers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_marker_reports_pending() {
        let markers = PendingMarkers::new();
        let id = EvalId::generate();
        markers.mark(id.clone());
        assert!(markers.is_pending(&id));
    }

    #[test]
    fn absent_marker_reports_not_pending() {
        let markers = PendingMarkers::new();
        assert!(!markers.is_pending(&EvalId::generate()));
    }

    #[test]
    fn cleared_marker_reports_not_pending() {
        let markers = PendingMarkers::new();
        let id = EvalId::generate();
        markers.mark(id.clone());
        markers.clear(&id);
        assert!(!markers.is_pending(&id));
    }
}

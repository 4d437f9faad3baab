use std::sync::atomic::{AtomicU64, Ordering};

use evalctl_types::{metrics as names, EvaluationStatus};

/// In-process counters exposed as plain text under `/metrics`
/// (SPEC_FULL.md "Metrics counters (not a dashboard)") — not the excluded
/// billing/business-metrics surface, just ambient instrumentation.
#[derive(Default)]
pub struct Metrics {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timeout: AtomicU64,
    cancelled: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_terminal(&self, status: EvaluationStatus) {
        let counter = match status {
            EvaluationStatus::Completed => &self.completed,
            EvaluationStatus::Failed => &self.failed,
            EvaluationStatus::Timeout => &self.timeout,
            EvaluationStatus::Cancelled => &self.cancelled,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Prometheus-text-ish rendering; no client library needed for four
    /// counters.
    pub fn render(&self) -> String {
        format!(
            "{submitted_name} {submitted}\n\
             {terminal_name}{{status=\"completed\"}} {completed}\n\
             {terminal_name}{{status=\"failed\"}} {failed}\n\
             {terminal_name}{{status=\"timeout\"}} {timeout}\n\
             {terminal_name}{{status=\"cancelled\"}} {cancelled}\n",
            submitted_name = names::EVALUATIONS_SUBMITTED_TOTAL,
            submitted = self.submitted.load(Ordering::Relaxed),
            terminal_name = names::EVALUATIONS_TERMINAL_TOTAL,
            completed = self.completed.load(Ordering::Relaxed),
            failed = self.failed.load(Ordering::Relaxed),
            timeout = self.timeout.load(Ordering::Relaxed),
            cancelled = self.cancelled.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_reflects_recorded_counts() {
        let metrics = Metrics::new();
        metrics.record_submitted();
        metrics.record_submitted();
        metrics.record_terminal(EvaluationStatus::Completed);
        let text = metrics.render();
        assert!(text.contains(&format!("{} 2", names::EVALUATIONS_SUBMITTED_TOTAL)));
        assert!(text.contains("status=\"completed\"} 1"));
    }
}

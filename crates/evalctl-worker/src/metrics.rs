use std::sync::atomic::{AtomicU64, Ordering};

use evalctl_types::{metrics as names, EvaluationStatus};

/// In-process terminal-outcome counters, exposed under `/metrics` by the
/// health server (SPEC_FULL.md "Metrics counters (not a dashboard)").
#[derive(Default)]
pub struct Metrics {
    completed: AtomicU64,
    failed: AtomicU64,
    timeout: AtomicU64,
    cancelled: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
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

    pub fn render(&self) -> String {
        format!(
            "{name}{{status=\"completed\"}} {completed}\n\
             {name}{{status=\"failed\"}} {failed}\n\
             {name}{{status=\"timeout\"}} {timeout}\n\
             {name}{{status=\"cancelled\"}} {cancelled}\n",
            name = names::EVALUATIONS_TERMINAL_TOTAL,
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
    fn render_reflects_recorded_terminal_counts() {
        let metrics = Metrics::new();
        metrics.record_terminal(EvaluationStatus::Completed);
        metrics.record_terminal(EvaluationStatus::Failed);
        metrics.record_terminal(EvaluationStatus::Failed);
        let text = metrics.render();
        assert!(text.contains("status=\"completed\"} 1"));
        assert!(text.contains("status=\"failed\"} 2"));
    }
}

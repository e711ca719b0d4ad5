//! Exponential backoff for lock-conflict retries (§4.H). Not grounded on a
//! direct teacher equivalent (the teacher retries on a fixed poll interval
//! in `concurrent_status.rs`); shaped after the spec's literal formula.

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub initial_ms: u64,
    pub coefficient: f64,
    pub max_per_try_ms: u64,
    pub total_budget_ms: u64,
}

impl BackoffPolicy {
    pub fn new(initial_ms: u64, coefficient: f64, max_per_try_ms: u64, total_budget_ms: u64) -> Self {
        Self {
            initial_ms,
            coefficient,
            max_per_try_ms,
            total_budget_ms,
        }
    }

    /// Returns the wait for attempt `attempt` (0-based), already clamped by
    /// `max_per_try_ms` and by whatever of `total_budget_ms` remains.
    pub fn wait_for(&self, attempt: u32, elapsed_ms: u64) -> Option<u64> {
        let remaining = self.total_budget_ms.saturating_sub(elapsed_ms);
        if remaining == 0 {
            return None;
        }
        let grown = (self.initial_ms as f64) * self.coefficient.powi(attempt as i32);
        let capped = (grown as u64).min(self.max_per_try_ms);
        Some(capped.min(remaining))
    }
}

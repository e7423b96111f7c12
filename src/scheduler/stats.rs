//! Batch statistics.

use crate::session::SessionStats;
use std::time::Duration;

/// What happened during one successful batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchStats {
    pub batch_id: String,
    pub requests: usize,
    pub completed: usize,
    /// Calls made through the session, retries included.
    pub attempts: u64,
    pub retries: u64,
    /// Highest number of units of work outstanding at once.
    pub peak_inflight: usize,
    pub elapsed: Duration,
}

impl BatchStats {
    pub(crate) fn new(batch_id: impl Into<String>, requests: usize) -> Self {
        Self {
            batch_id: batch_id.into(),
            requests,
            completed: 0,
            attempts: 0,
            retries: 0,
            peak_inflight: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub(crate) fn record_session(&mut self, session: SessionStats) {
        self.attempts = session.attempts;
        self.retries = session.retries;
    }

    /// Completed requests per second of wall time.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.completed as f64 / secs
        }
    }
}

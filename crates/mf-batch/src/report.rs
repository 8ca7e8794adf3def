//! End-of-run summary.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use mf_core::{JobItem, JobSetSnapshot, RunId, RunState, Tally};

/// Final outcome of one batch run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: RunId,
    /// `Completed` or `Cancelled`.
    pub state: RunState,
    pub tally: Tally,
    /// Failed items with their diagnostics, in batch order.
    pub failures: Vec<JobItem>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchReport {
    pub(crate) fn from_snapshot(
        run_id: RunId,
        snapshot: &JobSetSnapshot,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id,
            state: snapshot.state,
            tally: snapshot.tally,
            failures: snapshot.failures().cloned().collect(),
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Wall-clock duration of the run.
    pub fn elapsed(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    /// Every item succeeded and nothing was cancelled.
    pub fn is_clean(&self) -> bool {
        self.state == RunState::Completed && self.tally.failed == 0 && self.tally.cancelled == 0
    }
}

//! Push-style progress notification.

use mf_core::JobSetSnapshot;

use crate::report::BatchReport;

/// Receives every snapshot the aggregator publishes.
///
/// Called on the aggregator task; implementations should return quickly.
pub trait NotificationSink: Send + Sync {
    fn on_snapshot(&self, snapshot: &JobSetSnapshot);

    /// Called once after the final snapshot of a run.
    fn on_complete(&self, report: &BatchReport) {
        let _ = report;
    }
}

impl<F> NotificationSink for F
where
    F: Fn(&JobSetSnapshot) + Send + Sync,
{
    fn on_snapshot(&self, snapshot: &JobSetSnapshot) {
        self(snapshot)
    }
}

//! Single-writer progress aggregation.
//!
//! Workers never update item status directly. They send [`ItemEvent`]s over
//! a channel; the [`ProgressAggregator`] applies them one at a time, so every
//! published snapshot is consistent and every event is counted exactly once.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};

use mf_core::{JobSetSnapshot, JobStatus, RunId};

use crate::cancel::CancellationController;
use crate::event::{ItemEvent, ItemEventKind};
use crate::job_set::JobSet;
use crate::report::BatchReport;
use crate::sink::NotificationSink;

pub struct ProgressAggregator {
    job_set: JobSet,
    run_id: RunId,
    cancel: CancellationController,
    sinks: Vec<Arc<dyn NotificationSink>>,
    snapshots: watch::Sender<JobSetSnapshot>,
    started_at: DateTime<Utc>,
    report: Option<BatchReport>,
}

impl ProgressAggregator {
    /// Create an aggregator for a run that has already begun on `job_set`.
    /// The returned receiver always holds the latest snapshot.
    pub fn new(
        job_set: JobSet,
        run_id: RunId,
        cancel: CancellationController,
        sinks: Vec<Arc<dyn NotificationSink>>,
    ) -> (Self, watch::Receiver<JobSetSnapshot>) {
        let (snapshots, rx) = watch::channel(job_set.snapshot());
        let aggregator = Self {
            job_set,
            run_id,
            cancel,
            sinks,
            snapshots,
            started_at: Utc::now(),
            report: None,
        };
        (aggregator, rx)
    }

    /// Apply one event. Returns `true` once every item is terminal and the
    /// run has been closed.
    pub fn on_event(&mut self, event: ItemEvent) -> bool {
        if self.report.is_some() {
            tracing::warn!(run_id = %self.run_id, index = event.index, "Event after run completion ignored");
            return true;
        }

        let status = event.kind.status();
        let Some(snapshot) = self.job_set.apply(event.index, status, event.kind.detail()) else {
            tracing::warn!(
                run_id = %self.run_id,
                index = event.index,
                ?status,
                "Ignoring out-of-order status change"
            );
            return false;
        };

        match &event.kind {
            ItemEventKind::Failed(detail) | ItemEventKind::Error(detail) => {
                tracing::debug!(run_id = %self.run_id, index = event.index, %detail, "Item failed");
            }
            _ => {
                tracing::trace!(run_id = %self.run_id, index = event.index, ?status, "Item status");
            }
        }

        let complete = snapshot.tally.is_complete();
        self.publish(snapshot);
        if complete {
            self.finish();
        }
        complete
    }

    pub fn is_complete(&self) -> bool {
        self.report.is_some()
    }

    pub fn report(&self) -> Option<&BatchReport> {
        self.report.as_ref()
    }

    /// Consume events until the run completes.
    ///
    /// If every sender is dropped first, items still in flight are closed
    /// out (running ones as failed, the rest as cancelled) so the run still
    /// reaches a terminal state.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<ItemEvent>) -> BatchReport {
        while let Some(event) = events.recv().await {
            if self.on_event(event) {
                break;
            }
        }

        if self.report.is_none() {
            self.abandon_remaining();
        }

        match self.report {
            Some(report) => report,
            None => {
                // Only reachable if the batch had no items, which begin_run forbids.
                let snapshot = self.job_set.finish_run(self.cancel.is_cancelled());
                BatchReport::from_snapshot(self.run_id, &snapshot, self.started_at)
            }
        }
    }

    fn abandon_remaining(&mut self) {
        tracing::warn!(run_id = %self.run_id, "Event channel closed before all items finished");
        let pending: Vec<(usize, JobStatus)> = self
            .job_set
            .items()
            .iter()
            .enumerate()
            .filter(|(_, item)| !item.status.is_terminal())
            .map(|(index, item)| (index, item.status))
            .collect();

        for (index, status) in pending {
            let kind = if status == JobStatus::Running {
                ItemEventKind::Error("worker exited before reporting a result".into())
            } else {
                ItemEventKind::Cancelled
            };
            if self.on_event(ItemEvent::new(index, kind)) {
                break;
            }
        }
    }

    fn publish(&self, snapshot: JobSetSnapshot) {
        for sink in &self.sinks {
            sink.on_snapshot(&snapshot);
        }
        self.snapshots.send_replace(snapshot);
    }

    fn finish(&mut self) {
        let snapshot = self.job_set.finish_run(self.cancel.is_cancelled());
        let report = BatchReport::from_snapshot(self.run_id, &snapshot, self.started_at);
        self.publish(snapshot);

        tracing::info!(
            run_id = %self.run_id,
            state = %report.state,
            succeeded = report.tally.succeeded,
            failed = report.tally.failed,
            cancelled = report.tally.cancelled,
            elapsed_ms = report.elapsed().as_millis() as u64,
            "Batch run finished"
        );

        for sink in &self.sinks {
            sink.on_complete(&report);
        }
        self.report = Some(report);
    }
}

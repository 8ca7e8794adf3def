//! Bounded worker pool driving one batch run.
//!
//! [`Dispatcher::start`] moves the [`JobSet`] to `Running`, queues every
//! pending item, and spawns exactly `worker_count` workers. Each worker
//! repeatedly claims the next queued item, runs the [`EncodeInvoker`] on it,
//! and reports the outcome as an [`ItemEvent`]. Claiming is a pop under a
//! mutex, so no item is ever processed twice.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

use mf_av::{EncodeInvoker, Outcome};
use mf_core::config::{default_worker_count, BatchConfig};
use mf_core::{Error, JobSetSnapshot, Result, RunId};

use crate::aggregator::ProgressAggregator;
use crate::cancel::CancellationController;
use crate::event::{ItemEvent, ItemEventKind};
use crate::job_set::{JobSet, WorkItem};
use crate::report::BatchReport;
use crate::sink::NotificationSink;

/// Per-run settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Maximum number of concurrent encodes. Values below 1 are treated as 1.
    pub worker_count: usize,
    /// Delete each source after its conversion succeeds.
    pub delete_source: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            delete_source: true,
        }
    }
}

impl RunOptions {
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count,
            ..Self::default()
        }
    }

    pub fn delete_source(mut self, delete: bool) -> Self {
        self.delete_source = delete;
        self
    }

    pub fn effective_workers(&self) -> usize {
        self.worker_count.max(1)
    }
}

impl From<&BatchConfig> for RunOptions {
    fn from(config: &BatchConfig) -> Self {
        Self {
            worker_count: config.workers,
            delete_source: config.delete_source,
        }
    }
}

/// Starts batch runs against an encoder.
#[derive(Clone)]
pub struct Dispatcher {
    invoker: Arc<dyn EncodeInvoker>,
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl Dispatcher {
    pub fn new(invoker: Arc<dyn EncodeInvoker>) -> Self {
        Self {
            invoker,
            sinks: Vec::new(),
        }
    }

    /// Register a sink that receives every snapshot of every run.
    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Start a run over `job_set`. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if the batch is not idle.
    /// - [`Error::EmptyBatch`] if it has no items.
    /// - [`Error::Internal`] if there is no Tokio runtime to spawn on.
    pub fn start(&self, job_set: &JobSet, options: RunOptions) -> Result<RunHandle> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::Internal(
                "batch runs must be started inside a Tokio runtime".into(),
            ));
        }

        let run_id = RunId::new();
        let work = job_set.begin_run(run_id)?;
        let worker_count = options.effective_workers();
        let span = tracing::info_span!("batch_run", run_id = %run_id);

        tracing::info!(
            parent: &span,
            items = work.len(),
            workers = worker_count,
            delete_source = options.delete_source,
            "Starting batch run"
        );

        let cancel = CancellationController::new();
        let (events, rx) = mpsc::unbounded_channel();

        // Every item is Queued before any worker can mark one Running.
        for item in &work {
            let _ = events.send(ItemEvent::new(item.index, ItemEventKind::Queued));
        }

        let (aggregator, snapshots) =
            ProgressAggregator::new(job_set.clone(), run_id, cancel.clone(), self.sinks.clone());
        let aggregator = tokio::spawn(aggregator.run(rx).instrument(span.clone()));

        let ctx = Arc::new(RunContext {
            queue: Mutex::new(VecDeque::from(work)),
            cancel,
            events,
            invoker: Arc::clone(&self.invoker),
            delete_source: options.delete_source,
        });

        let workers = (0..worker_count)
            .map(|worker| {
                let ctx = Arc::clone(&ctx);
                tokio::spawn(run_worker(worker, ctx).instrument(span.clone()))
            })
            .collect();

        // Only workers keep the context, and with it the event sender, alive.
        Ok(RunHandle {
            run_id,
            cancel: ctx.cancel.clone(),
            canceller: RunCanceller {
                ctx: Arc::downgrade(&ctx),
            },
            snapshots,
            workers,
            aggregator,
        })
    }
}

/// State shared by the workers of one run.
struct RunContext {
    queue: Mutex<VecDeque<WorkItem>>,
    cancel: CancellationController,
    events: mpsc::UnboundedSender<ItemEvent>,
    invoker: Arc<dyn EncodeInvoker>,
    delete_source: bool,
}

impl RunContext {
    fn claim_next(&self) -> Option<WorkItem> {
        let mut queue = self.queue.lock();
        if self.cancel.is_cancelled() {
            return None;
        }
        queue.pop_front()
    }

    fn emit(&self, index: usize, kind: ItemEventKind) {
        if self.events.send(ItemEvent::new(index, kind)).is_err() {
            tracing::debug!(index, "Aggregator gone; dropping event");
        }
    }

    /// Request cancellation and cancel everything still queued. Returns the
    /// number of items cancelled by this call.
    fn cancel(&self) -> usize {
        // Holding the queue lock orders this against claim_next: a worker
        // either claimed its item before the flag flipped or sees the flag.
        let mut queue = self.queue.lock();
        if !self.cancel.request_cancel() {
            return 0;
        }
        let drained: Vec<WorkItem> = queue.drain(..).collect();
        drop(queue);

        for item in &drained {
            self.emit(item.index, ItemEventKind::Cancelled);
        }
        tracing::info!(cancelled = drained.len(), "Cancellation requested");
        drained.len()
    }
}

async fn run_worker(worker: usize, ctx: Arc<RunContext>) {
    tracing::debug!(worker, "Worker started");

    while let Some(item) = ctx.claim_next() {
        ctx.emit(item.index, ItemEventKind::Running);
        tracing::info!(worker, source = %item.source.display(), "Converting");

        let kind = process_item(&ctx, &item).await;
        ctx.emit(item.index, kind);
    }

    tracing::debug!(worker, "Worker exiting");
}

async fn process_item(ctx: &RunContext, item: &WorkItem) -> ItemEventKind {
    let invocation = AssertUnwindSafe(ctx.invoker.invoke(&item.source, &item.output))
        .catch_unwind()
        .await;

    match invocation {
        Ok(Ok(Outcome::Success)) => {
            if ctx.delete_source {
                remove_source(&item.source).await;
            }
            tracing::info!(output = %item.output.display(), "Converted");
            ItemEventKind::Succeeded
        }
        Ok(Ok(outcome)) => {
            let detail = outcome
                .diagnostic()
                .unwrap_or_else(|| "conversion failed".to_string());
            tracing::warn!(source = %item.source.display(), %detail, "Conversion failed");
            ItemEventKind::Failed(detail)
        }
        Ok(Err(e)) => {
            tracing::error!(source = %item.source.display(), error = %e, "Encoder could not run");
            ItemEventKind::Error(e.to_string())
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(source = %item.source.display(), %message, "Encoder panicked");
            ItemEventKind::Error(format!("encoder panicked: {message}"))
        }
    }
}

/// The only place a source file is ever deleted.
async fn remove_source(source: &Path) {
    match tokio::fs::remove_file(source).await {
        Ok(()) => tracing::debug!(source = %source.display(), "Removed source"),
        Err(e) => tracing::warn!(
            source = %source.display(),
            error = %e,
            "Converted but could not remove source"
        ),
    }
}

/// Clonable cancel trigger for a run, for use from signal handlers and
/// other tasks that do not own the [`RunHandle`].
///
/// Holds the run weakly: once every worker has exited there is nothing left
/// to cancel and [`cancel`](Self::cancel) returns 0.
#[derive(Clone)]
pub struct RunCanceller {
    ctx: Weak<RunContext>,
}

impl RunCanceller {
    /// See [`RunHandle::cancel`].
    pub fn cancel(&self) -> usize {
        self.ctx.upgrade().map_or(0, |ctx| ctx.cancel())
    }
}

/// Handle to an active run.
pub struct RunHandle {
    run_id: RunId,
    cancel: CancellationController,
    canceller: RunCanceller,
    snapshots: watch::Receiver<JobSetSnapshot>,
    workers: Vec<JoinHandle<()>>,
    aggregator: JoinHandle<BatchReport>,
}

impl RunHandle {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Stop the run: queued items become `Cancelled`, encodes already in
    /// progress finish normally. Returns how many items this call cancelled;
    /// repeated calls return 0.
    pub fn cancel(&self) -> usize {
        self.canceller.cancel()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn canceller(&self) -> RunCanceller {
        self.canceller.clone()
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> JobSetSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified on every snapshot change.
    pub fn subscribe(&self) -> watch::Receiver<JobSetSnapshot> {
        self.snapshots.clone()
    }

    /// Wait for every worker to exit and the run to reach a terminal state.
    pub async fn wait(self) -> Result<BatchReport> {
        let RunHandle {
            workers,
            aggregator,
            ..
        } = self;

        let mut worker_panicked = false;
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Worker task failed");
                worker_panicked = true;
            }
        }

        let report = aggregator
            .await
            .map_err(|e| Error::Internal(format!("aggregator task failed: {e}")))?;
        if worker_panicked {
            tracing::warn!(run_id = %report.run_id, "Run finished after a worker task failure");
        }
        Ok(report)
    }
}

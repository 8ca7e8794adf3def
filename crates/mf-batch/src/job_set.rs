//! The batch: an ordered, de-duplicated set of conversion items plus the run
//! state machine guarding it.
//!
//! [`JobSet`] is a cheap, clonable handle. Callers edit membership while the
//! set is idle; once a run starts the only writer of item status is the
//! run's [`ProgressAggregator`](crate::ProgressAggregator).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use mf_core::{
    normalize_extension, output_path_for, Error, JobItem, JobSetSnapshot, JobStatus, Result,
    RunId, RunState, Tally,
};

/// A unit of work handed to a worker: the item's position plus the two paths
/// it needs. Workers never touch the [`JobSet`] itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WorkItem {
    pub index: usize,
    pub source: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug)]
struct Batch {
    state: RunState,
    run_id: Option<RunId>,
    target_extension: String,
    items: Vec<JobItem>,
}

impl Batch {
    fn ensure_idle(&self, action: &str) -> Result<()> {
        if self.state != RunState::Idle {
            return Err(Error::invalid_state(format!(
                "cannot {action} while the batch is {}",
                self.state
            )));
        }
        Ok(())
    }

    fn snapshot(&self) -> JobSetSnapshot {
        JobSetSnapshot::new(self.run_id, self.state, self.items.clone())
    }
}

/// Ordered collection of [`JobItem`]s keyed by source path.
#[derive(Debug, Clone)]
pub struct JobSet {
    inner: Arc<RwLock<Batch>>,
}

impl JobSet {
    /// Create an empty batch converting to `target_extension`.
    pub fn new(target_extension: impl Into<String>) -> Self {
        let target_extension = normalize_extension(&target_extension.into()).to_string();
        Self {
            inner: Arc::new(RwLock::new(Batch {
                state: RunState::Idle,
                run_id: None,
                target_extension,
                items: Vec::new(),
            })),
        }
    }

    /// Add a source file. Returns `false` if it is already in the batch.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if a run is active or awaiting reset.
    /// - [`Error::Validation`] if the source already has the target extension
    ///   (so no output can be another item's source), or if another item
    ///   already converts to the same output, e.g. `clip.mts` and `clip.m2ts`
    ///   both becoming `clip.mp4`.
    pub fn add(&self, source: impl Into<PathBuf>) -> Result<bool> {
        let source = source.into();
        let mut batch = self.inner.write();
        batch.ensure_idle("add items")?;

        if source.as_os_str().is_empty() {
            return Err(Error::validation("source path is empty"));
        }

        if has_extension(&source, &batch.target_extension) {
            return Err(Error::validation(format!(
                "{} already has the target extension '{}'",
                source.display(),
                batch.target_extension
            )));
        }

        if batch.items.iter().any(|i| i.source_path == source) {
            return Ok(false);
        }

        let item = JobItem::new(source, &batch.target_extension);
        for other in &batch.items {
            if other.output_path == item.output_path {
                return Err(Error::validation(format!(
                    "{} and {} would both be converted to {}",
                    other.source_path.display(),
                    item.source_path.display(),
                    item.output_path.display()
                )));
            }
        }

        batch.items.push(item);
        Ok(true)
    }

    /// Add several sources, returning how many were new.
    pub fn extend<I, P>(&self, sources: I) -> Result<usize>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut added = 0;
        for source in sources {
            if self.add(source)? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Remove a source file. Returns `false` if it was not in the batch.
    pub fn remove(&self, source: &Path) -> Result<bool> {
        let mut batch = self.inner.write();
        batch.ensure_idle("remove items")?;
        let before = batch.items.len();
        batch.items.retain(|i| i.source_path != source);
        Ok(batch.items.len() < before)
    }

    /// Remove every item.
    pub fn clear(&self) -> Result<()> {
        let mut batch = self.inner.write();
        batch.ensure_idle("clear the batch")?;
        batch.items.clear();
        Ok(())
    }

    /// Change the target extension and re-derive every output path.
    ///
    /// Fails, leaving the batch unchanged, if any source already carries the
    /// new extension.
    pub fn set_target_extension(&self, extension: &str) -> Result<()> {
        let extension = normalize_extension(extension);
        if extension.is_empty() {
            return Err(Error::validation("target extension is empty"));
        }

        let mut batch = self.inner.write();
        batch.ensure_idle("change the target extension")?;

        if let Some(item) = batch
            .items
            .iter()
            .find(|i| has_extension(&i.source_path, extension))
        {
            return Err(Error::validation(format!(
                "{} already has the target extension '{extension}'",
                item.source_path.display()
            )));
        }

        // Outputs were unique and keep their stems, so they stay unique.
        batch.target_extension = extension.to_string();
        for item in batch.items.iter_mut() {
            item.output_path = output_path_for(&item.source_path, extension);
        }
        Ok(())
    }

    pub fn target_extension(&self) -> String {
        self.inner.read().target_extension.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().items.is_empty()
    }

    /// Copy of every item in insertion order.
    pub fn items(&self) -> Vec<JobItem> {
        self.inner.read().items.clone()
    }

    /// Look up an item by source path.
    pub fn get(&self, source: &Path) -> Option<JobItem> {
        self.inner
            .read()
            .items
            .iter()
            .find(|i| i.source_path == source)
            .cloned()
    }

    pub fn run_state(&self) -> RunState {
        self.inner.read().state
    }

    /// Identifier of the current or most recent run.
    pub fn run_id(&self) -> Option<RunId> {
        self.inner.read().run_id
    }

    /// Counts derived from the current item statuses.
    pub fn tally(&self) -> Tally {
        Tally::from_statuses(self.inner.read().items.iter().map(|i| i.status))
    }

    /// Consistent copy of the whole batch.
    pub fn snapshot(&self) -> JobSetSnapshot {
        self.inner.read().snapshot()
    }

    /// Return a finished batch to `Idle` so it can be edited and run again.
    ///
    /// Succeeded items are dropped (their sources are gone); failed and
    /// cancelled items go back to `Pending` with their diagnostics cleared.
    /// Resetting an idle batch is a no-op.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] while a run is active.
    pub fn reset(&self) -> Result<()> {
        let mut batch = self.inner.write();
        match batch.state {
            RunState::Idle => return Ok(()),
            RunState::Running => {
                return Err(Error::invalid_state("cannot reset while the batch is running"));
            }
            RunState::Completed | RunState::Cancelled => {}
        }

        batch.items.retain(|i| i.status != JobStatus::Succeeded);
        for item in &mut batch.items {
            item.status = JobStatus::Pending;
            item.error_detail = None;
        }
        batch.state = RunState::Idle;
        batch.run_id = None;
        Ok(())
    }

    // -- run lifecycle (engine only) -----------------------------------------

    /// Move `Idle -> Running` and hand out the pending work.
    pub(crate) fn begin_run(&self, run_id: RunId) -> Result<Vec<WorkItem>> {
        let mut batch = self.inner.write();
        if batch.state != RunState::Idle {
            return Err(Error::invalid_state(format!(
                "cannot start a run while the batch is {}",
                batch.state
            )));
        }
        if batch.items.is_empty() {
            return Err(Error::EmptyBatch);
        }

        batch.state = RunState::Running;
        batch.run_id = Some(run_id);

        Ok(batch
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.status == JobStatus::Pending)
            .map(|(index, item)| WorkItem {
                index,
                source: item.source_path.clone(),
                output: item.output_path.clone(),
            })
            .collect())
    }

    /// Apply one status change. Returns the resulting snapshot, or `None` if
    /// the change is not a legal lifecycle step for that item.
    pub(crate) fn apply(
        &self,
        index: usize,
        next: JobStatus,
        detail: Option<&str>,
    ) -> Option<JobSetSnapshot> {
        let mut batch = self.inner.write();
        let item = batch.items.get_mut(index)?;
        if !item.status.can_transition_to(next) {
            return None;
        }
        item.status = next;
        if let Some(detail) = detail {
            item.error_detail = Some(detail.to_string());
        }
        Some(batch.snapshot())
    }

    /// Close the run: `Cancelled` if cancellation was requested, otherwise
    /// `Completed`. Returns the final snapshot.
    pub(crate) fn finish_run(&self, cancel_requested: bool) -> JobSetSnapshot {
        let mut batch = self.inner.write();
        batch.state = if cancel_requested {
            RunState::Cancelled
        } else {
            RunState::Completed
        };
        batch.snapshot()
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

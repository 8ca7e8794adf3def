//! Batch data model: item status, run state, tallies and snapshots.
//!
//! These are plain values. Mutation rules (who may change what and when) are
//! enforced by the batch engine; everything here can be freely cloned and
//! handed to observers.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ids::RunId;

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a single conversion item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Added to the batch, not yet submitted.
    Pending,
    /// Submitted to the work queue.
    Queued,
    /// Claimed by a worker; the encoder is running.
    Running,
    Succeeded,
    Failed,
    /// Dropped before any worker claimed it.
    Cancelled,
}

impl JobStatus {
    /// Terminal statuses never change again within a run.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Queued)
                | (Pending, Cancelled)
                | (Queued, Running)
                | (Queued, Cancelled)
                | (Running, Succeeded)
                | (Running, Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// JobItem
// ---------------------------------------------------------------------------

/// One source file with a single target conversion outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobItem {
    /// Identity of the item within its batch.
    pub source_path: PathBuf,
    /// Source path with the target extension substituted.
    pub output_path: PathBuf,
    pub status: JobStatus,
    /// Diagnostic text, set only when the item failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl JobItem {
    /// Create a pending item converting `source_path` to `target_extension`.
    pub fn new(source_path: PathBuf, target_extension: &str) -> Self {
        let output_path = output_path_for(&source_path, target_extension);
        Self {
            source_path,
            output_path,
            status: JobStatus::Pending,
            error_detail: None,
        }
    }

    /// File name of the source, for display.
    pub fn file_name(&self) -> String {
        self.source_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.source_path.to_string_lossy().to_string())
    }
}

/// Derive the output path for `source` by replacing its extension.
pub fn output_path_for(source: &Path, target_extension: &str) -> PathBuf {
    source.with_extension(normalize_extension(target_extension))
}

/// Strip a leading dot and surrounding whitespace from an extension.
pub fn normalize_extension(extension: &str) -> &str {
    extension.trim().trim_start_matches('.')
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// State machine for one batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Completed,
    Cancelled,
}

impl RunState {
    /// Whether a run has ended and is waiting for a reset.
    pub fn is_finished(self) -> bool {
        matches!(self, RunState::Completed | RunState::Cancelled)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Tally
// ---------------------------------------------------------------------------

/// Aggregate counts for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tally {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl Tally {
    /// Count statuses. This is the only way a tally is produced, so counts
    /// always agree with the per-item state they were derived from.
    pub fn from_statuses(statuses: impl IntoIterator<Item = JobStatus>) -> Self {
        let mut tally = Tally::default();
        for status in statuses {
            tally.total += 1;
            match status {
                JobStatus::Succeeded => tally.succeeded += 1,
                JobStatus::Failed => tally.failed += 1,
                JobStatus::Cancelled => tally.cancelled += 1,
                _ => {}
            }
        }
        tally
    }

    /// Items that reached a terminal status.
    pub fn finished(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }

    /// Items not yet terminal.
    pub fn remaining(&self) -> usize {
        self.total - self.finished()
    }

    /// Whether every item is terminal.
    pub fn is_complete(&self) -> bool {
        self.finished() == self.total
    }

    /// Completion percentage (0.0 -- 100.0). An empty tally reports 0.
    pub fn progress_percent(&self) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        (self.finished() as f32 / self.total as f32) * 100.0
    }
}

// ---------------------------------------------------------------------------
// JobSetSnapshot
// ---------------------------------------------------------------------------

/// Immutable, internally consistent view of a batch at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSetSnapshot {
    /// Run this snapshot belongs to, if a run has been started.
    pub run_id: Option<RunId>,
    pub state: RunState,
    #[serde(flatten)]
    pub tally: Tally,
    /// Per-item status in insertion order.
    pub items: Vec<JobItem>,
}

impl JobSetSnapshot {
    /// Build a snapshot, deriving the tally from the items.
    pub fn new(run_id: Option<RunId>, state: RunState, items: Vec<JobItem>) -> Self {
        let tally = Tally::from_statuses(items.iter().map(|i| i.status));
        Self {
            run_id,
            state,
            tally,
            items,
        }
    }

    /// Items currently being encoded.
    pub fn running(&self) -> impl Iterator<Item = &JobItem> {
        self.items
            .iter()
            .filter(|i| i.status == JobStatus::Running)
    }

    /// Items that failed, with their diagnostics.
    pub fn failures(&self) -> impl Iterator<Item = &JobItem> {
        self.items.iter().filter(|i| i.status == JobStatus::Failed)
    }
}

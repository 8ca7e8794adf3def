//! Worker-to-aggregator status events.

use mf_core::JobStatus;

/// What happened to an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemEventKind {
    Queued,
    Running,
    Succeeded,
    /// The encoder ran and reported failure.
    Failed(String),
    Cancelled,
    /// The encoder could not be run at all (spawn error, panic). Recorded as
    /// a failure carrying the error text.
    Error(String),
}

impl ItemEventKind {
    /// Status the item moves to.
    pub fn status(&self) -> JobStatus {
        match self {
            ItemEventKind::Queued => JobStatus::Queued,
            ItemEventKind::Running => JobStatus::Running,
            ItemEventKind::Succeeded => JobStatus::Succeeded,
            ItemEventKind::Failed(_) | ItemEventKind::Error(_) => JobStatus::Failed,
            ItemEventKind::Cancelled => JobStatus::Cancelled,
        }
    }

    /// Diagnostic to store on the item, if any.
    pub fn detail(&self) -> Option<&str> {
        match self {
            ItemEventKind::Failed(detail) | ItemEventKind::Error(detail) => Some(detail),
            _ => None,
        }
    }
}

/// A status change for one item, tagged with its position in the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemEvent {
    pub index: usize,
    pub kind: ItemEventKind,
}

impl ItemEvent {
    pub fn new(index: usize, kind: ItemEventKind) -> Self {
        Self { index, kind }
    }
}

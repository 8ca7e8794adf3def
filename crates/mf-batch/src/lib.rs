//! # mf-batch
//!
//! Bounded-concurrency batch conversion engine.
//!
//! - **Batch model** ([`JobSet`]) -- ordered, de-duplicated items and the
//!   `Idle -> Running -> Completed | Cancelled` run state machine.
//! - **Dispatch** ([`Dispatcher`], [`RunHandle`]) -- a fixed pool of workers
//!   claiming items one at a time and invoking the encoder.
//! - **Progress** ([`ProgressAggregator`], [`NotificationSink`]) -- a single
//!   writer that applies worker events and publishes consistent snapshots.
//! - **Cancellation** ([`CancellationController`]) -- cooperative and
//!   run-scoped; in-flight encodes always finish.

pub mod aggregator;
pub mod cancel;
pub mod dispatcher;
pub mod event;
pub mod job_set;
pub mod report;
pub mod sink;

pub use aggregator::ProgressAggregator;
pub use cancel::CancellationController;
pub use dispatcher::{Dispatcher, RunCanceller, RunHandle, RunOptions};
pub use event::{ItemEvent, ItemEventKind};
pub use job_set::JobSet;
pub use report::BatchReport;
pub use sink::NotificationSink;

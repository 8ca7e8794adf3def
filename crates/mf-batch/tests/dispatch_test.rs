//! Integration tests for batch dispatch, cancellation, and progress.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;

use common::{CancelAfter, ScriptedInvoker, TempBatch};
use mf_batch::{Dispatcher, JobSet, NotificationSink, RunHandle, RunOptions};
use mf_core::{Error, JobSetSnapshot, JobStatus, RunState};

async fn wait_until_running(handle: &RunHandle, count: usize) {
    let mut rx = handle.subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|s| s.running().count() == count),
    )
    .await
    .expect("timed out waiting for workers")
    .expect("snapshot channel closed");
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn all_items_succeed_and_sources_are_removed() {
    let batch = TempBatch::new(&["a.mts", "b.mts", "c.mts", "d.mts", "e.mts"]);
    let invoker = Arc::new(ScriptedInvoker::new());

    let handle = Dispatcher::new(invoker.clone())
        .start(&batch.set, RunOptions::new(2))
        .unwrap();
    let report = handle.wait().await.unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.tally.total, 5);
    assert_eq!(report.tally.succeeded, 5);
    assert!(report.is_clean());
    assert_eq!(invoker.calls().len(), 5);

    for name in ["a", "b", "c", "d", "e"] {
        assert!(!batch.exists(&format!("{name}.mts")), "{name}.mts not removed");
        assert!(batch.exists(&format!("{name}.mp4")), "{name}.mp4 missing");
    }
    assert_eq!(batch.set.run_state(), RunState::Completed);
}

#[tokio::test]
async fn sources_sharing_an_output_are_not_both_converted() {
    let batch = TempBatch::new(&["clip.mts"]);
    std::fs::write(batch.path("clip.m2ts"), b"m2ts data").unwrap();

    let err = batch.set.add(batch.path("clip.m2ts")).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(batch.set.len(), 1);

    let report = Dispatcher::new(Arc::new(ScriptedInvoker::new()))
        .start(&batch.set, RunOptions::new(2))
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(report.tally.succeeded, 1);
    assert!(!batch.exists("clip.mts"));
    assert!(batch.exists("clip.m2ts"));
    assert_eq!(std::fs::read_to_string(batch.path("clip.mp4")).unwrap(), "clip.mts");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_item_keeps_its_source_and_diagnostic() {
    let batch = TempBatch::new(&["one.mts", "two.mts", "three.mts"]);
    let invoker = Arc::new(ScriptedInvoker::new().fail("two.mts"));

    let report = Dispatcher::new(invoker)
        .start(&batch.set, RunOptions::new(2))
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.tally.succeeded, 2);
    assert_eq!(report.tally.failed, 1);
    assert!(!report.is_clean());

    let failure = &report.failures[0];
    assert_eq!(failure.source_path, batch.path("two.mts"));
    let detail = failure.error_detail.as_deref().unwrap();
    assert!(detail.contains("exit code 1"), "got: {detail}");
    assert!(detail.contains("Invalid data"), "got: {detail}");

    assert!(batch.exists("two.mts"));
    assert!(!batch.exists("one.mts"));
    assert!(!batch.exists("three.mts"));
}

#[tokio::test]
async fn invoker_error_is_recorded_as_failure() {
    let batch = TempBatch::new(&["ok.mts", "broken.mts"]);
    let invoker = Arc::new(ScriptedInvoker::new().error("broken.mts"));

    let report = Dispatcher::new(invoker)
        .start(&batch.set, RunOptions::new(1))
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(report.tally.succeeded, 1);
    assert_eq!(report.tally.failed, 1);
    let detail = report.failures[0].error_detail.as_deref().unwrap();
    assert!(detail.contains("failed to spawn"), "got: {detail}");
    assert!(batch.exists("broken.mts"));
}

#[tokio::test]
async fn keep_source_leaves_inputs_in_place() {
    let batch = TempBatch::new(&["a.mts", "b.mts"]);
    let report = Dispatcher::new(Arc::new(ScriptedInvoker::new()))
        .start(&batch.set, RunOptions::new(2).delete_source(false))
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(report.tally.succeeded, 2);
    assert!(batch.exists("a.mts"));
    assert!(batch.exists("b.mts"));
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_never_exceeds_worker_count() {
    let batch = TempBatch::numbered(8);
    let invoker = Arc::new(ScriptedInvoker::new().delay(Duration::from_millis(20)));

    let report = Dispatcher::new(invoker.clone())
        .start(&batch.set, RunOptions::new(3))
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(report.tally.succeeded, 8);
    assert!(invoker.max_active() <= 3, "max active {}", invoker.max_active());

    let calls = invoker.calls();
    let unique: HashSet<_> = calls.iter().collect();
    assert_eq!(calls.len(), 8);
    assert_eq!(unique.len(), 8, "an item was claimed twice");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tally_is_independent_of_worker_count() {
    for workers in 1..=5 {
        let batch = TempBatch::numbered(5);
        let invoker = Arc::new(ScriptedInvoker::new().fail("clip03.mts"));

        let report = Dispatcher::new(invoker)
            .start(&batch.set, RunOptions::new(workers))
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert_eq!(report.tally.succeeded, 4, "workers = {workers}");
        assert_eq!(report.tally.failed, 1, "workers = {workers}");
        assert_eq!(report.tally.cancelled, 0, "workers = {workers}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn zero_workers_still_makes_progress() {
    let batch = TempBatch::numbered(3);
    let report = Dispatcher::new(Arc::new(ScriptedInvoker::new()))
        .start(&batch.set, RunOptions::new(0))
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(report.tally.succeeded, 3);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_lets_in_flight_items_finish() {
    let batch = TempBatch::numbered(10);
    let gate = Arc::new(Semaphore::new(0));
    let invoker = Arc::new(ScriptedInvoker::new().gated(gate.clone()));

    let handle = Dispatcher::new(invoker.clone())
        .start(&batch.set, RunOptions::new(3))
        .unwrap();
    wait_until_running(&handle, 3).await;

    assert_eq!(handle.cancel(), 7);
    assert_eq!(handle.cancel(), 0);
    assert!(handle.is_cancel_requested());

    gate.add_permits(10);
    let report = handle.wait().await.unwrap();

    assert_eq!(report.state, RunState::Cancelled);
    assert_eq!(report.tally.succeeded + report.tally.failed, 3);
    assert_eq!(report.tally.cancelled, 7);
    assert_eq!(invoker.calls().len(), 3);

    let items = batch.set.items();
    let removed = items.iter().filter(|i| !i.source_path.exists()).count();
    assert_eq!(removed, 3);
    for item in items.iter().filter(|i| i.status == JobStatus::Cancelled) {
        assert!(item.source_path.exists());
    }
}

#[tokio::test]
async fn cancel_after_two_items_cancels_the_other_eight() {
    let batch = TempBatch::numbered(10);
    let invoker = Arc::new(CancelAfter::new(2));

    // Current-thread runtime: the canceller is armed before any worker runs,
    // and the third worker is only polled after the second encode returns.
    let handle = Dispatcher::new(invoker.clone())
        .start(&batch.set, RunOptions::new(3))
        .unwrap();
    invoker.arm(handle.canceller());
    let report = handle.wait().await.unwrap();

    assert_eq!(report.state, RunState::Cancelled);
    assert_eq!(report.tally.succeeded + report.tally.failed, 2);
    assert_eq!(report.tally.cancelled, 8);
    assert_eq!(invoker.started(), 2);

    assert!(!batch.exists("clip00.mts"));
    assert!(!batch.exists("clip01.mts"));
    let kept = (2..10)
        .filter(|i| batch.exists(&format!("clip{i:02}.mts")))
        .count();
    assert_eq!(kept, 8);
}

#[tokio::test]
async fn cancel_before_any_claim_cancels_everything_queued() {
    let batch = TempBatch::numbered(4);
    let gate = Arc::new(Semaphore::new(0));
    let invoker = Arc::new(ScriptedInvoker::new().gated(gate.clone()));

    // Current-thread runtime: workers cannot run until this task yields.
    let handle = Dispatcher::new(invoker.clone())
        .start(&batch.set, RunOptions::new(2))
        .unwrap();
    let canceller = handle.canceller();
    assert_eq!(canceller.cancel(), 4);

    let report = handle.wait().await.unwrap();
    assert_eq!(report.state, RunState::Cancelled);
    assert_eq!(report.tally.cancelled, 4);
    assert!(invoker.calls().is_empty());
}

#[tokio::test]
async fn cancel_after_completion_is_a_no_op() {
    let batch = TempBatch::numbered(2);
    let handle = Dispatcher::new(Arc::new(ScriptedInvoker::new()))
        .start(&batch.set, RunOptions::new(2))
        .unwrap();
    let canceller = handle.canceller();
    let report = handle.wait().await.unwrap();

    assert_eq!(canceller.cancel(), 0);
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(batch.set.run_state(), RunState::Completed);
}

// ---------------------------------------------------------------------------
// Run state machine
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_batch_cannot_start() {
    let set = JobSet::new("mp4");
    let err = Dispatcher::new(Arc::new(ScriptedInvoker::new()))
        .start(&set, RunOptions::default())
        .err()
        .unwrap();
    assert!(matches!(err, Error::EmptyBatch));
    assert!(err.is_caller_misuse());
    assert_eq!(set.run_state(), RunState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_start_while_running_is_rejected() {
    let batch = TempBatch::numbered(2);
    let gate = Arc::new(Semaphore::new(0));
    let dispatcher = Dispatcher::new(Arc::new(ScriptedInvoker::new().gated(gate.clone())));

    let handle = dispatcher.start(&batch.set, RunOptions::new(1)).unwrap();
    let err = dispatcher
        .start(&batch.set, RunOptions::new(1))
        .err()
        .unwrap();
    assert!(matches!(err, Error::InvalidState(_)));
    assert!(matches!(batch.set.add(batch.path("late.mts")), Err(Error::InvalidState(_))));

    gate.add_permits(2);
    let report = handle.wait().await.unwrap();
    assert_eq!(report.tally.succeeded, 2);

    // A finished batch must be reset before it can run again.
    let err = dispatcher
        .start(&batch.set, RunOptions::new(1))
        .err()
        .unwrap();
    assert!(matches!(err, Error::InvalidState(_)));
}

#[tokio::test]
async fn reset_requeues_failures_for_another_run() {
    let batch = TempBatch::new(&["good.mts", "bad.mts"]);
    let first = Dispatcher::new(Arc::new(ScriptedInvoker::new().fail("bad.mts")))
        .start(&batch.set, RunOptions::new(1))
        .unwrap();
    let first_id = first.run_id();
    let report = first.wait().await.unwrap();
    assert_eq!(report.run_id, first_id);
    assert_eq!(report.tally.failed, 1);

    batch.set.reset().unwrap();
    assert_eq!(batch.set.len(), 1);
    assert_eq!(batch.set.items()[0].status, JobStatus::Pending);

    let second = Dispatcher::new(Arc::new(ScriptedInvoker::new()))
        .start(&batch.set, RunOptions::new(1))
        .unwrap();
    assert_ne!(second.run_id(), first_id);
    let report = second.wait().await.unwrap();
    assert_eq!(report.tally.total, 1);
    assert_eq!(report.tally.succeeded, 1);
    assert!(!batch.exists("bad.mts"));
}

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sink_sees_monotonic_consistent_progress() {
    let batch = TempBatch::numbered(6);
    let seen: Arc<Mutex<Vec<JobSetSnapshot>>> = Arc::default();
    let recorder = seen.clone();
    let sink: Arc<dyn NotificationSink> = Arc::new(move |s: &JobSetSnapshot| {
        recorder.lock().push(s.clone());
    });

    let handle = Dispatcher::new(Arc::new(
        ScriptedInvoker::new()
            .fail("clip01.mts")
            .delay(Duration::from_millis(5)),
    ))
    .with_sink(sink)
    .start(&batch.set, RunOptions::new(3))
    .unwrap();
    let report = handle.wait().await.unwrap();

    let seen = seen.lock();
    assert!(!seen.is_empty());

    let mut last_finished = 0;
    for snapshot in seen.iter() {
        let t = snapshot.tally;
        assert_eq!(t.total, 6);
        assert!(t.succeeded + t.failed + t.cancelled <= t.total);
        assert!(t.finished() >= last_finished, "finished count went backwards");
        assert!(snapshot.running().count() <= 3);
        last_finished = t.finished();
    }

    let last = seen.last().unwrap();
    assert_eq!(last.state, RunState::Completed);
    assert_eq!(last.tally, report.tally);
}

#[tokio::test]
async fn handle_snapshot_reflects_final_state() {
    let batch = TempBatch::numbered(2);
    let handle = Dispatcher::new(Arc::new(ScriptedInvoker::new()))
        .start(&batch.set, RunOptions::new(1))
        .unwrap();
    let mut rx = handle.subscribe();
    let report = handle.wait().await.unwrap();

    let snapshot = rx.borrow_and_update().clone();
    assert_eq!(snapshot.state, RunState::Completed);
    assert_eq!(snapshot.run_id, Some(report.run_id));
    assert_eq!(snapshot.tally.succeeded, 2);
    assert!((snapshot.tally.progress_percent() - 100.0).abs() < f32::EPSILON);
}

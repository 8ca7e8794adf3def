//! Terminal progress output.

use std::io::Write;

use parking_lot::Mutex;

use mf_batch::{BatchReport, NotificationSink};
use mf_core::{JobSetSnapshot, RunState, Tally};

/// Progress line shown while a run is active.
pub fn progress_line(tally: &Tally) -> String {
    format!("Converting: {}/{} complete", tally.finished(), tally.total)
}

/// One-line result summary.
pub fn summary_line(tally: &Tally) -> String {
    let mut line = format!("Success: {} | Failed: {}", tally.succeeded, tally.failed);
    if tally.cancelled > 0 {
        line.push_str(&format!(" | Cancelled: {}", tally.cancelled));
    }
    line
}

/// Full end-of-run report, including each failure's diagnostic.
pub fn render_report(report: &BatchReport) -> String {
    let mut out = String::new();
    let heading = match report.state {
        RunState::Cancelled => "Conversion cancelled",
        _ => "Conversion complete",
    };
    out.push_str(&format!(
        "{heading} in {:.1}s\n{}\n",
        report.elapsed().as_secs_f64(),
        summary_line(&report.tally)
    ));

    for item in &report.failures {
        out.push_str(&format!("\n✗ {}\n", item.source_path.display()));
        if let Some(ref detail) = item.error_detail {
            for line in detail.lines() {
                out.push_str(&format!("    {line}\n"));
            }
        }
    }
    out
}

/// Prints a progress line whenever the number of finished items changes.
#[derive(Default)]
pub struct ConsoleSink {
    last_finished: Mutex<Option<usize>>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NotificationSink for ConsoleSink {
    fn on_snapshot(&self, snapshot: &JobSetSnapshot) {
        let finished = snapshot.tally.finished();
        let mut last = self.last_finished.lock();
        if *last == Some(finished) {
            return;
        }
        *last = Some(finished);

        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{}", progress_line(&snapshot.tally));
        let _ = stdout.flush();
    }
}

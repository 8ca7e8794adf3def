//! Run-scoped cancellation.

use tokio_util::sync::CancellationToken;

/// One-way cancellation flag shared by a run's dispatcher, workers and
/// aggregator.
///
/// Workers poll [`is_cancelled`](Self::is_cancelled) before claiming the next
/// item. An encode that is already running is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancellationController {
    token: CancellationToken,
}

impl CancellationController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Returns `true` if this call flipped the flag;
    /// later calls are no-ops.
    ///
    /// Concurrent callers must serialize among themselves for the return
    /// value to be exact; the dispatcher calls this under its queue lock.
    pub fn request_cancel(&self) -> bool {
        let first = !self.token.is_cancelled();
        self.token.cancel();
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

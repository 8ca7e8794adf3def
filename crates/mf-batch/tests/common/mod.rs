//! Shared fixtures for dispatcher integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use mf_av::{EncodeInvoker, Outcome};
use mf_batch::{JobSet, RunCanceller};

/// Encoder stand-in whose result is decided by source file name.
#[derive(Default)]
pub struct ScriptedInvoker {
    failing: HashSet<String>,
    erroring: HashSet<String>,
    gate: Option<Arc<Semaphore>>,
    delay: Duration,
    calls: Mutex<Vec<PathBuf>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `Failure` for this file name.
    pub fn fail(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    /// Return `Err` for this file name.
    pub fn error(mut self, name: &str) -> Self {
        self.erroring.insert(name.to_string());
        self
    }

    /// Block every invocation until a permit is added to `gate`.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().clone()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EncodeInvoker for ScriptedInvoker {
    async fn invoke(&self, source: &Path, output: &Path) -> mf_core::Result<Outcome> {
        self.calls.lock().push(source.to_path_buf());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.acquire().await.map_err(|e| mf_core::Error::Internal(e.to_string()))?.forget();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if self.erroring.contains(&name) {
            return Err(mf_core::Error::tool("ffmpeg", "failed to spawn: not found"));
        }
        if self.failing.contains(&name) {
            return Ok(Outcome::failure(Some(1), "Invalid data found when processing input"));
        }

        tokio::fs::write(output, name.as_bytes()).await?;
        Ok(Outcome::Success)
    }
}

/// Succeeds without yielding and cancels the run from inside invocation
/// number `after`.
pub struct CancelAfter {
    after: usize,
    started: AtomicUsize,
    canceller: OnceLock<RunCanceller>,
}

impl CancelAfter {
    pub fn new(after: usize) -> Self {
        Self {
            after,
            started: AtomicUsize::new(0),
            canceller: OnceLock::new(),
        }
    }

    /// Must be called before the runtime gets a chance to poll the workers.
    pub fn arm(&self, canceller: RunCanceller) {
        let _ = self.canceller.set(canceller);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EncodeInvoker for CancelAfter {
    async fn invoke(&self, _source: &Path, _output: &Path) -> mf_core::Result<Outcome> {
        let n = self.started.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.after {
            if let Some(canceller) = self.canceller.get() {
                canceller.cancel();
            }
        }
        Ok(Outcome::Success)
    }
}

/// A batch whose sources exist on disk in a temporary directory.
pub struct TempBatch {
    pub dir: tempfile::TempDir,
    pub set: JobSet,
}

impl TempBatch {
    pub fn new(names: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let set = JobSet::new("mp4");
        for name in names {
            let path = dir.path().join(name);
            std::fs::write(&path, b"mts data").unwrap();
            set.add(path).unwrap();
        }
        Self { dir, set }
    }

    /// `count` sources named `clip00.mts`, `clip01.mts`, ...
    pub fn numbered(count: usize) -> Self {
        let names: Vec<String> = (0..count).map(|i| format!("clip{i:02}.mts")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        Self::new(&refs)
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path(name).exists()
    }
}

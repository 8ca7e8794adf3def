//! Application configuration types.
//!
//! The top-level [`Config`] carries the batch and encoder sections. Every
//! section defaults sensibly so an empty file is valid. Parsing the file
//! format is left to the binary; this module only defines the shape and its
//! validation rules.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;
use crate::job::normalize_extension;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub batch: BatchConfig,
    pub encoder: EncoderConfig,
}

impl Config {
    /// Reject configurations that cannot produce a working run.
    pub fn check(&self) -> Result<()> {
        let target = normalize_extension(&self.batch.target_extension);
        if target.is_empty() {
            return Err(Error::validation("batch.target_extension is empty"));
        }

        if self
            .batch
            .source_extensions
            .iter()
            .any(|ext| normalize_extension(ext).eq_ignore_ascii_case(target))
        {
            return Err(Error::validation(format!(
                "batch.target_extension '{target}' is also a source extension; \
                 outputs would overwrite their sources"
            )));
        }

        if self.encoder.video_codec.trim().is_empty() {
            return Err(Error::validation("encoder.video_codec is empty"));
        }

        Ok(())
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        let cpus = num_cpus::get();
        if self.batch.workers == 0 {
            warnings.push("batch.workers is 0; one worker will be used".into());
        } else if self.batch.workers > cpus * 2 {
            warnings.push(format!(
                "batch.workers is {} but only {} CPUs are available",
                self.batch.workers, cpus
            ));
        }

        if self.batch.source_extensions.is_empty() {
            warnings.push(
                "batch.source_extensions is empty; directories will not yield any files".into(),
            );
        }

        if let Some(ref path) = self.encoder.ffmpeg_path {
            if !path.exists() {
                warnings.push(format!(
                    "encoder.ffmpeg_path {} does not exist; falling back to PATH",
                    path.display()
                ));
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Batch dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Number of concurrent conversions.
    pub workers: usize,
    /// Extension given to converted files.
    pub target_extension: String,
    /// Extensions picked up when a directory is given as input.
    pub source_extensions: Vec<String>,
    /// Remove the source file after a successful conversion.
    pub delete_source: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: default_worker_count(),
            target_extension: "mp4".into(),
            source_extensions: vec!["mts".into()],
            delete_source: true,
        }
    }
}

/// Three quarters of the logical CPUs, never less than one.
pub fn default_worker_count() -> usize {
    (num_cpus::get() * 3 / 4).max(1)
}

/// ffmpeg invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Explicit ffmpeg binary; looked up in `PATH` when unset.
    pub ffmpeg_path: Option<PathBuf>,
    /// Threads per ffmpeg process. Parallelism comes from the worker pool.
    pub threads: u32,
    pub video_codec: String,
    pub preset: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    /// Value for ffmpeg's `-loglevel`.
    pub log_level: String,
    /// Extra arguments inserted before the output path.
    pub extra_args: Vec<String>,
    /// Per-file time limit in seconds; 0 disables it.
    pub timeout_secs: u64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            threads: 1,
            video_codec: "libx264".into(),
            preset: "medium".into(),
            audio_codec: "aac".into(),
            audio_bitrate: "192k".into(),
            log_level: "warning".into(),
            extra_args: Vec::new(),
            timeout_secs: 0,
        }
    }
}

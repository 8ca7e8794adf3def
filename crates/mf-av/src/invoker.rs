//! Encoder invocation boundary.
//!
//! The batch engine only needs to know whether converting one file worked.
//! [`EncodeInvoker`] is that boundary; [`FfmpegInvoker`] is the production
//! implementation and tests substitute scripted ones.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use mf_core::config::EncoderConfig;

use crate::command::ToolCommand;
use crate::tools::ToolRegistry;

/// Maximum number of stderr lines kept in a failure diagnostic.
const MAX_DIAGNOSTIC_LINES: usize = 20;

/// Result of one completed encoder invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The encoder finished and produced output.
    Success,
    /// The encoder ran but the conversion did not succeed.
    Failure {
        /// Process exit code; `None` when terminated by a signal.
        exit_code: Option<i32>,
        /// Captured diagnostic output.
        stderr: String,
    },
}

impl Outcome {
    /// Convenience constructor for [`Outcome::Failure`].
    pub fn failure(exit_code: Option<i32>, stderr: impl Into<String>) -> Self {
        Outcome::Failure {
            exit_code,
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    /// Human-readable, never-empty description of a failure.
    pub fn diagnostic(&self) -> Option<String> {
        let Outcome::Failure { exit_code, stderr } = self else {
            return None;
        };

        let status = match exit_code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        };

        let lines: Vec<&str> = stderr.trim().lines().collect();
        let tail = &lines[lines.len().saturating_sub(MAX_DIAGNOSTIC_LINES)..];
        if tail.is_empty() {
            Some(status)
        } else {
            Some(format!("{status}: {}", tail.join("\n")))
        }
    }
}

/// Converts a single source file into `output`.
///
/// # Errors
///
/// Return `Err` only when the conversion could not be attempted at all
/// (missing binary, spawn failure, I/O error while waiting). A conversion
/// that ran and failed is `Ok(Outcome::Failure { .. })`.
#[async_trait]
pub trait EncodeInvoker: Send + Sync {
    async fn invoke(&self, source: &Path, output: &Path) -> mf_core::Result<Outcome>;
}

/// [`EncodeInvoker`] that shells out to ffmpeg.
#[derive(Debug, Clone)]
pub struct FfmpegInvoker {
    program: PathBuf,
    settings: EncoderConfig,
}

impl FfmpegInvoker {
    /// Create an invoker running `program` with the given settings.
    pub fn new(program: PathBuf, settings: EncoderConfig) -> Self {
        Self { program, settings }
    }

    /// Create an invoker using the ffmpeg found by the registry.
    pub fn from_registry(tools: &ToolRegistry, settings: EncoderConfig) -> mf_core::Result<Self> {
        let program = tools.require("ffmpeg")?.to_path_buf();
        Ok(Self::new(program, settings))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Build the ffmpeg command line for one file.
    pub fn build_command(&self, source: &Path, output: &Path) -> ToolCommand {
        let s = &self.settings;
        let mut cmd = ToolCommand::new(self.program.clone());

        cmd.args(["-y", "-threads"]);
        cmd.arg(s.threads.max(1).to_string());
        cmd.arg("-i");
        cmd.arg(source.to_string_lossy());

        cmd.args(["-c:v", s.video_codec.as_str()]);
        if !s.preset.is_empty() {
            cmd.args(["-preset", s.preset.as_str()]);
        }
        cmd.args(["-c:a", s.audio_codec.as_str()]);
        if !s.audio_bitrate.is_empty() {
            cmd.args(["-b:a", s.audio_bitrate.as_str()]);
        }

        cmd.arg("-hide_banner");
        if !s.log_level.is_empty() {
            cmd.args(["-loglevel", s.log_level.as_str()]);
        }
        cmd.args(s.extra_args.iter().cloned());
        cmd.arg(output.to_string_lossy());

        if s.timeout_secs > 0 {
            cmd.timeout(Duration::from_secs(s.timeout_secs));
        }

        cmd
    }
}

#[async_trait]
impl EncodeInvoker for FfmpegInvoker {
    async fn invoke(&self, source: &Path, output: &Path) -> mf_core::Result<Outcome> {
        let cmd = self.build_command(source, output);
        tracing::debug!("ffmpeg args: {:?}", cmd.get_args());

        let result = cmd.execute().await?;
        if !result.success() {
            return Ok(Outcome::failure(result.exit_code(), result.stderr));
        }

        // A zero exit status alone is not proof of a usable file.
        match tokio::fs::metadata(output).await {
            Ok(meta) if meta.len() > 0 => Ok(Outcome::Success),
            Ok(_) => Ok(Outcome::failure(
                result.exit_code(),
                format!(
                    "encoder produced no usable output: {} is empty",
                    output.display()
                ),
            )),
            Err(e) => Ok(Outcome::failure(
                result.exit_code(),
                format!(
                    "encoder produced no usable output: {}: {e}",
                    output.display()
                ),
            )),
        }
    }
}

//! Builder for executing external tool commands.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::Command;

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

impl ToolOutput {
    /// Whether the process exited with status zero.
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Numeric exit code; `None` when the process was killed by a signal.
    pub fn exit_code(&self) -> Option<i32> {
        self.status.code()
    }
}

/// A builder for constructing and executing external tool invocations.
///
/// Unlike a plain `Command`, a non-zero exit status is *not* an error here:
/// callers receive the [`ToolOutput`] and decide what the status means. Only
/// failing to launch or await the process, or hitting the optional timeout,
/// produces an [`mf_core::Error::Tool`].
///
/// # Example
///
/// ```no_run
/// use mf_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> mf_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffmpeg"))
///     .arg("-hide_banner")
///     .arg("-version")
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: None,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time. Without one the process may run
    /// indefinitely.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = Some(d);
        self
    }

    /// Arguments collected so far.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// - Returns [`mf_core::Error::Tool`] if spawning the process fails.
    /// - Returns [`mf_core::Error::Tool`] if waiting on the process fails.
    /// - Returns [`mf_core::Error::Tool`] if the timeout expires; the child is
    ///   killed when its handle is dropped.
    pub async fn execute(&self) -> mf_core::Result<ToolOutput> {
        let program_name = self.program_name();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| mf_core::Error::tool(&program_name, format!("failed to spawn: {e}")))?;

        let waited = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    return Err(mf_core::Error::tool(
                        program_name,
                        format!("timed out after {limit:?}"),
                    ));
                }
            },
            None => child.wait_with_output().await,
        };

        let output = waited.map_err(|e| {
            mf_core::Error::tool(&program_name, format!("I/O error waiting for process: {e}"))
        })?;

        Ok(ToolOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

//! External process execution with a hard timeout
//!
//! Every `ssh` invocation (master start, liveness probe, teardown and the
//! GPU query itself) goes through a [`CommandRunner`]. The production
//! implementation is [`ProcessRunner`]; tests substitute a scripted runner.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

/// Errors from running an external process
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RunError {
    /// The process did not exit within the allotted time and was killed
    #[error("Command timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The process could not be started
    #[error("Failed to spawn {program}: {reason}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// OS error text
        reason: String,
    },
}

/// A fully specified process invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program to execute (first argv element)
    pub program: String,
    /// Remaining arguments
    pub args: Vec<String>,
    /// Capture stdout/stderr. When false both are discarded and only the exit
    /// status is reported, which is required for commands that leave a
    /// daemonized child holding the inherited pipes open.
    pub capture_output: bool,
}

impl Invocation {
    /// Builds an invocation from a full argv (program first)
    #[must_use]
    pub fn from_argv(mut argv: Vec<String>) -> Self {
        let program = if argv.is_empty() {
            String::new()
        } else {
            argv.remove(0)
        };
        Self {
            program,
            args: argv,
            capture_output: true,
        }
    }

    /// Discards stdout/stderr
    #[must_use]
    pub fn status_only(mut self) -> Self {
        self.capture_output = false;
        self
    }

    /// Returns true if `flag` is followed by `value` anywhere in the arguments
    #[must_use]
    pub fn has_arg_pair(&self, flag: &str, value: &str) -> bool {
        self.args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }
}

/// Exit status and captured output of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Whether the process exited with status 0
    pub success: bool,
    /// Exit code, if the process was not killed by a signal
    pub code: Option<i32>,
    /// Captured stdout (lossy UTF-8, empty when not captured)
    pub stdout: String,
    /// Captured stderr (lossy UTF-8, empty when not captured)
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr
    #[must_use]
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Short description of a failure: trimmed stderr, or the exit code
    #[must_use]
    pub fn failure_detail(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        match self.code {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Runs external processes under a timeout
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `invocation`, waiting at most `timeout` for it to exit.
    ///
    /// A non-zero exit is reported through [`CommandOutput::success`], not as
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Timeout`] if the process outlives `timeout` (it is
    /// killed) and [`RunError::Spawn`] if it cannot be started.
    async fn run(&self, invocation: &Invocation, timeout: Duration)
    -> Result<CommandOutput, RunError>;
}

/// [`CommandRunner`] backed by `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Creates a new process runner
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        invocation: &Invocation,
        timeout: Duration,
    ) -> Result<CommandOutput, RunError> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        cmd.stdin(Stdio::null());
        // Dropping the wait future on timeout kills the child; tokio reaps it
        cmd.kill_on_drop(true);

        if invocation.capture_output {
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::null());
            cmd.stderr(Stdio::null());
        }

        let child = cmd.spawn().map_err(|e| RunError::Spawn {
            program: invocation.program.clone(),
            reason: e.to_string(),
        })?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                success: output.status.success(),
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            Ok(Err(e)) => Err(RunError::Spawn {
                program: invocation.program.clone(),
                reason: e.to_string(),
            }),
            Err(_) => {
                tracing::debug!(
                    program = %invocation.program,
                    timeout_secs = timeout.as_secs_f32(),
                    "Process exceeded timeout, killed"
                );
                Err(RunError::Timeout(timeout))
            }
        }
    }
}

use std::ffi::OsStr;
use std::io;
use std::process::{Output, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, Command};

const STDERR_TAIL: usize = 400;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{tool} is not installed or not on PATH")]
    NotFound { tool: String },

    #[error("Failed to start {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("{tool} timed out after {timeout:?}")]
    Timeout { tool: String, timeout: Duration },

    #[error("{tool} failed ({status}): {stderr}")]
    Failed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("{tool} was cancelled")]
    Cancelled { tool: String },
}

impl ToolError {
    /// True when the binary itself is absent, so every later call will fail too.
    pub fn is_missing(&self) -> bool {
        matches!(self, ToolError::NotFound { .. })
    }

    pub fn missing_tool(&self) -> Option<&str> {
        match self {
            ToolError::NotFound { tool } => Some(tool),
            _ => None,
        }
    }
}

/// Runs one external command-line tool.
///
/// Once the binary turns out to be missing, every later invocation fails fast
/// with [`ToolError::NotFound`] instead of trying to spawn it again.
#[derive(Debug)]
pub struct ToolRunner {
    program: String,
    timeout: Duration,
    missing: AtomicBool,
}

impl ToolRunner {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
            missing: AtomicBool::new(false),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_missing(&self) -> bool {
        self.missing.load(Ordering::Relaxed)
    }

    fn not_found(&self) -> ToolError {
        ToolError::NotFound {
            tool: self.program.clone(),
        }
    }

    /// Build a command for this tool with stdin closed and output piped.
    pub fn command<I, S>(&self, args: I) -> Result<Command, ToolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        if self.is_missing() {
            return Err(self.not_found());
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }

    pub fn spawn(&self, cmd: &mut Command) -> Result<Child, ToolError> {
        cmd.spawn().map_err(|e| self.spawn_error(e))
    }

    /// Run to completion within the timeout; a non-zero exit is an error.
    pub async fn output<I, S>(&self, args: I) -> Result<Output, ToolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = self.command(args)?;
        let child = self.spawn(&mut cmd)?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ToolError::Timeout {
                tool: self.program.clone(),
                timeout: self.timeout,
            })?
            .map_err(|e| ToolError::Spawn {
                tool: self.program.clone(),
                source: e,
            })?;

        if output.status.success() {
            Ok(output)
        } else {
            Err(ToolError::Failed {
                tool: self.program.clone(),
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr),
            })
        }
    }

    fn spawn_error(&self, e: io::Error) -> ToolError {
        if e.kind() == io::ErrorKind::NotFound {
            if !self.missing.swap(true, Ordering::Relaxed) {
                log::error!(
                    "{} was not found; every operation that needs it will be skipped",
                    self.program
                );
            }
            self.not_found()
        } else {
            ToolError::Spawn {
                tool: self.program.clone(),
                source: e,
            }
        }
    }
}

pub(crate) fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let start = text
        .char_indices()
        .rev()
        .nth(STDERR_TAIL)
        .map(|(i, _)| i)
        .unwrap_or(0);
    text[start..].to_string()
}

use async_trait::async_trait;
use log::debug;
use std::ffi::{OsStr, OsString};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::errors::ToolError;

// @module: External process invocation with timeout and cancellation

// @struct: One command line to run
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    // @field: Executable
    pub program: PathBuf,

    // @field: Arguments in order
    pub args: Vec<OsString>,

    // @field: Wall-clock budget
    pub timeout: Duration,
}

impl ToolInvocation {
    /// Start an invocation of `program`
    pub fn new<P: Into<PathBuf>>(program: P, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout,
        }
    }

    /// Append one argument
    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Short program name for messages
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Whether any argument equals `needle`
    pub fn has_arg(&self, needle: &str) -> bool {
        self.args.iter().any(|a| a == needle)
    }

    /// Shell-quoted rendering of the command line, for logs
    pub fn pretty(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(|a| a.as_os_str()))
            .map(|part| shell_quote(&part.to_string_lossy()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn shell_quote(part: &str) -> String {
    if part.contains([' ', '\'', '"']) {
        format!("'{}'", part.replace('\'', "'\"'\"'"))
    } else {
        part.to_string()
    }
}

/// Captured output of a successful run
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs external programs.
///
/// Backends depend on this trait rather than on `tokio::process` so their
/// behaviour can be checked without the real tools installed.
#[async_trait]
pub trait ToolRunner: Send + Sync + Debug {
    /// Run to completion, failing on non-zero exit, timeout or cancellation
    async fn run(&self, invocation: &ToolInvocation, cancel: &CancellationToken) -> Result<ToolOutput, ToolError>;
}

/// Runner backed by real child processes
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(&self, invocation: &ToolInvocation, cancel: &CancellationToken) -> Result<ToolOutput, ToolError> {
        let program = invocation.program_name();
        debug!("[proc] CMD: {}", invocation.pretty());

        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled { program });
        }

        // kill_on_drop makes both the timeout and the cancel branch terminate the child
        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::Spawn {
                program: program.clone(),
                message: e.to_string(),
            })?;

        let output = tokio::select! {
            result = child.wait_with_output() => {
                result.map_err(|e| ToolError::Spawn { program: program.clone(), message: e.to_string() })?
            },
            _ = tokio::time::sleep(invocation.timeout) => {
                debug!("[proc] TIMEOUT after {}s: {}", invocation.timeout.as_secs(), program);
                return Err(ToolError::Timeout { program, timeout: invocation.timeout });
            },
            _ = cancel.cancelled() => {
                debug!("[proc] CANCELLED: {}", program);
                return Err(ToolError::Cancelled { program });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            debug!("[proc] ERROR rc={:?}: {}", output.status.code(), program);
            return Err(ToolError::NonZeroExit {
                program,
                code: output.status.code(),
                stderr: filter_stderr(&stderr),
            });
        }

        Ok(ToolOutput { stdout, stderr })
    }
}

/// Strip ffmpeg banner and stream listing noise from stderr
pub fn filter_stderr(stderr: &str) -> String {
    let noise_prefixes = [
        "ffmpeg version",
        "ffprobe version",
        "built with",
        "configuration:",
        "lib",
        "Input #",
        "Metadata:",
        "Duration:",
        "Stream #",
        "Output #",
        "Stream mapping:",
        "Press [q]",
    ];

    let meaningful: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !noise_prefixes.iter().any(|p| line.starts_with(p)))
        .collect();

    if meaningful.is_empty() {
        "unknown error (stderr was empty after filtering)".to_string()
    } else {
        meaningful.join("\n")
    }
}

/// Size of a file in bytes, zero when it does not exist
pub fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

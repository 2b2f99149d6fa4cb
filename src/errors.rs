/*!
 * Error types for the slidecast pipeline.
 *
 * Each stage of the pipeline has its own error enum, defined with thiserror.
 * Segment-level errors are never surfaced to callers directly: the level
 * runner folds them into diagnostics on the `PipelineResult`.
 */

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while running an external tool (ffmpeg, say, espeak-ng, ffprobe)
#[derive(Error, Debug, Clone)]
pub enum ToolError {
    /// The program could not be started at all
    #[error("Failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// OS error text
        message: String,
    },

    /// The program ran but exited unsuccessfully
    #[error("{program} exited with {code:?}: {stderr}")]
    NonZeroExit {
        /// Program name
        program: String,
        /// Exit code, if the process was not killed by a signal
        code: Option<i32>,
        /// Filtered stderr output
        stderr: String,
    },

    /// The program did not finish within its time budget
    #[error("{program} timed out after {}s", .timeout.as_secs())]
    Timeout {
        /// Program name
        program: String,
        /// Budget that was exceeded
        timeout: Duration,
    },

    /// The run was cancelled while the program was executing
    #[error("{program} was cancelled")]
    Cancelled {
        /// Program name
        program: String,
    },
}

impl ToolError {
    /// Whether this error came from cooperative cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ToolError::Cancelled { .. })
    }

    /// Captured stderr, when there is any
    pub fn stderr(&self) -> &str {
        match self {
            ToolError::NonZeroExit { stderr, .. } => stderr,
            _ => "",
        }
    }
}

/// Errors that can occur while synthesizing narration
#[derive(Error, Debug)]
pub enum SynthesisError {
    /// No usable speech backend on this host
    #[error("No speech backend is available on this host")]
    NoBackend,

    /// Nothing to say
    #[error("Narration text is empty")]
    EmptyText,

    /// The backend's process failed
    #[error("{backend} failed: {source}")]
    Tool {
        /// Backend name
        backend: &'static str,
        /// Underlying tool failure
        #[source]
        source: ToolError,
    },

    /// The backend exited cleanly but produced nothing usable
    #[error("{backend} produced empty audio at {}", .path.display())]
    EmptyOutput {
        /// Backend name
        backend: &'static str,
        /// Expected output file
        path: PathBuf,
    },

    /// The produced WAV could not be read back
    #[error("Unreadable audio {}: {message}", .path.display())]
    UnreadableAudio {
        /// Audio file
        path: PathBuf,
        /// Decoder message
        message: String,
    },

    /// Scratch I/O failure
    #[error("Audio scratch I/O failed: {0}")]
    Io(String),

    /// The run was cancelled
    #[error("Synthesis was cancelled")]
    Cancelled,
}

impl SynthesisError {
    /// Build a tool error, mapping cancellation to the dedicated variant
    pub fn from_tool(backend: &'static str, source: ToolError) -> Self {
        if source.is_cancelled() {
            SynthesisError::Cancelled
        } else {
            SynthesisError::Tool { backend, source }
        }
    }

    /// Whether the error looks like the native voice rejecting its output format.
    ///
    /// `say` reports e.g. `Opening output file failed: fmt?` when a data format is
    /// not supported by the current OS build.
    pub fn is_format_failure(&self) -> bool {
        match self {
            SynthesisError::Tool { source, .. } => {
                let stderr = source.stderr().to_lowercase();
                stderr.contains("fmt?") || stderr.contains("opening output file failed")
            }
            _ => false,
        }
    }
}

/// Errors that can occur while rendering a slide
#[derive(Error, Debug)]
pub enum RenderError {
    /// The style cannot produce a usable image
    #[error("Invalid slide style: {0}")]
    InvalidStyle(String),

    /// The image could not be written to scratch
    #[error("Failed to write slide {}: {message}", .path.display())]
    Write {
        /// Target path
        path: PathBuf,
        /// Encoder message
        message: String,
    },
}

/// Errors that can occur while encoding a single clip
#[derive(Error, Debug)]
pub enum EncodingError {
    /// The audio track is unusable (non-positive duration)
    #[error("Audio track for segment {order} has no duration")]
    EmptyAudio {
        /// Segment order
        order: u32,
    },

    /// The encoder process failed
    #[error("Encoder failed: {0}")]
    Tool(#[from] ToolError),

    /// The output exists but is missing, empty or unreadable
    #[error("Corrupt output {}: {reason}", .path.display())]
    CorruptOutput {
        /// Output file
        path: PathBuf,
        /// What is wrong with it
        reason: String,
    },

    /// The output duration does not match the narration
    #[error("Duration mismatch: expected {expected:.2}s, got {actual:.2}s")]
    DurationMismatch {
        /// Audio duration
        expected: f64,
        /// Clip duration
        actual: f64,
    },

    /// Every tier failed
    #[error("All encoding tiers failed; last error: {last}")]
    Exhausted {
        /// Message from the final attempt
        last: String,
    },

    /// The run was cancelled
    #[error("Encoding was cancelled")]
    Cancelled,
}

impl EncodingError {
    /// Whether the error came from cooperative cancellation
    pub fn is_cancelled(&self) -> bool {
        match self {
            EncodingError::Cancelled => true,
            EncodingError::Tool(tool) => tool.is_cancelled(),
            _ => false,
        }
    }
}

/// Errors that can occur while joining clips
#[derive(Error, Debug)]
pub enum ConcatError {
    /// Every segment failed upstream
    #[error("No clips are available to concatenate")]
    NoClipsAvailable,

    /// The join process failed
    #[error("Concatenation failed: {0}")]
    Tool(#[from] ToolError),

    /// Join list or output I/O failed
    #[error("Concatenation I/O failed: {0}")]
    Io(String),
}

/// Errors raised by the disk preflight
#[derive(Error, Debug, Clone)]
pub enum PreflightError {
    /// Not enough free space for the estimated run
    #[error("Low disk space in {}: need {needed} bytes, {available} available", .path.display())]
    InsufficientSpace {
        /// Estimated requirement in bytes
        needed: u64,
        /// Free bytes reported by the filesystem
        available: u64,
        /// Directory that was checked
        path: PathBuf,
    },

    /// Free space could not be determined
    #[error("Unable to query free space for {}: {message}", .path.display())]
    Probe {
        /// Directory that was checked
        path: PathBuf,
        /// OS error text
        message: String,
    },
}

/// Main application error type that wraps all other errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from a file operation
    #[error("File error: {0}")]
    File(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error from synthesis
    #[error("Synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),

    /// Error from slide rendering
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    /// Error from clip encoding
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Error from concatenation
    #[error("Concatenation error: {0}")]
    Concat(#[from] ConcatError),

    /// Error from preflight
    #[error("Preflight error: {0}")]
    Preflight(#[from] PreflightError),

    /// Any other error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::Unknown(error.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::File(error.to_string())
    }
}

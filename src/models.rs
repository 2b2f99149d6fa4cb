/*!
 * Core data model of the narrated video pipeline.
 *
 * Segments flow through synthesis, rendering and encoding and end up as an
 * ordered list of clip slots. A slot is either an encoded clip or an explicit
 * gap, so the concatenator never has to guess which segment went missing.
 */

use std::fmt;
use std::path::{Path, PathBuf};

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::encoder::AttemptTier;

// @struct: One titled unit of explanatory text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    // @field: Slide heading
    pub title: String,

    // @field: Narrated body
    pub body: String,

    // @field: 1-based position in the level
    pub order: u32,
}

impl Segment {
    /// Create a segment at an explicit position
    pub fn new(order: u32, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            order,
        }
    }

    /// Number a list of (title, body) pairs densely from 1
    pub fn sequence<I, T, B>(pairs: I) -> Vec<Segment>
    where
        I: IntoIterator<Item = (T, B)>,
        T: Into<String>,
        B: Into<String>,
    {
        pairs
            .into_iter()
            .enumerate()
            .map(|(i, (title, body))| Segment::new(i as u32 + 1, title, body))
            .collect()
    }

    /// Text handed to the speech synthesizer: the title followed by the body
    pub fn narration(&self) -> String {
        format!("{}\n{}", self.title.trim(), self.body.trim())
            .trim()
            .to_string()
    }

    /// Check that orders are unique and dense starting at 1
    pub fn validate_orders(segments: &[Segment]) -> Result<(), String> {
        let mut orders: Vec<u32> = segments.iter().map(|s| s.order).collect();
        orders.sort_unstable();
        for (i, order) in orders.iter().enumerate() {
            let expected = i as u32 + 1;
            if *order != expected {
                return Err(format!(
                    "segment orders must be unique and dense from 1; expected {} but found {}",
                    expected, order
                ));
            }
        }
        Ok(())
    }
}

/// Narration audio for one segment, stored as a mono PCM WAV in scratch
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    /// WAV file in scratch storage
    pub path: PathBuf,
    /// Playback length
    pub duration_seconds: f64,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    pub channels: u16,
    /// Segment this track narrates
    pub order: u32,
}

/// Rendered slide raster for one segment
#[derive(Debug, Clone, PartialEq)]
pub struct SlideImage {
    /// RGB pixel buffer
    pub pixels: RgbImage,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Segment this slide shows
    pub order: u32,
}

/// Container of an encoded clip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    // @container: MP4 (H.264 + AAC)
    #[default]
    #[serde(alias = "primary")]
    Mp4,
    // @container: QuickTime (MJPEG + PCM)
    #[serde(alias = "alternate")]
    Mov,
}

impl Container {
    /// File extension without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Mov => "mov",
        }
    }

    /// The container not selected by configuration
    pub fn alternate(&self) -> Container {
        match self {
            Container::Mp4 => Container::Mov,
            Container::Mov => Container::Mp4,
        }
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

impl std::str::FromStr for Container {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mp4" | "primary" => Ok(Container::Mp4),
            "mov" | "alternate" => Ok(Container::Mov),
            other => Err(anyhow::anyhow!("Invalid container: {}", other)),
        }
    }
}

/// Stream parameters that decide whether clips can be joined without re-encoding
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodecMetadata {
    pub container: Container,
    pub video_codec: String,
    pub pixel_format: String,
    pub width: u32,
    pub height: u32,
    pub audio_codec: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// One encoded single-segment video
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    /// Encoded file in scratch storage
    pub path: PathBuf,
    /// Measured stream parameters
    pub codec: CodecMetadata,
    /// Measured duration
    pub duration_seconds: f64,
    /// Segment this clip shows
    pub order: u32,
    /// Tier that produced the clip
    pub tier: AttemptTier,
}

/// Position in the ordered clip list: a clip, or an explicit gap
#[derive(Debug, Clone, PartialEq)]
pub enum ClipSlot {
    Encoded(Clip),
    Missing { order: u32, kind: FailureKind },
}

impl ClipSlot {
    /// Segment order of the slot
    pub fn order(&self) -> u32 {
        match self {
            ClipSlot::Encoded(clip) => clip.order,
            ClipSlot::Missing { order, .. } => *order,
        }
    }

    /// The clip, when encoding succeeded
    pub fn clip(&self) -> Option<&Clip> {
        match self {
            ClipSlot::Encoded(clip) => Some(clip),
            ClipSlot::Missing { .. } => None,
        }
    }
}

/// Which pipeline stage a diagnostic or scratch artifact belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Preflight,
    Synthesis,
    Render,
    Encode,
    Concat,
}

impl Stage {
    /// Short lowercase name used in file names and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Preflight => "preflight",
            Stage::Synthesis => "audio",
            Stage::Render => "slide",
            Stage::Encode => "clip",
            Stage::Concat => "concat",
        }
    }
}

/// Error taxonomy recorded in diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    SynthesisFailure,
    RenderFailure,
    EncodingFailure,
    InsufficientSpace,
    ConcatenationFailure,
    Cancelled,
}

/// One recorded failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Segment the failure belongs to; `None` for level-wide failures
    pub order: Option<u32>,
    /// Stage that failed
    pub stage: Stage,
    /// Taxonomy entry
    pub kind: FailureKind,
    /// Human-readable detail
    pub message: String,
}

impl Diagnostic {
    /// Failure tied to one segment
    pub fn segment(order: u32, stage: Stage, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            order: Some(order),
            stage,
            kind,
            message: message.into(),
        }
    }

    /// Failure affecting the whole level
    pub fn level(stage: Stage, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            order: None,
            stage,
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.order {
            Some(order) => write!(
                f,
                "segment {} [{}] {:?}: {}",
                order,
                self.stage.as_str(),
                self.kind,
                self.message
            ),
            None => write!(f, "[{}] {:?}: {}", self.stage.as_str(), self.kind, self.message),
        }
    }
}

/// Final classification of a level run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Success,
    PartialSuccess,
    TextOnly,
    Failed,
}

impl Outcome {
    /// Whether this outcome carries a finished video
    pub fn has_video(&self) -> bool {
        matches!(self, Outcome::Success | Outcome::PartialSuccess)
    }
}

/// How the final video was assembled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinPath {
    /// Stream copy, every clip shared identical codec metadata
    CopyOnly,
    /// Clips were normalized and re-encoded
    Reencode,
}

/// Result of one audience level, handed back to the caller.
///
/// The constructors keep `final_video_path` present exactly when the outcome
/// is `Success` or `PartialSuccess`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    level: String,
    outcome: Outcome,
    final_video_path: Option<PathBuf>,
    join_path: Option<JoinPath>,
    diagnostics: Vec<Diagnostic>,
}

impl PipelineResult {
    /// A video was produced; `Success` when no diagnostics were recorded
    pub fn with_video(
        level: impl Into<String>,
        path: PathBuf,
        join_path: JoinPath,
        diagnostics: Vec<Diagnostic>,
    ) -> Self {
        let outcome = if diagnostics.is_empty() {
            Outcome::Success
        } else {
            Outcome::PartialSuccess
        };
        Self {
            level: level.into(),
            outcome,
            final_video_path: Some(path),
            join_path: Some(join_path),
            diagnostics,
        }
    }

    /// Video disabled or skipped before any clip work began
    pub fn text_only(level: impl Into<String>, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            level: level.into(),
            outcome: Outcome::TextOnly,
            final_video_path: None,
            join_path: None,
            diagnostics,
        }
    }

    /// Video was requested but could not be produced
    pub fn failed(level: impl Into<String>, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            level: level.into(),
            outcome: Outcome::Failed,
            final_video_path: None,
            join_path: None,
            diagnostics,
        }
    }

    pub fn level(&self) -> &str {
        &self.level
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn final_video_path(&self) -> Option<&Path> {
        self.final_video_path.as_deref()
    }

    pub fn join_path(&self) -> Option<JoinPath> {
        self.join_path
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Whether any diagnostic carries the given kind
    pub fn has_failure(&self, kind: FailureKind) -> bool {
        self.diagnostics.iter().any(|d| d.kind == kind)
    }

    /// User-facing remark to append to the text explanation, if any
    pub fn note(&self) -> Option<String> {
        match self.outcome {
            Outcome::Success => None,
            Outcome::PartialSuccess => {
                let missing: Vec<String> = self
                    .diagnostics
                    .iter()
                    .filter_map(|d| d.order)
                    .map(|o| o.to_string())
                    .collect();
                Some(format!(
                    "> ⚠️ Video is missing segment(s) {}; see diagnostics.",
                    missing.join(", ")
                ))
            }
            Outcome::TextOnly if self.has_failure(FailureKind::InsufficientSpace) => Some(
                "> ⚠️ Skipped video: low disk space. Free up space or point the scratch root at a larger drive and try again."
                    .to_string(),
            ),
            Outcome::TextOnly if self.has_failure(FailureKind::Cancelled) => {
                Some("> ⚠️ Video generation was cancelled.".to_string())
            }
            Outcome::TextOnly => None,
            Outcome::Failed => {
                let reason = self
                    .diagnostics
                    .last()
                    .map(|d| d.message.clone())
                    .unwrap_or_else(|| "unknown error".to_string());
                Some(format!("> ⚠️ Video generation failed: {}", reason))
            }
        }
    }
}

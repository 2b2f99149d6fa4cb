/*!
 * Level pipeline: narration, slides, clips and the final join.
 *
 * - `level`: runs one level from preflight to classification
 * - `orchestrator`: runs many levels with bounded concurrency
 */

use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::app_config::Config;
use crate::concat::{Concatenator, FfmpegJoiner};
use crate::encoder::{ClipEncoder, FfmpegEncoder};
use crate::errors::AppError;
use crate::models::{Outcome, Segment};
use crate::preflight::{DiskPreflight, SpaceProbe};
use crate::process::ToolRunner;
use crate::slides::{SlideRenderer, SlideStyle};
use crate::speech::SpeechSynthesizer;

pub mod level;
pub mod orchestrator;

pub use level::LevelRun;
pub use orchestrator::PipelineOrchestrator;

/// Ordered segments for one explanation level
#[derive(Debug, Clone, PartialEq)]
pub struct LevelRequest {
    level: String,
    segments: Vec<Segment>,
}

impl LevelRequest {
    /// Validate that orders run 1..=n without gaps or duplicates
    pub fn new(level: impl Into<String>, segments: Vec<Segment>) -> Result<Self, AppError> {
        let level = level.into();
        Segment::validate_orders(&segments)
            .map_err(|e| AppError::Config(format!("Level '{}': {}", level, e)))?;
        Ok(Self { level, segments })
    }

    /// Number (title, body) pairs from 1 in the given order
    pub fn from_sections<I, T, B>(level: impl Into<String>, sections: I) -> Self
    where
        I: IntoIterator<Item = (T, B)>,
        T: Into<String>,
        B: Into<String>,
    {
        Self {
            level: level.into(),
            segments: Segment::sequence(sections),
        }
    }

    pub fn level(&self) -> &str {
        &self.level
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

/// Progress notifications emitted while levels run
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    LevelStarted { level: String, segments: usize },
    SegmentFinished { level: String, order: u32, ok: bool },
    Joining { level: String, clips: usize },
    LevelFinished { level: String, outcome: Outcome },
}

/// Receiver for progress events
pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Cancellation handles for a run and its levels.
///
/// Each level gets a child of the run token, so cancelling one level leaves
/// the others running while `cancel_all` stops everything.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    root: CancellationToken,
    levels: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for `level`, created on first use
    pub fn token_for(&self, level: &str) -> CancellationToken {
        self.levels
            .lock()
            .entry(level.to_string())
            .or_insert_with(|| self.root.child_token())
            .clone()
    }

    /// Cancel one level; returns false when the level is unknown
    pub fn cancel_level(&self, level: &str) -> bool {
        match self.levels.lock().get(level) {
            Some(token) => {
                debug!("Cancelling level '{}'", level);
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every level, including ones not started yet
    pub fn cancel_all(&self) {
        self.root.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.root.is_cancelled()
    }
}

/// Collaborators shared by every level of a run
#[derive(Clone)]
pub struct PipelineServices {
    pub synthesizer: Arc<SpeechSynthesizer>,
    pub renderer: SlideRenderer,
    pub encoder: ClipEncoder,
    pub concatenator: Concatenator,
    pub preflight: Arc<DiskPreflight>,
}

impl fmt::Debug for PipelineServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineServices")
            .field("primary_voice", &self.synthesizer.primary_name())
            .field("fallback_voice", &self.synthesizer.fallback_name())
            .field("container", &self.encoder.preferred_container())
            .finish()
    }
}

impl PipelineServices {
    /// Wire the real tool-backed services from configuration
    pub fn from_config(config: &Config, runner: Arc<dyn ToolRunner>, probe: Arc<dyn SpaceProbe>) -> Self {
        let ffmpeg = config
            .tools
            .resolve_ffmpeg()
            .unwrap_or_else(|| std::path::PathBuf::from("ffmpeg"));
        let ffprobe = config
            .tools
            .resolve_ffprobe()
            .unwrap_or_else(|| std::path::PathBuf::from("ffprobe"));

        let encoder_backend = FfmpegEncoder::new(
            Arc::clone(&runner),
            ffmpeg.clone(),
            ffprobe,
            config.encoder.clone(),
        );
        let joiner = FfmpegJoiner::new(Arc::clone(&runner), ffmpeg, config.encoder.clone());

        Self {
            synthesizer: Arc::new(SpeechSynthesizer::detect(config, runner)),
            renderer: SlideRenderer::new(SlideStyle::for_mode(config.render.fast)),
            encoder: ClipEncoder::new(Arc::new(encoder_backend), config.render.preferred_container),
            concatenator: Concatenator::new(Arc::new(joiner)),
            preflight: Arc::new(DiskPreflight::new(probe, config.preflight.clone())),
        }
    }
}

use anyhow::{anyhow, Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::default::Default;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::models::Container;

/// Application configuration module
/// This module handles loading, overriding and validating the settings that
/// are threaded through the pipeline as one immutable value.
/// Represents the application configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Per-run rendering options
    #[serde(default)]
    pub render: RenderOptions,

    /// External tool locations
    #[serde(default)]
    pub tools: ToolPaths,

    /// Narration settings
    #[serde(default)]
    pub speech: SpeechTuning,

    /// Clip encoding and joining settings
    #[serde(default)]
    pub encoder: EncoderTuning,

    /// Disk space checks and scratch hygiene
    #[serde(default)]
    pub preflight: PreflightTuning,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Options collected from the caller for one run
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RenderOptions {
    // @field: Requested native voice name (e.g. "Samantha")
    #[serde(default)]
    pub voice_hint: Option<String>,

    // @field: Smaller slides and shorter narration
    #[serde(default)]
    pub fast: bool,

    // @field: Produce videos at all
    #[serde(default = "default_true")]
    pub create_video: bool,

    // @field: Container tried first by the clip encoder
    #[serde(default)]
    pub preferred_container: Container,

    // @field: Clip encodes allowed to run at once, across all levels
    #[serde(default = "default_max_concurrent_encodes")]
    pub max_concurrent_encodes: usize,

    // @field: Levels processed in parallel
    #[serde(default = "default_max_concurrent_levels")]
    pub max_concurrent_levels: usize,

    // @field: Scratch directory for intermediate artifacts
    #[serde(default = "default_scratch_root")]
    pub scratch_root: PathBuf,

    // @field: Directory receiving finished videos
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    // @field: Report Failed instead of TextOnly when preflight blocks the video
    #[serde(default)]
    pub video_mandatory: bool,

    // @field: Only render these levels (empty means all)
    #[serde(default)]
    pub levels: Vec<String>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            voice_hint: None,
            fast: false,
            create_video: true,
            preferred_container: Container::default(),
            max_concurrent_encodes: default_max_concurrent_encodes(),
            max_concurrent_levels: default_max_concurrent_levels(),
            scratch_root: default_scratch_root(),
            output_dir: default_output_dir(),
            video_mandatory: false,
            levels: Vec::new(),
        }
    }
}

impl RenderOptions {
    /// Directory that receives finished videos
    pub fn video_dir(&self) -> PathBuf {
        self.output_dir.join("videos")
    }

    /// Whether a level passes the configured filter
    pub fn wants_level(&self, level: &str) -> bool {
        self.levels.is_empty() || self.levels.iter().any(|l| l.eq_ignore_ascii_case(level))
    }
}

/// Locations of external programs; unset entries are discovered at startup
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ToolPaths {
    #[serde(default)]
    pub ffmpeg: Option<PathBuf>,
    #[serde(default)]
    pub ffprobe: Option<PathBuf>,
    #[serde(default)]
    pub say: Option<PathBuf>,
    #[serde(default)]
    pub espeak: Option<PathBuf>,
}

impl ToolPaths {
    /// Resolve ffmpeg: explicit path, well-known install locations, then PATH
    pub fn resolve_ffmpeg(&self) -> Option<PathBuf> {
        resolve_tool(self.ffmpeg.as_deref(), "ffmpeg")
    }

    /// Resolve ffprobe, preferring the directory ffmpeg was found in
    pub fn resolve_ffprobe(&self) -> Option<PathBuf> {
        if let Some(explicit) = self.ffprobe.as_deref().filter(|p| p.exists()) {
            return Some(explicit.to_path_buf());
        }
        if let Some(sibling) = self
            .resolve_ffmpeg()
            .and_then(|ffmpeg| ffmpeg.parent().map(|dir| dir.join("ffprobe")))
            .filter(|p| p.exists())
        {
            return Some(sibling);
        }
        resolve_tool(None, "ffprobe")
    }

    /// Resolve the macOS `say` command; never found on other platforms
    pub fn resolve_say(&self) -> Option<PathBuf> {
        if !cfg!(target_os = "macos") {
            return None;
        }
        resolve_tool(self.say.as_deref(), "say")
    }

    /// Resolve espeak-ng, falling back to classic espeak
    pub fn resolve_espeak(&self) -> Option<PathBuf> {
        resolve_tool(self.espeak.as_deref(), "espeak-ng").or_else(|| resolve_tool(None, "espeak"))
    }
}

fn resolve_tool(explicit: Option<&Path>, name: &str) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Some(path.to_path_buf());
        }
        warn!("Configured {} path {:?} does not exist, searching instead", name, path);
    }
    for dir in ["/opt/homebrew/bin", "/usr/local/bin", "/usr/bin"] {
        let candidate = Path::new(dir).join(name);
        if candidate.exists() {
            return Some(candidate);
        }
    }
    match which::which(name) {
        Ok(path) => Some(path),
        Err(e) => {
            debug!("{} not found on PATH: {}", name, e);
            None
        }
    }
}

/// Narration settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SpeechTuning {
    /// Base speaking rate in words per minute
    #[serde(default = "default_base_rate_wpm")]
    pub base_rate_wpm: u32,

    /// Lowest rate ever requested
    #[serde(default = "default_min_rate_wpm")]
    pub min_rate_wpm: u32,

    /// Adjustment added to the base rate
    #[serde(default)]
    pub rate_delta: i32,

    /// Maximum characters synthesized per backend call
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,

    /// Sample rate of normalized narration
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Narration cap per section
    #[serde(default = "default_narration_chars")]
    pub narration_chars: usize,

    /// Narration cap per section in fast mode
    #[serde(default = "default_narration_chars_fast")]
    pub narration_chars_fast: usize,

    /// Timeout per synthesis process, in seconds
    #[serde(default = "default_synthesis_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SpeechTuning {
    fn default() -> Self {
        Self {
            base_rate_wpm: default_base_rate_wpm(),
            min_rate_wpm: default_min_rate_wpm(),
            rate_delta: 0,
            chunk_chars: default_chunk_chars(),
            sample_rate: default_sample_rate(),
            narration_chars: default_narration_chars(),
            narration_chars_fast: default_narration_chars_fast(),
            timeout_secs: default_synthesis_timeout_secs(),
        }
    }
}

impl SpeechTuning {
    /// Effective speaking rate after applying the delta and floor
    pub fn effective_rate(&self) -> u32 {
        let rate = self.base_rate_wpm as i64 + self.rate_delta as i64;
        rate.max(self.min_rate_wpm as i64) as u32
    }

    /// Narration cap for the given mode
    pub fn narration_cap(&self, fast: bool) -> usize {
        if fast {
            self.narration_chars_fast
        } else {
            self.narration_chars
        }
    }
}

/// Clip encoding and joining settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EncoderTuning {
    /// Output frame rate (content is a still image)
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,

    /// x264 constant rate factor
    #[serde(default = "default_crf")]
    pub crf: u32,

    /// AAC bitrate
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,

    /// Audio sample rate forced by the safe tier
    #[serde(default = "default_safe_sample_rate")]
    pub safe_sample_rate: u32,

    /// MJPEG quality for the alternate container
    #[serde(default = "default_mjpeg_quality")]
    pub mjpeg_quality: u32,

    /// Accepted difference between clip and narration duration, in seconds
    #[serde(default = "default_duration_tolerance_secs")]
    pub duration_tolerance_secs: f64,

    /// Timeout per encode, in seconds
    #[serde(default = "default_encode_timeout_secs")]
    pub timeout_secs: u64,

    /// Timeout for the final join, in seconds
    #[serde(default = "default_concat_timeout_secs")]
    pub concat_timeout_secs: u64,

    /// Timeout for ffprobe, in seconds
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

impl Default for EncoderTuning {
    fn default() -> Self {
        Self {
            frame_rate: default_frame_rate(),
            crf: default_crf(),
            audio_bitrate: default_audio_bitrate(),
            safe_sample_rate: default_safe_sample_rate(),
            mjpeg_quality: default_mjpeg_quality(),
            duration_tolerance_secs: default_duration_tolerance_secs(),
            timeout_secs: default_encode_timeout_secs(),
            concat_timeout_secs: default_concat_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

/// Disk space checks and scratch hygiene
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PreflightTuning {
    /// Floor for the per-run estimate, in MB
    #[serde(default = "default_min_free_mb_run")]
    pub min_free_mb_run: u64,

    /// Floor checked before each clip encode, in MB
    #[serde(default = "default_min_free_mb_clip")]
    pub min_free_mb_clip: u64,

    /// Space consumed since the last probe that triggers a fresh one, in MB
    #[serde(default = "default_recheck_after_mb")]
    pub recheck_after_mb: u64,

    /// Age after which leftover scratch directories are purged, in hours
    #[serde(default = "default_stale_max_age_hours")]
    pub stale_max_age_hours: u64,
}

impl Default for PreflightTuning {
    fn default() -> Self {
        Self {
            min_free_mb_run: default_min_free_mb_run(),
            min_free_mb_clip: default_min_free_mb_clip(),
            recheck_after_mb: default_recheck_after_mb(),
            stale_max_age_hours: default_stale_max_age_hours(),
        }
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Matching `log` filter
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent_encodes() -> usize {
    1
}

fn default_max_concurrent_levels() -> usize {
    2
}

fn default_scratch_root() -> PathBuf {
    PathBuf::from("outputs").join("tmp")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("outputs")
}

fn default_base_rate_wpm() -> u32 {
    175
}

fn default_min_rate_wpm() -> u32 {
    120
}

fn default_chunk_chars() -> usize {
    800
}

fn default_sample_rate() -> u32 {
    16_000
}

fn default_narration_chars() -> usize {
    900
}

fn default_narration_chars_fast() -> usize {
    350
}

fn default_synthesis_timeout_secs() -> u64 {
    120
}

fn default_frame_rate() -> u32 {
    1
}

fn default_crf() -> u32 {
    30
}

fn default_audio_bitrate() -> String {
    "96k".to_string()
}

fn default_safe_sample_rate() -> u32 {
    44_100
}

fn default_mjpeg_quality() -> u32 {
    5
}

fn default_duration_tolerance_secs() -> f64 {
    0.75
}

fn default_encode_timeout_secs() -> u64 {
    300
}

fn default_concat_timeout_secs() -> u64 {
    240
}

fn default_probe_timeout_secs() -> u64 {
    60
}

fn default_min_free_mb_run() -> u64 {
    500
}

fn default_min_free_mb_clip() -> u64 {
    200
}

fn default_recheck_after_mb() -> u64 {
    256
}

fn default_stale_max_age_hours() -> u64 {
    6
}

fn env_flag(value: &str) -> bool {
    !value.trim().is_empty()
}

impl Config {
    /// Load a configuration file, or write and return the defaults if it is missing
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let file = File::open(path)
                .with_context(|| format!("Failed to open config file: {}", path.display()))?;
            let reader = BufReader::new(file);
            let config: Config = serde_json::from_reader(reader)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            return Ok(config);
        }

        warn!("Config file not found at '{}', creating default config.", path.display());
        let config = Config::default();
        let config_json = serde_json::to_string_pretty(&config)
            .context("Failed to serialize default config to JSON")?;
        std::fs::write(path, config_json)
            .with_context(|| format!("Failed to write default config to file: {}", path.display()))?;
        Ok(config)
    }

    /// Apply the documented environment knobs.
    ///
    /// `lookup` is usually `std::env::var(..).ok()`; it is a parameter so the
    /// environment is read once at the edge of the program.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("EXPLAINER_FAST") {
            self.render.fast = env_flag(&value);
        }
        if let Some(value) = lookup("EXPLAINER_NO_VIDEO") {
            if env_flag(&value) {
                self.render.create_video = false;
            }
        }
        if let Some(value) = lookup("EXPLAINER_CONTAINER") {
            if !value.trim().is_empty() {
                self.render.preferred_container = value.parse()?;
            }
        }
        if let Some(value) = lookup("EXPLAINER_VOICE") {
            if !value.trim().is_empty() {
                self.render.voice_hint = Some(value.trim().to_string());
            }
        }
        if let Some(value) = lookup("EXPLAINER_LEVELS") {
            self.render.levels = value
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(value) = lookup("EXPLAINER_SCRATCH") {
            if !value.trim().is_empty() {
                self.render.scratch_root = PathBuf::from(value.trim());
            }
        }
        if let Some(value) = lookup("FFMPEG_BIN") {
            if !value.trim().is_empty() {
                self.tools.ffmpeg = Some(PathBuf::from(value.trim()));
            }
        }
        if let Some(value) = lookup("FFPROBE_BIN") {
            if !value.trim().is_empty() {
                self.tools.ffprobe = Some(PathBuf::from(value.trim()));
            }
        }
        Ok(())
    }

    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        if self.render.max_concurrent_encodes == 0 {
            return Err(anyhow!("max_concurrent_encodes must be at least 1"));
        }
        if self.render.max_concurrent_levels == 0 {
            return Err(anyhow!("max_concurrent_levels must be at least 1"));
        }
        if self.render.scratch_root.as_os_str().is_empty() {
            return Err(anyhow!("scratch_root must not be empty"));
        }
        if self.speech.timeout_secs == 0
            || self.encoder.timeout_secs == 0
            || self.encoder.concat_timeout_secs == 0
            || self.encoder.probe_timeout_secs == 0
        {
            return Err(anyhow!("process timeouts must be greater than zero"));
        }
        if self.speech.chunk_chars < 40 {
            return Err(anyhow!("speech chunk_chars must be at least 40"));
        }
        if self.encoder.frame_rate == 0 {
            return Err(anyhow!("encoder frame_rate must be at least 1"));
        }
        if self.encoder.duration_tolerance_secs < 0.0 {
            return Err(anyhow!("duration tolerance must not be negative"));
        }
        for (name, path) in [("ffmpeg", &self.tools.ffmpeg), ("ffprobe", &self.tools.ffprobe)] {
            if path.as_ref().is_some_and(|p| p.as_os_str().is_empty()) {
                return Err(anyhow!("{} path must not be empty when set", name));
            }
        }
        Ok(())
    }
}

/*!
 * Common test utilities for the slidecast test suite
 */

#![allow(dead_code)]

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use slidecast::app_config::Config;
use slidecast::concat::{Concatenator, JoinBackend};
use slidecast::encoder::{ClipEncoder, EncoderBackend};
use slidecast::pipeline::{LevelRequest, PipelineServices};
use slidecast::preflight::DiskPreflight;
use slidecast::slides::{SlideRenderer, SlideStyle};
use slidecast::speech::{SpeechBackend, SpeechSynthesizer};

pub mod fakes;

use fakes::{FakeEncoder, FakeJoiner, FakeSpaceProbe, FakeSpeech};

pub const GB: u64 = 1024 * 1024 * 1024;
pub const MB: u64 = 1024 * 1024;

/// Route library logs to the test harness; set RUST_LOG to see them
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Creates a temporary directory for test files
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Default config with scratch and output inside `root`
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.render.scratch_root = root.join("scratch");
    config.render.output_dir = root.join("out");
    config
}

/// Write a silent 16 kHz mono WAV of `seconds`
pub fn write_wav(path: &Path, seconds: f64) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for _ in 0..(seconds * 16_000.0) as u32 {
        writer.write_sample(0i16)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Three numbered segments
pub fn three_segments(level: &str) -> LevelRequest {
    LevelRequest::from_sections(
        level,
        vec![
            ("Overview", "The function walks the list once."),
            ("Walkthrough", "First it checks the input. Then it sums the values."),
            ("TL;DR", "A linear scan."),
        ],
    )
}

/// Files below `dir`, recursively
pub fn files_under(dir: &Path) -> Vec<PathBuf> {
    if !dir.exists() {
        return Vec::new();
    }
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .collect()
}

/// Fakes wired into pipeline services
pub struct TestRig {
    pub speech: Arc<FakeSpeech>,
    pub encoder: Arc<FakeEncoder>,
    pub joiner: Arc<FakeJoiner>,
    pub free_bytes: u64,
    /// Free space of the video directory when it differs from scratch
    pub output_free_bytes: Option<u64>,
    /// The n-th space probe (from zero) reports this much instead
    pub low_space_on_probe: Option<(usize, u64)>,
}

impl TestRig {
    pub fn new() -> Self {
        Self {
            speech: Arc::new(FakeSpeech::new()),
            encoder: Arc::new(FakeEncoder::new()),
            joiner: Arc::new(FakeJoiner::new()),
            free_bytes: 100 * GB,
            output_free_bytes: None,
            low_space_on_probe: None,
        }
    }

    pub fn services(&self, config: &Config) -> PipelineServices {
        let speech: Arc<dyn SpeechBackend> = self.speech.clone();
        let encoder: Arc<dyn EncoderBackend> = self.encoder.clone();
        let joiner: Arc<dyn JoinBackend> = self.joiner.clone();
        let mut probe = FakeSpaceProbe::new(self.free_bytes);
        if let Some(bytes) = self.output_free_bytes {
            probe.by_prefix.push((config.render.video_dir(), bytes));
        }
        probe.low_on_call = self.low_space_on_probe;
        PipelineServices {
            synthesizer: Arc::new(SpeechSynthesizer::new(Some(speech), None, config.speech.clone())),
            renderer: SlideRenderer::new(SlideStyle::for_mode(config.render.fast)),
            encoder: ClipEncoder::new(encoder, config.render.preferred_container),
            concatenator: Concatenator::new(joiner),
            preflight: Arc::new(DiskPreflight::new(Arc::new(probe), config.preflight.clone())),
        }
    }
}

/*!
 * Speech synthesis for segment narration.
 *
 * Two backends implement `SpeechBackend`:
 * - `say::SayBackend`: the macOS native voice, used when present
 * - `espeak::EspeakBackend`: portable espeak-ng fallback
 *
 * The backend pair is chosen once by `SpeechSynthesizer::detect`. Calls to the
 * native backend are serialized through a process-wide lock because the host
 * voice engine is a single shared service; the fallback runs concurrently.
 */

use async_trait::async_trait;
use hound::{WavReader, WavWriter};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::app_config::{Config, SpeechTuning};
use crate::errors::SynthesisError;
use crate::models::AudioTrack;
use crate::process::{file_size, ToolRunner};
use crate::scratch::remove_quietly;
use crate::slides::wrap_text;

pub mod espeak;
pub mod say;

pub use espeak::EspeakBackend;
pub use say::SayBackend;

static SENTENCE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]+\s+").expect("static regex is valid"));

/// One backend call: synthesize `text` into a 16-bit PCM WAV at `output`
#[derive(Debug, Clone)]
pub struct ChunkRequest<'a> {
    /// Text to speak
    pub text: &'a str,
    /// Voice name; `None` selects the backend default
    pub voice: Option<&'a str>,
    /// Speaking rate in words per minute
    pub rate_wpm: u32,
    /// WAV file to create
    pub output: &'a Path,
    /// Use the most conservative parameters the backend has
    pub safe: bool,
}

/// Common trait for speech backends
#[async_trait]
pub trait SpeechBackend: Send + Sync + Debug {
    /// Short backend name for logs and errors
    fn name(&self) -> &'static str;

    /// Whether the backend drives a shared host voice service
    fn is_native(&self) -> bool;

    /// Synthesize one chunk into `request.output`
    async fn synthesize_chunk(&self, request: &ChunkRequest<'_>, cancel: &CancellationToken) -> Result<(), SynthesisError>;
}

/// Split narration into chunks of at most `max_len` characters.
///
/// Chunks break at sentence ends where possible; a sentence longer than
/// `max_len` is wrapped at word boundaries.
pub fn split_chunks(text: &str, max_len: usize) -> Vec<String> {
    let text = text.trim();
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END.find_iter(text) {
        sentences.push(text[start..m.end()].trim());
        start = m.end();
    }
    sentences.push(text[start..].trim());

    let mut chunks = Vec::new();
    let mut current = String::new();
    for sentence in sentences.into_iter().filter(|s| !s.is_empty()) {
        let sentence_len = sentence.chars().count();
        let current_len = current.chars().count();
        if current_len == 0 && sentence_len <= max_len {
            current.push_str(sentence);
        } else if current_len > 0 && current_len + 1 + sentence_len <= max_len {
            current.push(' ');
            current.push_str(sentence);
        } else {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            if sentence_len <= max_len {
                current.push_str(sentence);
            } else {
                chunks.extend(wrap_text(sentence, max_len));
            }
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Concatenate 16-bit WAV files with identical specs into `output`
pub fn join_wavs(parts: &[PathBuf], output: &Path) -> Result<(), SynthesisError> {
    let unreadable = |path: &Path, e: hound::Error| SynthesisError::UnreadableAudio {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let first = parts.first().ok_or(SynthesisError::EmptyText)?;
    let spec = WavReader::open(first).map_err(|e| unreadable(first, e))?.spec();
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        return Err(SynthesisError::UnreadableAudio {
            path: first.clone(),
            message: format!("expected 16-bit PCM, got {} bits", spec.bits_per_sample),
        });
    }

    let mut writer = WavWriter::create(output, spec).map_err(|e| unreadable(output, e))?;
    for part in parts {
        let mut reader = WavReader::open(part).map_err(|e| unreadable(part, e))?;
        if reader.spec() != spec {
            return Err(SynthesisError::UnreadableAudio {
                path: part.clone(),
                message: "chunk format differs from the first chunk".to_string(),
            });
        }
        for sample in reader.samples::<i16>() {
            let sample = sample.map_err(|e| unreadable(part, e))?;
            writer.write_sample(sample).map_err(|e| unreadable(output, e))?;
        }
    }
    writer.finalize().map_err(|e| unreadable(output, e))
}

/// Read back a WAV file as an `AudioTrack`
pub fn measure_wav(path: &Path, order: u32) -> Result<AudioTrack, SynthesisError> {
    let reader = WavReader::open(path).map_err(|e| SynthesisError::UnreadableAudio {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let spec = reader.spec();
    let duration_seconds = if spec.sample_rate == 0 {
        0.0
    } else {
        reader.duration() as f64 / spec.sample_rate as f64
    };
    Ok(AudioTrack {
        path: path.to_path_buf(),
        duration_seconds,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        order,
    })
}

// @struct: Narration synthesizer with native-first backend selection
#[derive(Debug)]
pub struct SpeechSynthesizer {
    primary: Option<Arc<dyn SpeechBackend>>,
    fallback: Option<Arc<dyn SpeechBackend>>,
    tuning: SpeechTuning,
    native_lock: Arc<Mutex<()>>,
}

impl SpeechSynthesizer {
    /// Build from explicit backends
    pub fn new(
        primary: Option<Arc<dyn SpeechBackend>>,
        fallback: Option<Arc<dyn SpeechBackend>>,
        tuning: SpeechTuning,
    ) -> Self {
        Self {
            primary,
            fallback,
            tuning,
            native_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Probe the host once and pick backends
    pub fn detect(config: &Config, runner: Arc<dyn ToolRunner>) -> Self {
        let ffmpeg = config.tools.resolve_ffmpeg();
        let timeout = std::time::Duration::from_secs(config.speech.timeout_secs);

        let primary: Option<Arc<dyn SpeechBackend>> = config.tools.resolve_say().map(|say| {
            Arc::new(SayBackend::new(
                Arc::clone(&runner),
                say,
                ffmpeg.clone(),
                config.speech.sample_rate,
                timeout,
            )) as Arc<dyn SpeechBackend>
        });
        let fallback: Option<Arc<dyn SpeechBackend>> = config.tools.resolve_espeak().map(|espeak| {
            Arc::new(EspeakBackend::new(Arc::clone(&runner), espeak, timeout)) as Arc<dyn SpeechBackend>
        });

        info!(
            "Speech backends: primary={}, fallback={}",
            primary.as_ref().map(|b| b.name()).unwrap_or("none"),
            fallback.as_ref().map(|b| b.name()).unwrap_or("none")
        );
        Self::new(primary, fallback, config.speech.clone())
    }

    /// Name of the backend tried first
    pub fn primary_name(&self) -> Option<&'static str> {
        self.primary.as_ref().map(|b| b.name())
    }

    /// Name of the fallback backend
    pub fn fallback_name(&self) -> Option<&'static str> {
        self.fallback.as_ref().map(|b| b.name())
    }

    /// Synthesize `text` into a WAV at `output`.
    ///
    /// The primary backend gets the requested voice first, then one retry with
    /// safe parameters and the default voice. After that the fallback backend
    /// is used. On error no file is left at `output`.
    pub async fn synthesize(
        &self,
        text: &str,
        voice_hint: Option<&str>,
        output: &Path,
        order: u32,
        cancel: &CancellationToken,
    ) -> Result<AudioTrack, SynthesisError> {
        let chunks = split_chunks(text, self.tuning.chunk_chars);
        if chunks.is_empty() {
            return Err(SynthesisError::EmptyText);
        }

        let mut last_error = None;

        if let Some(primary) = &self.primary {
            let _guard = if primary.is_native() {
                Some(self.native_lock.lock().await)
            } else {
                None
            };

            let attempts = [(voice_hint, false), (None, true)];
            for (voice, safe) in attempts {
                match self.run_backend(primary.as_ref(), &chunks, voice, safe, output, order, cancel).await {
                    Ok(track) => return Ok(track),
                    Err(SynthesisError::Cancelled) => return Err(SynthesisError::Cancelled),
                    Err(e) => {
                        if e.is_format_failure() {
                            warn!("{} rejected its output format for segment {}: {}", primary.name(), order, e);
                        } else {
                            warn!("{} failed for segment {} (safe={}): {}", primary.name(), order, safe, e);
                        }
                        last_error = Some(e);
                    }
                }
            }
        }

        if let Some(fallback) = &self.fallback {
            if self.primary.is_some() {
                info!("Falling back to {} for segment {}", fallback.name(), order);
            }
            return self
                .run_backend(fallback.as_ref(), &chunks, None, false, output, order, cancel)
                .await;
        }

        Err(last_error.unwrap_or(SynthesisError::NoBackend))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_backend(
        &self,
        backend: &dyn SpeechBackend,
        chunks: &[String],
        voice: Option<&str>,
        safe: bool,
        output: &Path,
        order: u32,
        cancel: &CancellationToken,
    ) -> Result<AudioTrack, SynthesisError> {
        let stem = output
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("audio_{:03}", order));
        let rate_wpm = if safe { self.tuning.base_rate_wpm } else { self.tuning.effective_rate() };

        let mut parts: Vec<PathBuf> = Vec::with_capacity(chunks.len());
        let result = async {
            for (i, chunk) in chunks.iter().enumerate() {
                let part = output.with_file_name(format!("{}_seg{}.wav", stem, i + 1));
                parts.push(part.clone());
                let request = ChunkRequest {
                    text: chunk,
                    voice,
                    rate_wpm,
                    output: &part,
                    safe,
                };
                backend.synthesize_chunk(&request, cancel).await?;
                if file_size(&part) == 0 {
                    return Err(SynthesisError::EmptyOutput {
                        backend: backend.name(),
                        path: part,
                    });
                }
            }

            if parts.len() == 1 {
                std::fs::rename(&parts[0], output).map_err(|e| SynthesisError::Io(e.to_string()))?;
            } else {
                join_wavs(&parts, output)?;
            }

            let track = measure_wav(output, order)?;
            if track.duration_seconds <= 0.0 {
                return Err(SynthesisError::EmptyOutput {
                    backend: backend.name(),
                    path: output.to_path_buf(),
                });
            }
            Ok(track)
        }
        .await;

        for part in &parts {
            remove_quietly(part);
        }
        match result {
            Ok(track) => {
                debug!(
                    "{} produced {:.2}s of audio for segment {} in {} chunk(s)",
                    backend.name(),
                    track.duration_seconds,
                    order,
                    chunks.len()
                );
                Ok(track)
            }
            Err(e) => {
                remove_quietly(output);
                Err(e)
            }
        }
    }
}

/*!
 * Clip encoding with tiered fallback.
 *
 * Each segment's slide and narration become one clip. An attempt that fails,
 * produces an unreadable file or drifts from the narration length moves the
 * encoder to the next tier:
 *
 * Primary -> Safe -> AlternateContainer -> (exhausted)
 *
 * A failed attempt never leaves a partial file behind.
 */

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::errors::EncodingError;
use crate::models::{AudioTrack, Clip, CodecMetadata, Container};
use crate::scratch::remove_quietly;

pub mod ffmpeg;

pub use ffmpeg::FfmpegEncoder;

/// Encoding parameter set tried for a clip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttemptTier {
    /// Preferred container, standard parameters
    Primary,
    /// Preferred container, conservative parameters
    Safe,
    /// The other container with its most compatible codecs
    AlternateContainer,
}

impl AttemptTier {
    /// Tier to try after this one fails
    pub fn next(self) -> Option<AttemptTier> {
        match self {
            AttemptTier::Primary => Some(AttemptTier::Safe),
            AttemptTier::Safe => Some(AttemptTier::AlternateContainer),
            AttemptTier::AlternateContainer => None,
        }
    }

    /// Container this tier writes, given the configured preference
    pub fn container(self, preferred: Container) -> Container {
        match self {
            AttemptTier::Primary | AttemptTier::Safe => preferred,
            AttemptTier::AlternateContainer => preferred.alternate(),
        }
    }

    /// Whether this tier uses the conservative parameter set
    pub fn is_safe(self) -> bool {
        matches!(self, AttemptTier::Safe)
    }
}

impl fmt::Display for AttemptTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttemptTier::Primary => "primary",
            AttemptTier::Safe => "safe",
            AttemptTier::AlternateContainer => "alternate-container",
        };
        f.write_str(name)
    }
}

/// Inputs for one encode attempt
#[derive(Debug, Clone)]
pub struct EncodeRequest<'a> {
    pub image: &'a Path,
    pub audio: &'a AudioTrack,
    pub output: PathBuf,
    pub tier: AttemptTier,
    pub container: Container,
}

/// What a backend measured on the file it produced
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedOutput {
    pub codec: CodecMetadata,
    pub duration_seconds: f64,
}

/// Common trait for clip encoder backends
#[async_trait]
pub trait EncoderBackend: Send + Sync + Debug {
    /// Encode `request` into `request.output` and report the measured result
    async fn encode(&self, request: &EncodeRequest<'_>, cancel: &CancellationToken) -> Result<EncodedOutput, EncodingError>;

    /// Largest allowed gap between clip and narration duration
    fn duration_tolerance(&self) -> f64;
}

// @struct: Tiered clip encoder
#[derive(Debug, Clone)]
pub struct ClipEncoder {
    backend: Arc<dyn EncoderBackend>,
    preferred: Container,
}

impl ClipEncoder {
    pub fn new(backend: Arc<dyn EncoderBackend>, preferred: Container) -> Self {
        Self { backend, preferred }
    }

    pub fn preferred_container(&self) -> Container {
        self.preferred
    }

    /// Encode one clip, walking the tiers until one verifies.
    ///
    /// `output_stem` is the clip path without extension; each tier adds its
    /// container's extension.
    pub async fn encode(
        &self,
        image: &Path,
        audio: &AudioTrack,
        output_stem: &Path,
        cancel: &CancellationToken,
    ) -> Result<Clip, EncodingError> {
        if audio.duration_seconds <= 0.0 {
            return Err(EncodingError::EmptyAudio { order: audio.order });
        }

        let mut tier = Some(AttemptTier::Primary);
        let mut last_error = String::new();

        while let Some(current) = tier {
            if cancel.is_cancelled() {
                return Err(EncodingError::Cancelled);
            }

            let container = current.container(self.preferred);
            let request = EncodeRequest {
                image,
                audio,
                output: output_stem.with_extension(container.extension()),
                tier: current,
                container,
            };
            debug!("Encoding segment {} with {} tier to {}", audio.order, current, request.output.display());

            let attempt = self
                .backend
                .encode(&request, cancel)
                .await
                .and_then(|encoded| self.verify(audio, encoded));

            match attempt {
                Ok(encoded) => {
                    if current != AttemptTier::Primary {
                        info!("Segment {} encoded with {} tier", audio.order, current);
                    }
                    return Ok(Clip {
                        path: request.output,
                        codec: encoded.codec,
                        duration_seconds: encoded.duration_seconds,
                        order: audio.order,
                        tier: current,
                    });
                }
                Err(e) if e.is_cancelled() => {
                    remove_quietly(&request.output);
                    return Err(EncodingError::Cancelled);
                }
                Err(e) => {
                    warn!("{} tier failed for segment {}: {}", current, audio.order, e);
                    remove_quietly(&request.output);
                    last_error = format!("{} tier: {}", current, e);
                    tier = current.next();
                }
            }
        }

        Err(EncodingError::Exhausted { last: last_error })
    }

    fn verify(&self, audio: &AudioTrack, encoded: EncodedOutput) -> Result<EncodedOutput, EncodingError> {
        if (encoded.duration_seconds - audio.duration_seconds).abs() > self.backend.duration_tolerance() {
            return Err(EncodingError::DurationMismatch {
                expected: audio.duration_seconds,
                actual: encoded.duration_seconds,
            });
        }
        Ok(encoded)
    }
}

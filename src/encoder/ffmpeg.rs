/*!
 * ffmpeg clip encoder.
 *
 * Parameter sets per container:
 * - mp4: H.264 still-image encode with AAC audio
 * - mov: MJPEG frames with PCM audio
 *
 * The conservative variant (safe and alternate-container tiers) forces even
 * frame dimensions, caps the frame rate at 1 fps and resamples audio to 44.1 kHz
 * stereo. Every produced file is read back with ffprobe before it is accepted.
 */

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{EncodeRequest, EncodedOutput, EncoderBackend};
use crate::app_config::EncoderTuning;
use crate::errors::EncodingError;
use crate::models::{CodecMetadata, Container};
use crate::process::{file_size, ToolInvocation, ToolRunner};

const EVEN_DIMENSIONS: &str = "scale=trunc(iw/2)*2:trunc(ih/2)*2";

// @struct: ffmpeg/ffprobe backed clip encoder
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    runner: Arc<dyn ToolRunner>,
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    tuning: EncoderTuning,
}

impl FfmpegEncoder {
    pub fn new(runner: Arc<dyn ToolRunner>, ffmpeg: PathBuf, ffprobe: PathBuf, tuning: EncoderTuning) -> Self {
        Self {
            runner,
            ffmpeg,
            ffprobe,
            tuning,
        }
    }

    /// Command line for one encode attempt
    pub fn encode_invocation(&self, request: &EncodeRequest<'_>) -> ToolInvocation {
        let conservative = request.tier != super::AttemptTier::Primary;
        let fps: u32 = if conservative { 1 } else { self.tuning.frame_rate.max(1) };
        let fps = fps.to_string();

        let mut invocation = ToolInvocation::new(&self.ffmpeg, Duration::from_secs(self.tuning.timeout_secs))
            .args(["-y", "-hide_banner", "-loglevel", "error", "-nostdin"])
            .args(["-loop", "1", "-framerate", fps.as_str(), "-i"])
            .arg(request.image)
            .arg("-i")
            .arg(&request.audio.path)
            .args(["-t", format!("{:.3}", request.audio.duration_seconds).as_str()])
            .args(["-map", "0:v:0", "-map", "1:a:0"]);

        invocation = match (request.container, conservative) {
            (Container::Mp4, false) => invocation
                .args(["-c:v", "libx264", "-preset", "ultrafast", "-tune", "stillimage"])
                .args(["-crf", self.tuning.crf.to_string().as_str()])
                .args(["-pix_fmt", "yuv420p", "-r", fps.as_str()])
                .args(["-c:a", "aac", "-b:a", self.tuning.audio_bitrate.as_str()]),
            (Container::Mp4, true) => invocation
                .args(["-vf", format!("{},format=yuv420p", EVEN_DIMENSIONS).as_str()])
                .args(["-c:v", "libx264", "-preset", "ultrafast", "-profile:v", "baseline"])
                .args(["-crf", self.tuning.crf.to_string().as_str()])
                .args(["-pix_fmt", "yuv420p", "-r", fps.as_str()])
                .args(["-c:a", "aac", "-b:a", self.tuning.audio_bitrate.as_str()])
                .args(["-ar", self.tuning.safe_sample_rate.to_string().as_str(), "-ac", "2"]),
            (Container::Mov, false) => invocation
                .args(["-c:v", "mjpeg", "-q:v", self.tuning.mjpeg_quality.to_string().as_str()])
                .args(["-pix_fmt", "yuvj420p", "-r", fps.as_str()])
                .args(["-c:a", "pcm_s16le"]),
            (Container::Mov, true) => invocation
                .args(["-vf", format!("{},format=yuvj420p", EVEN_DIMENSIONS).as_str()])
                .args(["-c:v", "mjpeg", "-q:v", self.tuning.mjpeg_quality.to_string().as_str()])
                .args(["-pix_fmt", "yuvj420p", "-r", fps.as_str()])
                .args(["-c:a", "pcm_s16le"])
                .args(["-ar", self.tuning.safe_sample_rate.to_string().as_str(), "-ac", "2"]),
        };

        if request.container == Container::Mp4 {
            invocation = invocation.args(["-movflags", "+faststart"]);
        }
        invocation
            .args(["-threads", "1", "-f", request.container.extension()])
            .arg(&request.output)
    }

    /// Read back stream parameters and duration of a media file
    pub async fn probe(&self, path: &Path, container: Container, cancel: &CancellationToken) -> Result<EncodedOutput, EncodingError> {
        let invocation = ToolInvocation::new(&self.ffprobe, Duration::from_secs(self.tuning.probe_timeout_secs))
            .args(["-v", "error", "-print_format", "json", "-show_streams", "-show_format"])
            .arg(path);
        let output = self.runner.run(&invocation, cancel).await.map_err(|e| {
            if e.is_cancelled() {
                EncodingError::Cancelled
            } else {
                EncodingError::CorruptOutput {
                    path: path.to_path_buf(),
                    reason: format!("ffprobe could not read the file: {}", e),
                }
            }
        })?;
        parse_probe_output(&output.stdout, path, container)
    }
}

/// Extract codec metadata and duration from `ffprobe -print_format json` output
pub fn parse_probe_output(stdout: &str, path: &Path, container: Container) -> Result<EncodedOutput, EncodingError> {
    let corrupt = |reason: &str| EncodingError::CorruptOutput {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let json: Value = serde_json::from_str(stdout).map_err(|e| corrupt(&format!("invalid ffprobe JSON: {}", e)))?;
    let streams = json
        .get("streams")
        .and_then(|s| s.as_array())
        .ok_or_else(|| corrupt("no streams"))?;

    let find = |kind: &str| {
        streams
            .iter()
            .find(|s| s.get("codec_type").and_then(|t| t.as_str()) == Some(kind))
    };
    let video = find("video").ok_or_else(|| corrupt("no video stream"))?;
    let audio = find("audio").ok_or_else(|| corrupt("no audio stream"))?;

    let text = |stream: &Value, key: &str| {
        stream
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string()
    };
    // ffprobe reports some numbers as strings
    let number = |value: Option<&Value>| -> Option<f64> {
        value.and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
    };

    let codec = CodecMetadata {
        container,
        video_codec: text(video, "codec_name"),
        pixel_format: text(video, "pix_fmt"),
        width: number(video.get("width")).unwrap_or(0.0) as u32,
        height: number(video.get("height")).unwrap_or(0.0) as u32,
        audio_codec: text(audio, "codec_name"),
        sample_rate: number(audio.get("sample_rate")).unwrap_or(0.0) as u32,
        channels: number(audio.get("channels")).unwrap_or(0.0) as u16,
    };
    if codec.width == 0 || codec.height == 0 {
        return Err(corrupt("video stream has no dimensions"));
    }

    let duration_seconds = number(json.get("format").and_then(|f| f.get("duration")))
        .or_else(|| number(audio.get("duration")))
        .ok_or_else(|| corrupt("no duration"))?;

    Ok(EncodedOutput { codec, duration_seconds })
}

#[async_trait]
impl EncoderBackend for FfmpegEncoder {
    async fn encode(&self, request: &EncodeRequest<'_>, cancel: &CancellationToken) -> Result<EncodedOutput, EncodingError> {
        let invocation = self.encode_invocation(request);
        self.runner.run(&invocation, cancel).await.map_err(|e| {
            if e.is_cancelled() {
                EncodingError::Cancelled
            } else {
                EncodingError::Tool(e)
            }
        })?;

        if file_size(&request.output) == 0 {
            return Err(EncodingError::CorruptOutput {
                path: request.output.clone(),
                reason: "output is missing or empty".to_string(),
            });
        }
        self.probe(&request.output, request.container, cancel).await
    }

    fn duration_tolerance(&self) -> f64 {
        // Video length is quantized to whole frames
        let frame = 1.0 / self.tuning.frame_rate.max(1) as f64;
        self.tuning.duration_tolerance_secs.max(frame)
    }
}

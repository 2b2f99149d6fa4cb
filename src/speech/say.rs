/*!
 * macOS `say` backend.
 *
 * Standard mode asks `say` for a 16-bit little-endian WAV directly. Some OS
 * builds reject that data format with `fmt?`; safe mode therefore lets `say`
 * write its native AIFF with the default voice and converts it with ffmpeg.
 */

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{ChunkRequest, SpeechBackend};
use crate::errors::SynthesisError;
use crate::process::{file_size, ToolInvocation, ToolRunner};
use crate::scratch::remove_quietly;

const NAME: &str = "say";

#[derive(Debug)]
pub struct SayBackend {
    runner: Arc<dyn ToolRunner>,
    say: PathBuf,
    ffmpeg: Option<PathBuf>,
    sample_rate: u32,
    timeout: Duration,
}

impl SayBackend {
    pub fn new(
        runner: Arc<dyn ToolRunner>,
        say: PathBuf,
        ffmpeg: Option<PathBuf>,
        sample_rate: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            say,
            ffmpeg,
            sample_rate,
            timeout,
        }
    }

    /// Command line for standard mode
    pub fn standard_invocation(&self, request: &ChunkRequest<'_>, text_file: &Path) -> ToolInvocation {
        let mut invocation = ToolInvocation::new(&self.say, self.timeout);
        if let Some(voice) = request.voice.filter(|v| !v.trim().is_empty()) {
            invocation = invocation.args(["-v", voice]);
        }
        invocation
            .args(["-r", request.rate_wpm.to_string().as_str()])
            .arg("--file-format=WAVE")
            .arg(format!("--data-format=LEI16@{}", self.sample_rate))
            .arg("-o")
            .arg(request.output)
            .arg("-f")
            .arg(text_file)
    }

    /// Command line for safe mode: default voice and rate, AIFF output
    pub fn safe_invocation(&self, aiff: &Path, text_file: &Path) -> ToolInvocation {
        ToolInvocation::new(&self.say, self.timeout)
            .arg("-o")
            .arg(aiff)
            .arg("-f")
            .arg(text_file)
    }

    async fn convert_to_wav(
        &self,
        aiff: &Path,
        request: &ChunkRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), SynthesisError> {
        let ffmpeg = self.ffmpeg.as_ref().ok_or_else(|| SynthesisError::UnreadableAudio {
            path: aiff.to_path_buf(),
            message: "ffmpeg is required to convert AIFF output".to_string(),
        })?;
        let invocation = ToolInvocation::new(ffmpeg, self.timeout)
            .args(["-y", "-hide_banner", "-loglevel", "error", "-i"])
            .arg(aiff)
            .args(["-acodec", "pcm_s16le", "-ac", "1", "-ar", self.sample_rate.to_string().as_str()])
            .arg(request.output);
        self.runner
            .run(&invocation, cancel)
            .await
            .map(|_| ())
            .map_err(|e| SynthesisError::from_tool(NAME, e))
    }
}

#[async_trait]
impl SpeechBackend for SayBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_native(&self) -> bool {
        true
    }

    async fn synthesize_chunk(&self, request: &ChunkRequest<'_>, cancel: &CancellationToken) -> Result<(), SynthesisError> {
        let text_file = request.output.with_extension("txt");
        std::fs::write(&text_file, request.text).map_err(|e| SynthesisError::Io(e.to_string()))?;

        let result = if request.safe {
            let aiff = request.output.with_extension("aiff");
            let spoken = self
                .runner
                .run(&self.safe_invocation(&aiff, &text_file), cancel)
                .await
                .map_err(|e| SynthesisError::from_tool(NAME, e));
            let converted = match spoken {
                Ok(_) if file_size(&aiff) == 0 => Err(SynthesisError::EmptyOutput {
                    backend: NAME,
                    path: aiff.clone(),
                }),
                Ok(_) => self.convert_to_wav(&aiff, request, cancel).await,
                Err(e) => Err(e),
            };
            remove_quietly(&aiff);
            converted
        } else {
            self.runner
                .run(&self.standard_invocation(request, &text_file), cancel)
                .await
                .map(|_| ())
                .map_err(|e| SynthesisError::from_tool(NAME, e))
        };

        remove_quietly(&text_file);
        result
    }
}

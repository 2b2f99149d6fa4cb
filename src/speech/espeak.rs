/*!
 * espeak-ng backend, the portable fallback.
 */

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{ChunkRequest, SpeechBackend};
use crate::errors::SynthesisError;
use crate::process::{ToolInvocation, ToolRunner};
use crate::scratch::remove_quietly;

const NAME: &str = "espeak";

#[derive(Debug)]
pub struct EspeakBackend {
    runner: Arc<dyn ToolRunner>,
    espeak: PathBuf,
    timeout: Duration,
}

impl EspeakBackend {
    pub fn new(runner: Arc<dyn ToolRunner>, espeak: PathBuf, timeout: Duration) -> Self {
        Self { runner, espeak, timeout }
    }

    pub fn invocation(&self, request: &ChunkRequest<'_>, text_file: &Path) -> ToolInvocation {
        let mut invocation = ToolInvocation::new(&self.espeak, self.timeout);
        if let Some(voice) = request.voice.filter(|v| !v.trim().is_empty()) {
            invocation = invocation.args(["-v", voice]);
        }
        if !request.safe {
            invocation = invocation.args(["-s", request.rate_wpm.to_string().as_str()]);
        }
        invocation.arg("-w").arg(request.output).arg("-f").arg(text_file)
    }
}

#[async_trait]
impl SpeechBackend for EspeakBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_native(&self) -> bool {
        false
    }

    async fn synthesize_chunk(&self, request: &ChunkRequest<'_>, cancel: &CancellationToken) -> Result<(), SynthesisError> {
        let text_file = request.output.with_extension("txt");
        std::fs::write(&text_file, request.text).map_err(|e| SynthesisError::Io(e.to_string()))?;

        let result = self
            .runner
            .run(&self.invocation(request, &text_file), cancel)
            .await
            .map(|_| ())
            .map_err(|e| SynthesisError::from_tool(NAME, e));

        remove_quietly(&text_file);
        result
    }
}

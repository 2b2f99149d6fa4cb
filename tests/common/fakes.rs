/*!
 * Fake backends for testing
 *
 * Each fake implements one of the pipeline's backend traits without running
 * external programs, records how it was called and can be scripted to fail.
 */

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use slidecast::concat::JoinBackend;
use slidecast::encoder::{AttemptTier, EncodeRequest, EncodedOutput, EncoderBackend};
use slidecast::errors::{ConcatError, EncodingError, PreflightError, SynthesisError, ToolError};
use slidecast::models::{Clip, CodecMetadata, Container, JoinPath};
use slidecast::preflight::SpaceProbe;
use slidecast::process::{ToolInvocation, ToolOutput, ToolRunner};
use slidecast::speech::{ChunkRequest, SpeechBackend};

use super::write_wav;

/// Tracks how many calls overlap in time
#[derive(Debug, Default)]
pub struct ConcurrencyGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGauge {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

fn tool_failure(program: &str, stderr: &str) -> ToolError {
    ToolError::NonZeroExit {
        program: program.to_string(),
        code: Some(1),
        stderr: stderr.to_string(),
    }
}

/// One recorded speech call
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechCall {
    pub text: String,
    pub voice: Option<String>,
    pub safe: bool,
}

/// Speech backend writing silent WAVs of a fixed length per chunk
#[derive(Debug)]
pub struct FakeSpeech {
    pub name: &'static str,
    pub native: bool,
    pub seconds_per_chunk: f64,
    pub delay: Duration,
    /// Standard-mode calls fail with a format error
    pub fail_standard: bool,
    /// Texts containing any of these always fail
    pub fail_when_contains: Vec<String>,
    pub calls: Mutex<Vec<SpeechCall>>,
    pub gauge: ConcurrencyGauge,
}

impl FakeSpeech {
    pub fn new() -> Self {
        Self {
            name: "fake-native",
            native: true,
            seconds_per_chunk: 0.5,
            delay: Duration::ZERO,
            fail_standard: false,
            fail_when_contains: Vec::new(),
            calls: Mutex::new(Vec::new()),
            gauge: ConcurrencyGauge::default(),
        }
    }

    pub fn calls(&self) -> Vec<SpeechCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl SpeechBackend for FakeSpeech {
    fn name(&self) -> &'static str {
        self.name
    }

    fn is_native(&self) -> bool {
        self.native
    }

    async fn synthesize_chunk(&self, request: &ChunkRequest<'_>, cancel: &CancellationToken) -> Result<(), SynthesisError> {
        self.calls.lock().unwrap().push(SpeechCall {
            text: request.text.to_string(),
            voice: request.voice.map(str::to_string),
            safe: request.safe,
        });

        self.gauge.enter();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.gauge.leave();

        if cancel.is_cancelled() {
            return Err(SynthesisError::Cancelled);
        }
        if self.fail_when_contains.iter().any(|needle| request.text.contains(needle.as_str())) {
            return Err(SynthesisError::from_tool(self.name, tool_failure(self.name, "voice unavailable")));
        }
        if self.fail_standard && !request.safe {
            return Err(SynthesisError::from_tool(
                self.name,
                tool_failure(self.name, "Opening output file failed: fmt?"),
            ));
        }

        write_wav(request.output, self.seconds_per_chunk).map_err(|e| SynthesisError::Io(e.to_string()))
    }
}

/// Scripted behaviour for one (segment, tier) encode
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EncodeScript {
    Succeed,
    FailTool,
    WrongDuration,
    Corrupt,
    /// Block until cancelled
    Hang,
}

/// Encoder backend that writes placeholder clips
#[derive(Debug)]
pub struct FakeEncoder {
    pub scripts: Mutex<HashMap<(u32, AttemptTier), EncodeScript>>,
    pub delay: Duration,
    pub calls: Mutex<Vec<(u32, AttemptTier, Container)>>,
    pub gauge: ConcurrencyGauge,
}

/// Codec parameters the fake reports per container
pub fn codec_for(container: Container) -> CodecMetadata {
    match container {
        Container::Mp4 => CodecMetadata {
            container,
            video_codec: "h264".to_string(),
            pixel_format: "yuv420p".to_string(),
            width: 640,
            height: 360,
            audio_codec: "aac".to_string(),
            sample_rate: 44_100,
            channels: 2,
        },
        Container::Mov => CodecMetadata {
            container,
            video_codec: "mjpeg".to_string(),
            pixel_format: "yuvj420p".to_string(),
            width: 640,
            height: 360,
            audio_codec: "pcm_s16le".to_string(),
            sample_rate: 44_100,
            channels: 2,
        },
    }
}

impl FakeEncoder {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            gauge: ConcurrencyGauge::default(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn script(&self, order: u32, tier: AttemptTier, script: EncodeScript) {
        self.scripts.lock().unwrap().insert((order, tier), script);
    }

    /// Make every tier fail for a segment
    pub fn fail_all_tiers(&self, order: u32) {
        for tier in [AttemptTier::Primary, AttemptTier::Safe, AttemptTier::AlternateContainer] {
            self.script(order, tier, EncodeScript::FailTool);
        }
    }

    pub fn calls(&self) -> Vec<(u32, AttemptTier, Container)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn tiers_for(&self, order: u32) -> Vec<AttemptTier> {
        self.calls()
            .into_iter()
            .filter(|(o, _, _)| *o == order)
            .map(|(_, tier, _)| tier)
            .collect()
    }
}

#[async_trait]
impl EncoderBackend for FakeEncoder {
    async fn encode(&self, request: &EncodeRequest<'_>, cancel: &CancellationToken) -> Result<EncodedOutput, EncodingError> {
        let order = request.audio.order;
        self.calls.lock().unwrap().push((order, request.tier, request.container));
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&(order, request.tier))
            .copied()
            .unwrap_or(EncodeScript::Succeed);

        self.gauge.enter();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if script == EncodeScript::Hang {
            cancel.cancelled().await;
        }
        self.gauge.leave();

        if cancel.is_cancelled() {
            return Err(EncodingError::Cancelled);
        }

        // Failing attempts leave debris behind; the encoder must clean it up
        std::fs::write(&request.output, b"fake clip").map_err(|e| EncodingError::CorruptOutput {
            path: request.output.clone(),
            reason: e.to_string(),
        })?;

        match script {
            EncodeScript::Succeed | EncodeScript::Hang => Ok(EncodedOutput {
                codec: codec_for(request.container),
                duration_seconds: request.audio.duration_seconds,
            }),
            EncodeScript::FailTool => Err(EncodingError::Tool(tool_failure("ffmpeg", "Conversion failed!"))),
            EncodeScript::WrongDuration => Ok(EncodedOutput {
                codec: codec_for(request.container),
                duration_seconds: request.audio.duration_seconds + 5.0,
            }),
            EncodeScript::Corrupt => Err(EncodingError::CorruptOutput {
                path: request.output.clone(),
                reason: "moov atom not found".to_string(),
            }),
        }
    }

    fn duration_tolerance(&self) -> f64 {
        0.5
    }
}

/// Join backend that records which path ran
#[derive(Debug, Default)]
pub struct FakeJoiner {
    pub fail_copy: bool,
    pub fail_reencode: bool,
    pub calls: Mutex<Vec<(JoinPath, Vec<u32>)>>,
}

impl FakeJoiner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(JoinPath, Vec<u32>)> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, path: JoinPath, clips: &[&Clip], output: &Path, fail: bool) -> Result<(), ConcatError> {
        self.calls
            .lock()
            .unwrap()
            .push((path, clips.iter().map(|c| c.order).collect()));
        if fail {
            return Err(ConcatError::Tool(tool_failure("ffmpeg", "Non-monotonous DTS")));
        }
        std::fs::write(output, b"joined video").map_err(|e| ConcatError::Io(e.to_string()))
    }
}

#[async_trait]
impl JoinBackend for FakeJoiner {
    async fn copy_join(&self, clips: &[&Clip], output: &Path, _work_dir: &Path, _cancel: &CancellationToken) -> Result<(), ConcatError> {
        self.record(JoinPath::CopyOnly, clips, output, self.fail_copy)
    }

    async fn reencode_join(&self, clips: &[&Clip], output: &Path, _work_dir: &Path, _cancel: &CancellationToken) -> Result<(), ConcatError> {
        self.record(JoinPath::Reencode, clips, output, self.fail_reencode)
    }
}

/// Space probe reporting a fixed amount of free space
#[derive(Debug)]
pub struct FakeSpaceProbe {
    pub free_bytes: u64,
    /// Free space for paths below a prefix, e.g. a separate output disk
    pub by_prefix: Vec<(PathBuf, u64)>,
    /// The n-th probe (from zero) reports this much instead
    pub low_on_call: Option<(usize, u64)>,
    pub calls: AtomicUsize,
}

impl FakeSpaceProbe {
    pub fn new(free_bytes: u64) -> Self {
        Self {
            free_bytes,
            by_prefix: Vec::new(),
            low_on_call: None,
            calls: AtomicUsize::new(0),
        }
    }
}

impl SpaceProbe for FakeSpaceProbe {
    fn available_bytes(&self, path: &Path) -> Result<u64, PreflightError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((n, bytes)) = self.low_on_call {
            if call == n {
                return Ok(bytes);
            }
        }
        let free = self
            .by_prefix
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix))
            .map(|(_, bytes)| *bytes)
            .unwrap_or(self.free_bytes);
        Ok(free)
    }
}

type Handler = Box<dyn Fn(&ToolInvocation) -> Result<ToolOutput, ToolError> + Send + Sync>;

/// Tool runner answering from a closure instead of spawning processes
pub struct ScriptedRunner {
    handler: Handler,
    pub invocations: Mutex<Vec<ToolInvocation>>,
}

impl std::fmt::Debug for ScriptedRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedRunner").finish()
    }
}

impl ScriptedRunner {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&ToolInvocation) -> Result<ToolOutput, ToolError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            invocations: Mutex::new(Vec::new()),
        })
    }

    pub fn invocations(&self) -> Vec<ToolInvocation> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolRunner for ScriptedRunner {
    async fn run(&self, invocation: &ToolInvocation, cancel: &CancellationToken) -> Result<ToolOutput, ToolError> {
        self.invocations.lock().unwrap().push(invocation.clone());
        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled {
                program: invocation.program_name(),
            });
        }
        (self.handler)(invocation)
    }
}

/// Value following `flag` in an invocation
pub fn arg_after(invocation: &ToolInvocation, flag: &str) -> Option<String> {
    let position = invocation.args.iter().position(|a| a == flag)?;
    invocation
        .args
        .get(position + 1)
        .map(|a| a.to_string_lossy().to_string())
}

/// Last argument of an invocation, usually the output path
pub fn last_arg(invocation: &ToolInvocation) -> String {
    invocation
        .args
        .last()
        .map(|a| a.to_string_lossy().to_string())
        .unwrap_or_default()
}

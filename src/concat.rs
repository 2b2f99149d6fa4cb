/*!
 * Joining per-segment clips into the final level video.
 *
 * When every clip reports identical codec parameters the streams are copied
 * with the concat demuxer. Mixed clips (e.g. one segment only succeeded in the
 * alternate container) are re-encoded through the concat filter, scaled to the
 * first clip's frame size.
 */

use async_trait::async_trait;
use log::{debug, info, warn};
use std::fmt::Debug;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::app_config::EncoderTuning;
use crate::errors::ConcatError;
use crate::models::{Clip, ClipSlot, Container, JoinPath};
use crate::process::{file_size, ToolInvocation, ToolRunner};
use crate::scratch::{remove_quietly, reserve_video_path};

/// The final video for a level
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedVideo {
    pub path: PathBuf,
    pub join_path: JoinPath,
    pub container: Container,
    /// Orders of the clips included, ascending
    pub included: Vec<u32>,
}

/// Common trait for join backends
#[async_trait]
pub trait JoinBackend: Send + Sync + Debug {
    /// Join clips without touching their streams
    async fn copy_join(&self, clips: &[&Clip], output: &Path, work_dir: &Path, cancel: &CancellationToken) -> Result<(), ConcatError>;

    /// Join clips by decoding and encoding them again into mp4
    async fn reencode_join(&self, clips: &[&Clip], output: &Path, work_dir: &Path, cancel: &CancellationToken) -> Result<(), ConcatError>;
}

/// Whether every clip shares the first clip's codec parameters
pub fn codecs_match(clips: &[&Clip]) -> bool {
    match clips.split_first() {
        Some((first, rest)) => rest.iter().all(|c| c.codec == first.codec),
        None => true,
    }
}

// @struct: Clip joiner
#[derive(Debug, Clone)]
pub struct Concatenator {
    backend: Arc<dyn JoinBackend>,
}

impl Concatenator {
    pub fn new(backend: Arc<dyn JoinBackend>) -> Self {
        Self { backend }
    }

    /// Join the clips present in `slots`, skipping gaps, into `video_dir`.
    ///
    /// Slots must be in ascending order. The output file name carries a
    /// timestamp and the level name, with a counter when that name is taken.
    pub async fn concatenate(
        &self,
        level: &str,
        slots: &[ClipSlot],
        video_dir: &Path,
        work_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<JoinedVideo, ConcatError> {
        let clips: Vec<&Clip> = slots.iter().filter_map(ClipSlot::clip).collect();
        if clips.is_empty() {
            return Err(ConcatError::NoClipsAvailable);
        }
        debug_assert!(clips.windows(2).all(|w| w[0].order < w[1].order));

        std::fs::create_dir_all(video_dir).map_err(|e| ConcatError::Io(e.to_string()))?;
        let included: Vec<u32> = clips.iter().map(|c| c.order).collect();
        let skipped = slots.len() - clips.len();
        if skipped > 0 {
            info!("Joining {} clip(s) for '{}', skipping {} missing", clips.len(), level, skipped);
        }

        if codecs_match(&clips) {
            let container = clips[0].codec.container;
            let output = reserve_video_path(video_dir, level, container).map_err(|e| ConcatError::Io(e.to_string()))?;
            match self.backend.copy_join(&clips, &output, work_dir, cancel).await {
                Ok(()) if file_size(&output) > 0 => {
                    return Ok(JoinedVideo {
                        path: output,
                        join_path: JoinPath::CopyOnly,
                        container,
                        included,
                    });
                }
                Ok(()) => warn!("Copy join produced an empty file for '{}', re-encoding", level),
                Err(ConcatError::Tool(e)) if e.is_cancelled() => {
                    remove_quietly(&output);
                    return Err(ConcatError::Tool(e));
                }
                Err(e) => warn!("Copy join failed for '{}', re-encoding: {}", level, e),
            }
            remove_quietly(&output);
        } else {
            debug!("Clip parameters differ for '{}', re-encoding on join", level);
        }

        let output = reserve_video_path(video_dir, level, Container::Mp4).map_err(|e| ConcatError::Io(e.to_string()))?;
        if let Err(e) = self.backend.reencode_join(&clips, &output, work_dir, cancel).await {
            remove_quietly(&output);
            return Err(e);
        }
        if file_size(&output) == 0 {
            remove_quietly(&output);
            return Err(ConcatError::Io(format!("joined video {} is empty", output.display())));
        }
        Ok(JoinedVideo {
            path: output,
            join_path: JoinPath::Reencode,
            container: Container::Mp4,
            included,
        })
    }
}

/// Quote a path for an ffmpeg concat list
fn concat_list_entry(path: &Path) -> String {
    format!("file '{}'", path.to_string_lossy().replace('\'', "'\\''"))
}

// @struct: ffmpeg backed joiner
#[derive(Debug, Clone)]
pub struct FfmpegJoiner {
    runner: Arc<dyn ToolRunner>,
    ffmpeg: PathBuf,
    tuning: EncoderTuning,
}

impl FfmpegJoiner {
    pub fn new(runner: Arc<dyn ToolRunner>, ffmpeg: PathBuf, tuning: EncoderTuning) -> Self {
        Self { runner, ffmpeg, tuning }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.tuning.concat_timeout_secs)
    }

    /// Write the concat demuxer list and return its path
    pub fn write_list(clips: &[&Clip], work_dir: &Path) -> Result<PathBuf, ConcatError> {
        std::fs::create_dir_all(work_dir).map_err(|e| ConcatError::Io(e.to_string()))?;
        let list_path = work_dir.join("concat.txt");
        let mut file = std::fs::File::create(&list_path).map_err(|e| ConcatError::Io(e.to_string()))?;
        for clip in clips {
            let absolute = std::path::absolute(&clip.path).map_err(|e| ConcatError::Io(e.to_string()))?;
            writeln!(file, "{}", concat_list_entry(&absolute)).map_err(|e| ConcatError::Io(e.to_string()))?;
        }
        Ok(list_path)
    }

    /// Command line for a stream-copy join
    pub fn copy_invocation(&self, list: &Path, output: &Path, container: Container) -> ToolInvocation {
        let mut invocation = ToolInvocation::new(&self.ffmpeg, self.timeout())
            .args(["-y", "-hide_banner", "-loglevel", "error", "-nostdin"])
            .args(["-f", "concat", "-safe", "0", "-i"])
            .arg(list)
            .args(["-c", "copy"]);
        if container == Container::Mp4 {
            invocation = invocation.args(["-movflags", "+faststart"]);
        }
        invocation.arg(output)
    }

    /// Command line for a filter-graph join into mp4
    pub fn reencode_invocation(&self, clips: &[&Clip], output: &Path) -> ToolInvocation {
        let (width, height) = clips
            .first()
            .map(|c| (c.codec.width & !1, c.codec.height & !1))
            .unwrap_or((640, 360));
        let fps = self.tuning.frame_rate.max(1);
        let rate = self.tuning.safe_sample_rate;

        let mut invocation = ToolInvocation::new(&self.ffmpeg, self.timeout())
            .args(["-y", "-hide_banner", "-loglevel", "error", "-nostdin"]);
        for clip in clips {
            invocation = invocation.arg("-i").arg(&clip.path);
        }

        let mut graph = String::new();
        let mut pads = String::new();
        for i in 0..clips.len() {
            graph.push_str(&format!(
                "[{i}:v]scale={width}:{height}:force_original_aspect_ratio=decrease,\
                 pad={width}:{height}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps},format=yuv420p[v{i}];\
                 [{i}:a]aresample={rate},aformat=channel_layouts=stereo[a{i}];"
            ));
            pads.push_str(&format!("[v{i}][a{i}]"));
        }
        graph.push_str(&format!("{pads}concat=n={}:v=1:a=1[outv][outa]", clips.len()));

        invocation
            .args(["-filter_complex", graph.as_str()])
            .args(["-map", "[outv]", "-map", "[outa]"])
            .args(["-c:v", "libx264", "-preset", "ultrafast", "-tune", "stillimage"])
            .args(["-crf", self.tuning.crf.to_string().as_str(), "-pix_fmt", "yuv420p"])
            .args(["-c:a", "aac", "-b:a", self.tuning.audio_bitrate.as_str()])
            .args(["-movflags", "+faststart", "-threads", "1"])
            .arg(output)
    }
}

#[async_trait]
impl JoinBackend for FfmpegJoiner {
    async fn copy_join(&self, clips: &[&Clip], output: &Path, work_dir: &Path, cancel: &CancellationToken) -> Result<(), ConcatError> {
        let list = Self::write_list(clips, work_dir)?;
        let container = clips.first().map(|c| c.codec.container).unwrap_or_default();
        let result = self.runner.run(&self.copy_invocation(&list, output, container), cancel).await;
        remove_quietly(&list);
        result.map(|_| ()).map_err(ConcatError::from)
    }

    async fn reencode_join(&self, clips: &[&Clip], output: &Path, _work_dir: &Path, cancel: &CancellationToken) -> Result<(), ConcatError> {
        self.runner
            .run(&self.reencode_invocation(clips, output), cancel)
            .await
            .map(|_| ())
            .map_err(ConcatError::from)
    }
}

/*!
 * One level from preflight to its final outcome.
 *
 * Per segment, narration synthesis and slide rendering run concurrently, then
 * the clip is encoded under the run-wide encode limit. Every segment resolves
 * to an explicit `ClipSlot` before the join starts, so a failed segment shows
 * up as a gap rather than shifting its neighbours.
 */

use futures::future::join_all;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::{PipelineServices, ProgressEvent, ProgressSink};
use crate::app_config::Config;
use crate::errors::{ConcatError, EncodingError, PreflightError, RenderError, SynthesisError};
use crate::models::{
    AudioTrack, ClipSlot, Diagnostic, FailureKind, PipelineResult, Segment, Stage,
};
use crate::preflight::{estimate_level_bytes, estimate_narration_seconds, estimate_output_bytes};
use crate::process::file_size;
use crate::scratch::{remove_quietly, LevelKey, ScratchSpace};

// @struct: Everything one level run needs, borrowed from the orchestrator
pub struct LevelRun<'a> {
    pub level: &'a str,
    /// Scratch directory of this level, unique within the run
    pub key: LevelKey,
    pub config: &'a Config,
    pub services: &'a PipelineServices,
    pub scratch: &'a ScratchSpace,
    pub encode_slots: &'a Semaphore,
    pub progress: Option<&'a ProgressSink>,
    pub cancel: CancellationToken,
}

/// Result of one segment: its slot and the failure that emptied it, if any
type SegmentOutcome = (ClipSlot, Option<Diagnostic>);

fn missing(order: u32, stage: Stage, kind: FailureKind, message: impl Into<String>) -> SegmentOutcome {
    (
        ClipSlot::Missing { order, kind },
        Some(Diagnostic::segment(order, stage, kind, message)),
    )
}

impl LevelRun<'_> {
    fn emit(&self, event: ProgressEvent) {
        if let Some(sink) = self.progress {
            sink(event);
        }
    }

    fn finish(&self, result: PipelineResult) -> PipelineResult {
        self.scratch.discard_level(&self.key);
        info!("Level '{}' finished: {:?}", self.level, result.outcome());
        self.emit(ProgressEvent::LevelFinished {
            level: self.level.to_string(),
            outcome: result.outcome(),
        });
        result
    }

    fn cancelled(&self) -> PipelineResult {
        warn!("Level '{}' was cancelled; discarding its scratch", self.level);
        self.finish(PipelineResult::text_only(
            self.level,
            vec![Diagnostic::level(Stage::Encode, FailureKind::Cancelled, "Video generation was cancelled")],
        ))
    }

    /// Run the level and classify its outcome
    pub async fn run(&self, segments: &[Segment]) -> PipelineResult {
        let options = &self.config.render;
        self.emit(ProgressEvent::LevelStarted {
            level: self.level.to_string(),
            segments: segments.len(),
        });

        if !options.create_video || segments.is_empty() {
            debug!("Level '{}': video disabled or nothing to render", self.level);
            return self.finish(PipelineResult::text_only(self.level, Vec::new()));
        }

        if let Err(e) = self.preflight(segments) {
            let diagnostics = vec![Diagnostic::level(Stage::Preflight, FailureKind::InsufficientSpace, e.to_string())];
            return self.finish(if options.video_mandatory {
                PipelineResult::failed(self.level, diagnostics)
            } else {
                PipelineResult::text_only(self.level, diagnostics)
            });
        }

        let outcomes = join_all(segments.iter().map(|s| self.process_segment(s))).await;
        if self.cancel.is_cancelled() {
            return self.cancelled();
        }

        let mut slots = Vec::with_capacity(outcomes.len());
        let mut diagnostics = Vec::new();
        for (slot, diagnostic) in outcomes {
            slots.push(slot);
            diagnostics.extend(diagnostic);
        }
        slots.sort_by_key(ClipSlot::order);
        diagnostics.sort_by_key(|d| d.order);

        let clips = slots.iter().filter(|s| s.clip().is_some()).count();
        self.emit(ProgressEvent::Joining {
            level: self.level.to_string(),
            clips,
        });

        let joined = match self.scratch.concat_dir(&self.key) {
            Ok(work_dir) => {
                self.services
                    .concatenator
                    .concatenate(self.level, &slots, &options.video_dir(), &work_dir, &self.cancel)
                    .await
            }
            Err(e) => Err(ConcatError::Io(e.to_string())),
        };

        match joined {
            Ok(video) => {
                info!(
                    "Level '{}' video: {} ({:?}, {} of {} segments)",
                    self.level,
                    video.path.display(),
                    video.join_path,
                    video.included.len(),
                    slots.len()
                );
                self.finish(PipelineResult::with_video(self.level, video.path, video.join_path, diagnostics))
            }
            Err(_) if self.cancel.is_cancelled() => self.cancelled(),
            Err(e) => {
                error!("Level '{}' produced no video: {}", self.level, e);
                diagnostics.push(Diagnostic::level(Stage::Concat, FailureKind::ConcatenationFailure, e.to_string()));
                self.finish(PipelineResult::failed(self.level, diagnostics))
            }
        }
    }

    fn preflight(&self, segments: &[Segment]) -> Result<(), PreflightError> {
        let chars: usize = segments.iter().map(|s| s.narration().chars().count()).sum();
        let per_segment = estimate_narration_seconds(chars, self.config.speech.effective_rate()) / segments.len() as f64;
        let style = self.services.renderer.style();
        let frame_rate = self.config.encoder.frame_rate;
        let scratch_estimate = estimate_level_bytes(segments.len(), style.width, style.height, per_segment, frame_rate);
        let output_estimate = estimate_output_bytes(segments.len(), style.width, style.height, per_segment, frame_rate);

        let preflight = &self.services.preflight;
        let checks = [
            preflight.check_output(&self.config.render.video_dir(), output_estimate),
            preflight.check_level(self.scratch.root(), scratch_estimate),
        ];
        for check in checks {
            match check {
                Ok(_) => {}
                Err(e @ PreflightError::InsufficientSpace { .. }) => return Err(e),
                Err(e) => {
                    // Free space unknown: proceed and let the encoder fail if it must
                    warn!("Disk preflight skipped for '{}': {}", self.level, e);
                }
            }
        }
        Ok(())
    }

    async fn process_segment(&self, segment: &Segment) -> SegmentOutcome {
        let order = segment.order;
        let outcome = self.build_clip(segment).await;
        self.emit(ProgressEvent::SegmentFinished {
            level: self.level.to_string(),
            order,
            ok: outcome.0.clip().is_some(),
        });
        outcome
    }

    async fn build_clip(&self, segment: &Segment) -> SegmentOutcome {
        let order = segment.order;
        let paths = (
            self.scratch.artifact_path(&self.key, order, Stage::Synthesis, "wav"),
            self.scratch.artifact_path(&self.key, order, Stage::Render, "png"),
            self.scratch.artifact_path(&self.key, order, Stage::Encode, "mp4"),
        );
        let (audio_path, slide_path, clip_stem) = match paths {
            (Ok(a), Ok(s), Ok(c)) => (a, s, c),
            (a, s, c) => {
                let message = [a.err(), s.err(), c.err()]
                    .into_iter()
                    .flatten()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                return missing(order, Stage::Synthesis, FailureKind::SynthesisFailure, message);
            }
        };

        let narration = segment.narration();
        let voice = self.config.render.voice_hint.as_deref();
        let (audio, slide) = tokio::join!(
            self.services.synthesizer.synthesize(&narration, voice, &audio_path, order, &self.cancel),
            self.render_slide(segment, slide_path.clone())
        );

        let outcome = match (audio, slide) {
            _ if self.cancel.is_cancelled() => missing(order, Stage::Encode, FailureKind::Cancelled, "cancelled"),
            (Err(SynthesisError::Cancelled), _) => missing(order, Stage::Synthesis, FailureKind::Cancelled, "cancelled"),
            (Err(e), _) => {
                warn!("Narration failed for segment {} of '{}': {}", order, self.level, e);
                missing(order, Stage::Synthesis, FailureKind::SynthesisFailure, e.to_string())
            }
            (Ok(_), Err(e)) => {
                warn!("Slide failed for segment {} of '{}': {}", order, self.level, e);
                missing(order, Stage::Render, FailureKind::RenderFailure, e.to_string())
            }
            (Ok(audio), Ok(())) => self.encode_clip(&slide_path, &audio, &clip_stem).await,
        };

        remove_quietly(&audio_path);
        remove_quietly(&slide_path);
        outcome
    }

    async fn render_slide(&self, segment: &Segment, path: PathBuf) -> Result<(), RenderError> {
        let renderer = self.services.renderer.clone();
        let (title, body, order) = (segment.title.clone(), segment.body.clone(), segment.order);
        tokio::task::spawn_blocking(move || renderer.render(&title, &body, order)?.save_png(&path))
            .await
            .map_err(|e| RenderError::Write {
                path: PathBuf::new(),
                message: format!("render task failed: {}", e),
            })?
    }

    async fn encode_clip(&self, slide: &Path, audio: &AudioTrack, clip_stem: &Path) -> SegmentOutcome {
        let order = audio.order;

        if let Err(e) = self.services.preflight.check_clip(self.scratch.root()) {
            warn!("Skipping clip {} of '{}': {}", order, self.level, e);
            return missing(order, Stage::Encode, FailureKind::InsufficientSpace, e.to_string());
        }

        let _permit = tokio::select! {
            permit = self.encode_slots.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return missing(order, Stage::Encode, FailureKind::Cancelled, "encoder pool closed"),
            },
            _ = self.cancel.cancelled() => {
                return missing(order, Stage::Encode, FailureKind::Cancelled, "cancelled");
            }
        };

        match self.services.encoder.encode(slide, audio, clip_stem, &self.cancel).await {
            Ok(clip) => {
                self.services
                    .preflight
                    .record_written(file_size(&clip.path) + file_size(&audio.path));
                (ClipSlot::Encoded(clip), None)
            }
            Err(EncodingError::Cancelled) => missing(order, Stage::Encode, FailureKind::Cancelled, "cancelled"),
            Err(e) => {
                warn!("Clip failed for segment {} of '{}': {}", order, self.level, e);
                missing(order, Stage::Encode, FailureKind::EncodingFailure, e.to_string())
            }
        }
    }
}

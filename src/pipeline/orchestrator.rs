/*!
 * Runs every requested level and returns one result per level.
 *
 * Levels run on a bounded pool. Clip encodes share one run-wide limit across
 * all levels, and narration through the native voice is serialized inside the
 * synthesizer. A level that fails never affects its siblings.
 */

use futures::future::join_all;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use super::{LevelRequest, LevelRun, PipelineServices, ProgressSink, RunControl};
use crate::app_config::Config;
use crate::errors::AppError;
use crate::models::{Diagnostic, FailureKind, PipelineResult, Stage};
use crate::scratch::{purge_stale, LevelKey, ScratchSpace};

// @struct: Multi-level pipeline driver
pub struct PipelineOrchestrator {
    config: Arc<Config>,
    services: PipelineServices,
    level_slots: Semaphore,
    encode_slots: Semaphore,
    progress: Option<ProgressSink>,
}

impl PipelineOrchestrator {
    pub fn new(config: Arc<Config>, services: PipelineServices) -> Self {
        let level_slots = Semaphore::new(config.render.max_concurrent_levels.max(1));
        let encode_slots = Semaphore::new(config.render.max_concurrent_encodes.max(1));
        Self {
            config,
            services,
            level_slots,
            encode_slots,
            progress: None,
        }
    }

    /// Receive progress events while levels run
    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run all levels and return their results in request order.
    ///
    /// Only a level name requested twice or failing to set up scratch storage
    /// is an error; everything that goes wrong inside a level is reported
    /// through its `PipelineResult`.
    pub async fn run(&self, requests: &[LevelRequest], control: &RunControl) -> Result<Vec<PipelineResult>, AppError> {
        let options = &self.config.render;

        // Levels are addressed by name for cancellation and results
        let mut seen = HashSet::new();
        if let Some(duplicate) = requests.iter().map(LevelRequest::level).find(|level| !seen.insert(*level)) {
            return Err(AppError::Config(format!("Level '{}' is requested more than once", duplicate)));
        }

        let scratch = if options.create_video {
            let max_age = Duration::from_secs(self.config.preflight.stale_max_age_hours * 3600);
            let purged = purge_stale(&options.scratch_root, max_age);
            if purged > 0 {
                info!("Removed {} stale scratch entries", purged);
            }
            Some(ScratchSpace::create(&options.scratch_root).map_err(|e| AppError::File(e.to_string()))?)
        } else {
            None
        };

        let runs = requests
            .iter()
            .enumerate()
            .map(|(index, request)| self.run_level(index + 1, request, scratch.as_ref(), control));
        let results = join_all(runs).await;

        if let Some(scratch) = &scratch {
            debug!(
                "Run finished; {} file(s) left in scratch before cleanup",
                scratch.file_count()
            );
        }
        Ok(results)
    }

    async fn run_level(
        &self,
        position: usize,
        request: &LevelRequest,
        scratch: Option<&ScratchSpace>,
        control: &RunControl,
    ) -> PipelineResult {
        let level = request.level();
        let cancel = control.token_for(level);

        let _slot = tokio::select! {
            slot = self.level_slots.acquire() => slot.ok(),
            _ = cancel.cancelled() => None,
        };
        if cancel.is_cancelled() {
            warn!("Level '{}' cancelled before it started", level);
            return PipelineResult::text_only(
                level,
                vec![Diagnostic::level(Stage::Preflight, FailureKind::Cancelled, "Video generation was cancelled")],
            );
        }

        let scratch = match scratch {
            Some(scratch) => scratch,
            // No scratch means video is disabled for the whole run
            None => return PipelineResult::text_only(level, Vec::new()),
        };

        info!("Rendering level '{}' ({} segments)", level, request.segments().len());
        LevelRun {
            level,
            key: LevelKey::new(position, level),
            config: &self.config,
            services: &self.services,
            scratch,
            encode_slots: &self.encode_slots,
            progress: self.progress.as_ref(),
            cancel,
        }
        .run(request.segments())
        .await
    }
}

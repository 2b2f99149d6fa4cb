/*!
 * Disk-space preflight.
 *
 * A level is checked once before any work starts: the scratch root against
 * an estimate of its total footprint, and the video directory against the
 * size of the joined video. During encoding each clip re-checks a lower floor
 * on the scratch root; the filesystem is only queried again after enough
 * bytes have been written since the last probe.
 */

use log::{debug, warn};
use parking_lot::Mutex;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::app_config::PreflightTuning;
use crate::errors::PreflightError;

const MB: u64 = 1024 * 1024;

/// Average characters per spoken word, used for duration estimates
const CHARS_PER_WORD: f64 = 5.5;

/// Reports free space for a directory
pub trait SpaceProbe: Send + Sync + Debug {
    fn available_bytes(&self, path: &Path) -> Result<u64, PreflightError>;
}

/// Probe backed by the real filesystem
#[derive(Debug, Default, Clone)]
pub struct FsSpaceProbe;

impl SpaceProbe for FsSpaceProbe {
    fn available_bytes(&self, path: &Path) -> Result<u64, PreflightError> {
        // The scratch root may not exist yet; ask about its nearest ancestor
        let existing = path
            .ancestors()
            .find(|p| p.exists())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs2::available_space(&existing).map_err(|e| PreflightError::Probe {
            path: existing,
            message: e.to_string(),
        })
    }
}

/// Expected narration length for `chars` characters at `rate_wpm`
pub fn estimate_narration_seconds(chars: usize, rate_wpm: u32) -> f64 {
    if rate_wpm == 0 {
        return 0.0;
    }
    (chars as f64 / CHARS_PER_WORD) / rate_wpm as f64 * 60.0
}

fn clip_bytes(width: u32, height: u32, seconds: f64, frame_rate: u32) -> u64 {
    let frame = width as u64 * height as u64 * 3;
    (seconds * (frame as f64 / 10.0 * frame_rate.max(1) as f64 + 44_100.0 * 2.0 * 2.0)) as u64
}

/// Advisory upper bound on the bytes one level writes.
///
/// Counts per segment a 16 kHz mono WAV, an uncompressed RGB slide and a clip
/// at roughly one tenth of a raw frame per second plus 44.1 kHz stereo PCM.
/// The joined video costs the sum of the clips once more.
pub fn estimate_level_bytes(segment_count: usize, width: u32, height: u32, narration_seconds: f64, frame_rate: u32) -> u64 {
    let seconds = narration_seconds.max(1.0);
    let frame = width as u64 * height as u64 * 3;
    let audio = (seconds * 16_000.0 * 2.0) as u64;
    let clip = clip_bytes(width, height, seconds, frame_rate);
    let per_segment = audio + frame + clip;
    segment_count as u64 * (per_segment + clip)
}

/// Advisory size of the joined video written to the output directory
pub fn estimate_output_bytes(segment_count: usize, width: u32, height: u32, narration_seconds: f64, frame_rate: u32) -> u64 {
    segment_count as u64 * clip_bytes(width, height, narration_seconds.max(1.0), frame_rate)
}

#[derive(Debug, Default)]
struct ProbeState {
    last_available: Option<u64>,
    written_since_probe: u64,
}

// @struct: Disk-space gate shared by all levels of a run
#[derive(Debug)]
pub struct DiskPreflight {
    probe: Arc<dyn SpaceProbe>,
    tuning: PreflightTuning,
    state: Mutex<ProbeState>,
}

impl DiskPreflight {
    pub fn new(probe: Arc<dyn SpaceProbe>, tuning: PreflightTuning) -> Self {
        Self {
            probe,
            tuning,
            state: Mutex::new(ProbeState::default()),
        }
    }

    /// Bytes a level must have free: the estimate, never below the run floor
    pub fn required_for_level(&self, estimate: u64) -> u64 {
        estimate.max(self.tuning.min_free_mb_run * MB)
    }

    /// Check that `scratch_root` can hold a level needing `estimate` bytes.
    ///
    /// Returns the free space observed.
    pub fn check_level(&self, scratch_root: &Path, estimate: u64) -> Result<u64, PreflightError> {
        let needed = self.required_for_level(estimate);
        let available = self.probe_now(scratch_root)?;
        ensure_room(scratch_root, needed, available)
    }

    /// Check that `video_dir` can take a joined video of `estimate` bytes.
    ///
    /// The run floor applies here too. The reading is not cached, since the
    /// output may live on another filesystem than the scratch root.
    pub fn check_output(&self, video_dir: &Path, estimate: u64) -> Result<u64, PreflightError> {
        let needed = self.required_for_level(estimate);
        let available = self.probe.available_bytes(video_dir)?;
        ensure_room(video_dir, needed, available)
    }

    /// Check the per-clip floor before an encode
    pub fn check_clip(&self, scratch_root: &Path) -> Result<(), PreflightError> {
        let floor = self.tuning.min_free_mb_clip * MB;
        let cached = {
            let state = self.state.lock();
            match state.last_available {
                Some(available) if state.written_since_probe < self.tuning.recheck_after_mb * MB => {
                    Some(available.saturating_sub(state.written_since_probe))
                }
                _ => None,
            }
        };
        let available = match cached {
            Some(available) => available,
            None => self.probe_now(scratch_root)?,
        };
        if available < floor {
            return Err(PreflightError::InsufficientSpace {
                needed: floor,
                available,
                path: scratch_root.to_path_buf(),
            });
        }
        Ok(())
    }

    /// Account for bytes written since the last probe
    pub fn record_written(&self, bytes: u64) {
        self.state.lock().written_since_probe += bytes;
    }

    /// Free space seen by the most recent probe
    pub fn last_available(&self) -> Option<u64> {
        self.state.lock().last_available
    }

    fn probe_now(&self, path: &Path) -> Result<u64, PreflightError> {
        let available = self.probe.available_bytes(path)?;
        let mut state = self.state.lock();
        state.last_available = Some(available);
        state.written_since_probe = 0;
        Ok(available)
    }
}

fn ensure_room(path: &Path, needed: u64, available: u64) -> Result<u64, PreflightError> {
    debug!(
        "Preflight for {}: need {} MB, {} MB free",
        path.display(),
        needed / MB,
        available / MB
    );
    if available < needed {
        warn!(
            "Insufficient disk space in {}: need {} MB, {} MB free",
            path.display(),
            needed / MB,
            available / MB
        );
        return Err(PreflightError::InsufficientSpace {
            needed,
            available,
            path: path.to_path_buf(),
        });
    }
    Ok(available)
}

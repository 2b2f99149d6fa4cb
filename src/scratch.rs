/*!
 * Scratch storage for intermediate artifacts.
 *
 * A run owns one temporary directory under the scratch root. Each requested
 * level gets its own subdirectory keyed by its position in the run, and every
 * artifact path is derived from (level, segment order, stage), so no two
 * workers ever write the same file. The run directory is removed when the
 * `ScratchSpace` is dropped.
 */

use anyhow::{Context, Result};
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use walkdir::WalkDir;

use crate::models::{Container, Stage};

/// Prefix of per-run scratch directories
pub const RUN_DIR_PREFIX: &str = "cx_";

/// Prefixes of entries that the stale purge is allowed to delete
pub const STALE_PREFIXES: [&str; 3] = ["cx_", "cxconcat_", "tmp_cx_"];

static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[^a-zA-Z0-9_\-\.]+").expect("static regex is valid")
});

/// Replace anything outside `[A-Za-z0-9_.-]` with underscores
pub fn safe_filename(name: &str) -> String {
    UNSAFE_CHARS.replace_all(name, "_").to_string()
}

/// Timestamp used in output file names
pub fn timestamp() -> String {
    chrono::Local::now().format("%Y%m%d-%H%M%S").to_string()
}

/// Attempts at finding a free output name before giving up
const MAX_NAME_ATTEMPTS: u32 = 100;

/// Claim a new output file: `<dir>/<timestamp>_<level>[_n].<extension>`.
///
/// The file is created empty with `create_new`, so two levels finishing in the
/// same second never share an output; the writer overwrites it.
pub fn reserve_output_path(dir: &Path, level: &str, extension: &str) -> io::Result<PathBuf> {
    let stem = format!("{}_{}", timestamp(), safe_filename(level));
    for attempt in 1..=MAX_NAME_ATTEMPTS {
        let name = if attempt == 1 {
            format!("{}.{}", stem, extension)
        } else {
            format!("{}_{}.{}", stem, attempt, extension)
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => return Ok(path),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free output name for '{}' in {}", stem, dir.display()),
    ))
}

/// Claim the final video file of a level
pub fn reserve_video_path(video_dir: &Path, level: &str, container: Container) -> io::Result<PathBuf> {
    reserve_output_path(video_dir, level, container.extension())
}

/// Remove a file, logging instead of failing
pub fn remove_quietly(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            debug!("Failed to remove scratch file {}: {}", path.display(), e);
        }
    }
}

/// Delete scratch entries with known prefixes older than `max_age`.
///
/// Returns the number of entries removed.
pub fn purge_stale(root: &Path, max_age: Duration) -> usize {
    if !root.exists() {
        return 0;
    }
    let now = SystemTime::now();
    let mut removed = 0;

    for entry in WalkDir::new(root).min_depth(1).max_depth(1).into_iter().filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy().to_string();
        if !STALE_PREFIXES.iter().any(|p| name.starts_with(p)) {
            continue;
        }
        let age = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|modified| now.duration_since(modified).ok());
        if !age.is_some_and(|age| age > max_age) {
            continue;
        }
        let path = entry.path();
        let result = if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to purge stale scratch {}: {}", path.display(), e),
        }
    }

    if removed > 0 {
        debug!("Purged {} stale scratch entries from {}", removed, root.display());
    }
    removed
}

/// Scratch directory name of one requested level.
///
/// Always `lvl_<position>_<safe name>`, so it is never empty, never `.` or
/// `..`, and distinct for every level of a run even when names sanitize alike.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LevelKey(String);

impl LevelKey {
    pub fn new(position: usize, level: &str) -> Self {
        Self(format!("lvl_{:02}_{}", position, safe_filename(level)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// @struct: Per-run scratch directory
#[derive(Debug)]
pub struct ScratchSpace {
    root: PathBuf,
    run_dir: TempDir,
}

impl ScratchSpace {
    /// Create a fresh run directory under `root`, creating `root` if needed
    pub fn create(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)
            .with_context(|| format!("Failed to create scratch root: {}", root.display()))?;
        let run_dir = tempfile::Builder::new()
            .prefix(RUN_DIR_PREFIX)
            .tempdir_in(root)
            .with_context(|| format!("Failed to create run directory in {}", root.display()))?;
        debug!("Scratch run directory: {}", run_dir.path().display());
        Ok(Self {
            root: root.to_path_buf(),
            run_dir,
        })
    }

    /// Scratch root shared by all runs
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// This run's directory
    pub fn run_dir(&self) -> &Path {
        self.run_dir.path()
    }

    /// Directory holding one level's artifacts
    pub fn level_dir(&self, key: &LevelKey) -> PathBuf {
        self.run_dir.path().join(key.as_str())
    }

    /// Unique path for one artifact; creates the level directory
    pub fn artifact_path(&self, key: &LevelKey, order: u32, stage: Stage, extension: &str) -> Result<PathBuf> {
        let dir = self.level_dir(key);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create level scratch dir: {}", dir.display()))?;
        Ok(dir.join(format!("{}_{:03}.{}", stage.as_str(), order, extension)))
    }

    /// Scratch directory for a level's join step
    pub fn concat_dir(&self, key: &LevelKey) -> Result<PathBuf> {
        let dir = self.level_dir(key).join("cxconcat");
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create concat scratch dir: {}", dir.display()))?;
        Ok(dir)
    }

    /// Delete everything a level wrote
    pub fn discard_level(&self, key: &LevelKey) {
        let dir = self.level_dir(key);
        if dir.exists() {
            if let Err(e) = fs::remove_dir_all(&dir) {
                warn!("Failed to discard scratch {}: {}", key.as_str(), e);
            }
        }
    }

    /// Total bytes currently held by this run
    pub fn bytes_used(&self) -> u64 {
        WalkDir::new(self.run_dir.path())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }

    /// Count of files currently held by this run
    pub fn file_count(&self) -> usize {
        WalkDir::new(self.run_dir.path())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count()
    }
}

/*!
 * # slidecast - narrated slide videos from structured explanations
 *
 * Turns an ordered list of (title, body) segments into one video per
 * explanation level: every segment becomes a slide with spoken narration, the
 * clips are joined in order, and whatever fails is reported instead of
 * aborting the level.
 *
 * ## Features
 *
 * - Native speech synthesis with retry and a portable fallback voice
 * - Deterministic bitmap-font slide rendering (normal and fast styles)
 * - Disk-space preflight before any heavy work
 * - Tiered clip encoding: primary, safe, then the alternate container
 * - Copy-only joins when clips match, re-encoded joins when they don't
 * - Several levels in parallel with a shared encode limit and cancellation
 *
 * ## Architecture
 *
 * The library is organized in these main modules:
 * - `app_config`: Configuration management and environment overrides
 * - `models`: Segments, tracks, clips, diagnostics and results
 * - `process`: External tool invocation with timeout and cancellation
 * - `scratch`: Per-run scratch directories and stale cleanup
 * - `speech`: Narration synthesis:
 *   - `speech::say`: macOS native voice
 *   - `speech::espeak`: espeak-ng fallback
 * - `slides`: Slide layout and rendering
 * - `preflight`: Disk-space checks
 * - `encoder`: Clip encoding tiers:
 *   - `encoder::ffmpeg`: ffmpeg/ffprobe backend
 * - `concat`: Joining clips into the level video
 * - `pipeline`: Level runs and the multi-level orchestrator
 * - `explanation`: Explanation documents, segments and markdown
 * - `errors`: Custom error types for the application
 *
 * ## License
 *
 * This project is licensed under the MIT License
 */

#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

// Public modules
pub mod app_config;
pub mod concat;
pub mod encoder;
pub mod errors;
pub mod explanation;
pub mod models;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod scratch;
pub mod slides;
pub mod speech;

// Re-export main types for easier usage
pub use app_config::Config;
pub use concat::Concatenator;
pub use encoder::{AttemptTier, ClipEncoder};
pub use errors::{AppError, ConcatError, EncodingError, PreflightError, RenderError, SynthesisError, ToolError};
pub use models::{Clip, ClipSlot, Diagnostic, FailureKind, Outcome, PipelineResult, Segment};
pub use pipeline::{LevelRequest, PipelineOrchestrator, PipelineServices, RunControl};
pub use preflight::DiskPreflight;
pub use slides::SlideRenderer;
pub use speech::SpeechSynthesizer;

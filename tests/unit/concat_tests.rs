/*!
 * Tests for joining clips into the level video
 */

use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use slidecast::concat::{Concatenator, JoinBackend};
use slidecast::encoder::AttemptTier;
use slidecast::errors::ConcatError;
use slidecast::models::{Clip, ClipSlot, Container, FailureKind, JoinPath};

use crate::common::{self, fakes::{codec_for, FakeJoiner}};

fn encoded(order: u32, container: Container) -> ClipSlot {
    ClipSlot::Encoded(Clip {
        path: PathBuf::from(format!("clip_{:03}.{}", order, container.extension())),
        codec: codec_for(container),
        duration_seconds: 2.0,
        order,
        tier: AttemptTier::Primary,
    })
}

fn missing(order: u32) -> ClipSlot {
    ClipSlot::Missing {
        order,
        kind: FailureKind::EncodingFailure,
    }
}

fn concatenator(joiner: &Arc<FakeJoiner>) -> Concatenator {
    let backend: Arc<dyn JoinBackend> = joiner.clone();
    Concatenator::new(backend)
}

/// Test the stream-copy path
#[tokio::test]
async fn test_concatenate_withMatchingClips_shouldCopyStreams() {
    let dir = common::create_temp_dir().unwrap();
    let joiner = Arc::new(FakeJoiner::new());
    let slots = vec![encoded(1, Container::Mp4), encoded(2, Container::Mp4), encoded(3, Container::Mp4)];

    let video = concatenator(&joiner)
        .concatenate("beginner", &slots, &dir.path().join("videos"), dir.path(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(video.join_path, JoinPath::CopyOnly);
    assert_eq!(video.container, Container::Mp4);
    assert_eq!(video.included, vec![1, 2, 3]);
    assert!(video.path.exists());
    let name = video.path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.ends_with("_beginner.mp4"));
    assert_eq!(joiner.calls(), vec![(JoinPath::CopyOnly, vec![1, 2, 3])]);
}

/// Test that missing clips are skipped in order
#[tokio::test]
async fn test_concatenate_withGap_shouldSkipMissingClip() {
    let dir = common::create_temp_dir().unwrap();
    let joiner = Arc::new(FakeJoiner::new());
    let slots = vec![encoded(1, Container::Mp4), missing(2), encoded(3, Container::Mp4)];

    let video = concatenator(&joiner)
        .concatenate("intermediate", &slots, &dir.path().join("videos"), dir.path(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(video.included, vec![1, 3]);
    assert_eq!(video.join_path, JoinPath::CopyOnly);
}

/// Test that mixed containers force a re-encode
#[tokio::test]
async fn test_concatenate_withMixedContainers_shouldReencodeToMp4() {
    let dir = common::create_temp_dir().unwrap();
    let joiner = Arc::new(FakeJoiner::new());
    let slots = vec![encoded(1, Container::Mp4), encoded(2, Container::Mov), encoded(3, Container::Mp4)];

    let video = concatenator(&joiner)
        .concatenate("advanced", &slots, &dir.path().join("videos"), dir.path(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(video.join_path, JoinPath::Reencode);
    assert_eq!(video.container, Container::Mp4);
    assert_eq!(video.included, vec![1, 2, 3]);
    assert_eq!(joiner.calls(), vec![(JoinPath::Reencode, vec![1, 2, 3])]);
}

/// Test that a failed copy falls back to re-encoding
#[tokio::test]
async fn test_concatenate_withFailingCopy_shouldFallBackToReencode() {
    let dir = common::create_temp_dir().unwrap();
    let joiner = Arc::new(FakeJoiner {
        fail_copy: true,
        ..FakeJoiner::default()
    });
    let slots = vec![encoded(1, Container::Mov), encoded(2, Container::Mov)];

    let video = concatenator(&joiner)
        .concatenate("beginner", &slots, &dir.path().join("videos"), dir.path(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(video.join_path, JoinPath::Reencode);
    let paths: Vec<JoinPath> = joiner.calls().into_iter().map(|(p, _)| p).collect();
    assert_eq!(paths, vec![JoinPath::CopyOnly, JoinPath::Reencode]);
    // Only the re-encoded video remains
    assert_eq!(common::files_under(&dir.path().join("videos")), vec![video.path]);
}

/// Test the empty input
#[tokio::test]
async fn test_concatenate_withNoClips_shouldReportNoClipsAvailable() {
    let dir = common::create_temp_dir().unwrap();
    let joiner = Arc::new(FakeJoiner::new());
    let slots = vec![missing(1), missing(2)];

    let result = concatenator(&joiner)
        .concatenate("beginner", &slots, &dir.path().join("videos"), dir.path(), &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(ConcatError::NoClipsAvailable)));
    assert!(joiner.calls().is_empty());
}

/// Test that both join paths failing is reported and leaves no video
#[tokio::test]
async fn test_concatenate_withBothPathsFailing_shouldReturnErrorWithoutOutput() {
    let dir = common::create_temp_dir().unwrap();
    let joiner = Arc::new(FakeJoiner {
        fail_copy: true,
        fail_reencode: true,
        ..FakeJoiner::default()
    });
    let slots = vec![encoded(1, Container::Mp4)];

    let result = concatenator(&joiner)
        .concatenate("beginner", &slots, &dir.path().join("videos"), dir.path(), &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(ConcatError::Tool(_))));
    assert!(common::files_under(&dir.path().join("videos")).is_empty());
}

/// Test that a single clip is joined on its own
#[test]
fn test_concatenate_withSingleClip_shouldKeepItsContainer() {
    let dir = common::create_temp_dir().unwrap();
    let joiner = Arc::new(FakeJoiner::new());
    let slots = vec![missing(1), encoded(2, Container::Mov)];

    let video = tokio_test::block_on(concatenator(&joiner).concatenate(
        "beginner",
        &slots,
        &dir.path().join("videos"),
        dir.path(),
        &CancellationToken::new(),
    ))
    .unwrap();

    assert_eq!(video.container, Container::Mov);
    assert_eq!(video.included, vec![2]);
    assert!(video.path.to_string_lossy().ends_with("_beginner.mov"));
}

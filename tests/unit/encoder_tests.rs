/*!
 * Tests for tiered clip encoding
 */

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use slidecast::encoder::{AttemptTier, ClipEncoder, EncoderBackend};
use slidecast::errors::EncodingError;
use slidecast::models::{AudioTrack, Container};

use crate::common::{self, fakes::{EncodeScript, FakeEncoder}};

fn track(order: u32, seconds: f64) -> AudioTrack {
    AudioTrack {
        path: PathBuf::from(format!("audio_{:03}.wav", order)),
        duration_seconds: seconds,
        sample_rate: 16_000,
        channels: 1,
        order,
    }
}

fn encoder_with(fake: &Arc<FakeEncoder>, preferred: Container) -> ClipEncoder {
    let backend: Arc<dyn EncoderBackend> = fake.clone();
    ClipEncoder::new(backend, preferred)
}

/// Test the first tier succeeding
#[tokio::test]
async fn test_encode_withHealthyBackend_shouldUsePrimaryTier() {
    let dir = common::create_temp_dir().unwrap();
    let fake = Arc::new(FakeEncoder::new());
    let encoder = encoder_with(&fake, Container::Mp4);

    let clip = encoder
        .encode(Path::new("slide.png"), &track(1, 3.0), &dir.path().join("clip_001"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(clip.tier, AttemptTier::Primary);
    assert_eq!(clip.order, 1);
    assert_eq!(clip.path, dir.path().join("clip_001.mp4"));
    assert_eq!(clip.codec.container, Container::Mp4);
    assert!(clip.path.exists());
    assert_eq!(fake.calls().len(), 1);
}

/// Test the walk down to the alternate container
#[tokio::test]
async fn test_encode_withFailingPreferredContainer_shouldFallBackToAlternate() {
    let dir = common::create_temp_dir().unwrap();
    let fake = Arc::new(FakeEncoder::new());
    fake.script(2, AttemptTier::Primary, EncodeScript::FailTool);
    fake.script(2, AttemptTier::Safe, EncodeScript::Corrupt);
    let encoder = encoder_with(&fake, Container::Mp4);

    let clip = encoder
        .encode(Path::new("slide.png"), &track(2, 3.0), &dir.path().join("clip_002"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(clip.tier, AttemptTier::AlternateContainer);
    assert_eq!(clip.codec.container, Container::Mov);
    assert_eq!(clip.path, dir.path().join("clip_002.mov"));
    assert_eq!(
        fake.tiers_for(2),
        vec![AttemptTier::Primary, AttemptTier::Safe, AttemptTier::AlternateContainer]
    );
    // The failed mp4 attempts are gone
    assert_eq!(common::files_under(dir.path()), vec![dir.path().join("clip_002.mov")]);
}

/// Test that a duration drift counts as a failed attempt
#[tokio::test]
async fn test_encode_withDurationDrift_shouldRetryNextTier() {
    let dir = common::create_temp_dir().unwrap();
    let fake = Arc::new(FakeEncoder::new());
    fake.script(1, AttemptTier::Primary, EncodeScript::WrongDuration);
    let encoder = encoder_with(&fake, Container::Mp4);

    let clip = encoder
        .encode(Path::new("slide.png"), &track(1, 2.0), &dir.path().join("clip_001"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(clip.tier, AttemptTier::Safe);
    assert!((clip.duration_seconds - 2.0).abs() < 1e-9);
}

/// Test that a silent track is rejected before any attempt
#[tokio::test]
async fn test_encode_withZeroDuration_shouldRejectWithoutCallingBackend() {
    let dir = common::create_temp_dir().unwrap();
    let fake = Arc::new(FakeEncoder::new());
    let encoder = encoder_with(&fake, Container::Mp4);

    let result = encoder
        .encode(Path::new("slide.png"), &track(5, 0.0), &dir.path().join("clip_005"), &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(EncodingError::EmptyAudio { order: 5 })));
    assert!(fake.calls().is_empty());
}

/// Test exhaustion
#[tokio::test]
async fn test_encode_withAllTiersFailing_shouldExhaustAndLeaveNothing() {
    let dir = common::create_temp_dir().unwrap();
    let fake = Arc::new(FakeEncoder::new());
    fake.fail_all_tiers(3);
    let encoder = encoder_with(&fake, Container::Mp4);

    let result = encoder
        .encode(Path::new("slide.png"), &track(3, 1.0), &dir.path().join("clip_003"), &CancellationToken::new())
        .await;

    match result {
        Err(EncodingError::Exhausted { last }) => assert!(last.contains("alternate-container")),
        other => panic!("expected exhaustion, got {:?}", other),
    }
    assert_eq!(fake.calls().len(), 3);
    assert!(common::files_under(dir.path()).is_empty());
}

/// Test that a mov preference swaps the alternate container
#[tokio::test]
async fn test_encode_withMovPreference_shouldAlternateToMp4() {
    let dir = common::create_temp_dir().unwrap();
    let fake = Arc::new(FakeEncoder::new());
    fake.script(1, AttemptTier::Primary, EncodeScript::FailTool);
    fake.script(1, AttemptTier::Safe, EncodeScript::FailTool);
    let encoder = encoder_with(&fake, Container::Mov);
    assert_eq!(encoder.preferred_container(), Container::Mov);

    let clip = encoder
        .encode(Path::new("slide.png"), &track(1, 1.0), &dir.path().join("clip_001"), &CancellationToken::new())
        .await
        .unwrap();

    let containers: Vec<Container> = fake.calls().into_iter().map(|(_, _, c)| c).collect();
    assert_eq!(containers, vec![Container::Mov, Container::Mov, Container::Mp4]);
    assert_eq!(clip.codec.container, Container::Mp4);
}

/// Test cancellation stops the tier walk
#[tokio::test]
async fn test_encode_withCancelledToken_shouldNotTryFurtherTiers() {
    let dir = common::create_temp_dir().unwrap();
    let fake = Arc::new(FakeEncoder::new());
    let encoder = encoder_with(&fake, Container::Mp4);
    let token = CancellationToken::new();
    token.cancel();

    let result = encoder
        .encode(Path::new("slide.png"), &track(1, 1.0), &dir.path().join("clip_001"), &token)
        .await;

    assert!(matches!(result, Err(EncodingError::Cancelled)));
    assert!(fake.calls().is_empty());
}

/// Test that a hung attempt ends on cancellation without a leftover file
#[tokio::test]
async fn test_encode_withHangingAttempt_shouldStopOnCancel() {
    let dir = common::create_temp_dir().unwrap();
    let fake = Arc::new(FakeEncoder::new());
    fake.script(1, AttemptTier::Primary, EncodeScript::Hang);
    let encoder = encoder_with(&fake, Container::Mp4);
    let token = CancellationToken::new();

    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            token.cancel();
        })
    };
    let result = encoder
        .encode(Path::new("slide.png"), &track(1, 1.0), &dir.path().join("clip_001"), &token)
        .await;
    canceller.await.unwrap();

    assert!(matches!(result, Err(EncodingError::Cancelled)));
    assert_eq!(fake.tiers_for(1), vec![AttemptTier::Primary]);
    assert!(common::files_under(dir.path()).is_empty());
}

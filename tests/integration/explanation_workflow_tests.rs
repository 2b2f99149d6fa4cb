/*!
 * Integration tests for the explanation to video workflow
 */

use std::sync::Arc;

use slidecast::explanation::{load_explanations, render_with_outcome};
use slidecast::models::Outcome;
use slidecast::pipeline::{PipelineOrchestrator, RunControl};

use crate::common::{self, TestRig, MB};

const EXPLANATIONS: &str = r#"[
  {
    "level": "beginner",
    "overview": "The function adds up a list of numbers.",
    "key_concepts": ["loops", "accumulators"],
    "walkthrough": "Start at zero. Add each number. Return the total.",
    "tl_dr": "It sums a list.",
    "quiz": [{"q": "What is returned for an empty list?", "a": "Zero."}]
  },
  {
    "level": "advanced",
    "overview": "A left fold over the slice with an additive identity.",
    "complexity": "Linear time, constant space.",
    "pitfalls": ["overflow on large inputs"],
    "references": ["https://doc.rust-lang.org/std/iter/trait.Iterator.html#method.sum"]
  }
]"#;

/// Test loading explanations and turning them into requests
#[test]
fn test_load_explanations_withTwoLevels_shouldBuildOrderedSegments() {
    let dir = common::create_temp_dir().unwrap();
    let path = dir.path().join("explanations.json");
    std::fs::write(&path, EXPLANATIONS).unwrap();

    let levels = load_explanations(&path).unwrap();
    assert_eq!(levels.len(), 2);

    let beginner = levels[0].explanation.to_request(&levels[0].level, 900);
    let titles: Vec<&str> = beginner.segments().iter().map(|s| s.title.as_str()).collect();
    assert_eq!(titles, vec!["Overview", "Key Concepts", "Walkthrough", "TL;DR"]);
    let orders: Vec<u32> = beginner.segments().iter().map(|s| s.order).collect();
    assert_eq!(orders, vec![1, 2, 3, 4]);
    assert_eq!(beginner.segments()[1].body, "loops; accumulators");

    let advanced = levels[1].explanation.to_request(&levels[1].level, 20);
    assert!(advanced.segments().iter().all(|s| s.body.chars().count() <= 23));
    assert!(advanced.segments()[0].body.ends_with("..."));
}

/// Test that a broken document is reported with its path
#[test]
fn test_load_explanations_withInvalidJson_shouldFail() {
    let dir = common::create_temp_dir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();
    let error = load_explanations(&path).unwrap_err();
    assert!(error.to_string().contains("broken.json"));
}

/// Test the complete workflow from document to markdown with a video
#[tokio::test]
async fn test_workflow_withHealthyBackends_shouldProduceVideoAndPlainMarkdown() {
    let dir = common::create_temp_dir().unwrap();
    let path = dir.path().join("explanations.json");
    std::fs::write(&path, EXPLANATIONS).unwrap();
    let levels = load_explanations(&path).unwrap();

    let rig = TestRig::new();
    let config = common::test_config(dir.path());
    let cap = config.speech.narration_cap(config.render.fast);
    let requests: Vec<_> = levels
        .iter()
        .map(|l| l.explanation.to_request(&l.level, cap))
        .collect();
    let orchestrator = PipelineOrchestrator::new(Arc::new(config.clone()), rig.services(&config));

    let results = orchestrator.run(&requests, &RunControl::new()).await.unwrap();

    assert_eq!(results.len(), 2);
    for (level, result) in levels.iter().zip(&results) {
        assert_eq!(result.outcome(), Outcome::Success);
        let markdown = render_with_outcome(&level.explanation, result);
        assert!(!markdown.contains("⚠️"));
    }
    let beginner = render_with_outcome(&levels[0].explanation, &results[0]);
    assert!(beginner.starts_with("# Explanation: Beginner"));
    assert!(beginner.contains("## Quick Quiz (self-check)"));
    let advanced = render_with_outcome(&levels[1].explanation, &results[1]);
    assert!(advanced.contains("## References / Further Reading"));
}

/// Test that a skipped video leaves a remark under the text
#[tokio::test]
async fn test_workflow_withLowDiskSpace_shouldAppendNoteToMarkdown() {
    let dir = common::create_temp_dir().unwrap();
    let path = dir.path().join("explanations.json");
    std::fs::write(&path, EXPLANATIONS).unwrap();
    let levels = load_explanations(&path).unwrap();

    let mut rig = TestRig::new();
    rig.free_bytes = 50 * MB;
    let config = common::test_config(dir.path());
    let request = levels[0].explanation.to_request(&levels[0].level, 900);
    let orchestrator = PipelineOrchestrator::new(Arc::new(config.clone()), rig.services(&config));

    let results = orchestrator.run(&[request], &RunControl::new()).await.unwrap();

    assert_eq!(results[0].outcome(), Outcome::TextOnly);
    let markdown = render_with_outcome(&levels[0].explanation, &results[0]);
    assert!(markdown.starts_with("# Explanation: Beginner"));
    assert!(markdown.ends_with(
        "> ⚠️ Skipped video: low disk space. Free up space or point the scratch root at a larger drive and try again."
    ));
}

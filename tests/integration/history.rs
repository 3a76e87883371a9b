//! Job history file.

use tempfile::TempDir;

use conformd::config::Config;
use conformd::core::TaskGraph;
use conformd::orchestration::{JobHistory, JobStatus};

use crate::fixtures::Harness;

/// Test: Finished jobs are appended to the history file
/// Given an engine configured with a history file
/// When two jobs finish
/// Then both records can be loaded back in order
#[tokio::test]
async fn test_finished_jobs_are_recorded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("history.jsonl");
    let harness = Harness::with_config(Config {
        history_file: Some(path.to_string_lossy().into_owned()),
        ..Config::default()
    });

    let mut ok = TaskGraph::new();
    ok.add_task(harness.step("fine").work());
    let first = harness.run("first", ok).await;

    let mut bad = TaskGraph::new();
    bad.add_task(harness.step("broken").failing().work());
    let second = harness.run("second", bad).await;

    let history = harness.engine.history().unwrap();
    assert_eq!(history.path(), path.as_path());

    let loaded = JobHistory::new(path.clone()).load().unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].id, first.id);
    assert_eq!(loaded[0].status, JobStatus::Completed);
    assert_eq!(loaded[1].id, second.id);
    assert_eq!(loaded[1].status, JobStatus::CompletedWithErrors);
    assert_eq!(loaded[1].tasks[0].error(), Some("External system error: broken failed"));
}

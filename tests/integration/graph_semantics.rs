//! Guard evaluation and meta-task splicing on a running job.

use std::time::Duration;

use conformd::core::{TaskGraph, TaskGuard, TaskStatus};
use conformd::orchestration::JobStatus;

use crate::fixtures::{Expand, Harness};

/// Test: Completion guard runs after a failure
/// Given A -> B where B waits for all predecessors to complete
/// When A fails
/// Then B still runs
#[tokio::test]
async fn test_completed_guard_runs_after_failure() {
    let harness = Harness::new();
    let mut graph = TaskGraph::new();
    graph.append_task(harness.step("A").failing().work());
    graph.append_task_with_guard(harness.step("B").work(), TaskGuard::AllPredecessorsCompleted);

    let record = harness.run("guards", graph).await;

    assert_eq!(record.status, JobStatus::CompletedWithErrors);
    assert_eq!(record.task_by_name("B").unwrap().status, TaskStatus::Succeeded);
    assert!(harness.journal.ran("B"));
}

/// Test: Any-predecessor guard
/// Given A (fails) and B (succeeds) both feeding C with any-predecessor guard,
/// and both feeding D with the default guard
/// When the job runs
/// Then C runs and D is skipped
#[tokio::test]
async fn test_any_predecessor_guard() {
    let harness = Harness::new();
    let mut graph = TaskGraph::new();
    let a = graph.add_task(harness.step("A").failing().work());
    let b = graph.add_task(harness.step("B").work());
    graph
        .add_task_after(harness.step("C").work(), TaskGuard::AnyPredecessorCompleted, &[a, b])
        .unwrap();
    graph
        .add_task_after(harness.step("D").work(), TaskGuard::AllPredecessorsSucceeded, &[a, b])
        .unwrap();

    let record = harness.run("any", graph).await;

    assert_eq!(record.task_by_name("C").unwrap().status, TaskStatus::Succeeded);
    assert_eq!(record.task_by_name("D").unwrap().status, TaskStatus::Skipped);
}

/// Test: Ancestor guard looks past direct predecessors
/// Given A (fails) -> B (always runs) -> C (all ancestors succeeded)
/// When the job runs
/// Then B runs but C is skipped
#[tokio::test]
async fn test_ancestor_guard() {
    let harness = Harness::new();
    let mut graph = TaskGraph::new();
    graph.append_task(harness.step("A").failing().work());
    graph.append_task_with_guard(harness.step("B").work(), TaskGuard::AllPredecessorsCompleted);
    graph.append_task_with_guard(harness.step("C").work(), TaskGuard::AllAncestorsSucceeded);

    let record = harness.run("ancestors", graph).await;

    assert_eq!(record.task_by_name("B").unwrap().status, TaskStatus::Succeeded);
    assert_eq!(record.task_by_name("C").unwrap().status, TaskStatus::Skipped);
    assert_eq!(harness.journal.names(), vec!["A", "B"]);
}

/// Test: Independent branches keep going
/// Given two chains A1 -> A2 and B1 -> B2
/// When A1 fails
/// Then A2 is skipped and the B chain completes
#[tokio::test]
async fn test_independent_branch_progresses() {
    let harness = Harness::new();
    let mut graph = TaskGraph::new();
    let a1 = graph.add_task(harness.step("A1").failing().work());
    graph
        .add_task_after(harness.step("A2").work(), TaskGuard::default(), &[a1])
        .unwrap();
    let b1 = graph.add_task(harness.step("B1").sleeping(Duration::from_millis(20)).work());
    graph
        .add_task_after(harness.step("B2").work(), TaskGuard::default(), &[b1])
        .unwrap();

    let record = harness.run("branches", graph).await;

    assert_eq!(record.status, JobStatus::CompletedWithErrors);
    assert_eq!(record.task_by_name("A2").unwrap().status, TaskStatus::Skipped);
    assert_eq!(record.task_by_name("B2").unwrap().status, TaskStatus::Succeeded);
}

/// Test: Meta-task splicing
/// Given X -> M -> Y where M expands to P -> Q
/// When the job runs
/// Then X -> P and Q -> Y hold and Y never depends on X directly
#[tokio::test]
async fn test_meta_task_splices_between_neighbours() {
    let harness = Harness::new();
    let mut sub = TaskGraph::new();
    sub.append_task(harness.step("P").work());
    sub.append_task(harness.step("Q").work());

    let mut graph = TaskGraph::new();
    graph.append_task(harness.step("X").work());
    let m = graph.append_task(Expand::new("M", sub));
    graph.append_task(harness.step("Y").work());

    let record = harness.run("splice", graph).await;

    assert_eq!(record.status, JobStatus::Completed);
    let x = record.task_by_name("X").unwrap();
    let p = record.task_by_name("P").unwrap();
    let q = record.task_by_name("Q").unwrap();
    let y = record.task_by_name("Y").unwrap();
    assert_eq!(record.task(&m).unwrap().status, TaskStatus::Expanded { tasks: 2 });
    assert_eq!(p.predecessors, vec![x.id]);
    assert_eq!(q.predecessors, vec![p.id]);
    assert_eq!(y.predecessors, vec![q.id]);
    assert_eq!(p.parent, Some(m));
    assert_eq!(harness.journal.names(), vec!["X", "P", "Q", "Y"]);
}

/// Test: Nested expansion
/// Given a meta-task expanding into another meta-task
/// When the job runs
/// Then both expand and the innermost task runs
#[tokio::test]
async fn test_nested_expansion() {
    let harness = Harness::new();
    let mut inner = TaskGraph::new();
    inner.add_task(harness.step("leaf").work());
    let mut outer = TaskGraph::new();
    outer.add_task(Expand::new("inner", inner));

    let mut graph = TaskGraph::new();
    graph.add_task(Expand::new("outer", outer));
    let record = harness.run("nested", graph).await;

    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.count(|s| matches!(s, TaskStatus::Expanded { .. })), 2);
    assert!(harness.journal.ran("leaf"));
}

/// Test: Empty expansion is a no-op success
/// Given M -> Y where M expands to nothing
/// When the job runs
/// Then M succeeds and Y runs
#[tokio::test]
async fn test_empty_expansion_is_noop() {
    let harness = Harness::new();
    let mut graph = TaskGraph::new();
    let m = graph.append_task(Expand::new("M", TaskGraph::new()));
    graph.append_task(harness.step("Y").work());

    let record = harness.run("empty", graph).await;

    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.task(&m).unwrap().status, TaskStatus::Succeeded);
    assert_eq!(record.task_by_name("Y").unwrap().predecessors, vec![m]);
    assert!(harness.journal.ran("Y"));
}

/// Test: Expansion failure behaves like a task failure
/// Given M -> Y where M fails to expand
/// When the job runs
/// Then M is failed, nothing is spliced and Y is skipped
#[tokio::test]
async fn test_expansion_failure() {
    let harness = Harness::new();
    let mut graph = TaskGraph::new();
    graph.append_task(Expand::failing("M"));
    graph.append_task(harness.step("Y").work());

    let record = harness.run("broken plan", graph).await;

    assert_eq!(record.status, JobStatus::CompletedWithErrors);
    assert_eq!(record.tasks.len(), 2);
    assert_eq!(
        record.task_by_name("M").unwrap().error(),
        Some("External system error: M could not plan")
    );
    assert_eq!(record.task_by_name("Y").unwrap().status, TaskStatus::Skipped);
}

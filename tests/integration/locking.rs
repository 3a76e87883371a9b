//! Cross-job locking, queueing and cancellation.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use conformd::config::Config;
use conformd::core::{TaskGraph, TaskGuard, TaskStatus};
use conformd::lock::{LockHolder, LockType};
use conformd::orchestration::{JobQueue, JobRequest, JobStatus};
use conformd::Error;

use crate::fixtures::{object, Harness};

/// Test: Write locks serialise conflicting tasks across jobs
/// Given 3 jobs whose tasks all write-lock the same object
/// When they are submitted at the same time
/// Then no two task bodies overlap
#[tokio::test]
async fn test_write_lock_mutual_exclusion() {
    let harness = Harness::new();
    let shared = object(1, "web");

    let submissions = (0..3).map(|n| {
        let mut graph = TaskGraph::new();
        graph.add_task(
            harness
                .step(&format!("writer-{}", n))
                .locking(shared.clone())
                .sleeping(Duration::from_millis(30))
                .work(),
        );
        harness.engine.submit("writer", graph)
    });
    let ids: Vec<_> = join_all(submissions)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    for record in join_all(ids.iter().map(|id| harness.wait(id))).await {
        assert_eq!(record.status, JobStatus::Completed);
    }

    let mut entries = harness.journal.entries();
    assert_eq!(entries.len(), 3);
    entries.sort_by_key(|e| e.started);
    for pair in entries.windows(2) {
        assert!(
            pair[0].finished <= pair[1].started,
            "{} overlapped {}",
            pair[0].name,
            pair[1].name
        );
    }
}

/// Test: Tasks in one job sharing an object never overlap
/// Given two independent tasks in one job locking the same object
/// When the job runs
/// Then the second starts only after the first finished
#[tokio::test]
async fn test_same_job_conflicts_are_deferred() {
    let harness = Harness::new();
    let shared = object(1, "web");
    let mut graph = TaskGraph::new();
    for name in ["first", "second"] {
        graph.add_task(
            harness
                .step(name)
                .locking(shared.clone())
                .sleeping(Duration::from_millis(20))
                .work(),
        );
    }

    let record = harness.run("conflicting", graph).await;

    assert_eq!(record.status, JobStatus::Completed);
    let mut entries = harness.journal.entries();
    entries.sort_by_key(|e| e.started);
    assert!(entries[0].finished <= entries[1].started);
}

/// Test: Locks never outlive a job
/// Given a job with a job-level lock and a failing task that locks another object
/// When the job finishes
/// Then the lock manager holds nothing for it
#[tokio::test]
async fn test_locks_released_after_failure() {
    let harness = Harness::new();
    let mut graph = TaskGraph::new();
    graph.append_task(harness.step("boom").locking(object(2, "db")).failing().work());
    graph.append_task(harness.step("never").work());

    let request = JobRequest::new("failing", graph).with_lock(object(1, "web"), LockType::Write);
    let id = harness.engine.submit_request(request).await.unwrap();
    let record = harness.wait(&id).await;

    assert_eq!(record.status, JobStatus::CompletedWithErrors);
    let unlock = record
        .task_by_name("Release locks on Deployment Specification 'web'")
        .unwrap();
    assert_eq!(unlock.guard, TaskGuard::AllPredecessorsCompleted);
    assert_eq!(unlock.status, TaskStatus::Succeeded);

    let locks = harness.engine.lock_manager();
    assert!(locks.held_by(&LockHolder::from(id)).is_empty());
    assert!(locks.snapshot().is_empty());
}

/// Test: Job-level lock timeout fails the job without running it
/// Given a running job holding a write lock
/// When a second job asks for the same lock with a short timeout
/// Then the second job fails with a lock timeout and succeeds once resubmitted later
#[tokio::test]
async fn test_job_lock_timeout_can_be_retried() {
    let harness = Harness::with_config(Config {
        lock_timeout_ms: 20,
        ..Config::default()
    });
    let mut slow = TaskGraph::new();
    slow.add_task(harness.step("slow").sleeping(Duration::from_millis(150)).work());
    let first = harness
        .engine
        .submit_request(JobRequest::new("holder", slow).with_lock(object(1, "web"), LockType::Write))
        .await
        .unwrap();
    harness.wait_for_task(&first, "slow", TaskStatus::Running).await;

    let mut graph = TaskGraph::new();
    graph.add_task(harness.step("blocked").work());
    let blocked = harness
        .engine
        .submit_request(JobRequest::new("blocked", graph).with_lock(object(1, "web"), LockType::Write))
        .await
        .unwrap();
    let record = harness.wait(&blocked).await;

    assert_eq!(record.status, JobStatus::Failed);
    let failure = record.lock_failure.unwrap();
    assert_eq!(failure.lock_type, LockType::Write);
    assert!(matches!(failure.to_error(), Error::LockTimeout { .. }));
    assert!(!harness.journal.ran("blocked"));

    harness.wait(&first).await;
    let mut graph = TaskGraph::new();
    graph.add_task(harness.step("retried").work());
    let retry = harness
        .engine
        .submit_request(JobRequest::new("retry", graph).with_lock(object(1, "web"), LockType::Write))
        .await
        .unwrap();
    assert_eq!(harness.wait(&retry).await.status, JobStatus::Completed);
    assert!(harness.journal.ran("retried"));
}

/// Test: A queued job takes its locks only once it runs
/// Given one job slot and a running job whose later task locks `web`
/// When a job holding `web` for its whole run is queued behind it
/// Then the running job's task gets the lock and the queued job runs afterwards
#[tokio::test]
async fn test_queued_job_does_not_starve_running_job() {
    let harness = Harness::with_config(Config {
        job_pool_size: 1,
        lock_timeout_ms: 400,
        ..Config::default()
    });
    let web = object(1, "web");
    let mut first = TaskGraph::new();
    first.append_task(harness.step("warm-up").sleeping(Duration::from_millis(100)).work());
    first.append_task(harness.step("needs-web").locking(web.clone()).work());
    let running = harness.engine.submit("running", first).await.unwrap();
    harness.wait_for_task(&running, "warm-up", TaskStatus::Running).await;

    let mut second = TaskGraph::new();
    second.add_task(harness.step("queued").work());
    let queued = harness
        .engine
        .submit_request(JobRequest::new("queued", second).with_lock(web, LockType::Write))
        .await
        .unwrap();

    let running = harness.wait(&running).await;
    let queued = harness.wait(&queued).await;
    assert_eq!(running.status, JobStatus::Completed);
    assert_eq!(
        running.task_by_name("needs-web").unwrap().status,
        TaskStatus::Succeeded
    );
    assert_eq!(queued.status, JobStatus::Completed);
    assert!(harness.journal.entry("needs-web").finished <= harness.journal.entry("queued").started);
}

/// Test: Read locks are shared between jobs
/// Given two jobs both read-locking the same object
/// When both are submitted
/// Then neither waits for the other
#[tokio::test]
async fn test_read_locks_are_shared() {
    let harness = Harness::with_config(Config {
        lock_timeout_ms: 20,
        ..Config::default()
    });
    let mut ids = Vec::new();
    for name in ["reader-1", "reader-2"] {
        let mut graph = TaskGraph::new();
        graph.add_task(harness.step(name).sleeping(Duration::from_millis(50)).work());
        let request = JobRequest::new(name, graph).with_lock(object(1, "web"), LockType::Read);
        ids.push(harness.engine.submit_request(request).await.unwrap());
    }
    for id in &ids {
        assert_eq!(harness.wait(id).await.status, JobStatus::Completed);
    }
}

/// Test: Queued jobs run one at a time
/// Given 3 jobs put on a queue
/// When the queue drains
/// Then they ran in order without overlapping
#[tokio::test]
async fn test_job_queue_is_serial() {
    let harness = Harness::new();
    let queue = JobQueue::start(Arc::clone(&harness.engine));
    for n in 0..3 {
        let mut graph = TaskGraph::new();
        graph.add_task(
            harness
                .step(&format!("queued-{}", n))
                .sleeping(Duration::from_millis(20))
                .work(),
        );
        queue.put(JobRequest::new(&format!("job-{}", n), graph)).unwrap();
    }
    queue.close().await;

    assert_eq!(harness.journal.names(), vec!["queued-0", "queued-1", "queued-2"]);
    let entries = harness.journal.entries();
    for pair in entries.windows(2) {
        assert!(pair[0].finished <= pair[1].started);
    }
    let jobs = harness.engine.jobs().await;
    assert_eq!(jobs.len(), 3);
    assert!(jobs.iter().all(|j| j.status == JobStatus::Completed));
}

/// Test: Cancellation lets running tasks finish
/// Given A (slow) -> B
/// When the job is cancelled while A runs
/// Then A succeeds, B is skipped and the job is cancelled with no locks held
#[tokio::test]
async fn test_cancel_running_job() {
    let harness = Harness::new();
    let mut graph = TaskGraph::new();
    graph.append_task(
        harness
            .step("A")
            .locking(object(1, "web"))
            .sleeping(Duration::from_millis(100))
            .work(),
    );
    graph.append_task(harness.step("B").work());

    let id = harness.engine.submit("cancel me", graph).await.unwrap();
    harness.wait_for_task(&id, "A", TaskStatus::Running).await;
    harness.engine.cancel(&id).await.unwrap();
    let record = harness.wait(&id).await;

    assert_eq!(record.status, JobStatus::Cancelled);
    assert_eq!(record.task_by_name("A").unwrap().status, TaskStatus::Succeeded);
    assert_eq!(record.task_by_name("B").unwrap().status, TaskStatus::Skipped);
    assert!(!harness.journal.ran("B"));
    assert!(harness.engine.lock_manager().snapshot().is_empty());
}

/// Test: Shutdown cancels active jobs
/// Given a job in the middle of a slow task
/// When the engine shuts down
/// Then the job ends cancelled and new submissions are refused
#[tokio::test]
async fn test_shutdown_cancels_jobs() {
    let harness = Harness::new();
    let mut graph = TaskGraph::new();
    graph.append_task(harness.step("slow").sleeping(Duration::from_millis(50)).work());
    graph.append_task(harness.step("after").work());
    let id = harness.engine.submit("long", graph).await.unwrap();
    harness.wait_for_task(&id, "slow", TaskStatus::Running).await;

    harness.engine.shutdown().await;

    let record = harness.engine.query(&id).await.unwrap();
    assert_eq!(record.status, JobStatus::Cancelled);
    assert!(harness.engine.active_jobs().await.is_empty());
    assert!(matches!(
        harness.engine.submit("late", TaskGraph::new()).await,
        Err(Error::EngineShutdown)
    ));
}

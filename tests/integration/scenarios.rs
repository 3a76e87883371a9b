//! End-to-end scenarios.
//!
//! Each test submits a graph to a real `JobEngine` and checks the job
//! record, the store and the simulated cluster once the job is terminal.

use conformd::core::{TaskGraph, TaskGuard, TaskStatus};
use conformd::lock::ObjectType;
use conformd::orchestration::JobStatus;
use conformd::persistence::{
    DeploymentSpec, DistributedApplianceInstance, EventKind, VirtualSystem,
};

use crate::fixtures::{fast_retry, ClusterEnv, Harness};

/// Test: Single task job
/// Given a graph with one task "CreateX" and no locks
/// When the job runs
/// Then the job is COMPLETED and the task SUCCEEDED
#[tokio::test]
async fn test_single_task_completes() {
    let harness = Harness::new();
    let mut graph = TaskGraph::new();
    graph.add_task(harness.step("CreateX").work());

    let record = harness.run("create x", graph).await;

    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.tasks.len(), 1);
    assert_eq!(record.tasks[0].name, "CreateX");
    assert_eq!(record.tasks[0].status, TaskStatus::Succeeded);
    assert!(record.failure_reason.is_none());
}

/// Test: Failed task short-circuits its successor
/// Given T1 -> T2, both guarded by all-predecessors-succeeded
/// When T1 fails
/// Then the job is COMPLETED_WITH_ERRORS and T2 never runs
#[tokio::test]
async fn test_failure_skips_successor() {
    let harness = Harness::new();
    let mut graph = TaskGraph::new();
    graph.append_task_with_guard(
        harness.step("T1").failing().work(),
        TaskGuard::AllPredecessorsSucceeded,
    );
    graph.append_task_with_guard(harness.step("T2").work(), TaskGuard::AllPredecessorsSucceeded);

    let record = harness.run("t1 then t2", graph).await;

    assert_eq!(record.status, JobStatus::CompletedWithErrors);
    let t1 = record.task_by_name("T1").unwrap();
    assert_eq!(t1.error(), Some("External system error: T1 failed"));
    assert_eq!(record.task_by_name("T2").unwrap().status, TaskStatus::Skipped);
    assert!(!harness.journal.ran("T2"));
    assert_eq!(record.failed_tasks().len(), 1);
}

/// Test: Pod conformance creates the missing instances
/// Given 3 pods in the cluster and 1 DAI for one of them
/// When the pod meta-task runs
/// Then it expands to 2 create tasks and 3 DAIs exist afterwards
#[tokio::test]
async fn test_pod_conformance_creates_missing_instances() {
    let env = ClusterEnv::new(3, fast_retry(3));
    env.update_ds(|ds| ds.external_id = Some("deployment-1".to_string()));
    let label = env.label();
    let pods: Vec<_> = (0..3).map(|_| env.cluster().add_pod(&label, "default")).collect();
    let mut existing = DistributedApplianceInstance::new("default-pod-1", env.vs.id);
    existing.ds_id = Some(env.ds.id);
    existing.external_id = Some(pods[0].uid.clone());
    env.store.insert(existing);

    let record = env.run(env.tasks.conform_deployment_pods(&env.ds)).await;

    assert_eq!(record.status, JobStatus::Completed);
    let meta = record
        .task_by_name("Conform pods of Deployment Spec 'web'")
        .unwrap();
    assert_eq!(meta.status, TaskStatus::Expanded { tasks: 2 });
    let children: Vec<_> = record
        .tasks
        .iter()
        .filter(|t| t.parent == Some(meta.id))
        .collect();
    assert_eq!(children.len(), 2);
    assert!(children.iter().all(|t| t.name.starts_with("Create DAI")));

    let dais = env.store.all::<DistributedApplianceInstance>();
    assert_eq!(dais.len(), 3);
    let mut backing: Vec<_> = dais.iter().filter_map(|d| d.external_id.clone()).collect();
    let mut running: Vec<_> = pods.iter().map(|p| p.uid.clone()).collect();
    backing.sort();
    running.sort();
    assert_eq!(backing, running);

    let added = env
        .events
        .try_iter()
        .filter(|e| {
            e.object_type == ObjectType::DistributedApplianceInstance && e.kind == EventKind::Added
        })
        .count();
    assert_eq!(added, 2);
}

/// Test: Readiness check gives up
/// Given a cluster whose deployment never becomes available
/// When the readiness check runs with 3 attempts 10ms apart
/// Then it fails with "did not converge" after exactly 3 polls
#[tokio::test]
async fn test_readiness_check_does_not_converge() {
    let env = ClusterEnv::new(2, fast_retry(3));
    env.cluster().set_stalled(true);

    let record = env.run(env.tasks.conform_deployment_spec(&env.ds)).await;

    assert_eq!(record.status, JobStatus::CompletedWithErrors);
    let check = record
        .task_by_name("Check deployment of Deployment Spec 'web' is ready")
        .unwrap();
    let error = check.error().unwrap();
    assert!(error.contains("did not converge"), "unexpected error: {}", error);
    assert_eq!(env.cluster().poll_count(), 3);

    let pods = record.task_by_name("Conform pods of Deployment Spec 'web'").unwrap();
    assert_eq!(pods.status, TaskStatus::Skipped);
    assert!(env.store.all::<DistributedApplianceInstance>().is_empty());
}

/// Test: Full deployment spec lifecycle
/// Given a new deployment spec for 3 instances
/// When it is conformed, conformed again, then marked for deletion
/// Then the deployment and instances are created once and finally removed
#[tokio::test]
async fn test_deployment_spec_lifecycle() {
    let env = ClusterEnv::new(3, fast_retry(3));

    let first = env.run(env.tasks.conform_deployment_spec(&env.ds)).await;
    assert_eq!(first.status, JobStatus::Completed);
    assert!(first
        .task_by_name("Create deployment for Deployment Spec 'web'")
        .is_some());
    assert_eq!(env.store.all::<DistributedApplianceInstance>().len(), 3);
    assert_eq!(env.cluster().deployment_count(), 1);
    let ds = env.store.get::<DeploymentSpec>(env.ds.id).unwrap();
    assert!(ds.external_id.is_some());

    let second = env.run(env.tasks.conform_deployment_spec(&env.ds)).await;
    assert_eq!(second.status, JobStatus::Completed);
    assert!(second
        .task_by_name("Update deployment for Deployment Spec 'web'")
        .is_some());
    let pods = second
        .task_by_name("Conform pods of Deployment Spec 'web'")
        .unwrap();
    assert_eq!(pods.status, TaskStatus::Succeeded);
    assert_eq!(env.store.all::<DistributedApplianceInstance>().len(), 3);

    env.update_ds(|ds| ds.marked_for_deletion = true);
    let third = env.run(env.tasks.conform_deployment_spec(&env.ds)).await;
    assert_eq!(third.status, JobStatus::Completed);
    assert_eq!(third.count(|s| s.is_successful()), third.tasks.len());
    assert!(env.store.get::<DeploymentSpec>(env.ds.id).is_none());
    assert!(env.store.all::<DistributedApplianceInstance>().is_empty());
    assert_eq!(env.cluster().deployment_count(), 0);
    assert!(env.store.get::<VirtualSystem>(env.vs.id).is_some());
}

/// Test: Scaling down removes instances of deleted pods
/// Given a conformed spec with 3 instances
/// When the instance count drops to 1 and the spec is conformed again
/// Then only 1 DAI remains
#[tokio::test]
async fn test_scale_down_deletes_orphans() {
    let env = ClusterEnv::new(3, fast_retry(3));
    env.run(env.tasks.conform_deployment_spec(&env.ds)).await;

    env.update_ds(|ds| ds.instance_count = 1);
    let record = env.run(env.tasks.conform_deployment_spec(&env.ds)).await;

    assert_eq!(record.status, JobStatus::Completed);
    let deletes = record
        .tasks
        .iter()
        .filter(|t| t.name.starts_with("Delete DAI"))
        .count();
    assert_eq!(deletes, 2);
    assert_eq!(env.store.all::<DistributedApplianceInstance>().len(), 1);
    assert_eq!(env.cluster().pods(&env.label()).len(), 1);
}

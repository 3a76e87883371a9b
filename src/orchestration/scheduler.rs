//! Per-job scheduling loop.
//!
//! The `JobScheduler` owns one job's task graph. It dispatches every task
//! whose guard is satisfied to the shared [`TaskPool`], applies results as
//! they come back, splices meta-task expansions into the graph, and tears
//! the job down (releasing every lock the job still holds) once nothing is
//! in flight.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::job::{JobId, JobRecord, JobStatus, TaskRecord};
use super::pool::{Outcome, TaskEvent, TaskPool};
use crate::config::FailurePolicy;
use crate::core::{Readiness, TaskGraph, TaskId, TaskStatus};
use crate::lock::{LockHolder, LockManager, LockObjectReference};

enum Wake {
    Event(Option<TaskEvent>),
    Cancelled,
}

/// Drives one job's graph to a terminal state.
pub struct JobScheduler {
    job_id: JobId,
    holder: LockHolder,
    /// The live graph. Meta-task nodes are replaced as they expand.
    graph: TaskGraph,
    pool: Arc<TaskPool>,
    locks: Arc<LockManager>,
    /// Shared view read by `JobEngine::query`.
    record: Arc<RwLock<JobRecord>>,
    cancel: CancellationToken,
    failure_policy: FailurePolicy,
    event_tx: mpsc::UnboundedSender<TaskEvent>,
    event_rx: mpsc::UnboundedReceiver<TaskEvent>,
    /// Dispatched tasks and the objects they lock.
    in_flight: HashMap<TaskId, BTreeSet<LockObjectReference>>,
    /// Task log in dispatch order, including expanded meta-tasks.
    tasks: Vec<TaskRecord>,
    positions: HashMap<TaskId, usize>,
    failures: usize,
    cancelled: bool,
}

impl JobScheduler {
    pub fn new(
        job_id: JobId,
        graph: TaskGraph,
        pool: Arc<TaskPool>,
        locks: Arc<LockManager>,
        record: Arc<RwLock<JobRecord>>,
        cancel: CancellationToken,
        failure_policy: FailurePolicy,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut scheduler = Self {
            job_id,
            holder: LockHolder::from(job_id),
            graph,
            pool,
            locks,
            record,
            cancel,
            failure_policy,
            event_tx,
            event_rx,
            in_flight: HashMap::new(),
            tasks: Vec::new(),
            positions: HashMap::new(),
            failures: 0,
            cancelled: false,
        };
        scheduler.sync_all();
        scheduler
    }

    /// Number of tasks currently handed to the pool.
    pub fn active_count(&self) -> usize {
        self.in_flight.len()
    }

    fn pending_in_order(&self) -> Vec<TaskId> {
        match self.graph.topological_order() {
            Ok(nodes) => nodes
                .into_iter()
                .filter(|n| n.can_start())
                .map(|n| n.id)
                .collect(),
            Err(e) => {
                error!(job = %self.job_id.short(), error = %e, "Task graph is not acyclic");
                Vec::new()
            }
        }
    }

    fn sync_task(&mut self, id: &TaskId) {
        let Some(node) = self.graph.get_task(id) else {
            return;
        };
        let record = TaskRecord::from_node(node, self.graph.predecessors(id));
        match self.positions.get(id) {
            Some(&position) => self.tasks[position] = record,
            None => {
                self.positions.insert(*id, self.tasks.len());
                self.tasks.push(record);
            }
        }
    }

    fn sync_all(&mut self) {
        let ids: Vec<TaskId> = match self.graph.topological_order() {
            Ok(nodes) => nodes.into_iter().map(|n| n.id).collect(),
            Err(_) => self.graph.all_tasks().into_iter().map(|n| n.id).collect(),
        };
        for id in ids {
            self.sync_task(&id);
        }
    }

    fn conflicts(&self, objects: &BTreeSet<LockObjectReference>) -> bool {
        self.in_flight
            .values()
            .any(|held| !held.is_disjoint(objects))
    }

    /// Dispatch ready tasks and skip those whose guard can never pass.
    ///
    /// Tasks are visited in topological order so a skip propagates to its
    /// successors in the same pass. Returns the number of tasks dispatched.
    pub fn dispatch_ready_tasks(&mut self) -> usize {
        let mut dispatched = 0;

        for id in self.pending_in_order() {
            match self.graph.readiness(&id) {
                Readiness::Wait => {}
                Readiness::Skip => {
                    if let Some(node) = self.graph.get_task_mut(&id) {
                        debug!(job = %self.job_id.short(), task = %node.name, "Skipping");
                        node.skip();
                    }
                }
                Readiness::Run => {
                    let Some(node) = self.graph.get_task(&id) else {
                        continue;
                    };
                    let objects = node.work.objects();
                    if self.conflicts(&objects) {
                        debug!(job = %self.job_id.short(), task = %node.name, "Deferred on lock conflict");
                        continue;
                    }
                    let work = node.work.clone();
                    if let Some(node) = self.graph.get_task_mut(&id) {
                        node.queue();
                    }
                    self.in_flight.insert(id, objects);
                    self.pool
                        .spawn(id, self.holder, work, self.event_tx.clone());
                    dispatched += 1;
                }
            }
        }

        if dispatched > 0 {
            debug!(job = %self.job_id.short(), dispatched, in_flight = self.in_flight.len(), "Dispatched tasks");
        }
        dispatched
    }

    /// Apply one pool event to the graph.
    pub fn handle_event(&mut self, event: TaskEvent) {
        match event {
            TaskEvent::Started { task_id } => {
                if let Some(node) = self.graph.get_task_mut(&task_id) {
                    node.start();
                }
            }
            TaskEvent::Finished { task_id, result } => {
                self.in_flight.remove(&task_id);
                match result {
                    Ok(Outcome::Done) => self.handle_completion(&task_id),
                    Ok(Outcome::Expanded(sub)) => self.handle_expansion(&task_id, sub),
                    Err(e) => self.handle_failure(&task_id, &e.to_string()),
                }
            }
        }
        self.sync_all();
    }

    fn handle_completion(&mut self, task_id: &TaskId) {
        if let Some(node) = self.graph.get_task_mut(task_id) {
            node.succeed();
            debug!(job = %self.job_id.short(), task = %node.name, "Task succeeded");
        }
    }

    fn handle_failure(&mut self, task_id: &TaskId, error: &str) {
        self.failures += 1;
        if let Some(node) = self.graph.get_task_mut(task_id) {
            node.fail(error);
            warn!(job = %self.job_id.short(), task = %node.name, error, "Task failed");
        }
    }

    fn handle_expansion(&mut self, task_id: &TaskId, sub: TaskGraph) {
        if sub.is_empty() {
            if let Some(node) = self.graph.get_task_mut(task_id) {
                node.succeed();
                debug!(job = %self.job_id.short(), task = %node.name, "Nothing to do");
            }
            return;
        }

        let count = sub.task_count();
        let before = self.graph.get_task(task_id).map(|n| n.status.clone());
        if let Some(node) = self.graph.get_task_mut(task_id) {
            node.expand(count);
        }
        // The node disappears from the graph on splice; log it first.
        self.sync_task(task_id);

        match self.graph.splice(task_id, sub) {
            Ok(_) => {
                info!(job = %self.job_id.short(), task = %task_id.short(), tasks = count, "Expanded meta-task");
            }
            Err(e) => {
                if let (Some(node), Some(status)) = (self.graph.get_task_mut(task_id), before) {
                    node.status = status;
                }
                self.handle_failure(task_id, &format!("Invalid expansion: {}", e));
            }
        }
    }

    /// Mark every pending task skipped. Used once the job is cancelled.
    fn skip_pending(&mut self) {
        for id in self.pending_in_order() {
            if let Some(node) = self.graph.get_task_mut(&id) {
                node.skip();
            }
        }
    }

    async fn publish(&self, status: JobStatus) {
        let mut record = self.record.write().await;
        record.status = status;
        record.tasks = self.tasks.clone();
    }

    fn final_status(&self) -> (JobStatus, Option<String>) {
        if self.cancelled {
            (JobStatus::Cancelled, Some("Job was cancelled".to_string()))
        } else if self.failures > 0 {
            let reason = Some(format!("{} task(s) failed", self.failures));
            match self.failure_policy {
                FailurePolicy::CompletedWithErrors => (JobStatus::CompletedWithErrors, reason),
                FailurePolicy::Failed => (JobStatus::Failed, reason),
            }
        } else {
            (JobStatus::Completed, None)
        }
    }

    /// Run the job to a terminal state and return its final record.
    ///
    /// Cancellation is observed only between dispatch rounds: tasks already
    /// handed to the pool finish, everything else is skipped.
    pub async fn run(mut self) -> JobRecord {
        {
            let mut record = self.record.write().await;
            record.started_at = Some(Utc::now());
        }
        info!(job = %self.job_id.short(), tasks = self.graph.task_count(), "Job started");

        loop {
            if self.cancel.is_cancelled() {
                if !self.cancelled {
                    info!(job = %self.job_id.short(), "Cancelling job");
                }
                self.cancelled = true;
                self.skip_pending();
            } else {
                self.dispatch_ready_tasks();
            }
            self.sync_all();
            self.publish(JobStatus::Running).await;

            if self.in_flight.is_empty() {
                break;
            }

            let wake = tokio::select! {
                event = self.event_rx.recv() => Wake::Event(event),
                _ = self.cancel.cancelled(), if !self.cancelled => Wake::Cancelled,
            };
            match wake {
                Wake::Event(Some(event)) => self.handle_event(event),
                Wake::Event(None) => break,
                Wake::Cancelled => {}
            }
        }

        // Anything still unfinished never got to run.
        let remaining: Vec<TaskId> = self.graph.all_tasks().into_iter().map(|n| n.id).collect();
        for id in remaining {
            if let Some(node) = self.graph.get_task_mut(&id) {
                if !node.is_finished() {
                    node.abort();
                }
            }
        }
        self.sync_all();

        let released = self.locks.release_all(&self.holder);
        let (status, reason) = self.final_status();
        let mut record = self.record.write().await;
        record.status = status;
        record.failure_reason = reason;
        record.tasks = self.tasks.clone();
        record.completed_at = Some(Utc::now());
        info!(
            job = %self.job_id.short(),
            name = %record.name,
            %status,
            failures = self.failures,
            released,
            "Job finished"
        );
        record.clone()
    }
}

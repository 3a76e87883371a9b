//! Task data model for the conformance graph.
//!
//! A task is the atomic unit of reconciliation work. It declares the
//! domain objects it touches so the scheduler can lock them, and runs its
//! body against a [`UnitOfWork`]. A meta-task does no work itself; it
//! inspects current state and returns the [`TaskGraph`] that should run in
//! its place.

use crate::core::graph::TaskGraph;
use crate::error::Result;
use crate::lock::LockObjectReference;
use crate::persistence::UnitOfWork;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

/// Unique identifier for a task node within a graph.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Task status in its lifecycle.
///
/// `Pending → Queued → Running → {Succeeded | Expanded | Failed}`.
/// `Skipped` and `Aborted` are reached without the body ever running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Waiting for its guard to be satisfied.
    Pending,
    /// Handed to the worker pool, waiting for a worker and its locks.
    Queued,
    /// Body is executing.
    Running,
    /// Body returned successfully.
    Succeeded,
    /// Meta-task expanded; its sub-graph now runs in its place.
    Expanded {
        /// Number of tasks spliced in.
        tasks: usize,
    },
    /// Body returned an error.
    Failed {
        /// Error message describing the failure.
        error: String,
    },
    /// Guard can never be satisfied, or the job was cancelled first.
    Skipped,
    /// Job was torn down while the task was queued.
    Aborted,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    /// True once the task will not change state again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded
                | TaskStatus::Expanded { .. }
                | TaskStatus::Failed { .. }
                | TaskStatus::Skipped
                | TaskStatus::Aborted
        )
    }

    /// True for outcomes that satisfy a success-gated guard.
    pub fn is_successful(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Expanded { .. })
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Succeeded => write!(f, "succeeded"),
            TaskStatus::Expanded { tasks } => write!(f, "expanded into {} tasks", tasks),
            TaskStatus::Failed { error } => write!(f, "failed: {}", error),
            TaskStatus::Skipped => write!(f, "skipped"),
            TaskStatus::Aborted => write!(f, "aborted"),
        }
    }
}

/// Readiness condition of a task relative to its predecessors.
///
/// Tasks without predecessors are ready immediately whatever their guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskGuard {
    /// Ready when every predecessor succeeded; skipped if any did not.
    #[default]
    AllPredecessorsSucceeded,
    /// Ready when every predecessor is terminal, whatever the outcome.
    AllPredecessorsCompleted,
    /// Ready as soon as one predecessor is terminal.
    AnyPredecessorCompleted,
    /// Ready when every transitive predecessor succeeded; skipped otherwise.
    AllAncestorsSucceeded,
}

impl std::fmt::Display for TaskGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskGuard::AllPredecessorsSucceeded => write!(f, "all_predecessors_succeeded"),
            TaskGuard::AllPredecessorsCompleted => write!(f, "all_predecessors_completed"),
            TaskGuard::AnyPredecessorCompleted => write!(f, "any_predecessor_completed"),
            TaskGuard::AllAncestorsSucceeded => write!(f, "all_ancestors_succeeded"),
        }
    }
}

/// A unit of work that changes persisted or external state.
///
/// Implementations capture entity ids at construction time and reload
/// them through the unit of work inside `execute`.
pub trait Task: Send + Sync {
    /// Stable, human readable description used in logs and job records.
    fn name(&self) -> String;

    /// Objects that must be write-locked while the body runs.
    fn objects(&self) -> BTreeSet<LockObjectReference> {
        BTreeSet::new()
    }

    fn execute(&self, uow: &mut UnitOfWork<'_>) -> Result<()>;
}

/// A task that computes the graph to run in its place.
///
/// Expansion must be driven by remaining work in the current state. A
/// meta-task that returns itself unconditionally never terminates.
pub trait MetaTask: Send + Sync {
    fn name(&self) -> String;

    fn objects(&self) -> BTreeSet<LockObjectReference> {
        BTreeSet::new()
    }

    /// Build the sub-graph. An empty graph means there is nothing to do.
    fn expand(&self, uow: &mut UnitOfWork<'_>) -> Result<TaskGraph>;
}

/// The executable payload of a graph node.
#[derive(Clone)]
pub enum Work {
    Task(Arc<dyn Task>),
    Meta(Arc<dyn MetaTask>),
}

impl Work {
    pub fn task(task: impl Task + 'static) -> Self {
        Work::Task(Arc::new(task))
    }

    pub fn meta(task: impl MetaTask + 'static) -> Self {
        Work::Meta(Arc::new(task))
    }

    pub fn name(&self) -> String {
        match self {
            Work::Task(t) => t.name(),
            Work::Meta(m) => m.name(),
        }
    }

    pub fn objects(&self) -> BTreeSet<LockObjectReference> {
        match self {
            Work::Task(t) => t.objects(),
            Work::Meta(m) => m.objects(),
        }
    }

    pub fn is_meta(&self) -> bool {
        matches!(self, Work::Meta(_))
    }
}

impl std::fmt::Debug for Work {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Work::Task(t) => f.debug_tuple("Task").field(&t.name()).finish(),
            Work::Meta(m) => f.debug_tuple("Meta").field(&m.name()).finish(),
        }
    }
}

/// A node of the task graph: the work plus its scheduling state.
#[derive(Debug, Clone)]
pub struct TaskNode {
    /// Unique identifier for this node.
    pub id: TaskId,
    /// Name resolved from the work when the node was created.
    pub name: String,
    pub work: Work,
    /// Condition on predecessors that gates readiness.
    pub guard: TaskGuard,
    /// Current execution status.
    pub status: TaskStatus,
    /// Meta-task whose expansion produced this node.
    pub parent: Option<TaskId>,
    pub created_at: DateTime<Utc>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskNode {
    /// Create a pending node for the given work.
    pub fn new(work: Work, guard: TaskGuard) -> Self {
        Self {
            id: TaskId::new(),
            name: work.name(),
            work,
            guard,
            status: TaskStatus::Pending,
            parent: None,
            created_at: Utc::now(),
            queued_at: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Hand the node to the worker pool.
    pub fn queue(&mut self) {
        self.status = TaskStatus::Queued;
        self.queued_at = Some(Utc::now());
    }

    /// Transition to Running and record the start time.
    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn succeed(&mut self) {
        self.finish(TaskStatus::Succeeded);
    }

    /// Mark a meta-task as replaced by `tasks` spliced nodes.
    pub fn expand(&mut self, tasks: usize) {
        self.finish(TaskStatus::Expanded { tasks });
    }

    /// Transition to Failed and record the completion time.
    pub fn fail(&mut self, error: &str) {
        self.finish(TaskStatus::Failed {
            error: error.to_string(),
        });
    }

    pub fn skip(&mut self) {
        self.finish(TaskStatus::Skipped);
    }

    pub fn abort(&mut self) {
        self.finish(TaskStatus::Aborted);
    }

    fn finish(&mut self, status: TaskStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    /// Check if the task is in a terminal state.
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check if the task has not been handed out yet.
    pub fn can_start(&self) -> bool {
        self.status == TaskStatus::Pending
    }
}

//! Job identity and the records exposed to callers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{TaskGuard, TaskId, TaskNode, TaskStatus};
use crate::error::Error;
use crate::lock::{LockHolder, LockObjectReference, LockType};

/// Unique identifier for a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A job holds its locks under its own id.
impl From<JobId> for LockHolder {
    fn from(id: JobId) -> Self {
        LockHolder(id.0)
    }
}

/// Job status in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a job slot.
    Queued,
    Running,
    /// Every task succeeded.
    Completed,
    /// At least one task failed and the job ran to structural completion.
    CompletedWithErrors,
    /// At least one task failed, under the `failed` failure policy.
    Failed,
    /// Cancelled before every task ran.
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::CompletedWithErrors => write!(f, "completed with errors"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Per-task log line of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub name: String,
    pub guard: TaskGuard,
    pub status: TaskStatus,
    pub objects: Vec<LockObjectReference>,
    pub predecessors: Vec<TaskId>,
    /// Meta-task whose expansion produced this task.
    pub parent: Option<TaskId>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn from_node(node: &TaskNode, predecessors: Vec<TaskId>) -> Self {
        Self {
            id: node.id,
            name: node.name.clone(),
            guard: node.guard,
            status: node.status.clone(),
            objects: node.work.objects().into_iter().collect(),
            predecessors,
            parent: node.parent,
            queued_at: node.queued_at,
            started_at: node.started_at,
            completed_at: node.completed_at,
        }
    }

    /// Error message if the task failed.
    pub fn error(&self) -> Option<&str> {
        match &self.status {
            TaskStatus::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// A job-level lock that was not granted in time. The job ran none of
/// its tasks and may be submitted again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockFailure {
    pub object: String,
    pub lock_type: LockType,
    pub timeout: Duration,
}

impl LockFailure {
    /// The matching [`Error::LockTimeout`], for callers that propagate it.
    pub fn to_error(&self) -> Error {
        Error::LockTimeout {
            object: self.object.clone(),
            lock_type: self.lock_type,
            timeout: self.timeout,
        }
    }
}

/// Status and task log of one job, as returned by `query`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub name: String,
    pub status: JobStatus,
    /// Objects locked for the whole job.
    pub objects: Vec<LockObjectReference>,
    pub failure_reason: Option<String>,
    /// Set when the job's own locks could not be acquired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_failure: Option<LockFailure>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Tasks in dispatch order. Meta-tasks stay listed after expansion.
    pub tasks: Vec<TaskRecord>,
}

impl JobRecord {
    pub fn new(id: JobId, name: &str, objects: Vec<LockObjectReference>) -> Self {
        Self {
            id,
            name: name.to_string(),
            status: JobStatus::Queued,
            objects,
            failure_reason: None,
            lock_failure: None,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            tasks: Vec::new(),
        }
    }

    pub fn task(&self, id: &TaskId) -> Option<&TaskRecord> {
        self.tasks.iter().find(|t| t.id == *id)
    }

    /// First task with the given name.
    pub fn task_by_name(&self, name: &str) -> Option<&TaskRecord> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn failed_tasks(&self) -> Vec<&TaskRecord> {
        self.tasks.iter().filter(|t| t.error().is_some()).collect()
    }

    /// Number of tasks whose status matches.
    pub fn count(&self, matches: impl Fn(&TaskStatus) -> bool) -> usize {
        self.tasks.iter().filter(|t| matches(&t.status)).count()
    }
}

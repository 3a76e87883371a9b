//! Worker pool for task bodies.
//!
//! The `TaskPool` runs task bodies on the blocking thread pool, bounded by
//! a semaphore shared across every job. Each body runs with its declared
//! objects write-locked on behalf of its job and inside its own unit of
//! work. Results come back to the owning scheduler over a channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tracing::debug;

use crate::core::{TaskGraph, TaskId, Work};
use crate::error::{Error, Result};
use crate::lock::{LockHolder, LockManager, LockType};
use crate::persistence::{transaction, EventSink, Store};
use crate::util;

/// What a successful body produced.
#[derive(Debug)]
pub enum Outcome {
    /// Leaf task finished.
    Done,
    /// Meta-task produced the graph to splice in its place.
    Expanded(TaskGraph),
}

/// Events emitted by the pool for task lifecycle changes.
#[derive(Debug)]
pub enum TaskEvent {
    /// The task's locks are held and its body is about to run.
    Started {
        /// The task that started.
        task_id: TaskId,
    },
    /// The body returned, or could not run.
    Finished {
        /// The task that finished.
        task_id: TaskId,
        /// Outcome or the error that failed the task.
        result: Result<Outcome>,
    },
}

/// Shared dependencies of every task body.
struct Worker {
    locks: Arc<LockManager>,
    store: Arc<dyn Store>,
    events: Arc<dyn EventSink>,
    lock_timeout: Duration,
}

impl Worker {
    fn run(
        &self,
        task_id: TaskId,
        holder: LockHolder,
        work: &Work,
        events: &mpsc::UnboundedSender<TaskEvent>,
    ) -> Result<Outcome> {
        let objects = work.objects();
        let _locks = self
            .locks
            .acquire_all(holder, objects, LockType::Write, self.lock_timeout)?;
        let _ = events.send(TaskEvent::Started { task_id });
        debug!(task = %task_id.short(), name = %work.name(), "Executing");

        let store = self.store.as_ref();
        let events = self.events.as_ref();
        match work {
            Work::Task(task) => {
                transaction::execute(store, events, |uow| task.execute(uow)).map(|()| Outcome::Done)
            }
            Work::Meta(meta) => {
                transaction::execute(store, events, |uow| meta.expand(uow)).map(Outcome::Expanded)
            }
        }
    }
}

/// Bounded pool executing task bodies.
///
/// `spawn` never blocks: the task waits for a permit on the async side and
/// only then occupies a blocking thread.
pub struct TaskPool {
    /// Permits for concurrently running bodies.
    permits: Arc<Semaphore>,
    /// Maximum number of bodies allowed to run at once.
    max_concurrent: usize,
    worker: Arc<Worker>,
}

impl TaskPool {
    /// Create a new pool with the given capacity.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(
        max_concurrent: usize,
        locks: Arc<LockManager>,
        store: Arc<dyn Store>,
        events: Arc<dyn EventSink>,
        lock_timeout: Duration,
    ) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            worker: Arc::new(Worker {
                locks,
                store,
                events,
                lock_timeout,
            }),
        }
    }

    /// Get the maximum number of concurrent bodies.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Number of bodies holding a permit right now.
    pub fn active_count(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    pub fn has_capacity(&self) -> bool {
        self.permits.available_permits() > 0
    }

    /// Queue `work` for execution on behalf of `holder`.
    ///
    /// Exactly one `Finished` event is sent for every spawned task, preceded
    /// by `Started` once its locks are granted, so lock waits count as
    /// queued time.
    pub fn spawn(
        &self,
        task_id: TaskId,
        holder: LockHolder,
        work: Work,
        events: mpsc::UnboundedSender<TaskEvent>,
    ) {
        let permits = Arc::clone(&self.permits);
        let worker = Arc::clone(&self.worker);

        tokio::spawn(async move {
            let result = match permits.acquire_owned().await {
                Ok(_permit) => {
                    let started = events.clone();
                    util::blocking(move || worker.run(task_id, holder, &work, &started)).await
                }
                Err(_) => Err(Error::EngineShutdown),
            };
            let _ = events.send(TaskEvent::Finished { task_id, result });
        });
    }

    /// Stop handing out permits. Tasks still waiting fail with
    /// [`Error::EngineShutdown`].
    pub fn close(&self) {
        self.permits.close();
    }
}

impl std::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPool")
            .field("max_concurrent", &self.max_concurrent)
            .field("active", &self.active_count())
            .finish()
    }
}

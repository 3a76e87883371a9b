//! Job engine: the only surface callers use to run conformance work.
//!
//! `submit` takes a root task graph and returns a job id right away. The
//! job waits for one of `job_pool_size` slots, takes its job-level locks,
//! then a [`JobScheduler`] runs it on the shared [`TaskPool`]. Callers
//! follow progress with `query` and `wait`. Only the most recent
//! `finished_job_retention` finished jobs stay queryable; the history
//! file is the durable trail.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::history::JobHistory;
use super::job::{JobId, JobRecord, JobStatus, LockFailure};
use super::pool::TaskPool;
use super::scheduler::JobScheduler;
use crate::config::{Config, FailurePolicy};
use crate::core::{TaskGraph, TaskGuard, Work};
use crate::error::{Error, Result};
use crate::lock::{LockHolder, LockManager, LockObjectReference, LockType, UnlockObjectTask};
use crate::persistence::{EventSink, Store};
use crate::util;

/// A job to submit: the root graph plus locks held for the whole job.
#[derive(Debug)]
pub struct JobRequest {
    pub name: String,
    pub graph: TaskGraph,
    pub locks: Vec<(LockObjectReference, LockType)>,
}

impl JobRequest {
    pub fn new(name: &str, graph: TaskGraph) -> Self {
        Self {
            name: name.to_string(),
            graph,
            locks: Vec::new(),
        }
    }

    /// Hold `object` for the whole job.
    pub fn with_lock(mut self, object: LockObjectReference, lock_type: LockType) -> Self {
        self.locks.push((object, lock_type));
        self
    }
}

struct JobEntry {
    record: Arc<RwLock<JobRecord>>,
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

/// Known jobs, plus finished ones in the order they finished.
#[derive(Default)]
struct JobTable {
    entries: HashMap<JobId, JobEntry>,
    finished: VecDeque<JobId>,
}

impl JobTable {
    /// Mark `id` finished and drop the oldest finished jobs beyond `retain`.
    fn finish(&mut self, id: JobId, retain: usize) -> usize {
        self.finished.push_back(id);
        let mut evicted = 0;
        while self.finished.len() > retain {
            if let Some(old) = self.finished.pop_front() {
                self.entries.remove(&old);
                evicted += 1;
            }
        }
        evicted
    }
}

/// Everything a job needs once it holds a slot.
struct JobRun {
    job_id: JobId,
    graph: TaskGraph,
    locks: Vec<(LockObjectReference, LockType)>,
    manager: Arc<LockManager>,
    pool: Arc<TaskPool>,
    record: Arc<RwLock<JobRecord>>,
    cancel: CancellationToken,
    failure_policy: FailurePolicy,
    lock_timeout: Duration,
}

impl JobRun {
    /// Take the job-level locks, then run the graph.
    ///
    /// A job cancelled while queued skips its locks; the scheduler then
    /// skips every task.
    async fn run(mut self) -> JobRecord {
        if !self.locks.is_empty() && !self.cancel.is_cancelled() {
            let manager = Arc::clone(&self.manager);
            let holder = LockHolder::from(self.job_id);
            let requested = std::mem::take(&mut self.locks);
            let timeout = self.lock_timeout;
            match util::blocking(move || manager.acquire_many(holder, &requested, timeout)).await {
                Ok(tokens) => {
                    self.graph.append_task_with_guard(
                        Work::task(UnlockObjectTask::new(Arc::clone(&self.manager), tokens)),
                        TaskGuard::AllPredecessorsCompleted,
                    );
                }
                Err(e) => return self.abandon(e).await,
            }
        }

        JobScheduler::new(
            self.job_id,
            self.graph,
            self.pool,
            self.manager,
            self.record,
            self.cancel,
            self.failure_policy,
        )
        .run()
        .await
    }

    /// Finish the job as failed without running any task.
    async fn abandon(self, error: Error) -> JobRecord {
        let mut record = self.record.write().await;
        warn!(job = %self.job_id.short(), name = %record.name, error = %error, "Job locks unavailable");
        record.status = JobStatus::Failed;
        record.failure_reason = Some(error.to_string());
        if let Error::LockTimeout {
            object,
            lock_type,
            timeout,
        } = error
        {
            record.lock_failure = Some(LockFailure {
                object,
                lock_type,
                timeout,
            });
        }
        record.completed_at = Some(Utc::now());
        record.clone()
    }
}

/// Runs job graphs on a shared worker pool.
pub struct JobEngine {
    config: Config,
    locks: Arc<LockManager>,
    pool: Arc<TaskPool>,
    job_slots: Arc<Semaphore>,
    jobs: Arc<RwLock<JobTable>>,
    history: Option<Arc<JobHistory>>,
    shutdown: CancellationToken,
}

impl JobEngine {
    pub fn new(config: Config, store: Arc<dyn Store>, events: Arc<dyn EventSink>) -> Self {
        let locks = Arc::new(LockManager::new(config.lock_timeout()));
        Self::with_lock_manager(config, store, events, locks)
    }

    /// Engine sharing an existing lock manager.
    pub fn with_lock_manager(
        config: Config,
        store: Arc<dyn Store>,
        events: Arc<dyn EventSink>,
        locks: Arc<LockManager>,
    ) -> Self {
        let pool = Arc::new(TaskPool::new(
            config.task_pool_size,
            Arc::clone(&locks),
            store,
            events,
            config.lock_timeout(),
        ));
        let history = config.history_path().map(|path| Arc::new(JobHistory::new(path)));
        info!(
            job_pool_size = config.job_pool_size,
            task_pool_size = config.task_pool_size,
            "Job engine started"
        );
        Self {
            job_slots: Arc::new(Semaphore::new(config.job_pool_size.max(1))),
            config,
            locks,
            pool,
            jobs: Arc::new(RwLock::new(JobTable::default())),
            history,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn history(&self) -> Option<&JobHistory> {
        self.history.as_deref()
    }

    /// Submit a graph with no job-level locks.
    pub async fn submit(&self, name: &str, graph: TaskGraph) -> Result<JobId> {
        self.submit_request(JobRequest::new(name, graph)).await
    }

    /// Submit a job that holds `request.locks` while it runs.
    ///
    /// The job-level locks are taken in canonical order once the job has
    /// a slot, so a queued job never holds a lock a running job waits
    /// for. If any of them cannot be acquired within the configured lock
    /// timeout, nothing stays held and the job ends `Failed` with its
    /// [`LockFailure`] recorded; the caller may submit it again later.
    /// Otherwise an [`UnlockObjectTask`] is appended to the graph with an
    /// always-run guard.
    ///
    /// # Errors
    /// Returns [`Error::EngineShutdown`] after [`shutdown`](Self::shutdown).
    pub async fn submit_request(&self, request: JobRequest) -> Result<JobId> {
        if self.shutdown.is_cancelled() {
            return Err(Error::EngineShutdown);
        }

        let JobRequest { name, graph, locks } = request;
        let job_id = JobId::new();
        let objects: Vec<LockObjectReference> = locks.iter().map(|(o, _)| o.clone()).collect();
        let record = Arc::new(RwLock::new(JobRecord::new(job_id, &name, objects)));
        let cancel = self.shutdown.child_token();
        let (done_tx, done_rx) = watch::channel(false);

        let job = JobRun {
            job_id,
            graph,
            locks,
            manager: Arc::clone(&self.locks),
            pool: Arc::clone(&self.pool),
            record: Arc::clone(&record),
            cancel: cancel.clone(),
            failure_policy: self.config.failure_policy,
            lock_timeout: self.config.lock_timeout(),
        };

        self.jobs.write().await.entries.insert(
            job_id,
            JobEntry {
                record,
                cancel,
                done: done_rx,
            },
        );
        info!(job = %job_id.short(), %name, "Job submitted");

        let slots = Arc::clone(&self.job_slots);
        let history = self.history.clone();
        let jobs = Arc::clone(&self.jobs);
        let retain = self.config.finished_job_retention;
        tokio::spawn(async move {
            let _slot = slots.acquire_owned().await.ok();
            let record = job.run().await;
            if let Some(history) = history {
                let result = util::blocking(move || history.append(&record)).await;
                if let Err(e) = result {
                    warn!(job = %job_id.short(), error = %e, "Failed to write job history");
                }
            }
            let evicted = jobs.write().await.finish(job_id, retain);
            if evicted > 0 {
                debug!(evicted, "Evicted finished jobs");
            }
            let _ = done_tx.send(true);
        });

        Ok(job_id)
    }

    /// Current status and task log of a job.
    pub async fn query(&self, id: &JobId) -> Option<JobRecord> {
        let record = {
            let jobs = self.jobs.read().await;
            Arc::clone(&jobs.entries.get(id)?.record)
        };
        let snapshot = record.read().await.clone();
        Some(snapshot)
    }

    /// Wait until the job reaches a terminal state and return its record.
    ///
    /// The record is returned even if the job is evicted meanwhile.
    pub async fn wait(&self, id: &JobId) -> Result<JobRecord> {
        let (record, mut done) = {
            let jobs = self.jobs.read().await;
            let entry = jobs.entries.get(id).ok_or(Error::JobNotFound(*id))?;
            (Arc::clone(&entry.record), entry.done.clone())
        };
        loop {
            if *done.borrow_and_update() {
                break;
            }
            if done.changed().await.is_err() {
                break;
            }
        }
        let snapshot = record.read().await.clone();
        Ok(snapshot)
    }

    /// Like [`wait`](Self::wait), giving up after `duration`.
    pub async fn wait_timeout(&self, id: &JobId, duration: Duration) -> Result<JobRecord> {
        tokio::time::timeout(duration, self.wait(id))
            .await
            .map_err(|_| Error::Timeout(duration))?
    }

    /// Stop scheduling the job's remaining tasks. Tasks already running
    /// finish; the job ends as `Cancelled` with its locks released.
    pub async fn cancel(&self, id: &JobId) -> Result<()> {
        let jobs = self.jobs.read().await;
        let entry = jobs.entries.get(id).ok_or(Error::JobNotFound(*id))?;
        info!(job = %id.short(), "Cancel requested");
        entry.cancel.cancel();
        Ok(())
    }

    /// Records of unfinished jobs and the retained finished ones.
    pub async fn jobs(&self) -> Vec<JobRecord> {
        let records: Vec<_> = {
            let jobs = self.jobs.read().await;
            jobs.entries.values().map(|e| Arc::clone(&e.record)).collect()
        };
        let mut snapshots = Vec::with_capacity(records.len());
        for record in records {
            snapshots.push(record.read().await.clone());
        }
        snapshots.sort_by_key(|r| r.queued_at);
        snapshots
    }

    /// Jobs that have not reached a terminal state.
    pub async fn active_jobs(&self) -> Vec<JobId> {
        self.jobs()
            .await
            .into_iter()
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.id)
            .collect()
    }

    /// Cancel every job, wait for them to finish and refuse new work.
    pub async fn shutdown(&self) {
        info!("Shutting down job engine");
        self.shutdown.cancel();
        let ids: Vec<JobId> = self.jobs.read().await.entries.keys().copied().collect();
        for id in ids {
            if let Ok(record) = self.wait(&id).await {
                if record.status != JobStatus::Cancelled {
                    info!(job = %id.short(), status = %record.status, "Job finished before shutdown");
                }
            }
        }
        self.pool.close();
    }
}

impl std::fmt::Debug for JobEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobEngine")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .finish()
    }
}

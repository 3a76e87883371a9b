//! Job execution for conformd.
//!
//! A [`JobEngine`] accepts task graphs as jobs. Each job is driven by its
//! own [`JobScheduler`], which hands task bodies to a [`TaskPool`] shared
//! by every job. Finished jobs can be appended to a [`JobHistory`].

mod engine;
mod history;
mod job;
mod pool;
mod queue;
mod scheduler;

pub use engine::{JobEngine, JobRequest};
pub use history::JobHistory;
pub use job::{JobId, JobRecord, JobStatus, TaskRecord};
pub use pool::{Outcome, TaskEvent, TaskPool};
pub use queue::JobQueue;
pub use scheduler::JobScheduler;

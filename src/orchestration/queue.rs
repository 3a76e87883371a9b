//! Serial job queue.
//!
//! Jobs put on a `JobQueue` run one after another in submission order:
//! the next job is submitted only once the previous one is terminal.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::engine::{JobEngine, JobRequest};
use crate::error::{Error, Result};

pub struct JobQueue {
    tx: mpsc::UnboundedSender<JobRequest>,
    worker: JoinHandle<()>,
}

impl JobQueue {
    /// Start the queue worker on the current runtime.
    pub fn start(engine: Arc<JobEngine>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<JobRequest>();
        let worker = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let name = request.name.clone();
                let id = match engine.submit_request(request).await {
                    Ok(id) => id,
                    Err(e) => {
                        warn!(job = %name, error = %e, "Queued job rejected");
                        continue;
                    }
                };
                debug!(job = %id.short(), %name, "Queued job submitted");
                if let Err(e) = engine.wait(&id).await {
                    warn!(job = %id.short(), error = %e, "Lost track of queued job");
                }
            }
        });
        Self { tx, worker }
    }

    /// Enqueue a job behind everything already queued.
    pub fn put(&self, request: JobRequest) -> Result<()> {
        self.tx.send(request).map_err(|_| Error::EngineShutdown)
    }

    /// Stop accepting jobs and wait for the queued ones to finish.
    pub async fn close(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            warn!(error = %e, "Job queue worker panicked");
        }
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use super::{LockManager, LockObjectReference, UnlockToken};
use crate::core::Task;
use crate::error::Result;
use crate::persistence::UnitOfWork;

/// Releases job-level locks. Appended at the end of a job's graph with an
/// always-run guard so the locks go away whatever happened before it.
pub struct UnlockObjectTask {
    manager: Arc<LockManager>,
    tokens: Vec<UnlockToken>,
}

impl UnlockObjectTask {
    pub fn new(manager: Arc<LockManager>, tokens: Vec<UnlockToken>) -> Self {
        Self { manager, tokens }
    }
}

impl Task for UnlockObjectTask {
    fn name(&self) -> String {
        let objects: Vec<String> = self.tokens.iter().map(|t| t.object().to_string()).collect();
        format!("Release locks on {}", objects.join(", "))
    }

    // The locks released here are already held by the job itself.
    fn objects(&self) -> BTreeSet<LockObjectReference> {
        BTreeSet::new()
    }

    fn execute(&self, _uow: &mut UnitOfWork<'_>) -> Result<()> {
        for token in &self.tokens {
            if !self.manager.release_lock(token) {
                debug!(object = %token.object(), "Lock was released before unlock task ran");
            }
        }
        Ok(())
    }
}

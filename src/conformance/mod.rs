//! Kubernetes deployment-spec conformance tasks.
//!
//! Build the root task with [`ConformanceTasks::conform_deployment_spec`]
//! and submit it to a [`JobEngine`](crate::orchestration::JobEngine).
//! Everything else is produced by meta-task expansion at run time.

mod deployment;
mod factory;
mod pods;
mod retry;

pub use deployment::{
    CheckDeploymentReadyTask, ConformDeploymentSpecMetaTask, CreateDeploymentTask,
    DeleteDeploymentSpecFromDbTask, DeleteDeploymentTask, UpdateDeploymentTask,
};
pub use factory::ConformanceTasks;
pub use pods::{ConformDeploymentPodsMetaTask, CreateDaiTask, DeleteDaiTask};
pub use retry::{poll_until, RetryPolicy};

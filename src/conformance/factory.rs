use std::sync::Arc;

use super::deployment::{
    CheckDeploymentReadyTask, ConformDeploymentSpecMetaTask, CreateDeploymentTask,
    DeleteDeploymentSpecFromDbTask, DeleteDeploymentTask, UpdateDeploymentTask,
};
use super::pods::{ConformDeploymentPodsMetaTask, CreateDaiTask, DeleteDaiTask};
use super::retry::RetryPolicy;
use crate::core::Work;
use crate::error::Result;
use crate::persistence::{
    DeploymentSpec, DistributedApplianceInstance, UnitOfWork, VirtualSystem,
    VirtualizationConnector,
};
use crate::plugin::{ContainerDeploymentApi, ContainerDeployments, ContainerPod, PluginRegistry};

/// Builds the deployment-spec conformance tasks.
///
/// Every task carries a clone of the factory so a meta-task can build
/// the tasks it expands into. Tasks keep only ids and names of the
/// entities they act on and load them again inside their own unit of work.
#[derive(Debug, Clone)]
pub struct ConformanceTasks {
    plugins: Arc<PluginRegistry>,
    retry: RetryPolicy,
}

impl ConformanceTasks {
    pub fn new(plugins: Arc<PluginRegistry>, retry: RetryPolicy) -> Self {
        Self { plugins, retry }
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Entry point: reconcile one deployment spec with its cluster.
    pub fn conform_deployment_spec(&self, ds: &DeploymentSpec) -> Work {
        Work::meta(ConformDeploymentSpecMetaTask::new(self.clone(), ds))
    }

    pub fn conform_deployment_pods(&self, ds: &DeploymentSpec) -> Work {
        Work::meta(ConformDeploymentPodsMetaTask::new(self.clone(), ds))
    }

    pub fn create_deployment(&self, ds: &DeploymentSpec) -> Work {
        Work::task(CreateDeploymentTask::new(self.clone(), ds))
    }

    pub fn update_deployment(&self, ds: &DeploymentSpec) -> Work {
        Work::task(UpdateDeploymentTask::new(self.clone(), ds))
    }

    pub fn delete_deployment(&self, ds: &DeploymentSpec) -> Work {
        Work::task(DeleteDeploymentTask::new(self.clone(), ds))
    }

    pub fn check_deployment_ready(&self, ds: &DeploymentSpec) -> Work {
        Work::task(CheckDeploymentReadyTask::new(self.clone(), ds))
    }

    pub fn delete_deployment_spec_from_db(&self, ds: &DeploymentSpec) -> Work {
        Work::task(DeleteDeploymentSpecFromDbTask::new(ds))
    }

    pub fn create_dai(&self, ds: &DeploymentSpec, pod: ContainerPod) -> Work {
        Work::task(CreateDaiTask::new(ds, pod))
    }

    pub fn delete_dai(&self, dai: &DistributedApplianceInstance) -> Work {
        Work::task(DeleteDaiTask::new(dai))
    }

    /// Container API of the cluster a deployment spec lives on.
    pub(crate) fn deployment_api(
        &self,
        uow: &UnitOfWork<'_>,
        ds: &DeploymentSpec,
    ) -> Result<Box<dyn ContainerDeploymentApi>> {
        let vs = uow.find::<VirtualSystem>(ds.vs_id)?;
        let vc = uow.find::<VirtualizationConnector>(vs.vc_id)?;
        self.plugins.resolve::<ContainerDeployments>(&vc)
    }
}

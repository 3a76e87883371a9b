//! Deployment-spec conformance.
//!
//! [`ConformDeploymentSpecMetaTask`] looks at the persisted deployment
//! spec and its parents and expands into one of two plans:
//!
//! - live spec: create or update the deployment, wait until it is ready,
//!   then reconcile its pods with the stored appliance instances;
//! - spec, virtual system or appliance marked for deletion: delete the
//!   deployment and every instance, then remove the spec itself.

use std::collections::BTreeSet;

use tracing::{debug, info};

use super::factory::ConformanceTasks;
use super::retry::poll_until;
use crate::core::{MetaTask, Task, TaskGraph};
use crate::error::{Error, Result};
use crate::lock::LockObjectReference;
use crate::persistence::{
    DeploymentSpec, DistributedAppliance, DistributedApplianceInstance, UnitOfWork, VirtualSystem,
};
use crate::plugin::{deployment_label, DeploymentRequest};

fn deployment_request(ds: &DeploymentSpec, vs: &VirtualSystem) -> DeploymentRequest {
    DeploymentRequest {
        name: ds.deployment_name(),
        namespace: ds.namespace.clone(),
        image: vs.image.clone(),
        replicas: ds.instance_count,
        label: deployment_label(ds),
    }
}

fn objects(ds: &LockObjectReference) -> BTreeSet<LockObjectReference> {
    BTreeSet::from([ds.clone()])
}

fn deployment_uid(ds: &DeploymentSpec) -> Result<String> {
    ds.external_id.clone().ok_or_else(|| {
        Error::Validation(format!("Deployment Spec '{}' has no deployment", ds.name))
    })
}

pub struct ConformDeploymentSpecMetaTask {
    factory: ConformanceTasks,
    ds: LockObjectReference,
}

impl ConformDeploymentSpecMetaTask {
    pub fn new(factory: ConformanceTasks, ds: &DeploymentSpec) -> Self {
        Self {
            factory,
            ds: LockObjectReference::from_entity(ds),
        }
    }
}

impl MetaTask for ConformDeploymentSpecMetaTask {
    fn name(&self) -> String {
        format!("Checking Deployment Spec '{}'", self.ds.name)
    }

    fn objects(&self) -> BTreeSet<LockObjectReference> {
        objects(&self.ds)
    }

    fn expand(&self, uow: &mut UnitOfWork<'_>) -> Result<TaskGraph> {
        let ds = uow.find::<DeploymentSpec>(self.ds.id)?;
        let vs = uow.find::<VirtualSystem>(ds.vs_id)?;
        let da = uow.find::<DistributedAppliance>(vs.da_id)?;
        let tasks = &self.factory;
        let mut graph = TaskGraph::new();

        if !ds.marked_for_deletion && !vs.marked_for_deletion && !da.marked_for_deletion {
            if ds.external_id.is_some() {
                graph.append_task(tasks.update_deployment(&ds));
            } else {
                graph.append_task(tasks.create_deployment(&ds));
            }
            graph.append_task(tasks.check_deployment_ready(&ds));
            graph.append_task(tasks.conform_deployment_pods(&ds));
        } else {
            info!(ds = %ds.name, "Deployment spec marked for deletion");
            graph.append_task(tasks.delete_deployment(&ds));
            for dai in uow.find_where::<DistributedApplianceInstance>(|d| d.ds_id == Some(ds.id))? {
                graph.add_task(tasks.delete_dai(&dai));
            }
            graph.append_task(tasks.delete_deployment_spec_from_db(&ds));
        }
        Ok(graph)
    }
}

pub struct CreateDeploymentTask {
    factory: ConformanceTasks,
    ds: LockObjectReference,
}

impl CreateDeploymentTask {
    pub fn new(factory: ConformanceTasks, ds: &DeploymentSpec) -> Self {
        Self {
            factory,
            ds: LockObjectReference::from_entity(ds),
        }
    }
}

impl Task for CreateDeploymentTask {
    fn name(&self) -> String {
        format!("Create deployment for Deployment Spec '{}'", self.ds.name)
    }

    fn objects(&self) -> BTreeSet<LockObjectReference> {
        objects(&self.ds)
    }

    fn execute(&self, uow: &mut UnitOfWork<'_>) -> Result<()> {
        let mut ds = uow.find::<DeploymentSpec>(self.ds.id)?;
        let vs = uow.find::<VirtualSystem>(ds.vs_id)?;
        let api = self.factory.deployment_api(uow, &ds)?;

        let uid = api.create_deployment(&deployment_request(&ds, &vs))?;
        info!(ds = %ds.name, deployment = %ds.deployment_name(), %uid, "Created deployment");
        ds.external_id = Some(uid);
        uow.update(&ds)
    }
}

pub struct UpdateDeploymentTask {
    factory: ConformanceTasks,
    ds: LockObjectReference,
}

impl UpdateDeploymentTask {
    pub fn new(factory: ConformanceTasks, ds: &DeploymentSpec) -> Self {
        Self {
            factory,
            ds: LockObjectReference::from_entity(ds),
        }
    }
}

impl Task for UpdateDeploymentTask {
    fn name(&self) -> String {
        format!("Update deployment for Deployment Spec '{}'", self.ds.name)
    }

    fn objects(&self) -> BTreeSet<LockObjectReference> {
        objects(&self.ds)
    }

    fn execute(&self, uow: &mut UnitOfWork<'_>) -> Result<()> {
        let ds = uow.find::<DeploymentSpec>(self.ds.id)?;
        let vs = uow.find::<VirtualSystem>(ds.vs_id)?;
        let uid = deployment_uid(&ds)?;
        let api = self.factory.deployment_api(uow, &ds)?;

        api.update_deployment(&uid, &deployment_request(&ds, &vs))?;
        debug!(ds = %ds.name, %uid, replicas = ds.instance_count, "Updated deployment");
        Ok(())
    }
}

pub struct DeleteDeploymentTask {
    factory: ConformanceTasks,
    ds: LockObjectReference,
}

impl DeleteDeploymentTask {
    pub fn new(factory: ConformanceTasks, ds: &DeploymentSpec) -> Self {
        Self {
            factory,
            ds: LockObjectReference::from_entity(ds),
        }
    }
}

impl Task for DeleteDeploymentTask {
    fn name(&self) -> String {
        format!("Delete deployment for Deployment Spec '{}'", self.ds.name)
    }

    fn objects(&self) -> BTreeSet<LockObjectReference> {
        objects(&self.ds)
    }

    fn execute(&self, uow: &mut UnitOfWork<'_>) -> Result<()> {
        let mut ds = uow.find::<DeploymentSpec>(self.ds.id)?;
        let Some(uid) = ds.external_id.take() else {
            debug!(ds = %ds.name, "No deployment to delete");
            return Ok(());
        };
        let api = self.factory.deployment_api(uow, &ds)?;

        api.delete_deployment(&uid, &ds.namespace)?;
        info!(ds = %ds.name, %uid, "Deleted deployment");
        uow.update(&ds)
    }
}

/// Waits until the deployment runs the spec's instance count.
pub struct CheckDeploymentReadyTask {
    factory: ConformanceTasks,
    ds: LockObjectReference,
}

impl CheckDeploymentReadyTask {
    pub fn new(factory: ConformanceTasks, ds: &DeploymentSpec) -> Self {
        Self {
            factory,
            ds: LockObjectReference::from_entity(ds),
        }
    }
}

impl Task for CheckDeploymentReadyTask {
    fn name(&self) -> String {
        format!("Check deployment of Deployment Spec '{}' is ready", self.ds.name)
    }

    fn objects(&self) -> BTreeSet<LockObjectReference> {
        objects(&self.ds)
    }

    fn execute(&self, uow: &mut UnitOfWork<'_>) -> Result<()> {
        let ds = uow.find::<DeploymentSpec>(self.ds.id)?;
        let uid = deployment_uid(&ds)?;
        let api = self.factory.deployment_api(uow, &ds)?;
        let target = format!("Deployment '{}'", ds.deployment_name());

        poll_until(&self.factory.retry_policy(), &target, |_| {
            Ok(api
                .get_deployment(&uid, &ds.namespace)?
                .is_some_and(|state| state.is_ready(ds.instance_count)))
        })?;
        Ok(())
    }
}

/// Removes a deployment spec and whatever instances still point at it.
pub struct DeleteDeploymentSpecFromDbTask {
    ds: LockObjectReference,
}

impl DeleteDeploymentSpecFromDbTask {
    pub fn new(ds: &DeploymentSpec) -> Self {
        Self {
            ds: LockObjectReference::from_entity(ds),
        }
    }
}

impl Task for DeleteDeploymentSpecFromDbTask {
    fn name(&self) -> String {
        format!("Delete Deployment Spec '{}' from database", self.ds.name)
    }

    fn objects(&self) -> BTreeSet<LockObjectReference> {
        objects(&self.ds)
    }

    fn execute(&self, uow: &mut UnitOfWork<'_>) -> Result<()> {
        let Some(ds) = uow.try_find::<DeploymentSpec>(self.ds.id)? else {
            return Ok(());
        };
        for dai in uow.find_where::<DistributedApplianceInstance>(|d| d.ds_id == Some(ds.id))? {
            uow.delete::<DistributedApplianceInstance>(dai.id)?;
        }
        uow.delete::<DeploymentSpec>(ds.id)?;
        info!(ds = %ds.name, "Deleted deployment spec");
        Ok(())
    }
}

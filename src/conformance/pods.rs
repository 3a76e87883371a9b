//! Pod conformance: one appliance instance per running pod.

use std::collections::{BTreeSet, HashSet};

use tracing::{debug, info};

use super::factory::ConformanceTasks;
use crate::core::{MetaTask, Task, TaskGraph};
use crate::error::Result;
use crate::lock::LockObjectReference;
use crate::persistence::{DeploymentSpec, DistributedApplianceInstance, UnitOfWork};
use crate::plugin::{deployment_label, ContainerPod};

/// Compares the deployment's pods with the stored instances and expands
/// into a create task per new pod and a delete task per orphan instance.
pub struct ConformDeploymentPodsMetaTask {
    factory: ConformanceTasks,
    ds: LockObjectReference,
}

impl ConformDeploymentPodsMetaTask {
    pub fn new(factory: ConformanceTasks, ds: &DeploymentSpec) -> Self {
        Self {
            factory,
            ds: LockObjectReference::from_entity(ds),
        }
    }
}

impl MetaTask for ConformDeploymentPodsMetaTask {
    fn name(&self) -> String {
        format!("Conform pods of Deployment Spec '{}'", self.ds.name)
    }

    fn objects(&self) -> BTreeSet<LockObjectReference> {
        BTreeSet::from([self.ds.clone()])
    }

    fn expand(&self, uow: &mut UnitOfWork<'_>) -> Result<TaskGraph> {
        let ds = uow.find::<DeploymentSpec>(self.ds.id)?;
        let pods = match ds.external_id {
            Some(_) => self
                .factory
                .deployment_api(uow, &ds)?
                .pods_by_label(&deployment_label(&ds), &ds.namespace)?,
            None => Vec::new(),
        };
        let dais = uow.find_where::<DistributedApplianceInstance>(|d| d.ds_id == Some(ds.id))?;

        let known: HashSet<&str> = dais.iter().filter_map(|d| d.external_id.as_deref()).collect();
        let running: HashSet<&str> = pods.iter().map(|p| p.uid.as_str()).collect();

        let mut graph = TaskGraph::new();
        let mut created = 0;
        for pod in pods.iter().filter(|p| !known.contains(p.uid.as_str())) {
            graph.add_task(self.factory.create_dai(&ds, pod.clone()));
            created += 1;
        }
        let mut deleted = 0;
        for dai in dais.iter().filter(|d| match d.external_id.as_deref() {
            Some(uid) => !running.contains(uid),
            None => true,
        }) {
            graph.add_task(self.factory.delete_dai(dai));
            deleted += 1;
        }

        info!(ds = %ds.name, pods = pods.len(), instances = dais.len(), created, deleted, "Conformed pods");
        Ok(graph)
    }
}

pub struct CreateDaiTask {
    ds: LockObjectReference,
    pod: ContainerPod,
}

impl CreateDaiTask {
    pub fn new(ds: &DeploymentSpec, pod: ContainerPod) -> Self {
        Self {
            ds: LockObjectReference::from_entity(ds),
            pod,
        }
    }
}

impl Task for CreateDaiTask {
    fn name(&self) -> String {
        format!(
            "Create DAI for pod '{}' of Deployment Spec '{}'",
            self.pod.name, self.ds.name
        )
    }

    fn objects(&self) -> BTreeSet<LockObjectReference> {
        BTreeSet::from([self.ds.clone()])
    }

    fn execute(&self, uow: &mut UnitOfWork<'_>) -> Result<()> {
        let ds = uow.find::<DeploymentSpec>(self.ds.id)?;
        let existing = uow.find_where::<DistributedApplianceInstance>(|d| {
            d.external_id.as_deref() == Some(self.pod.uid.as_str())
        })?;
        if !existing.is_empty() {
            debug!(pod = %self.pod.uid, "Pod already has an instance");
            return Ok(());
        }

        let mut dai = DistributedApplianceInstance::new(
            &format!("{}-{}", self.pod.namespace, self.pod.name),
            ds.vs_id,
        );
        dai.ds_id = Some(ds.id);
        dai.external_id = Some(self.pod.uid.clone());
        dai.os_host_name = Some(self.pod.node.clone());
        let dai = uow.create(dai)?;
        info!(dai = %dai.name, id = dai.id, pod = %self.pod.uid, "Created DAI");
        Ok(())
    }
}

pub struct DeleteDaiTask {
    dai: LockObjectReference,
}

impl DeleteDaiTask {
    pub fn new(dai: &DistributedApplianceInstance) -> Self {
        Self {
            dai: LockObjectReference::from_entity(dai),
        }
    }
}

impl Task for DeleteDaiTask {
    fn name(&self) -> String {
        format!("Delete DAI '{}'", self.dai.name)
    }

    fn objects(&self) -> BTreeSet<LockObjectReference> {
        BTreeSet::from([self.dai.clone()])
    }

    fn execute(&self, uow: &mut UnitOfWork<'_>) -> Result<()> {
        if uow.try_find::<DistributedApplianceInstance>(self.dai.id)?.is_none() {
            debug!(dai = %self.dai.name, "Already deleted");
            return Ok(());
        }
        uow.delete::<DistributedApplianceInstance>(self.dai.id)?;
        info!(dai = %self.dai.name, "Deleted DAI");
        Ok(())
    }
}

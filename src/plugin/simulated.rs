//! In-process stand-in for a Kubernetes cluster.
//!
//! Each virtualization connector gets its own [`SimulatedCluster`], kept in
//! a [`SessionRegistry`] the way real plugins keep one client per
//! connector. Deployments become available on the first readiness poll
//! unless the cluster is stalled.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;
use uuid::Uuid;

use super::container::{
    ContainerDeploymentApi, ContainerDeployments, ContainerPod, DeploymentRequest, DeploymentState,
};
use super::registry::PluginRegistry;
use super::session::SessionRegistry;
use crate::error::{Error, Result};
use crate::persistence::{EntityId, VirtualizationType};

#[derive(Debug)]
struct SimDeployment {
    namespace: String,
    label: String,
    replicas: u32,
    available: u32,
}

#[derive(Debug)]
struct SimPod {
    label: String,
    pod: ContainerPod,
}

#[derive(Debug, Default)]
struct ClusterState {
    deployments: HashMap<String, SimDeployment>,
    pods: Vec<SimPod>,
    stalled: bool,
    polls: u32,
    next_pod: u64,
}

impl ClusterState {
    fn spawn_pod(&mut self, label: &str, namespace: &str) -> ContainerPod {
        self.next_pod += 1;
        let pod = ContainerPod {
            uid: Uuid::new_v4().to_string(),
            name: format!("pod-{}", self.next_pod),
            namespace: namespace.to_string(),
            node: format!("node-{}", self.next_pod % 3),
        };
        self.pods.push(SimPod {
            label: label.to_string(),
            pod: pod.clone(),
        });
        pod
    }

    fn scale(&mut self, label: &str, namespace: &str, replicas: u32) {
        let current = self.pods.iter().filter(|p| p.label == label).count();
        let wanted = replicas as usize;
        if current < wanted {
            for _ in current..wanted {
                self.spawn_pod(label, namespace);
            }
        } else {
            let mut excess = current - wanted;
            self.pods.retain(|p| {
                if excess > 0 && p.label == label {
                    excess -= 1;
                    false
                } else {
                    true
                }
            });
        }
    }
}

/// One simulated cluster.
#[derive(Debug, Default)]
pub struct SimulatedCluster {
    state: Mutex<ClusterState>,
}

impl SimulatedCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a pod outside any deployment, e.g. one left from an earlier run.
    pub fn add_pod(&self, label: &str, namespace: &str) -> ContainerPod {
        self.state().spawn_pod(label, namespace)
    }

    pub fn pods(&self, label: &str) -> Vec<ContainerPod> {
        self.state()
            .pods
            .iter()
            .filter(|p| p.label == label)
            .map(|p| p.pod.clone())
            .collect()
    }

    /// While stalled, deployments never report available replicas.
    pub fn set_stalled(&self, stalled: bool) {
        self.state().stalled = stalled;
    }

    /// Number of readiness polls served so far.
    pub fn poll_count(&self) -> u32 {
        self.state().polls
    }

    pub fn deployment_count(&self) -> usize {
        self.state().deployments.len()
    }
}

struct SimulatedClient {
    cluster: Arc<SimulatedCluster>,
}

impl ContainerDeploymentApi for SimulatedClient {
    fn create_deployment(&self, request: &DeploymentRequest) -> Result<String> {
        let uid = Uuid::new_v4().to_string();
        let mut state = self.cluster.state();
        state.deployments.insert(
            uid.clone(),
            SimDeployment {
                namespace: request.namespace.clone(),
                label: request.label.clone(),
                replicas: request.replicas,
                available: 0,
            },
        );
        state.scale(&request.label, &request.namespace, request.replicas);
        debug!(deployment = %request.name, %uid, replicas = request.replicas, "Created deployment");
        Ok(uid)
    }

    fn update_deployment(&self, uid: &str, request: &DeploymentRequest) -> Result<()> {
        let mut state = self.cluster.state();
        let deployment = state
            .deployments
            .get_mut(uid)
            .ok_or_else(|| Error::External(format!("deployment {} does not exist", uid)))?;
        deployment.replicas = request.replicas;
        deployment.available = deployment.available.min(request.replicas);
        state.scale(&request.label, &request.namespace, request.replicas);
        Ok(())
    }

    fn delete_deployment(&self, uid: &str, _namespace: &str) -> Result<()> {
        let mut state = self.cluster.state();
        if let Some(deployment) = state.deployments.remove(uid) {
            state.pods.retain(|p| p.label != deployment.label);
        }
        Ok(())
    }

    fn get_deployment(&self, uid: &str, namespace: &str) -> Result<Option<DeploymentState>> {
        let mut state = self.cluster.state();
        state.polls += 1;
        let stalled = state.stalled;
        Ok(state
            .deployments
            .get_mut(uid)
            .filter(|d| d.namespace == namespace)
            .map(|d| {
                if !stalled {
                    d.available = d.replicas;
                }
                DeploymentState {
                    uid: uid.to_string(),
                    desired_replicas: d.replicas,
                    available_replicas: d.available,
                }
            }))
    }

    fn pods_by_label(&self, label: &str, namespace: &str) -> Result<Vec<ContainerPod>> {
        Ok(self
            .cluster
            .pods(label)
            .into_iter()
            .filter(|p| p.namespace == namespace)
            .collect())
    }
}

/// Kubernetes plugin backed by simulated clusters.
#[derive(Debug, Default)]
pub struct SimulatedClusterPlugin {
    clusters: SessionRegistry<EntityId, SimulatedCluster>,
}

impl SimulatedClusterPlugin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Cluster behind a connector, created on first use.
    pub fn cluster(&self, vc_id: EntityId) -> Arc<SimulatedCluster> {
        self.clusters.get_or_insert_with(&vc_id, SimulatedCluster::new)
    }

    /// Register as the container deployment plugin for Kubernetes connectors.
    pub fn register(self: &Arc<Self>, registry: &PluginRegistry) {
        let plugin = Arc::clone(self);
        registry.register_fn::<ContainerDeployments, _>(
            VirtualizationType::Kubernetes.vendor(),
            move |vc| {
                let client: Box<dyn ContainerDeploymentApi> = Box::new(SimulatedClient {
                    cluster: plugin.cluster(vc.id),
                });
                Ok(client)
            },
        );
    }

    /// Forget every cluster.
    pub fn shutdown(&self) {
        self.clusters.clear();
    }
}

//! Container orchestrator API consumed by the deployment conformance tasks.

use serde::{Deserialize, Serialize};

use super::registry::Capability;
use crate::error::Result;
use crate::persistence::DeploymentSpec;

/// Label key set on every deployment and its pods.
pub const DEPLOYMENT_LABEL: &str = "conformd-deployment";

/// Label selector for the pods of a deployment spec.
pub fn deployment_label(ds: &DeploymentSpec) -> String {
    format!("{}={}", DEPLOYMENT_LABEL, ds.deployment_name())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerPod {
    pub uid: String,
    pub name: String,
    pub namespace: String,
    pub node: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub replicas: u32,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentState {
    pub uid: String,
    pub desired_replicas: u32,
    pub available_replicas: u32,
}

impl DeploymentState {
    pub fn is_ready(&self, replicas: u32) -> bool {
        self.desired_replicas == replicas && self.available_replicas == replicas
    }
}

/// Deployment operations of a container orchestrator.
pub trait ContainerDeploymentApi: Send {
    /// Create a deployment and return its uid.
    fn create_deployment(&self, request: &DeploymentRequest) -> Result<String>;

    fn update_deployment(&self, uid: &str, request: &DeploymentRequest) -> Result<()>;

    /// Deleting a deployment that does not exist succeeds.
    fn delete_deployment(&self, uid: &str, namespace: &str) -> Result<()>;

    fn get_deployment(&self, uid: &str, namespace: &str) -> Result<Option<DeploymentState>>;

    fn pods_by_label(&self, label: &str, namespace: &str) -> Result<Vec<ContainerPod>>;
}

/// Capability key for [`ContainerDeploymentApi`].
pub struct ContainerDeployments;

impl Capability for ContainerDeployments {
    type Handle = dyn ContainerDeploymentApi;

    const NAME: &'static str = "container deployment";
}

//! Vendor plugins consumed by leaf tasks.
//!
//! Tasks ask the [`PluginRegistry`] for a capability (for example
//! [`ContainerDeployments`]) and get back a handle for the connector they
//! work on. Which vendor answers is decided by the connector's
//! virtualization type.

mod container;
mod registry;
mod session;
mod simulated;

pub use container::{
    deployment_label, ContainerDeploymentApi, ContainerDeployments, ContainerPod,
    DeploymentRequest, DeploymentState, DEPLOYMENT_LABEL,
};
pub use registry::{Capability, Factory, PluginRegistry};
pub use session::SessionRegistry;
pub use simulated::{SimulatedCluster, SimulatedClusterPlugin};

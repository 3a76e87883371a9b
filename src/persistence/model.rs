//! Domain entities reconciled by the conformance tasks.
//!
//! Entities live in an arena keyed by `(ObjectType, id)` and refer to
//! their parents by id. There is no object graph to navigate: a task that
//! needs a parent loads it through the unit of work.

use serde::{Deserialize, Serialize};

use crate::lock::ObjectType;

pub type EntityId = u64;

/// Infrastructure flavour of a virtualization connector. Selects the
/// vendor plugin used to talk to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VirtualizationType {
    Openstack,
    Kubernetes,
    Vmware,
}

impl VirtualizationType {
    pub fn vendor(&self) -> &'static str {
        match self {
            VirtualizationType::Openstack => "openstack",
            VirtualizationType::Kubernetes => "kubernetes",
            VirtualizationType::Vmware => "vmware",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualizationConnector {
    pub id: EntityId,
    pub name: String,
    pub virtualization_type: VirtualizationType,
    pub endpoint: String,
    pub marked_for_deletion: bool,
}

impl VirtualizationConnector {
    pub fn new(name: &str, virtualization_type: VirtualizationType, endpoint: &str) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            virtualization_type,
            endpoint: endpoint.to_string(),
            marked_for_deletion: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributedAppliance {
    pub id: EntityId,
    pub name: String,
    pub marked_for_deletion: bool,
}

impl DistributedAppliance {
    pub fn new(name: &str) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            marked_for_deletion: false,
        }
    }
}

/// An appliance deployed on one virtualization connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualSystem {
    pub id: EntityId,
    pub name: String,
    pub da_id: EntityId,
    pub vc_id: EntityId,
    /// Container image of the appliance.
    pub image: String,
    pub marked_for_deletion: bool,
}

impl VirtualSystem {
    pub fn new(name: &str, da_id: EntityId, vc_id: EntityId, image: &str) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            da_id,
            vc_id,
            image: image.to_string(),
            marked_for_deletion: false,
        }
    }
}

/// Desired deployment of a virtual system into a namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    pub id: EntityId,
    pub name: String,
    pub vs_id: EntityId,
    pub namespace: String,
    pub instance_count: u32,
    /// Id of the deployment in the orchestrator, once created.
    pub external_id: Option<String>,
    pub marked_for_deletion: bool,
}

impl DeploymentSpec {
    pub fn new(name: &str, vs_id: EntityId, namespace: &str, instance_count: u32) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            vs_id,
            namespace: namespace.to_string(),
            instance_count,
            external_id: None,
            marked_for_deletion: false,
        }
    }

    /// Name of the deployment in the orchestrator. Unique per spec and
    /// valid as a DNS label.
    pub fn deployment_name(&self) -> String {
        let base: String = self
            .name
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        format!("{}-{}", base.trim_matches('-'), self.id)
    }
}

/// A running appliance instance, one per pod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributedApplianceInstance {
    pub id: EntityId,
    pub name: String,
    pub vs_id: EntityId,
    pub ds_id: Option<EntityId>,
    /// Id of the backing pod.
    pub external_id: Option<String>,
    pub os_host_name: Option<String>,
    pub marked_for_deletion: bool,
}

impl DistributedApplianceInstance {
    pub fn new(name: &str, vs_id: EntityId) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            vs_id,
            ds_id: None,
            external_id: None,
            os_host_name: None,
            marked_for_deletion: false,
        }
    }
}

/// Any stored entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Record {
    VirtualizationConnector(VirtualizationConnector),
    DistributedAppliance(DistributedAppliance),
    VirtualSystem(VirtualSystem),
    DeploymentSpec(DeploymentSpec),
    DistributedApplianceInstance(DistributedApplianceInstance),
}

/// Typed access to one kind of [`Record`].
pub trait Entity: Clone + Send + Sync + 'static {
    const OBJECT_TYPE: ObjectType;

    fn id(&self) -> EntityId;
    fn set_id(&mut self, id: EntityId);
    fn name(&self) -> &str;
    fn marked_for_deletion(&self) -> bool;
    fn set_marked_for_deletion(&mut self, marked: bool);
    fn into_record(self) -> Record;
    fn from_record(record: Record) -> Option<Self>;
}

macro_rules! entity {
    ($ty:ident) => {
        impl Entity for $ty {
            const OBJECT_TYPE: ObjectType = ObjectType::$ty;

            fn id(&self) -> EntityId {
                self.id
            }

            fn set_id(&mut self, id: EntityId) {
                self.id = id;
            }

            fn name(&self) -> &str {
                &self.name
            }

            fn marked_for_deletion(&self) -> bool {
                self.marked_for_deletion
            }

            fn set_marked_for_deletion(&mut self, marked: bool) {
                self.marked_for_deletion = marked;
            }

            fn into_record(self) -> Record {
                Record::$ty(self)
            }

            fn from_record(record: Record) -> Option<Self> {
                match record {
                    Record::$ty(entity) => Some(entity),
                    _ => None,
                }
            }
        }
    };
}

entity!(VirtualizationConnector);
entity!(DistributedAppliance);
entity!(VirtualSystem);
entity!(DeploymentSpec);
entity!(DistributedApplianceInstance);

impl Record {
    pub fn object_type(&self) -> ObjectType {
        match self {
            Record::VirtualizationConnector(_) => ObjectType::VirtualizationConnector,
            Record::DistributedAppliance(_) => ObjectType::DistributedAppliance,
            Record::VirtualSystem(_) => ObjectType::VirtualSystem,
            Record::DeploymentSpec(_) => ObjectType::DeploymentSpec,
            Record::DistributedApplianceInstance(_) => ObjectType::DistributedApplianceInstance,
        }
    }

    pub fn id(&self) -> EntityId {
        match self {
            Record::VirtualizationConnector(e) => e.id,
            Record::DistributedAppliance(e) => e.id,
            Record::VirtualSystem(e) => e.id,
            Record::DeploymentSpec(e) => e.id,
            Record::DistributedApplianceInstance(e) => e.id,
        }
    }

    pub fn key(&self) -> (ObjectType, EntityId) {
        (self.object_type(), self.id())
    }
}

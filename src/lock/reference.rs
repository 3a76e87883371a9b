//! Identity of lockable domain objects.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use crate::persistence::Entity;

/// The kind of domain object a lock or record refers to.
///
/// The declaration order is the canonical acquisition order used when a
/// caller locks several objects at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    VirtualizationConnector,
    ApplianceManagerConnector,
    DistributedAppliance,
    VirtualSystem,
    DeploymentSpec,
    DistributedApplianceInstance,
    SecurityGroup,
    SecurityGroupInterface,
    Job,
}

impl ObjectType {
    /// Human readable name used in task names and error messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            ObjectType::VirtualizationConnector => "Virtualization Connector",
            ObjectType::ApplianceManagerConnector => "Manager Connector",
            ObjectType::DistributedAppliance => "Distributed Appliance",
            ObjectType::VirtualSystem => "Virtual System",
            ObjectType::DeploymentSpec => "Deployment Specification",
            ObjectType::DistributedApplianceInstance => "Distributed Appliance Instance",
            ObjectType::SecurityGroup => "Security Group",
            ObjectType::SecurityGroupInterface => "Security Group Interface",
            ObjectType::Job => "Job",
        }
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Reference to a single lockable object.
///
/// Two references are the same object when their type and id match. The
/// name is carried for diagnostics only and takes no part in equality,
/// hashing, or ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockObjectReference {
    pub id: u64,
    pub name: String,
    pub object_type: ObjectType,
}

impl LockObjectReference {
    pub fn new(object_type: ObjectType, id: u64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            object_type,
        }
    }

    /// Build a reference to a persisted entity.
    pub fn from_entity<E: Entity>(entity: &E) -> Self {
        Self::new(E::OBJECT_TYPE, entity.id(), entity.name())
    }
}

impl PartialEq for LockObjectReference {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.object_type == other.object_type
    }
}

impl Eq for LockObjectReference {}

impl Hash for LockObjectReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.object_type.hash(state);
        self.id.hash(state);
    }
}

impl PartialOrd for LockObjectReference {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LockObjectReference {
    fn cmp(&self, other: &Self) -> Ordering {
        self.object_type
            .cmp(&other.object_type)
            .then(self.id.cmp(&other.id))
    }
}

impl std::fmt::Display for LockObjectReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} '{}'", self.object_type, self.name)
    }
}

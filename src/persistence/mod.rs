//! Persisted domain state as seen by tasks.
//!
//! Tasks never touch the [`Store`] directly. Each task body gets its own
//! [`UnitOfWork`] from [`transaction::execute`], which commits on success
//! and discards everything on failure.

mod events;
mod model;
mod store;
pub mod transaction;
mod unit;

pub use events::{ChannelSink, EntityEvent, EventKind, EventSink, NullSink};
pub use model::{
    DeploymentSpec, DistributedAppliance, DistributedApplianceInstance, Entity, EntityId, Record,
    VirtualSystem, VirtualizationConnector, VirtualizationType,
};
pub use store::{Change, MemoryStore, Store};
pub use unit::UnitOfWork;

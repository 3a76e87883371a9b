//! Broadcast of committed entity changes.

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::model::EntityId;
use crate::lock::ObjectType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Added,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityEvent {
    pub object_type: ObjectType,
    pub id: EntityId,
    pub kind: EventKind,
}

impl EntityEvent {
    pub fn new(object_type: ObjectType, id: EntityId, kind: EventKind) -> Self {
        Self {
            object_type,
            id,
            kind,
        }
    }
}

/// Receiver of entity events. Publishing never blocks and never fails;
/// consumers must tolerate duplicates.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: EntityEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: EntityEvent) {}
}

/// Forwards events to a crossbeam channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<EntityEvent>,
}

impl ChannelSink {
    pub fn new(tx: Sender<EntityEvent>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiving end of a fresh unbounded channel.
    pub fn unbounded() -> (Self, Receiver<EntityEvent>) {
        let (tx, rx) = unbounded();
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn publish(&self, event: EntityEvent) {
        if let Err(e) = self.tx.send(event) {
            trace!(event = ?e.0, "Event receiver gone, dropping event");
        }
    }
}

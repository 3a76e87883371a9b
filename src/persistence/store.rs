//! Storage contract and the in-process arena implementation.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::model::{Entity, EntityId, Record};
use crate::error::{Error, Result};
use crate::lock::ObjectType;

/// One staged mutation, applied by [`Store::commit`].
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Put(Record),
    Delete {
        object_type: ObjectType,
        id: EntityId,
    },
}

/// Durable state consumed by tasks through a unit of work.
///
/// `commit` applies a whole batch or nothing.
pub trait Store: Send + Sync {
    fn load(&self, object_type: ObjectType, id: EntityId) -> Result<Option<Record>>;

    fn scan(&self, object_type: ObjectType) -> Result<Vec<Record>>;

    fn allocate_id(&self) -> Result<EntityId>;

    fn commit(&self, changes: Vec<Change>) -> Result<()>;
}

#[derive(Debug, Default)]
struct Arena {
    next_id: EntityId,
    rows: BTreeMap<(ObjectType, EntityId), Record>,
}

/// Store backed by a mutex-guarded map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    arena: Mutex<Arena>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn arena(&self) -> MutexGuard<'_, Arena> {
        self.arena.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert an entity outside any unit of work, assigning its id.
    pub fn insert<E: Entity>(&self, mut entity: E) -> E {
        let mut arena = self.arena();
        arena.next_id += 1;
        entity.set_id(arena.next_id);
        let record = entity.clone().into_record();
        arena.rows.insert(record.key(), record);
        entity
    }

    /// Typed read outside any unit of work.
    pub fn get<E: Entity>(&self, id: EntityId) -> Option<E> {
        self.arena()
            .rows
            .get(&(E::OBJECT_TYPE, id))
            .cloned()
            .and_then(E::from_record)
    }

    pub fn all<E: Entity>(&self) -> Vec<E> {
        self.arena()
            .rows
            .range((E::OBJECT_TYPE, EntityId::MIN)..=(E::OBJECT_TYPE, EntityId::MAX))
            .filter_map(|(_, record)| E::from_record(record.clone()))
            .collect()
    }

    pub fn count(&self, object_type: ObjectType) -> usize {
        self.arena()
            .rows
            .keys()
            .filter(|(t, _)| *t == object_type)
            .count()
    }
}

impl Store for MemoryStore {
    fn load(&self, object_type: ObjectType, id: EntityId) -> Result<Option<Record>> {
        Ok(self.arena().rows.get(&(object_type, id)).cloned())
    }

    fn scan(&self, object_type: ObjectType) -> Result<Vec<Record>> {
        Ok(self
            .arena()
            .rows
            .range((object_type, EntityId::MIN)..=(object_type, EntityId::MAX))
            .map(|(_, record)| record.clone())
            .collect())
    }

    fn allocate_id(&self) -> Result<EntityId> {
        let mut arena = self.arena();
        arena.next_id += 1;
        Ok(arena.next_id)
    }

    fn commit(&self, changes: Vec<Change>) -> Result<()> {
        let mut arena = self.arena();
        for change in &changes {
            if let Change::Delete { object_type, id } = change {
                if !arena.rows.contains_key(&(*object_type, *id)) {
                    return Err(Error::NotFound {
                        object_type: object_type.to_string(),
                        id: *id,
                    });
                }
            }
        }

        let count = changes.len();
        for change in changes {
            match change {
                Change::Put(record) => {
                    arena.rows.insert(record.key(), record);
                }
                Change::Delete { object_type, id } => {
                    arena.rows.remove(&(object_type, id));
                }
            }
        }
        debug!(changes = count, "Committed");
        Ok(())
    }
}

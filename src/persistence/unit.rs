//! Unit of work: staged reads and writes for one task body.

use std::collections::{BTreeMap, BTreeSet};

use super::events::{EntityEvent, EventKind};
use super::model::{Entity, EntityId, Record};
use super::store::{Change, Store};
use crate::error::{Error, Result};
use crate::lock::ObjectType;

/// Staged view over a [`Store`].
///
/// Reads see the unit's own pending writes. Nothing reaches the store
/// until the enclosing transaction commits, and dropping the unit
/// discards everything it staged.
pub struct UnitOfWork<'a> {
    store: &'a dyn Store,
    staged: BTreeMap<(ObjectType, EntityId), Option<Record>>,
    /// Keys created by this unit; the store has never seen them.
    created: BTreeSet<(ObjectType, EntityId)>,
    events: Vec<EntityEvent>,
}

impl<'a> UnitOfWork<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self {
            store,
            staged: BTreeMap::new(),
            created: BTreeSet::new(),
            events: Vec::new(),
        }
    }

    fn lookup(&self, object_type: ObjectType, id: EntityId) -> Result<Option<Record>> {
        match self.staged.get(&(object_type, id)) {
            Some(staged) => Ok(staged.clone()),
            None => self.store.load(object_type, id),
        }
    }

    fn not_found<E: Entity>(id: EntityId) -> Error {
        Error::NotFound {
            object_type: E::OBJECT_TYPE.to_string(),
            id,
        }
    }

    /// Load an entity by id, or `None` if it does not exist.
    pub fn try_find<E: Entity>(&self, id: EntityId) -> Result<Option<E>> {
        Ok(self
            .lookup(E::OBJECT_TYPE, id)?
            .and_then(E::from_record))
    }

    /// Load an entity by id.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if there is no such entity.
    pub fn find<E: Entity>(&self, id: EntityId) -> Result<E> {
        self.try_find(id)?.ok_or_else(|| Self::not_found::<E>(id))
    }

    /// Every entity of a type, including staged ones, ordered by id.
    pub fn find_all<E: Entity>(&self) -> Result<Vec<E>> {
        let mut rows: BTreeMap<EntityId, Record> = self
            .store
            .scan(E::OBJECT_TYPE)?
            .into_iter()
            .map(|record| (record.id(), record))
            .collect();
        for ((object_type, id), staged) in &self.staged {
            if *object_type != E::OBJECT_TYPE {
                continue;
            }
            match staged {
                Some(record) => {
                    rows.insert(*id, record.clone());
                }
                None => {
                    rows.remove(id);
                }
            }
        }
        Ok(rows.into_values().filter_map(E::from_record).collect())
    }

    pub fn find_where<E: Entity>(&self, predicate: impl Fn(&E) -> bool) -> Result<Vec<E>> {
        Ok(self
            .find_all::<E>()?
            .into_iter()
            .filter(|e| predicate(e))
            .collect())
    }

    /// Stage a new entity and return it with its assigned id.
    pub fn create<E: Entity>(&mut self, mut entity: E) -> Result<E> {
        entity.set_id(self.store.allocate_id()?);
        let record = entity.clone().into_record();
        self.events
            .push(EntityEvent::new(E::OBJECT_TYPE, entity.id(), EventKind::Added));
        self.created.insert(record.key());
        self.staged.insert(record.key(), Some(record));
        Ok(entity)
    }

    /// Stage new state for an existing entity.
    pub fn update<E: Entity>(&mut self, entity: &E) -> Result<()> {
        if self.lookup(E::OBJECT_TYPE, entity.id())?.is_none() {
            return Err(Self::not_found::<E>(entity.id()));
        }
        let record = entity.clone().into_record();
        self.events
            .push(EntityEvent::new(E::OBJECT_TYPE, entity.id(), EventKind::Updated));
        self.staged.insert(record.key(), Some(record));
        Ok(())
    }

    /// Flag an entity for deletion by a later conformance run.
    pub fn mark_deleted<E: Entity>(&mut self, id: EntityId) -> Result<E> {
        let mut entity = self.find::<E>(id)?;
        entity.set_marked_for_deletion(true);
        self.update(&entity)?;
        Ok(entity)
    }

    /// Stage removal of an entity.
    ///
    /// Deleting an entity created by this same unit forgets it, along
    /// with its pending events, so the store never hears of it.
    pub fn delete<E: Entity>(&mut self, id: EntityId) -> Result<()> {
        if self.lookup(E::OBJECT_TYPE, id)?.is_none() {
            return Err(Self::not_found::<E>(id));
        }
        let key = (E::OBJECT_TYPE, id);
        if self.created.remove(&key) {
            self.staged.remove(&key);
            self.events.retain(|e| (e.object_type, e.id) != key);
            return Ok(());
        }
        self.events
            .push(EntityEvent::new(E::OBJECT_TYPE, id, EventKind::Deleted));
        self.staged.insert((E::OBJECT_TYPE, id), None);
        Ok(())
    }

    /// True if anything has been staged.
    pub fn is_dirty(&self) -> bool {
        !self.staged.is_empty()
    }

    pub(crate) fn into_parts(self) -> (Vec<Change>, Vec<EntityEvent>) {
        let changes = self
            .staged
            .into_iter()
            .map(|((object_type, id), staged)| match staged {
                Some(record) => Change::Put(record),
                None => Change::Delete { object_type, id },
            })
            .collect();
        (changes, self.events)
    }
}

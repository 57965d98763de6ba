//! Entity identifiers and the entity directory
//!
//! The directory maps the external [`EntityId`] to the dense row index
//! shared by every pipeline data store. Each live entity also owns a
//! generational [`EntityKey`]; value references hold the key, so a
//! reference to a removed entity fails to resolve even if the same id is
//! added again later.

use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

slotmap::new_key_type! {
    /// Generational handle of a live entity
    pub struct EntityKey;
}

/// Opaque, globally unique entity identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Generate a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The all-zero identifier
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Wrap an existing uuid
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Underlying uuid
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EntityId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Outcome of [`EntityDirectory::remove`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Removal {
    /// Index the removed entity occupied
    pub index: usize,
    /// Entity that was swapped from the last slot into `index`, if any
    pub moved: Option<EntityId>,
}

/// `EntityId -> (EntityKey, dense index)` mapping
#[derive(Debug, Default)]
pub struct EntityDirectory {
    slots: SlotMap<EntityKey, usize>,
    keys: HashMap<EntityId, EntityKey>,
    dense: Vec<(EntityId, EntityKey)>,
}

impl EntityDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entity at the end of the dense range.
    ///
    /// Returns `None` (and changes nothing) if the entity is already live.
    pub fn insert(&mut self, id: EntityId) -> Option<(EntityKey, usize)> {
        if self.keys.contains_key(&id) {
            log::warn!("Entity {} is already in the directory", id);
            return None;
        }

        let index = self.dense.len();
        let key = self.slots.insert(index);
        self.keys.insert(id, key);
        self.dense.push((id, key));
        Some((key, index))
    }

    /// Remove an entity by swapping the last entry into its slot
    pub fn remove(&mut self, id: EntityId) -> Option<Removal> {
        let key = self.keys.remove(&id)?;
        let index = self.slots.remove(key)?;

        self.dense.swap_remove(index);
        let moved = self.dense.get(index).copied().map(|(moved_id, moved_key)| {
            if let Some(slot) = self.slots.get_mut(moved_key) {
                *slot = index;
            }
            moved_id
        });

        Some(Removal { index, moved })
    }

    /// Current index of an entity
    pub fn index_of(&self, id: EntityId) -> Option<usize> {
        self.keys
            .get(&id)
            .and_then(|key| self.slots.get(*key))
            .copied()
    }

    /// Generational key of a live entity
    pub fn key_of(&self, id: EntityId) -> Option<EntityKey> {
        self.keys.get(&id).copied()
    }

    /// Current index for a key; `None` once the entity was removed
    pub fn index_of_key(&self, key: EntityKey) -> Option<usize> {
        self.slots.get(key).copied()
    }

    /// Entity stored at a dense index
    pub fn id_at(&self, index: usize) -> Option<EntityId> {
        self.dense.get(index).map(|(id, _)| *id)
    }

    /// Number of live entities
    pub fn len(&self) -> usize {
        self.dense.len()
    }

    /// True when no entity is live
    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }

    /// True if the entity is live
    pub fn contains(&self, id: EntityId) -> bool {
        self.keys.contains_key(&id)
    }

    /// Iterate `(index, id)` in dense order
    pub fn iter(&self) -> impl Iterator<Item = (usize, EntityId)> + '_ {
        self.dense.iter().enumerate().map(|(index, (id, _))| (index, *id))
    }
}

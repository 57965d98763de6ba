//! Value references
//!
//! A value reference is a capability that answers "what is entity X's
//! transform right now". It never caches: every read goes through the
//! directory to the current row, so rows may move or the store may grow
//! between reads. Holders keep the entity's generational key, which makes a
//! read after removal fail with [`ResolveError::Stale`] instead of
//! returning another entity's data.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::components::{EntityAnimator, Transform};
use super::entity::{EntityId, EntityKey};
use super::storage::{DataStore, SharedDirectory};
use crate::foundation::math::Mat4;

/// Reasons a value reference could not be read
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The entity was removed after the reference was issued
    #[error("Entity {0} is no longer live")]
    Stale(EntityId),

    /// Directory and store disagree about the row count
    #[error("Store '{store}' has no row {index}")]
    MissingRow {
        /// Store name
        store: String,
        /// Index the directory reported
        index: usize,
    },

    /// The entity's skeleton has no bone with this name
    #[error("Entity {id} has no bone '{bone}'")]
    MissingBone {
        /// Entity queried
        id: EntityId,
        /// Bone name requested
        bone: String,
    },
}

/// Lazily resolved matrix
pub trait ValueReference: Send + Sync + fmt::Debug {
    /// Current value
    fn get_mat4(&self) -> Result<Mat4, ResolveError>;
}

fn resolve_index(
    directory: &SharedDirectory,
    id: EntityId,
    key: EntityKey,
) -> Result<usize, ResolveError> {
    directory
        .read()
        .index_of_key(key)
        .ok_or(ResolveError::Stale(id))
}

/// World transform of one entity
#[derive(Clone)]
pub struct TransformReference {
    id: EntityId,
    key: EntityKey,
    directory: SharedDirectory,
    store: Arc<DataStore<Transform>>,
}

impl TransformReference {
    /// Create a reference to `id`'s row in `store`
    pub fn new(
        id: EntityId,
        key: EntityKey,
        directory: SharedDirectory,
        store: Arc<DataStore<Transform>>,
    ) -> Self {
        Self {
            id,
            key,
            directory,
            store,
        }
    }

    /// Entity this reference reads
    pub fn entity(&self) -> EntityId {
        self.id
    }

    /// Current full transform row
    pub fn get(&self) -> Result<Transform, ResolveError> {
        let index = resolve_index(&self.directory, self.id, self.key)?;
        self.store
            .with_row(index, |row| row.clone())
            .ok_or_else(|| ResolveError::MissingRow {
                store: "transform".to_owned(),
                index,
            })
    }
}

impl ValueReference for TransformReference {
    fn get_mat4(&self) -> Result<Mat4, ResolveError> {
        self.get().map(|transform| transform.world)
    }
}

impl fmt::Debug for TransformReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformReference")
            .field("id", &self.id)
            .finish()
    }
}

/// Current animated matrix of one bone
#[derive(Clone)]
pub struct BoneTransformReference {
    id: EntityId,
    key: EntityKey,
    bone: String,
    directory: SharedDirectory,
    store: Arc<DataStore<EntityAnimator>>,
}

impl BoneTransformReference {
    /// Create a reference to bone `bone` of entity `id`
    pub fn new(
        id: EntityId,
        key: EntityKey,
        bone: impl Into<String>,
        directory: SharedDirectory,
        store: Arc<DataStore<EntityAnimator>>,
    ) -> Self {
        Self {
            id,
            key,
            bone: bone.into(),
            directory,
            store,
        }
    }
}

impl ValueReference for BoneTransformReference {
    fn get_mat4(&self) -> Result<Mat4, ResolveError> {
        let index = resolve_index(&self.directory, self.id, self.key)?;
        self.store
            .with_row(index, |row| row.bone_transform(&self.bone))
            .ok_or_else(|| ResolveError::MissingRow {
                store: "animator".to_owned(),
                index,
            })?
            .ok_or_else(|| ResolveError::MissingBone {
                id: self.id,
                bone: self.bone.clone(),
            })
    }
}

impl fmt::Debug for BoneTransformReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoneTransformReference")
            .field("id", &self.id)
            .field("bone", &self.bone)
            .finish()
    }
}

/// Host transform composed with an optional offset (usually a host bone)
#[derive(Debug, Clone)]
pub struct AttachedTransformReference {
    host: Arc<dyn ValueReference>,
    offset: Option<Arc<dyn ValueReference>>,
}

impl AttachedTransformReference {
    /// Follow `host`, optionally through `offset`
    pub fn new(host: Arc<dyn ValueReference>, offset: Option<Arc<dyn ValueReference>>) -> Self {
        Self { host, offset }
    }
}

impl ValueReference for AttachedTransformReference {
    fn get_mat4(&self) -> Result<Mat4, ResolveError> {
        let host = self.host.get_mat4()?;
        match &self.offset {
            Some(offset) => Ok(host * offset.get_mat4()?),
            None => Ok(host),
        }
    }
}

/// Fixed matrix, for collaborators that need a reference without an entity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantReference(pub Mat4);

impl ValueReference for ConstantReference {
    fn get_mat4(&self) -> Result<Mat4, ResolveError> {
        Ok(self.0)
    }
}

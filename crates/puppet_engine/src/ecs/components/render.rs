//! Render rows
//!
//! These rows are what the render backend consumes. They never hold a
//! matrix for the entity itself, only a value reference that resolves the
//! current world transform at draw time.

use std::sync::Arc;

use crate::ecs::entity::{EntityId, EntityKey};
use crate::ecs::reference::{TransformReference, ValueReference};
use crate::ecs::storage::{PipelineRow, RowContext, TRANSFORM_STORE};
use crate::foundation::math::Mat4;

/// Renderable handle issued by the asset collaborator
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Model {
    /// Mesh asset name
    pub mesh: String,
    /// Material asset name
    pub material: String,
}

impl Model {
    /// Create a model handle
    pub fn new(mesh: impl Into<String>, material: impl Into<String>) -> Self {
        Self {
            mesh: mesh.into(),
            material: material.into(),
        }
    }
}

fn transform_reference(
    id: EntityId,
    key: EntityKey,
    context: &RowContext<'_>,
) -> Option<Arc<dyn ValueReference>> {
    match context.stores.get(TRANSFORM_STORE) {
        Some(store) => Some(Arc::new(TransformReference::new(
            id,
            key,
            Arc::clone(context.directory),
            store,
        ))),
        None => {
            log::warn!("No transform store; entity {} renders without a transform", id);
            None
        }
    }
}

/// Skinned or static entity drawn once per frame
#[derive(Debug, Clone)]
pub struct SingleRenderData {
    /// Owning entity
    pub entity: EntityId,
    /// Current world transform
    pub transform_reference: Option<Arc<dyn ValueReference>>,
    /// Bone matrices in render order
    pub bone_transforms: Vec<Mat4>,
    /// Models drawn with those bones
    pub models: Vec<Model>,
}

impl PipelineRow for SingleRenderData {
    fn new_row(id: EntityId, key: EntityKey, context: &RowContext<'_>) -> Self {
        Self {
            entity: id,
            transform_reference: transform_reference(id, key, context),
            bone_transforms: vec![Mat4::identity()],
            models: Vec::new(),
        }
    }
}

/// One model drawn many times with per-instance offsets
#[derive(Debug, Clone)]
pub struct InstanceRenderData {
    /// Owning entity
    pub entity: EntityId,
    /// Current world transform
    pub transform_reference: Option<Arc<dyn ValueReference>>,
    /// Model to instance
    pub model: Option<Model>,
    /// Set when the entity is attached to a host
    pub attach_reference: Option<Arc<dyn ValueReference>>,
    /// Per-instance matrices relative to the entity
    pub instance_transforms: Vec<Mat4>,
}

impl PipelineRow for InstanceRenderData {
    fn new_row(id: EntityId, key: EntityKey, context: &RowContext<'_>) -> Self {
        Self {
            entity: id,
            transform_reference: transform_reference(id, key, context),
            model: None,
            attach_reference: None,
            instance_transforms: Vec::new(),
        }
    }
}

//! Transform row
//!
//! Rotation is stored as Euler angles in degrees. `world` is the cached
//! matrix read by value references; the position component rewrites it
//! when the entity is attached to a host.

use crate::ecs::entity::{EntityId, EntityKey};
use crate::ecs::storage::{PipelineRow, RowContext};
use crate::foundation::math::{create_transformation, Mat4, Vec3};

/// Spatial state of one entity
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    /// Translation
    pub position: Vec3,
    /// Euler rotation in degrees
    pub rotation: Vec3,
    /// Scale factors
    pub scale: Vec3,
    /// Cached world matrix
    pub world: Mat4,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Vec3::zeros(),
            scale: Vec3::new(1.0, 1.0, 1.0),
            world: Mat4::identity(),
        }
    }
}

impl Transform {
    /// Create from position only
    pub fn from_position(position: Vec3) -> Self {
        let mut transform = Self {
            position,
            ..Default::default()
        };
        transform.recompute();
        transform
    }

    /// Local matrix: rotate and scale, then translate
    pub fn local_matrix(&self) -> Mat4 {
        create_transformation(&self.rotation, &self.scale, &self.position)
    }

    /// Reset `world` to the local matrix
    pub fn recompute(&mut self) {
        self.world = self.local_matrix();
    }

    /// Set position and recompute
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.recompute();
    }

    /// Set rotation (degrees) and recompute
    pub fn set_rotation(&mut self, rotation: Vec3) {
        self.rotation = rotation;
        self.recompute();
    }

    /// Set scale and recompute
    pub fn set_scale(&mut self, scale: Vec3) {
        self.scale = scale;
        self.recompute();
    }
}

impl PipelineRow for Transform {
    fn new_row(_id: EntityId, _key: EntityKey, _context: &RowContext<'_>) -> Self {
        Self::default()
    }
}

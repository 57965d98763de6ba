//! Render collaborator seam
//!
//! The pipeline never draws anything itself. Each frame it snapshots the
//! render stores into a [`RenderFrame`], releases every lock, resolves the
//! value references and hands the frame to whatever [`RenderBackend`] was
//! installed. Backends own their GPU resources and state.

use std::fmt;
use std::sync::Arc;

use crate::ecs::components::Model;
use crate::ecs::entity::EntityId;
use crate::ecs::reference::ValueReference;
use crate::foundation::math::Mat4;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, String>;

/// Consumer of resolved render data
pub trait RenderBackend: Send {
    /// Draw one frame
    fn render(&mut self, frame: &RenderFrame) -> BackendResult<()>;

    /// Backend name for logs
    fn name(&self) -> &str {
        "backend"
    }
}

/// Bone matrices packed the way a shader storage buffer expects them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoneMatrixBuffer {
    columns: Vec<[[f32; 4]; 4]>,
}

impl BoneMatrixBuffer {
    /// Pack matrices in column-major order
    pub fn from_matrices(matrices: &[Mat4]) -> Self {
        Self {
            columns: matrices.iter().map(|matrix| (*matrix).into()).collect(),
        }
    }

    /// Number of matrices
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// True when there are no matrices
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column-major matrices
    pub fn as_slice(&self) -> &[[[f32; 4]; 4]] {
        &self.columns
    }

    /// Raw bytes ready for upload
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.columns)
    }
}

/// An entity drawn once with its skeleton
#[derive(Clone)]
pub struct SingleRenderItem {
    /// Entity drawn
    pub entity: EntityId,
    /// Reference the world matrix was read from
    pub reference: Arc<dyn ValueReference>,
    /// World matrix at snapshot time
    pub world: Mat4,
    /// Bone matrices in render order
    pub bones: BoneMatrixBuffer,
    /// Models drawn with those bones
    pub models: Vec<Model>,
}

impl fmt::Debug for SingleRenderItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleRenderItem")
            .field("entity", &self.entity)
            .field("bones", &self.bones.len())
            .field("models", &self.models)
            .finish()
    }
}

/// One model drawn many times
#[derive(Clone)]
pub struct InstanceRenderItem {
    /// Entity drawn
    pub entity: EntityId,
    /// Reference the world matrix was read from
    pub reference: Arc<dyn ValueReference>,
    /// World matrix at snapshot time, attachment already applied
    pub world: Mat4,
    /// Host frame when the entity is attached
    pub host: Option<Mat4>,
    /// Model to instance
    pub model: Model,
    /// Per-instance matrices relative to `world`
    pub instances: Vec<Mat4>,
}

impl fmt::Debug for InstanceRenderItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceRenderItem")
            .field("entity", &self.entity)
            .field("model", &self.model)
            .field("instances", &self.instances.len())
            .finish()
    }
}

/// Everything a backend needs for one frame
#[derive(Debug, Clone, Default)]
pub struct RenderFrame {
    /// Frame counter of the pipeline that produced this frame
    pub frame: u64,
    /// Single render entities
    pub singles: Vec<SingleRenderItem>,
    /// Instanced entities
    pub instances: Vec<InstanceRenderItem>,
}

impl RenderFrame {
    /// Total draw submissions this frame would need
    pub fn draw_count(&self) -> usize {
        let singles: usize = self.singles.iter().map(|item| item.models.len()).sum();
        let instances: usize = self.instances.iter().map(|item| item.instances.len()).sum();
        singles + instances
    }

    /// True when there is nothing to draw
    pub fn is_empty(&self) -> bool {
        self.singles.is_empty() && self.instances.is_empty()
    }
}

/// Backend that only counts and logs frames
#[derive(Debug, Default)]
pub struct LoggingBackend {
    frames: u64,
    last_draw_count: usize,
}

impl LoggingBackend {
    /// Create the backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames received
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Draw submissions in the last frame
    pub fn last_draw_count(&self) -> usize {
        self.last_draw_count
    }
}

impl RenderBackend for LoggingBackend {
    fn render(&mut self, frame: &RenderFrame) -> BackendResult<()> {
        self.frames += 1;
        self.last_draw_count = frame.draw_count();
        log::trace!(
            "Frame {}: {} singles, {} instanced, {} draws",
            frame.frame,
            frame.singles.len(),
            frame.instances.len(),
            self.last_draw_count
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "logging"
    }
}

//! Row types stored in the pipeline data stores
//!
//! Pure data with small helpers; the object components own the logic.

pub mod animator;
pub mod render;
pub mod transform;

pub use animator::EntityAnimator;
pub use render::{InstanceRenderData, Model, SingleRenderData};
pub use transform::Transform;

//! Entity directory, data stores and object components
//!
//! Entities are plain ids. Their data lives in dense per-store rows that the
//! [`entity::EntityDirectory`] maps ids onto; components mutate those rows
//! in response to broker events.

pub mod components;
pub mod entity;
pub mod reference;
pub mod storage;
pub mod systems;

pub use entity::{EntityDirectory, EntityId, EntityKey, Removal};
pub use reference::{ResolveError, TransformReference, ValueReference};
pub use storage::{DataStore, PipelineData, PipelineRow, StoreRegistry};
pub use systems::{ComponentContext, ComponentKind, ObjectComponent};

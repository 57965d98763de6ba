//! Pipeline topic names and their event payloads
//!
//! Each topic carries exactly one payload type. Subscribers use
//! [`MessageBroker::subscribe_event`](super::MessageBroker::subscribe_event)
//! with the matching struct.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::animation::{BoneAnimator, BoneMap};
use crate::ecs::components::Model;
use crate::ecs::entity::EntityId;
use crate::ecs::reference::ValueReference;
use crate::ecs::systems::{Behavior, EntityAction};
use crate::foundation::math::{Mat4, Vec3};

/// `{uuid}`: create rows for a new entity
pub const ADD_ENTITY: &str = "pipeline.add_entity";
/// `{uuid}`: swap-remove an entity's rows
pub const REMOVE_ENTITY: &str = "pipeline.remove_entity";
/// `{uuid, model}`: append a model to the entity's single render row
pub const ADD_MODEL: &str = "pipeline.add_model";
/// `{uuid, bone_map}`: replace the entity's skeleton
pub const SET_BONE_MAP: &str = "pipeline.set_bone_map";
/// `{uuid, position}`
pub const SET_ENTITY_POSITION: &str = "pipeline.set_entity_position";
/// `{uuid, rotation}` in degrees
pub const SET_ENTITY_ROTATION: &str = "pipeline.set_entity_rotation";
/// `{uuid, scale}`
pub const SET_ENTITY_SCALE: &str = "pipeline.set_entity_scale";
/// `{uuid, velocity}` in units per second
pub const SET_ENTITY_VELOCITY: &str = "pipeline.set_entity_velocity";
/// `{uuid, callback}`: synchronous request for a transform reference
pub const GET_ENTITY_TRANSFORM: &str = "pipeline.get_entity_transform";
/// `{uuid, animator}`: attach a playback driver
pub const ADD_ANIMATOR: &str = "pipeline.add_animator";
/// `{uuid, transform}`: published after the world matrix changed
pub const ENTITY_TRANSFORM: &str = "pipeline.entity_transform";
/// `{uuid, transforms}`: bone name to matrix after an animation step
pub const BONE_TRANSFORM: &str = "pipeline.bone_transform";
/// `{uuid, host, bone}`: parent an entity to another entity (or one of its bones)
pub const ATTACH_OBJECT_TO: &str = "pipeline.attach_object_to";
/// `{uuid, model}`: model drawn by the entity's instance render row
pub const SET_INSTANCE_MODEL: &str = "pipeline.set_instance_model";
/// `{uuid, transforms}`: per-instance offsets for the instance render row
pub const SET_INSTANCES: &str = "pipeline.set_instances";
/// `{uuid, behavior}`: attach an AI behavior
pub const SET_BEHAVIOR: &str = "pipeline.set_behavior";
/// `{uuid, action}`: queue an action
pub const PERFORM_ACTION: &str = "pipeline.perform_action";

/// One-shot ownership transfer through a shared payload.
///
/// Payloads are delivered by reference, so values that must be moved into
/// exactly one subscriber travel inside a `Handoff` and are taken out.
pub struct Handoff<T>(Mutex<Option<T>>);

impl<T> Handoff<T> {
    /// Wrap a value for transfer
    pub fn new(value: T) -> Self {
        Self(Mutex::new(Some(value)))
    }

    /// Take the value; later calls return `None`
    pub fn take(&self) -> Option<T> {
        self.0.lock().take()
    }
}

impl<T> fmt::Debug for Handoff<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.0.lock().is_some() { "full" } else { "taken" };
        f.debug_tuple("Handoff").field(&state).finish()
    }
}

/// Payload of [`ADD_ENTITY`] and [`REMOVE_ENTITY`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityEvent {
    /// Entity concerned
    pub id: EntityId,
}

/// Payload of [`ADD_MODEL`] and [`SET_INSTANCE_MODEL`]
#[derive(Debug, Clone)]
pub struct ModelEvent {
    /// Entity concerned
    pub id: EntityId,
    /// Model handle issued by the asset collaborator
    pub model: Model,
}

/// Payload of [`SET_BONE_MAP`]
#[derive(Debug, Clone)]
pub struct BoneMapEvent {
    /// Entity concerned
    pub id: EntityId,
    /// Replacement skeleton
    pub bone_map: BoneMap,
}

/// Payload of the set position/rotation/scale/velocity topics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorEvent {
    /// Entity concerned
    pub id: EntityId,
    /// New value
    pub value: Vec3,
}

/// Reply channel of [`GET_ENTITY_TRANSFORM`]
pub type TransformCallback = Box<dyn Fn(Arc<dyn ValueReference>) + Send + Sync>;

/// Payload of [`GET_ENTITY_TRANSFORM`]
pub struct TransformRequest {
    /// Entity concerned
    pub id: EntityId,
    /// Invoked synchronously by the position component
    pub callback: TransformCallback,
}

impl fmt::Debug for TransformRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformRequest").field("id", &self.id).finish()
    }
}

/// Payload of [`ADD_ANIMATOR`]
#[derive(Debug)]
pub struct AnimatorEvent {
    /// Entity concerned
    pub id: EntityId,
    /// Playback driver, taken by the animation component
    pub animator: Handoff<Box<dyn BoneAnimator>>,
}

impl AnimatorEvent {
    /// Build the event
    pub fn new(id: EntityId, animator: Box<dyn BoneAnimator>) -> Self {
        Self {
            id,
            animator: Handoff::new(animator),
        }
    }
}

/// Payload of [`ENTITY_TRANSFORM`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformEvent {
    /// Entity concerned
    pub id: EntityId,
    /// New world matrix
    pub transform: Mat4,
}

/// Payload of [`SET_INSTANCES`]
#[derive(Debug, Clone, PartialEq)]
pub struct MatricesEvent {
    /// Entity concerned
    pub id: EntityId,
    /// One matrix per instance
    pub transforms: Vec<Mat4>,
}

/// Payload of [`BONE_TRANSFORM`]
///
/// Keyed by bone name. Consumers that need the shader-buffer layout read
/// the animator row, which keeps the same matrices in render order.
#[derive(Debug, Clone, PartialEq)]
pub struct BoneTransformsEvent {
    /// Animated entity
    pub id: EntityId,
    /// Composed matrix of every bone
    pub transforms: HashMap<String, Mat4>,
}

/// Payload of [`ATTACH_OBJECT_TO`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachEvent {
    /// Entity being attached
    pub id: EntityId,
    /// Entity it follows
    pub host: EntityId,
    /// Optional bone of the host to follow
    pub bone: Option<String>,
}

/// Payload of [`SET_BEHAVIOR`]
#[derive(Debug)]
pub struct BehaviorEvent {
    /// Entity concerned
    pub id: EntityId,
    /// Behavior, taken by the AI component
    pub behavior: Handoff<Box<dyn Behavior>>,
}

impl BehaviorEvent {
    /// Build the event
    pub fn new(id: EntityId, behavior: Box<dyn Behavior>) -> Self {
        Self {
            id,
            behavior: Handoff::new(behavior),
        }
    }
}

/// Payload of [`PERFORM_ACTION`]
#[derive(Debug, Clone, PartialEq)]
pub struct ActionEvent {
    /// Entity concerned
    pub id: EntityId,
    /// Action to queue
    pub action: EntityAction,
}

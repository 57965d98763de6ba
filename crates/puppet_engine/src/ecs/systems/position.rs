//! Position component
//!
//! Owns the authoritative position/rotation/scale of every entity.
//! Set-position style events never touch that state directly: they are
//! pushed onto a channel so publishers (possibly on another thread) never
//! wait for `update`. Each frame `update` drains the channel, recomputes
//! world matrices (host first for attached entities), writes the transform
//! rows and publishes `pipeline.entity_transform` for everything that
//! changed.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::{ComponentBase, ComponentContext, ComponentKind, ObjectComponent};
use crate::ecs::entity::EntityId;
use crate::ecs::reference::{TransformReference, ValueReference};
use crate::ecs::storage::LockGuard;
use crate::events::topics::{
    self, AttachEvent, EntityEvent, TransformEvent, TransformRequest, VectorEvent,
};
use crate::foundation::math::{create_transformation, Mat4, Vec3};
use crate::pipeline::PipelineError;

#[derive(Debug, Clone, PartialEq)]
enum PositionChange {
    Added(EntityId),
    Removed(EntityId),
    Position(EntityId, Vec3),
    Rotation(EntityId, Vec3),
    Scale(EntityId, Vec3),
    Attach(AttachEvent),
}

#[derive(Debug, Clone)]
struct Attachment {
    host: EntityId,
    bone: Option<String>,
}

#[derive(Debug, Clone)]
struct EntityTransform {
    position: Vec3,
    rotation: Vec3,
    scale: Vec3,
    world: Mat4,
    dirty: bool,
}

impl Default for EntityTransform {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Vec3::zeros(),
            scale: Vec3::new(1.0, 1.0, 1.0),
            world: Mat4::identity(),
            dirty: true,
        }
    }
}

impl EntityTransform {
    fn local(&self) -> Mat4 {
        create_transformation(&self.rotation, &self.scale, &self.position)
    }
}

#[derive(Debug, Default)]
struct PositionState {
    entities: HashMap<EntityId, EntityTransform>,
    attachments: HashMap<EntityId, Attachment>,
}

impl PositionState {
    fn apply(&mut self, change: PositionChange) {
        match change {
            PositionChange::Added(id) => {
                self.entities.entry(id).or_default();
            }
            PositionChange::Removed(id) => {
                self.entities.remove(&id);
                self.attachments.remove(&id);
                self.detach_dependents(id);
            }
            PositionChange::Position(id, value) => self.edit(id, |t| t.position = value),
            PositionChange::Rotation(id, value) => self.edit(id, |t| t.rotation = value),
            PositionChange::Scale(id, value) => self.edit(id, |t| t.scale = value),
            PositionChange::Attach(event) => {
                if !self.entities.contains_key(&event.id) {
                    log::warn!("Attach requested for unknown entity {}", event.id);
                } else if event.host == EntityId::nil() {
                    self.attachments.remove(&event.id);
                    self.edit(event.id, |_| {});
                } else if !self.entities.contains_key(&event.host) {
                    log::warn!("Entity {} attached to unknown host {}", event.id, event.host);
                } else {
                    self.attachments.insert(
                        event.id,
                        Attachment {
                            host: event.host,
                            bone: event.bone,
                        },
                    );
                }
            }
        }
    }

    /// Drop every attachment hosted by `host`; dependents fall back to their local transform
    fn detach_dependents(&mut self, host: EntityId) {
        let orphans: Vec<EntityId> = self
            .attachments
            .iter()
            .filter(|(_, attachment)| attachment.host == host)
            .map(|(id, _)| *id)
            .collect();
        for id in orphans {
            log::debug!("Entity {} detached: host {} was removed", id, host);
            self.attachments.remove(&id);
            self.edit(id, |_| {});
        }
    }

    fn edit(&mut self, id: EntityId, f: impl FnOnce(&mut EntityTransform)) {
        match self.entities.get_mut(&id) {
            Some(transform) => {
                f(transform);
                transform.dirty = true;
            }
            None => log::warn!("Position change for unknown entity {}", id),
        }
    }

    /// Attached entities ordered so every host comes before its dependents
    fn attachment_order(&self) -> Result<Vec<EntityId>, PipelineError> {
        let mut order = Vec::new();
        let mut done: HashSet<EntityId> = HashSet::new();

        let mut roots: Vec<EntityId> = self.attachments.keys().copied().collect();
        roots.sort();
        for start in roots {
            let mut chain = Vec::new();
            let mut current = start;
            while let Some(attachment) = self.attachments.get(&current) {
                if done.contains(&current) {
                    break;
                }
                if chain.contains(&current) {
                    log::error!("Circular attachment detected at entity {}", current);
                    return Err(PipelineError::CircularDependency(current));
                }
                chain.push(current);
                current = attachment.host;
            }
            for id in chain.into_iter().rev() {
                done.insert(id);
                order.push(id);
            }
        }
        Ok(order)
    }
}

/// Maintains transforms and world matrices
pub struct PositionComponent {
    base: ComponentBase,
    state: Arc<Mutex<PositionState>>,
    sender: Sender<PositionChange>,
    receiver: Receiver<PositionChange>,
    max_updates_per_frame: usize,
}

impl PositionComponent {
    /// `max_updates_per_frame` bounds how many queued changes one update
    /// applies; 0 means unlimited
    pub fn new(max_updates_per_frame: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            base: ComponentBase::new(),
            state: Arc::new(Mutex::new(PositionState::default())),
            sender,
            receiver,
            max_updates_per_frame,
        }
    }

    /// Queued changes not applied yet
    pub fn pending_changes(&self) -> usize {
        self.receiver.len()
    }

    fn forward<T, F>(&mut self, topic: &str, convert: F)
    where
        T: std::any::Any + Send + Sync,
        F: Fn(&T) -> PositionChange + Send + Sync + 'static,
    {
        let sender = self.sender.clone();
        self.base.subscribe::<T, _>(topic, move |event| {
            // Receiver lives as long as the component
            let _ = sender.send(convert(event));
        });
    }

    fn bone_matrix(
        context: &ComponentContext,
        host: EntityId,
        bone: &str,
    ) -> Result<Option<Mat4>, PipelineError> {
        let animators = context.animators()?;
        let directory = context.directory.read();
        let Some(index) = directory.index_of(host) else {
            return Ok(None);
        };
        Ok(animators
            .with_row(index, |row| row.bone_transform(bone))
            .flatten())
    }
}

impl Default for PositionComponent {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ObjectComponent for PositionComponent {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Position
    }

    fn init(&mut self, context: &ComponentContext) {
        if !self.base.attach(context) {
            return;
        }

        // Entities that existed before this component joined
        for (_, id) in context.directory.read().iter() {
            let _ = self.sender.send(PositionChange::Added(id));
        }

        self.forward(topics::ADD_ENTITY, |e: &EntityEvent| PositionChange::Added(e.id));
        self.forward(topics::REMOVE_ENTITY, |e: &EntityEvent| PositionChange::Removed(e.id));
        self.forward(topics::SET_ENTITY_POSITION, |e: &VectorEvent| {
            PositionChange::Position(e.id, e.value)
        });
        self.forward(topics::SET_ENTITY_ROTATION, |e: &VectorEvent| {
            PositionChange::Rotation(e.id, e.value)
        });
        self.forward(topics::SET_ENTITY_SCALE, |e: &VectorEvent| {
            PositionChange::Scale(e.id, e.value)
        });
        self.forward(topics::ATTACH_OBJECT_TO, |e: &AttachEvent| {
            PositionChange::Attach(e.clone())
        });

        let reply_context = context.clone();
        self.base
            .subscribe::<TransformRequest, _>(topics::GET_ENTITY_TRANSFORM, move |request| {
                let store = match reply_context.transforms() {
                    Ok(store) => store,
                    Err(e) => {
                        log::warn!("Cannot answer transform request: {}", e);
                        return;
                    }
                };
                let key = reply_context.directory.read().key_of(request.id);
                match key {
                    Some(key) => {
                        let reference: Arc<dyn ValueReference> = Arc::new(TransformReference::new(
                            request.id,
                            key,
                            Arc::clone(&reply_context.directory),
                            store,
                        ));
                        (request.callback)(reference);
                    }
                    None => log::warn!("Transform requested for unknown entity {}", request.id),
                }
            });
    }

    fn update(&mut self, _delta: f32) -> Result<(), PipelineError> {
        let context = self.base.require_context(self.kind())?.clone();
        let transforms = context.transforms()?;

        let mut guard = self.state.lock();
        let state = &mut *guard;

        let limit = match self.max_updates_per_frame {
            0 => usize::MAX,
            n => n,
        };
        for change in self.receiver.try_iter().take(limit) {
            state.apply(change);
        }

        let mut changed: Vec<EntityId> = Vec::new();
        for (id, transform) in state.entities.iter_mut() {
            if transform.dirty && !state.attachments.contains_key(id) {
                transform.world = transform.local();
                transform.dirty = false;
                changed.push(*id);
            }
        }

        for id in state.attachment_order()? {
            let Some(attachment) = state.attachments.get(&id).cloned() else {
                continue;
            };
            let Some(host_world) = state.entities.get(&attachment.host).map(|t| t.world) else {
                log::warn!("Entity {} lost its host {}; detaching", id, attachment.host);
                state.attachments.remove(&id);
                state.edit(id, |_| {});
                continue;
            };
            let bone = match &attachment.bone {
                Some(name) => Self::bone_matrix(&context, attachment.host, name)?
                    .unwrap_or_else(Mat4::identity),
                None => Mat4::identity(),
            };
            if let Some(transform) = state.entities.get_mut(&id) {
                let world = host_world * bone * transform.local();
                if transform.dirty || world != transform.world {
                    transform.world = world;
                    changed.push(id);
                }
                transform.dirty = false;
            }
        }

        let mut outgoing = Vec::with_capacity(changed.len());
        {
            let directory = context.directory.read();
            let mut rows = transforms.lock();
            for id in changed {
                let Some(transform) = state.entities.get(&id) else {
                    continue;
                };
                let Some(row) = directory.index_of(id).and_then(|index| rows.get_mut(index)) else {
                    log::warn!("No transform row for entity {}", id);
                    continue;
                };
                row.position = transform.position;
                row.rotation = transform.rotation;
                row.scale = transform.scale;
                row.world = transform.world;
                outgoing.push(TransformEvent {
                    id,
                    transform: transform.world,
                });
            }
        }
        drop(guard);

        for event in outgoing {
            self.base.publish(topics::ENTITY_TRANSFORM, event);
        }
        Ok(())
    }

    fn tear_down(&mut self) {
        self.base.tear_down();
    }

    fn lock(&self) -> Box<dyn LockGuard + '_> {
        Box::new(self.state.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::{Bone, BoneMap};
    use crate::ecs::systems::test_support;
    use approx::assert_relative_eq;

    fn setup() -> (ComponentContext, PositionComponent) {
        let context = test_support::context();
        let mut component = PositionComponent::new(0);
        component.init(&context);
        (context, component)
    }

    fn set_position(context: &ComponentContext, id: EntityId, value: Vec3) {
        context
            .broker
            .publish_event(topics::SET_ENTITY_POSITION, VectorEvent { id, value });
    }

    fn world_of(context: &ComponentContext, id: EntityId) -> Mat4 {
        let index = context.directory.read().index_of(id).unwrap();
        context.transforms().unwrap().with_row(index, |row| row.world).unwrap()
    }

    #[test]
    fn test_changes_wait_for_update() {
        let (context, mut component) = setup();
        let id = test_support::add_entity(&context);
        context.broker.publish_event(topics::ADD_ENTITY, EntityEvent { id });

        set_position(&context, id, Vec3::new(3.0, 0.0, 0.0));
        assert_eq!(world_of(&context, id), Mat4::identity());
        assert_eq!(component.pending_changes(), 2);

        component.update(0.016).unwrap();
        assert_relative_eq!(world_of(&context, id)[(0, 3)], 3.0);
    }

    #[test]
    fn test_world_is_translate_after_rotate_and_scale() {
        let (context, mut component) = setup();
        let id = test_support::add_entity(&context);
        context.broker.publish_event(topics::ADD_ENTITY, EntityEvent { id });
        context.broker.publish_event(
            topics::SET_ENTITY_SCALE,
            VectorEvent { id, value: Vec3::new(2.0, 2.0, 2.0) },
        );
        context.broker.publish_event(
            topics::SET_ENTITY_ROTATION,
            VectorEvent { id, value: Vec3::new(0.0, 0.0, 90.0) },
        );
        set_position(&context, id, Vec3::new(0.0, 0.0, 5.0));
        component.update(0.016).unwrap();

        let point = world_of(&context, id).transform_point(&nalgebra::Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(point.coords, Vec3::new(0.0, 2.0, 5.0), epsilon = 1.0e-5);
    }

    #[test]
    fn test_transform_changed_is_published() {
        let (context, mut component) = setup();
        let id = test_support::add_entity(&context);
        context.broker.publish_event(topics::ADD_ENTITY, EntityEvent { id });

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        context
            .broker
            .subscribe_event::<TransformEvent, _>(topics::ENTITY_TRANSFORM, move |e| {
                sink.lock().push(e.transform[(1, 3)]);
            });

        set_position(&context, id, Vec3::new(0.0, 7.0, 0.0));
        component.update(0.016).unwrap();
        component.update(0.016).unwrap();

        assert_eq!(*seen.lock(), vec![7.0]);
    }

    #[test]
    fn test_update_budget_leaves_rest_queued() {
        let context = test_support::context();
        let mut component = PositionComponent::new(2);
        component.init(&context);
        let id = test_support::add_entity(&context);
        context.broker.publish_event(topics::ADD_ENTITY, EntityEvent { id });
        for x in 1..=3 {
            set_position(&context, id, Vec3::new(x as f32, 0.0, 0.0));
        }

        component.update(0.016).unwrap();
        assert_relative_eq!(world_of(&context, id)[(0, 3)], 1.0);
        assert_eq!(component.pending_changes(), 2);

        component.update(0.016).unwrap();
        assert_relative_eq!(world_of(&context, id)[(0, 3)], 3.0);
    }

    #[test]
    fn test_attached_entity_follows_host_bone() {
        let (context, mut component) = setup();
        let host = test_support::add_entity(&context);
        let rider = test_support::add_entity(&context);
        for id in [host, rider] {
            context.broker.publish_event(topics::ADD_ENTITY, EntityEvent { id });
        }

        let mut bones = BoneMap::new();
        bones
            .add_bone("hand", None, Bone::new(Vec3::new(0.0, 1.0, 0.0), Vec3::new(1.0, 1.0, 1.0), Vec3::zeros()))
            .unwrap();
        let host_index = context.directory.read().index_of(host).unwrap();
        context.animators().unwrap().with_row(host_index, |row| {
            row.set_bone_map(bones);
            row.advance(0.0);
        });

        set_position(&context, host, Vec3::new(10.0, 0.0, 0.0));
        set_position(&context, rider, Vec3::new(0.0, 0.0, 1.0));
        context.broker.publish_event(
            topics::ATTACH_OBJECT_TO,
            AttachEvent { id: rider, host, bone: Some("hand".into()) },
        );
        component.update(0.016).unwrap();

        let world = world_of(&context, rider);
        assert_relative_eq!(world[(0, 3)], 10.0);
        assert_relative_eq!(world[(1, 3)], 1.0);
        assert_relative_eq!(world[(2, 3)], 1.0);

        // Host moves, rider follows without its own event
        set_position(&context, host, Vec3::new(-4.0, 0.0, 0.0));
        component.update(0.016).unwrap();
        assert_relative_eq!(world_of(&context, rider)[(0, 3)], -4.0);
    }

    #[test]
    fn test_attachment_cycle_is_fatal() {
        let (context, mut component) = setup();
        let a = test_support::add_entity(&context);
        let b = test_support::add_entity(&context);
        for id in [a, b] {
            context.broker.publish_event(topics::ADD_ENTITY, EntityEvent { id });
        }
        context
            .broker
            .publish_event(topics::ATTACH_OBJECT_TO, AttachEvent { id: a, host: b, bone: None });
        context
            .broker
            .publish_event(topics::ATTACH_OBJECT_TO, AttachEvent { id: b, host: a, bone: None });

        assert!(matches!(
            component.update(0.016),
            Err(PipelineError::CircularDependency(_))
        ));
    }

    #[test]
    fn test_attach_with_unknown_ids_is_ignored() {
        let (context, mut component) = setup();
        let id = test_support::add_entity(&context);
        context.broker.publish_event(topics::ADD_ENTITY, EntityEvent { id });
        set_position(&context, id, Vec3::new(2.0, 0.0, 0.0));

        context.broker.publish_event(
            topics::ATTACH_OBJECT_TO,
            AttachEvent { id, host: EntityId::new(), bone: None },
        );
        context.broker.publish_event(
            topics::ATTACH_OBJECT_TO,
            AttachEvent { id: EntityId::new(), host: id, bone: None },
        );
        component.update(0.016).unwrap();

        assert!(component.state.lock().attachments.is_empty());
        assert_relative_eq!(world_of(&context, id)[(0, 3)], 2.0);
    }

    #[test]
    fn test_removing_host_detaches_dependents() {
        let (context, mut component) = setup();
        let host = test_support::add_entity(&context);
        let rider = test_support::add_entity(&context);
        for id in [host, rider] {
            context.broker.publish_event(topics::ADD_ENTITY, EntityEvent { id });
        }
        set_position(&context, host, Vec3::new(5.0, 0.0, 0.0));
        set_position(&context, rider, Vec3::new(0.0, 1.0, 0.0));
        context
            .broker
            .publish_event(topics::ATTACH_OBJECT_TO, AttachEvent { id: rider, host, bone: None });
        component.update(0.016).unwrap();
        assert_relative_eq!(world_of(&context, rider)[(0, 3)], 5.0);

        test_support::remove_entity(&context, host);
        context.broker.publish_event(topics::REMOVE_ENTITY, EntityEvent { id: host });
        component.update(0.016).unwrap();

        let state = component.state.lock();
        assert!(state.attachments.is_empty());
        assert!(!state.entities.contains_key(&host));
        drop(state);
        let world = world_of(&context, rider);
        assert_relative_eq!(world[(0, 3)], 0.0);
        assert_relative_eq!(world[(1, 3)], 1.0);
    }

    #[test]
    fn test_get_entity_transform_replies_with_reference() {
        let (context, mut component) = setup();
        let id = test_support::add_entity(&context);
        context.broker.publish_event(topics::ADD_ENTITY, EntityEvent { id });

        let reply: Arc<Mutex<Option<Arc<dyn ValueReference>>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&reply);
        context.broker.publish_event(
            topics::GET_ENTITY_TRANSFORM,
            TransformRequest {
                id,
                callback: Box::new(move |reference: Arc<dyn ValueReference>| {
                    *slot.lock() = Some(reference);
                }),
            },
        );
        let reference = reply.lock().take().expect("synchronous reply");

        set_position(&context, id, Vec3::new(0.0, 0.0, 2.0));
        component.update(0.016).unwrap();
        assert_relative_eq!(reference.get_mat4().unwrap()[(2, 3)], 2.0);
    }

    #[test]
    fn test_tear_down_unsubscribes() {
        let (context, mut component) = setup();
        component.tear_down();
        assert_eq!(context.broker.subscriber_count(topics::SET_ENTITY_POSITION), 0);
        assert_eq!(context.broker.subscriber_count(topics::GET_ENTITY_TRANSFORM), 0);
    }
}

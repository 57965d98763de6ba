//! Action component
//!
//! Scripted, queued commands for entities. Actions are translated into the
//! ordinary pipeline events (set position, set rotation, add animator, ...)
//! during `update`, so the components that own those domains stay the only
//! writers of their state.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use super::{ComponentBase, ComponentKind, ComponentContext, ObjectComponent};
use crate::animation::{AnimationCatalogue, PlayMode};
use crate::ecs::entity::EntityId;
use crate::ecs::storage::LockGuard;
use crate::events::topics::{self, ActionEvent, AnimatorEvent, EntityEvent, VectorEvent};
use crate::foundation::math::Vec3;
use crate::pipeline::PipelineError;

/// One queued command
#[derive(Debug, Clone, PartialEq)]
pub enum EntityAction {
    /// Teleport to a position
    MoveTo(Vec3),
    /// Move relative to the current position
    MoveBy(Vec3),
    /// Set the rotation (degrees)
    RotateTo(Vec3),
    /// Set the scale
    ScaleTo(Vec3),
    /// Start an animation from the catalogue
    PlayAnimation {
        /// Animation path
        path: String,
        /// Loop behavior
        mode: PlayMode,
    },
}

#[derive(Debug, Default)]
struct ActionState {
    queues: HashMap<EntityId, VecDeque<EntityAction>>,
}

enum Outgoing {
    Vector(&'static str, VectorEvent),
    Animator(AnimatorEvent),
}

/// Executes queued actions
pub struct ActionComponent {
    base: ComponentBase,
    state: Arc<Mutex<ActionState>>,
    catalogue: Option<Arc<AnimationCatalogue>>,
}

impl ActionComponent {
    /// `catalogue` is needed for [`EntityAction::PlayAnimation`]
    pub fn new(catalogue: Option<Arc<AnimationCatalogue>>) -> Self {
        Self {
            base: ComponentBase::new(),
            state: Arc::new(Mutex::new(ActionState::default())),
            catalogue,
        }
    }

    /// Actions waiting for the next update
    pub fn queued(&self, id: EntityId) -> usize {
        self.state.lock().queues.get(&id).map_or(0, VecDeque::len)
    }
}

impl ObjectComponent for ActionComponent {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Action
    }

    fn init(&mut self, context: &ComponentContext) {
        if !self.base.attach(context) {
            return;
        }

        let state = Arc::clone(&self.state);
        self.base
            .subscribe::<ActionEvent, _>(topics::PERFORM_ACTION, move |event| {
                state
                    .lock()
                    .queues
                    .entry(event.id)
                    .or_default()
                    .push_back(event.action.clone());
            });

        let state = Arc::clone(&self.state);
        self.base
            .subscribe::<EntityEvent, _>(topics::REMOVE_ENTITY, move |event| {
                state.lock().queues.remove(&event.id);
            });
    }

    fn update(&mut self, _delta: f32) -> Result<(), PipelineError> {
        let context = self.base.require_context(self.kind())?;
        let transforms = context.transforms()?;

        let mut outgoing = Vec::new();
        {
            let mut state = self.state.lock();
            let directory = context.directory.read();
            let rows = transforms.lock();

            let mut queues: Vec<(EntityId, VecDeque<EntityAction>)> = state.queues.drain().collect();
            queues.sort_by_key(|(id, _)| *id);

            for (id, actions) in queues {
                let Some(current) = directory
                    .index_of(id)
                    .and_then(|index| rows.get(index))
                    .map(|row| row.position)
                else {
                    log::warn!("Dropping {} action(s) for unknown entity {}", actions.len(), id);
                    continue;
                };

                let mut position = current;
                for action in actions {
                    match action {
                        EntityAction::MoveTo(value) => {
                            position = value;
                            outgoing.push(Outgoing::Vector(
                                topics::SET_ENTITY_POSITION,
                                VectorEvent { id, value },
                            ));
                        }
                        EntityAction::MoveBy(offset) => {
                            position += offset;
                            outgoing.push(Outgoing::Vector(
                                topics::SET_ENTITY_POSITION,
                                VectorEvent { id, value: position },
                            ));
                        }
                        EntityAction::RotateTo(value) => outgoing.push(Outgoing::Vector(
                            topics::SET_ENTITY_ROTATION,
                            VectorEvent { id, value },
                        )),
                        EntityAction::ScaleTo(value) => outgoing.push(Outgoing::Vector(
                            topics::SET_ENTITY_SCALE,
                            VectorEvent { id, value },
                        )),
                        EntityAction::PlayAnimation { path, mode } => {
                            let animator = self
                                .catalogue
                                .as_ref()
                                .and_then(|catalogue| catalogue.get_with_mode(&path, mode));
                            match animator {
                                Some(animator) => {
                                    outgoing.push(Outgoing::Animator(AnimatorEvent::new(id, animator)))
                                }
                                None => log::warn!("Cannot play '{}' on entity {}", path, id),
                            }
                        }
                    }
                }
            }
        }

        for event in outgoing {
            match event {
                Outgoing::Vector(topic, event) => self.base.publish(topic, event),
                Outgoing::Animator(event) => self.base.publish(topics::ADD_ANIMATOR, event),
            }
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

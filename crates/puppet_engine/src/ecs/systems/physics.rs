//! Physics component
//!
//! Explicit Euler integration of per-entity velocity. No collision, no
//! forces: each frame moves every entity with a non-zero velocity by
//! `velocity * delta` and publishes the new position.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::{ComponentBase, ComponentContext, ComponentKind, ObjectComponent};
use crate::ecs::entity::EntityId;
use crate::ecs::storage::LockGuard;
use crate::events::topics::{self, EntityEvent, VectorEvent};
use crate::foundation::math::Vec3;
use crate::pipeline::PipelineError;

#[derive(Debug, Default)]
struct PhysicsState {
    velocities: HashMap<EntityId, Vec3>,
}

/// Velocity integration
#[derive(Default)]
pub struct PhysicsComponent {
    base: ComponentBase,
    state: Arc<Mutex<PhysicsState>>,
}

impl PhysicsComponent {
    /// Create an uninitialized component
    pub fn new() -> Self {
        Self::default()
    }

    /// Current velocity of an entity
    pub fn velocity(&self, id: EntityId) -> Option<Vec3> {
        self.state.lock().velocities.get(&id).copied()
    }
}

impl ObjectComponent for PhysicsComponent {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Physics
    }

    fn init(&mut self, context: &ComponentContext) {
        if !self.base.attach(context) {
            return;
        }

        let state = Arc::clone(&self.state);
        self.base
            .subscribe::<VectorEvent, _>(topics::SET_ENTITY_VELOCITY, move |event| {
                let mut state = state.lock();
                if event.value == Vec3::zeros() {
                    state.velocities.remove(&event.id);
                } else {
                    state.velocities.insert(event.id, event.value);
                }
            });

        let state = Arc::clone(&self.state);
        self.base
            .subscribe::<EntityEvent, _>(topics::REMOVE_ENTITY, move |event| {
                state.lock().velocities.remove(&event.id);
            });
    }

    fn update(&mut self, delta: f32) -> Result<(), PipelineError> {
        let context = self.base.require_context(self.kind())?;
        let transforms = context.transforms()?;

        let mut outgoing = Vec::new();
        {
            let mut state = self.state.lock();
            let directory = context.directory.read();
            let rows = transforms.lock();

            state.velocities.retain(|id, velocity| match directory.index_of(*id) {
                Some(index) => {
                    if let Some(row) = rows.get(index) {
                        outgoing.push(VectorEvent {
                            id: *id,
                            value: row.position + *velocity * delta,
                        });
                    }
                    true
                }
                None => {
                    log::warn!("Dropping velocity of unknown entity {}", id);
                    false
                }
            });
        }

        for event in outgoing {
            self.base.publish(topics::SET_ENTITY_POSITION, event);
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

//! AI component and behaviors
//!
//! A behavior looks at an entity's current position and decides where it
//! should be next. The component feeds behaviors the positions from the
//! transform store and publishes their decisions as set-position events.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{ComponentBase, ComponentContext, ComponentKind, ObjectComponent};
use crate::ecs::entity::EntityId;
use crate::ecs::storage::LockGuard;
use crate::engine::AiConfig;
use crate::events::topics::{self, BehaviorEvent, EntityEvent, VectorEvent};
use crate::foundation::math::{basically_equal, Vec3};
use crate::pipeline::PipelineError;

/// Decision logic attached to one entity
pub trait Behavior: Send + fmt::Debug {
    /// Behavior name, for logs
    fn name(&self) -> &str;

    /// Called once with the entity's position before the first update
    fn start(&mut self, _position: &Vec3) {}

    /// Advance by `delta` seconds; returns the new position if it moved
    fn update(&mut self, delta: f32, position: &Vec3, rng: &mut dyn RngCore) -> Option<Vec3>;
}

/// Idle for a while, pick a nearby spot, walk there, repeat
#[derive(Debug, Clone)]
pub struct WanderBehavior {
    speed: f32,
    radius: f32,
    wait_time: f32,
    target: Option<Vec3>,
}

impl WanderBehavior {
    /// Walk at `speed` units per second to spots up to `1.5 * radius` away
    pub fn new(speed: f32, radius: f32) -> Self {
        Self {
            speed,
            radius,
            wait_time: 0.0,
            target: None,
        }
    }

    /// Behavior configured from the AI settings
    pub fn from_config(config: &AiConfig) -> Self {
        Self::new(config.wander_speed, config.wander_radius)
    }

    /// Current destination
    pub fn target(&self) -> Option<Vec3> {
        self.target
    }

    /// Seconds left before the next move
    pub fn wait_time(&self) -> f32 {
        self.wait_time
    }

    fn pick_offset(&self, rng: &mut dyn RngCore) -> f32 {
        let raw: f32 = rng.gen_range(-self.radius..=self.radius);
        // Never pick a spot closer than half the radius
        raw + raw.signum() * self.radius * 0.5
    }
}

impl Behavior for WanderBehavior {
    fn name(&self) -> &str {
        "wander"
    }

    fn start(&mut self, position: &Vec3) {
        self.target = Some(*position);
    }

    fn update(&mut self, delta: f32, position: &Vec3, rng: &mut dyn RngCore) -> Option<Vec3> {
        if self.wait_time > 0.0 {
            self.wait_time -= delta;
            return None;
        }

        let target = *self.target.get_or_insert(*position);
        if basically_equal(position, &target) {
            self.wait_time = rng.gen_range(1.0..=4.0);
            let offset = Vec3::new(self.pick_offset(rng), self.pick_offset(rng), 0.0);
            self.target = Some(position + offset);
            return None;
        }

        let to_target = target - position;
        let step = self.speed * delta;
        if to_target.norm() <= step {
            Some(target)
        } else {
            Some(position + to_target.normalize() * step)
        }
    }
}

#[derive(Debug)]
struct Agent {
    behavior: Box<dyn Behavior>,
    started: bool,
}

struct AiState {
    agents: HashMap<EntityId, Agent>,
    rng: StdRng,
}

/// Runs behaviors
pub struct AiComponent {
    base: ComponentBase,
    state: Arc<Mutex<AiState>>,
}

impl AiComponent {
    /// Seeded component; the same seed replays the same decisions
    pub fn new(seed: u64) -> Self {
        Self {
            base: ComponentBase::new(),
            state: Arc::new(Mutex::new(AiState {
                agents: HashMap::new(),
                rng: StdRng::seed_from_u64(seed),
            })),
        }
    }

    /// Number of entities with a behavior
    pub fn agent_count(&self) -> usize {
        self.state.lock().agents.len()
    }
}

impl ObjectComponent for AiComponent {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Ai
    }

    fn init(&mut self, context: &ComponentContext) {
        if !self.base.attach(context) {
            return;
        }

        let state = Arc::clone(&self.state);
        let directory = Arc::clone(&context.directory);
        self.base
            .subscribe::<BehaviorEvent, _>(topics::SET_BEHAVIOR, move |event| {
                let Some(behavior) = event.behavior.take() else {
                    log::warn!("Behavior for {} was already taken", event.id);
                    return;
                };
                let mut state = state.lock();
                if !directory.read().contains(event.id) {
                    log::warn!("Dropping behavior '{}' for unknown entity {}", behavior.name(), event.id);
                    return;
                }
                log::debug!("Entity {} now runs '{}'", event.id, behavior.name());
                state.agents.insert(
                    event.id,
                    Agent {
                        behavior,
                        started: false,
                    },
                );
            });

        let state = Arc::clone(&self.state);
        self.base
            .subscribe::<EntityEvent, _>(topics::REMOVE_ENTITY, move |event| {
                state.lock().agents.remove(&event.id);
            });
    }

    fn update(&mut self, delta: f32) -> Result<(), PipelineError> {
        let context = self.base.require_context(self.kind())?;
        let transforms = context.transforms()?;

        let mut outgoing = Vec::new();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let directory = context.directory.read();
            let rows = transforms.lock();

            let mut ids: Vec<EntityId> = state.agents.keys().copied().collect();
            ids.sort();
            for id in ids {
                let Some(position) = directory
                    .index_of(id)
                    .and_then(|index| rows.get(index))
                    .map(|row| row.position)
                else {
                    log::warn!("Dropping behavior of unknown entity {}", id);
                    state.agents.remove(&id);
                    continue;
                };
                let Some(agent) = state.agents.get_mut(&id) else {
                    continue;
                };
                if !agent.started {
                    agent.behavior.start(&position);
                    agent.started = true;
                }
                if let Some(value) = agent.behavior.update(delta, &position, &mut state.rng) {
                    outgoing.push(VectorEvent { id, value });
                }
            }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::systems::test_support;
    use approx::assert_relative_eq;

    #[test]
    fn test_wander_waits_then_walks_toward_target() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut wander = WanderBehavior::new(10.0, 64.0);
        let start = Vec3::zeros();
        wander.start(&start);

        // At the target: pick a new one and wait
        assert_eq!(wander.update(0.1, &start, &mut rng), None);
        let target = wander.target().unwrap();
        assert!(target.x.abs() >= 32.0 && target.x.abs() <= 96.0);
        assert!(target.y.abs() >= 32.0 && target.y.abs() <= 96.0);
        assert!((1.0..=4.0).contains(&wander.wait_time()));

        // Burn the wait, then step at most speed * delta
        assert_eq!(wander.update(5.0, &start, &mut rng), None);
        let next = wander.update(0.5, &start, &mut rng).unwrap();
        assert_relative_eq!(next.norm(), 5.0, epsilon = 1.0e-4);
        assert_relative_eq!(next.normalize(), target.normalize(), epsilon = 1.0e-4);
    }

    #[test]
    fn test_wander_snaps_to_close_target() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut wander = WanderBehavior::new(1000.0, 64.0);
        wander.start(&Vec3::zeros());
        wander.update(0.0, &Vec3::zeros(), &mut rng);
        let target = wander.target().unwrap();

        wander.update(10.0, &Vec3::zeros(), &mut rng);
        assert_eq!(wander.update(1.0, &Vec3::zeros(), &mut rng), Some(target));
    }

    #[test]
    fn test_component_publishes_behavior_moves() {
        let context = test_support::context();
        let mut ai = AiComponent::new(1);
        ai.init(&context);
        let id = test_support::add_entity(&context);
        let stranger = EntityId::new();

        let moves = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&moves);
        context
            .broker
            .subscribe_event::<VectorEvent, _>(topics::SET_ENTITY_POSITION, move |e| {
                sink.lock().push(e.id);
            });

        context.broker.publish_event(
            topics::SET_BEHAVIOR,
            BehaviorEvent::new(id, Box::new(WanderBehavior::new(50.0, 64.0))),
        );
        context.broker.publish_event(
            topics::SET_BEHAVIOR,
            BehaviorEvent::new(stranger, Box::new(WanderBehavior::new(50.0, 64.0))),
        );
        assert_eq!(ai.agent_count(), 1);

        // First frame picks a target, then the wait (at most 4 s) runs out
        for _ in 0..60 {
            ai.update(0.1).unwrap();
        }
        assert!(moves.lock().iter().all(|moved| *moved == id));
        assert!(!moves.lock().is_empty());
    }
}

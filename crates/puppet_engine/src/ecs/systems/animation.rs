//! Animation component
//!
//! Every entity starts with a single-root skeleton driven by the rest pose
//! animator (see [`EntityAnimator::new`](crate::ecs::components::EntityAnimator::new)).
//! Skeleton and animator changes arrive as events and are applied at the
//! top of `update`; then every animator advances and its bone matrices are
//! copied into the single render row of the same entity.

use parking_lot::Mutex;
use std::sync::Arc;

use super::{ComponentBase, ComponentContext, ComponentKind, ObjectComponent};
use crate::animation::{BoneAnimator, BoneMap};
use crate::ecs::entity::EntityId;
use crate::ecs::storage::LockGuard;
use crate::events::topics::{self, AnimatorEvent, BoneMapEvent, BoneTransformsEvent};
use crate::pipeline::PipelineError;

#[derive(Debug)]
enum AnimationChange {
    BoneMap(EntityId, BoneMap),
    Animator(EntityId, Box<dyn BoneAnimator>),
}

impl AnimationChange {
    fn entity(&self) -> EntityId {
        match self {
            AnimationChange::BoneMap(id, _) | AnimationChange::Animator(id, _) => *id,
        }
    }
}

#[derive(Debug, Default)]
struct AnimationState {
    pending: Vec<AnimationChange>,
}

/// Drives per-entity animators
#[derive(Default)]
pub struct AnimationComponent {
    base: ComponentBase,
    state: Arc<Mutex<AnimationState>>,
}

impl AnimationComponent {
    /// Create an uninitialized component
    pub fn new() -> Self {
        Self::default()
    }

    /// Skeleton/animator changes waiting for the next update
    pub fn pending_changes(&self) -> usize {
        self.state.lock().pending.len()
    }
}

impl ObjectComponent for AnimationComponent {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Animation
    }

    fn init(&mut self, context: &ComponentContext) {
        if !self.base.attach(context) {
            return;
        }

        let state = Arc::clone(&self.state);
        self.base
            .subscribe::<BoneMapEvent, _>(topics::SET_BONE_MAP, move |event| {
                state
                    .lock()
                    .pending
                    .push(AnimationChange::BoneMap(event.id, event.bone_map.clone()));
            });

        let state = Arc::clone(&self.state);
        self.base
            .subscribe::<AnimatorEvent, _>(topics::ADD_ANIMATOR, move |event| {
                match event.animator.take() {
                    Some(animator) => state
                        .lock()
                        .pending
                        .push(AnimationChange::Animator(event.id, animator)),
                    None => log::warn!("Animator for {} was already taken", event.id),
                }
            });
    }

    fn update(&mut self, delta: f32) -> Result<(), PipelineError> {
        let context = self.base.require_context(self.kind())?;
        let animators = context.animators()?;
        let singles = context.single_render()?;

        let mut outgoing = Vec::new();
        {
            let mut state = self.state.lock();
            let directory = context.directory.read();
            let mut animator_rows = animators.lock();

            for change in state.pending.drain(..) {
                let id = change.entity();
                let Some(row) = directory
                    .index_of(id)
                    .and_then(|index| animator_rows.get_mut(index))
                else {
                    log::warn!("Animation change for unknown entity {}", id);
                    continue;
                };
                match change {
                    AnimationChange::BoneMap(_, bones) => row.set_bone_map(bones),
                    AnimationChange::Animator(_, animator) => row.set_animator(animator),
                }
            }

            let mut single_rows = singles.lock();
            for (index, row) in animator_rows.iter_mut().enumerate() {
                row.advance(delta);

                match single_rows.get_mut(index) {
                    Some(single) if single.entity == row.entity => {
                        single.bone_transforms.clone_from(&row.bone_transformations);
                    }
                    _ => log::warn!("Single render row {} does not belong to {}", index, row.entity),
                }

                outgoing.push(BoneTransformsEvent {
                    id: row.entity,
                    transforms: row.bone_transform_map(),
                });
            }
        }

        for event in outgoing {
            self.base.publish(topics::BONE_TRANSFORM, event);
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

//! Animator row

use std::collections::HashMap;

use crate::animation::{BoneAnimator, BoneMap, DefaultAnimator};
use crate::ecs::entity::{EntityId, EntityKey};
use crate::ecs::storage::{PipelineRow, RowContext};
use crate::foundation::math::Mat4;

/// Skeleton, playback driver and resolved bone matrices of one entity
#[derive(Debug)]
pub struct EntityAnimator {
    /// Owning entity
    pub entity: EntityId,
    /// Skeleton
    pub bone_map: BoneMap,
    /// Bone names in render order (depth, then id)
    pub bone_order: Vec<String>,
    /// Matrices matching `bone_order`
    pub bone_transformations: Vec<Mat4>,
    /// Playback driver
    pub animator: Box<dyn BoneAnimator>,
}

impl EntityAnimator {
    /// Row with a single root bone and the rest pose driver
    pub fn new(entity: EntityId) -> Self {
        let mut row = Self {
            entity,
            bone_map: BoneMap::single_root(),
            bone_order: Vec::new(),
            bone_transformations: Vec::new(),
            animator: Box::new(DefaultAnimator::new()),
        };
        row.refresh_order();
        row
    }

    /// Replace the skeleton and recompute the render order
    pub fn set_bone_map(&mut self, bone_map: BoneMap) {
        self.bone_map = bone_map;
        self.refresh_order();
    }

    /// Replace the playback driver
    pub fn set_animator(&mut self, animator: Box<dyn BoneAnimator>) {
        log::debug!("Entity {} now plays '{}'", self.entity, animator.name());
        self.animator = animator;
    }

    /// Advance the driver and copy its matrices in render order.
    /// Bones the driver does not know keep their rest pose.
    pub fn advance(&mut self, delta: f32) {
        self.animator.update(delta, &self.bone_map);

        let bone_map = &self.bone_map;
        let animator = &self.animator;
        self.bone_transformations = self
            .bone_order
            .iter()
            .map(|name| {
                animator.bone_transform(name).unwrap_or_else(|| {
                    bone_map
                        .get(name)
                        .map_or_else(Mat4::identity, |node| node.bone.default_transform)
                })
            })
            .collect();
    }

    /// Matrix of a named bone from the last advance
    pub fn bone_transform(&self, bone: &str) -> Option<Mat4> {
        self.bone_order
            .iter()
            .position(|name| name == bone)
            .and_then(|index| self.bone_transformations.get(index))
            .copied()
    }

    /// Bone name -> matrix map from the last advance
    pub fn bone_transform_map(&self) -> HashMap<String, Mat4> {
        self.bone_order
            .iter()
            .cloned()
            .zip(self.bone_transformations.iter().copied())
            .collect()
    }

    fn refresh_order(&mut self) {
        self.bone_order = self
            .bone_map
            .render_order()
            .into_iter()
            .filter_map(|id| self.bone_map.get_by_id(id).map(|node| node.name.clone()))
            .collect();
        self.bone_transformations = self
            .bone_order
            .iter()
            .filter_map(|name| self.bone_map.get(name).map(|node| node.bone.default_transform))
            .collect();
    }
}

impl PipelineRow for EntityAnimator {
    fn new_row(id: EntityId, _key: EntityKey, _context: &RowContext<'_>) -> Self {
        Self::new(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::Bone;
    use crate::foundation::math::Vec3;

    #[test]
    fn test_new_row_has_single_root() {
        let row = EntityAnimator::new(EntityId::new());
        assert_eq!(row.bone_order, vec![BoneMap::ROOT.to_owned()]);
        assert_eq!(row.bone_transformations, vec![Mat4::identity()]);
    }

    #[test]
    fn test_set_bone_map_orders_by_depth() {
        let mut bones = BoneMap::new();
        bones.add_bone("spine", None, Bone::default()).unwrap();
        bones.add_bone("head", Some("spine"), Bone::default()).unwrap();
        bones
            .add_bone("tail", None, Bone::new(Vec3::new(0.0, 0.0, -1.0), Vec3::new(1.0, 1.0, 1.0), Vec3::zeros()))
            .unwrap();

        let mut row = EntityAnimator::new(EntityId::new());
        row.set_bone_map(bones);
        row.advance(0.1);

        assert_eq!(row.bone_order, vec!["spine", "tail", "head"]);
        assert_eq!(row.bone_transformations.len(), 3);
        assert_eq!(row.bone_transform("tail").unwrap()[(2, 3)], -1.0);
        assert!(row.bone_transform("wing").is_none());
    }
}

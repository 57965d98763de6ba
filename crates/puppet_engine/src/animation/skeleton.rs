//! Bones and bone maps

use std::collections::HashMap;

use super::AnimationError;
use crate::foundation::math::{create_transformation, Mat4, Vec3};

/// Index of a bone in its map (insertion order)
pub type BoneId = usize;

/// A rigid skeletal node in its parent's space
#[derive(Debug, Clone, PartialEq)]
pub struct Bone {
    /// Local translation
    pub offset: Vec3,
    /// Local scale
    pub scale: Vec3,
    /// Local Euler rotation in degrees
    pub rotation: Vec3,
    /// Rest pose: local transform composed with every ancestor's, filled in
    /// by [`BoneMap::add_bone`]
    pub default_transform: Mat4,
}

impl Bone {
    /// Create a bone; the default transform starts as the local transform
    pub fn new(offset: Vec3, scale: Vec3, rotation: Vec3) -> Self {
        Self {
            offset,
            scale,
            rotation,
            default_transform: create_transformation(&rotation, &scale, &offset),
        }
    }

    /// Local transform of the rest pose
    pub fn local_transform(&self) -> Mat4 {
        create_transformation(&self.rotation, &self.scale, &self.offset)
    }
}

impl Default for Bone {
    fn default() -> Self {
        Self::new(Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0), Vec3::zeros())
    }
}

/// A bone with its place in the hierarchy
#[derive(Debug, Clone, PartialEq)]
pub struct BoneNode {
    /// Unique bone name
    pub name: String,
    /// Insertion index
    pub id: BoneId,
    /// Parent bone name, `None` for roots
    pub parent: Option<String>,
    /// Parent bone id, `None` for roots
    pub parent_id: Option<BoneId>,
    /// Distance from the root (roots are 0)
    pub depth: usize,
    /// Rest pose data
    pub bone: Bone,
}

/// Named, parented skeleton of one model
///
/// Parents are always inserted before their children, so walking the map in
/// id order visits every parent first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoneMap {
    nodes: Vec<BoneNode>,
    by_name: HashMap<String, BoneId>,
}

impl BoneMap {
    /// Name of the bone in [`BoneMap::single_root`]
    pub const ROOT: &'static str = "root";

    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Skeleton with one identity bone, used until a real one is set
    pub fn single_root() -> Self {
        let mut map = Self::new();
        map.nodes.push(BoneNode {
            name: Self::ROOT.to_owned(),
            id: 0,
            parent: None,
            parent_id: None,
            depth: 0,
            bone: Bone::default(),
        });
        map.by_name.insert(Self::ROOT.to_owned(), 0);
        map
    }

    /// Add a bone. The parent must already be in the map.
    pub fn add_bone(
        &mut self,
        name: &str,
        parent: Option<&str>,
        mut bone: Bone,
    ) -> Result<BoneId, AnimationError> {
        if name.is_empty() {
            return Err(AnimationError::EmptyBoneName);
        }
        if self.by_name.contains_key(name) {
            return Err(AnimationError::DuplicateBone(name.to_owned()));
        }

        let (parent_id, depth) = match parent {
            Some(parent_name) => {
                let parent_node = self.get(parent_name).ok_or_else(|| {
                    AnimationError::UnknownParent {
                        bone: name.to_owned(),
                        parent: parent_name.to_owned(),
                    }
                })?;
                bone.default_transform =
                    bone.local_transform() * parent_node.bone.default_transform;
                (Some(parent_node.id), parent_node.depth + 1)
            }
            None => {
                bone.default_transform = bone.local_transform();
                (None, 0)
            }
        };

        let id = self.nodes.len();
        self.nodes.push(BoneNode {
            name: name.to_owned(),
            id,
            parent: parent.map(str::to_owned),
            parent_id,
            depth,
            bone,
        });
        self.by_name.insert(name.to_owned(), id);
        Ok(id)
    }

    /// Look up a bone by name
    pub fn get(&self, name: &str) -> Option<&BoneNode> {
        self.by_name.get(name).map(|id| &self.nodes[*id])
    }

    /// Look up a bone by id
    pub fn get_by_id(&self, id: BoneId) -> Option<&BoneNode> {
        self.nodes.get(id)
    }

    /// Id of a named bone
    pub fn bone_id(&self, name: &str) -> Option<BoneId> {
        self.by_name.get(name).copied()
    }

    /// Bones in id order
    pub fn iter(&self) -> impl Iterator<Item = &BoneNode> {
        self.nodes.iter()
    }

    /// Number of bones
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the map has no bones
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Bone ids sorted by depth, then id.
    ///
    /// This is the layout of per-bone matrix buffers handed to renderers.
    pub fn render_order(&self) -> Vec<BoneId> {
        let mut order: Vec<BoneId> = (0..self.nodes.len()).collect();
        order.sort_by_key(|id| (self.nodes[*id].depth, *id));
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn arm() -> BoneMap {
        let mut map = BoneMap::new();
        map.add_bone("shoulder", None, Bone::new(Vec3::new(0.0, 1.0, 0.0), Vec3::new(1.0, 1.0, 1.0), Vec3::zeros()))
            .unwrap();
        map.add_bone("elbow", Some("shoulder"), Bone::new(Vec3::new(2.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 1.0), Vec3::zeros()))
            .unwrap();
        map.add_bone("hip", None, Bone::default()).unwrap();
        map.add_bone("hand", Some("elbow"), Bone::new(Vec3::new(1.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 1.0), Vec3::zeros()))
            .unwrap();
        map
    }

    #[test]
    fn test_add_bone_tracks_depth_and_parent() {
        let map = arm();
        let hand = map.get("hand").unwrap();
        assert_eq!(hand.depth, 2);
        assert_eq!(hand.parent.as_deref(), Some("elbow"));
        assert_eq!(hand.parent_id, map.bone_id("elbow"));
    }

    #[test]
    fn test_default_transform_includes_ancestors() {
        let map = arm();
        let hand = &map.get("hand").unwrap().bone.default_transform;
        assert_relative_eq!(hand[(0, 3)], 3.0);
        assert_relative_eq!(hand[(1, 3)], 1.0);
    }

    #[test]
    fn test_add_bone_rejects_bad_input() {
        let mut map = arm();
        assert_eq!(
            map.add_bone("hand", None, Bone::default()),
            Err(AnimationError::DuplicateBone("hand".to_owned()))
        );
        assert!(matches!(
            map.add_bone("toe", Some("foot"), Bone::default()),
            Err(AnimationError::UnknownParent { .. })
        ));
        assert_eq!(map.add_bone("", None, Bone::default()), Err(AnimationError::EmptyBoneName));
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn test_render_order_sorts_by_depth_then_id() {
        let map = arm();
        let names: Vec<_> = map
            .render_order()
            .into_iter()
            .map(|id| map.get_by_id(id).unwrap().name.as_str())
            .collect();
        assert_eq!(names, vec!["shoulder", "hip", "elbow", "hand"]);
    }

    #[test]
    fn test_single_root() {
        let map = BoneMap::single_root();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(BoneMap::ROOT).unwrap().bone.default_transform, Mat4::identity());
    }
}

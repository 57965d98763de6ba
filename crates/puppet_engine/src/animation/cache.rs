//! Resolved-frame cache
//!
//! Results are keyed by animation path and frame only. Two entities playing
//! the same animation on different skeletons share entries, so one path
//! should always be played on one skeleton layout. Entries are never
//! evicted.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::keyframe::TransformKeyframe;

/// Bone name -> resolved matrix for one frame
pub type FramePose = HashMap<String, TransformKeyframe>;

/// `(path, frame) -> pose` cache shared by every animation
#[derive(Debug, Default)]
pub struct FrameCache {
    entries: RwLock<HashMap<String, HashMap<u32, Arc<FramePose>>>>,
}

impl FrameCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached pose, if any
    pub fn get(&self, path: &str, frame: u32) -> Option<Arc<FramePose>> {
        self.entries
            .read()
            .get(path)
            .and_then(|frames| frames.get(&frame))
            .cloned()
    }

    /// Return the cached pose, computing and storing it on a miss.
    ///
    /// `compute` runs without the cache lock held. If two threads miss at
    /// once, the first stored result wins and both get it.
    pub fn get_or_insert_with(
        &self,
        path: &str,
        frame: u32,
        compute: impl FnOnce() -> FramePose,
    ) -> Arc<FramePose> {
        if let Some(pose) = self.get(path, frame) {
            return pose;
        }

        let pose = Arc::new(compute());
        let mut entries = self.entries.write();
        Arc::clone(
            entries
                .entry(path.to_owned())
                .or_default()
                .entry(frame)
                .or_insert(pose),
        )
    }

    /// Number of cached frames for one path
    pub fn frames_cached(&self, path: &str) -> usize {
        self.entries.read().get(path).map_or(0, HashMap::len)
    }

    /// Total number of cached frames
    pub fn len(&self) -> usize {
        self.entries.read().values().map(HashMap::len).sum()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Mat4;

    fn pose(frame: u32) -> FramePose {
        let mut pose = FramePose::new();
        pose.insert(
            "root".to_owned(),
            TransformKeyframe {
                frame,
                bone_name: "root".to_owned(),
                transform: Mat4::identity(),
            },
        );
        pose
    }

    #[test]
    fn test_second_lookup_does_not_compute() {
        let cache = FrameCache::new();
        let first = cache.get_or_insert_with("walk", 2, || pose(2));
        let second = cache.get_or_insert_with("walk", 2, || panic!("should be cached"));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.frames_cached("walk"), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_paths_are_independent() {
        let cache = FrameCache::new();
        cache.get_or_insert_with("walk", 0, || pose(0));
        cache.get_or_insert_with("run", 0, || pose(0));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("jump", 0).is_none());
    }
}

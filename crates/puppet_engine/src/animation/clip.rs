//! Animation clips and keyframe interpolation
//!
//! For a frame `f` every bone gets one matrix. Each channel (position,
//! scale, rotation) is resolved on its own:
//!
//! 1. a keyframe for the bone at exactly `f` that authors the channel is
//!    used as is;
//! 2. otherwise the sorted keyframe index list is walked backwards and
//!    forwards from `f`, wrapping around, skipping frames where the bone
//!    does not author the channel;
//! 3. if both walks land on the same frame the value is hard set;
//! 4. otherwise the value is tweened using circular frame distances, so a
//!    gap across the loop boundary blends like any other gap;
//! 5. a channel that is never authored falls back to the rest pose (scale
//!    falls back to 1).
//!
//! Locals are then composed down the hierarchy: a bone's matrix is its own
//! local transform followed by every ancestor's resolved local, i.e.
//! `local(bone) * local(parent) * ... * local(root)`.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::cache::{FrameCache, FramePose};
use super::keyframe::{Channel, RawKeyframe, TransformKeyframe};
use super::skeleton::{BoneMap, BoneNode};
use super::AnimationError;
use crate::foundation::math::{create_transformation, lerp, lerp_rotation, Mat4, Vec3};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Backward,
    Forward,
}

/// Immutable keyframe data of one animation
pub struct Animation {
    path: String,
    fps: f32,
    frame_count: u32,
    keyframes: HashMap<u32, Vec<RawKeyframe>>,
    keyframe_indexes: Vec<u32>,
    cache: Option<Arc<FrameCache>>,
    searches: AtomicUsize,
}

impl Animation {
    /// Build an animation from raw keyframes.
    ///
    /// Malformed keyframes are logged and skipped: frames past the end,
    /// empty bone names, keyframes without channels, and a second keyframe
    /// for the same bone in one frame. `cache` may be `None` to resolve
    /// every frame from scratch.
    pub fn new(
        path: impl Into<String>,
        fps: f32,
        frame_count: u32,
        raw: Vec<RawKeyframe>,
        cache: Option<Arc<FrameCache>>,
    ) -> Result<Self, AnimationError> {
        let path = path.into();
        if !fps.is_finite() || fps <= 0.0 {
            return Err(AnimationError::InvalidFps { path, fps });
        }
        if frame_count == 0 {
            return Err(AnimationError::NoFrames(path));
        }

        let mut keyframes: HashMap<u32, Vec<RawKeyframe>> = HashMap::new();
        for key in raw {
            if key.frame >= frame_count {
                log::warn!(
                    "{}: skipping keyframe for '{}' at frame {} (animation has {} frames)",
                    path,
                    key.bone_name,
                    key.frame,
                    frame_count
                );
                continue;
            }
            if key.bone_name.is_empty() {
                log::warn!("{}: skipping keyframe at frame {} with no bone", path, key.frame);
                continue;
            }
            if key.channels().is_empty() {
                log::warn!(
                    "{}: skipping empty keyframe for '{}' at frame {}",
                    path,
                    key.bone_name,
                    key.frame
                );
                continue;
            }

            let frame = keyframes.entry(key.frame).or_default();
            if frame.iter().any(|k| k.bone_name == key.bone_name) {
                log::warn!(
                    "{}: skipping duplicate keyframe for '{}' at frame {}",
                    path,
                    key.bone_name,
                    key.frame
                );
                continue;
            }
            frame.push(key);
        }

        let mut keyframe_indexes: Vec<u32> = keyframes.keys().copied().collect();
        keyframe_indexes.sort_unstable();

        log::debug!(
            "Loaded animation '{}' ({} frames at {} fps, {} keyed frames)",
            path,
            frame_count,
            fps,
            keyframe_indexes.len()
        );

        Ok(Self {
            path,
            fps,
            frame_count,
            keyframes,
            keyframe_indexes,
            cache,
            searches: AtomicUsize::new(0),
        })
    }

    /// Asset path, also the cache key
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Frames per second
    pub fn fps(&self) -> f32 {
        self.fps
    }

    /// Total number of frames
    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Length of one loop in seconds
    pub fn duration(&self) -> f32 {
        self.frame_count as f32 / self.fps
    }

    /// Sorted frames that have at least one keyframe
    pub fn keyframe_indexes(&self) -> &[u32] {
        &self.keyframe_indexes
    }

    /// Keyframes authored at one frame
    pub fn keyframes_at(&self, frame: u32) -> &[RawKeyframe] {
        self.keyframes.get(&frame).map_or(&[], Vec::as_slice)
    }

    /// Number of adjacent-keyframe searches performed so far
    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::Relaxed)
    }

    /// Resolved bone matrices for one frame.
    ///
    /// Frames past the end wrap around. With a cache attached, each
    /// `(path, frame)` is computed once.
    pub fn frame_pose(&self, frame: u32, bones: &BoneMap) -> Arc<FramePose> {
        let frame = frame % self.frame_count;
        match &self.cache {
            Some(cache) => {
                cache.get_or_insert_with(&self.path, frame, || self.compute_pose(frame, bones))
            }
            None => Arc::new(self.compute_pose(frame, bones)),
        }
    }

    /// Resolve one channel of one bone, `None` if the bone never authors it
    pub fn resolve_channel(&self, frame: u32, bone: &str, channel: Channel) -> Option<Vec3> {
        let frame = frame % self.frame_count;

        if let Some(value) = self.value_at(frame, bone, channel) {
            return Some(value);
        }

        let (prev_frame, prev) = self.find_adjacent(frame, bone, channel, Direction::Backward)?;
        let (next_frame, next) = self.find_adjacent(frame, bone, channel, Direction::Forward)?;

        if prev_frame == next_frame {
            return Some(prev);
        }

        let count = self.frame_count;
        let prev_to_next = (next_frame + count - prev_frame) % count;
        let prev_to_current = (frame + count - prev_frame) % count;
        let blend = prev_to_current as f32 / prev_to_next as f32;

        Some(match channel {
            Channel::Rotation => lerp_rotation(&prev, &next, blend),
            Channel::Position | Channel::Scale => lerp(&prev, &next, blend),
        })
    }

    fn compute_pose(&self, frame: u32, bones: &BoneMap) -> FramePose {
        let locals: Vec<Mat4> = bones
            .iter()
            .map(|node| self.local_transform(frame, node))
            .collect();

        // Parents precede children, so each parent's composed matrix is ready
        let mut composed: Vec<Mat4> = Vec::with_capacity(locals.len());
        for (node, local) in bones.iter().zip(&locals) {
            let matrix = match node.parent_id.and_then(|p| composed.get(p)) {
                Some(parent) => local * parent,
                None => *local,
            };
            composed.push(matrix);
        }

        bones
            .iter()
            .zip(composed)
            .map(|(node, transform)| {
                (
                    node.name.clone(),
                    TransformKeyframe {
                        frame,
                        bone_name: node.name.clone(),
                        transform,
                    },
                )
            })
            .collect()
    }

    fn local_transform(&self, frame: u32, node: &BoneNode) -> Mat4 {
        let position = self
            .resolve_channel(frame, &node.name, Channel::Position)
            .unwrap_or(node.bone.offset);
        let scale = self
            .resolve_channel(frame, &node.name, Channel::Scale)
            .unwrap_or_else(|| Vec3::new(1.0, 1.0, 1.0));
        let rotation = self
            .resolve_channel(frame, &node.name, Channel::Rotation)
            .unwrap_or(node.bone.rotation);

        create_transformation(&rotation, &scale, &position)
    }

    fn value_at(&self, frame: u32, bone: &str, channel: Channel) -> Option<Vec3> {
        self.keyframes
            .get(&frame)?
            .iter()
            .find(|k| k.bone_name == bone)
            .and_then(|k| k.value(channel))
    }

    fn find_adjacent(
        &self,
        frame: u32,
        bone: &str,
        channel: Channel,
        direction: Direction,
    ) -> Option<(u32, Vec3)> {
        self.searches.fetch_add(1, Ordering::Relaxed);

        let indexes = &self.keyframe_indexes;
        let len = indexes.len();
        if len == 0 {
            return None;
        }

        let start = match direction {
            Direction::Backward => indexes
                .partition_point(|&k| k < frame)
                .checked_sub(1)
                .unwrap_or(len - 1),
            Direction::Forward => {
                let after = indexes.partition_point(|&k| k <= frame);
                if after == len {
                    0
                } else {
                    after
                }
            }
        };

        (0..len)
            .map(|step| match direction {
                Direction::Backward => (start + len - step) % len,
                Direction::Forward => (start + step) % len,
            })
            .find_map(|position| {
                let key_frame = indexes[position];
                self.value_at(key_frame, bone, channel)
                    .map(|value| (key_frame, value))
            })
    }
}

impl fmt::Debug for Animation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Animation")
            .field("path", &self.path)
            .field("fps", &self.fps)
            .field("frame_count", &self.frame_count)
            .field("keyframe_indexes", &self.keyframe_indexes)
            .finish()
    }
}

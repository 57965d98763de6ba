//! Skeletal animation
//!
//! Turns sparse, per-bone keyframes into one matrix per bone for any frame
//! of an animation:
//! - [`skeleton`]: bones and bone maps (rest pose, parenting, render order)
//! - [`keyframe`]: authored keyframes and resolved transform keyframes
//! - [`clip`]: the interpolation engine
//! - [`cache`]: process-lifetime `(path, frame)` result cache
//! - [`animator`]: per-entity playback state
//! - [`catalogue`]: named animations loaded from an asset source

pub mod animator;
pub mod cache;
pub mod catalogue;
pub mod clip;
pub mod keyframe;
pub mod skeleton;

pub use animator::{Animator, BoneAnimator, DefaultAnimator, PlayMode};
pub use cache::{FrameCache, FramePose};
pub use catalogue::AnimationCatalogue;
pub use clip::Animation;
pub use keyframe::{Channel, KeyframeChannels, RawKeyframe, TransformKeyframe};
pub use skeleton::{Bone, BoneId, BoneMap, BoneNode};

use thiserror::Error;

/// Animation and skeleton errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnimationError {
    /// Frames per second must be positive and finite
    #[error("Animation '{path}' has invalid fps {fps}")]
    InvalidFps {
        /// Animation path
        path: String,
        /// Offending value
        fps: f32,
    },

    /// An animation needs at least one frame
    #[error("Animation '{0}' has no frames")]
    NoFrames(String),

    /// Bone added under a parent that is not in the map yet
    #[error("Bone '{bone}' references unknown parent '{parent}'")]
    UnknownParent {
        /// Bone being added
        bone: String,
        /// Missing parent
        parent: String,
    },

    /// Bone name already used in this map
    #[error("Bone '{0}' already exists")]
    DuplicateBone(String),

    /// Bone names must not be empty
    #[error("Bone name is empty")]
    EmptyBoneName,

    /// No animation with this path in the catalogue
    #[error("Unknown animation '{0}'")]
    UnknownAnimation(String),
}

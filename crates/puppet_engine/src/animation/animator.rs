//! Playback drivers
//!
//! A [`BoneAnimator`] owns the per-entity playback state and produces the
//! bone name -> matrix map the animation component copies into its rows.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::clip::Animation;
use super::skeleton::BoneMap;
use crate::foundation::math::Mat4;

/// Per-entity playback driver
pub trait BoneAnimator: Send + fmt::Debug {
    /// Advance playback by `delta` seconds and recompute bone matrices
    fn update(&mut self, delta: f32, bones: &BoneMap);

    /// Jump to a frame; takes effect on the next update
    fn set_current_frame(&mut self, frame: u32);

    /// Matrix of one bone after the last update
    fn bone_transform(&self, bone: &str) -> Option<Mat4>;

    /// Name of what is playing
    fn name(&self) -> &str;

    /// True once a single-loop playback has completed
    fn finished(&self) -> bool {
        false
    }
}

/// Rest pose driver used until a real animator is attached
#[derive(Debug, Default)]
pub struct DefaultAnimator {
    transforms: HashMap<String, Mat4>,
}

impl DefaultAnimator {
    /// Create a driver with no pose computed yet
    pub fn new() -> Self {
        Self::default()
    }
}

impl BoneAnimator for DefaultAnimator {
    fn update(&mut self, _delta: f32, bones: &BoneMap) {
        self.transforms.clear();
        for node in bones.iter() {
            self.transforms
                .insert(node.name.clone(), node.bone.default_transform);
        }
    }

    fn set_current_frame(&mut self, _frame: u32) {}

    fn bone_transform(&self, bone: &str) -> Option<Mat4> {
        self.transforms.get(bone).copied()
    }

    fn name(&self) -> &str {
        "default"
    }
}

/// How an animator behaves at the end of the clip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayMode {
    /// Loop forever
    #[default]
    Endless,
    /// Stop (keeping the last pose) when playback wraps to frame 0
    SingleLoop,
}

/// Plays one [`Animation`]
#[derive(Debug)]
pub struct Animator {
    animation: Arc<Animation>,
    sequence_time: f32,
    mode: PlayMode,
    played_one_frame: bool,
    finished: bool,
    current_frame: Option<u32>,
    transforms: HashMap<String, Mat4>,
}

impl Animator {
    /// Loop `animation` endlessly from frame 0
    pub fn new(animation: Arc<Animation>) -> Self {
        Self::with_mode(animation, PlayMode::Endless)
    }

    /// Play `animation` with the given mode
    pub fn with_mode(animation: Arc<Animation>, mode: PlayMode) -> Self {
        Self {
            animation,
            sequence_time: 0.0,
            mode,
            played_one_frame: false,
            finished: false,
            current_frame: None,
            transforms: HashMap::new(),
        }
    }

    /// Change the play mode
    pub fn set_mode(&mut self, mode: PlayMode) {
        self.mode = mode;
    }

    /// Seconds into the current loop
    pub fn sequence_time(&self) -> f32 {
        self.sequence_time
    }

    /// Length of one loop in seconds
    pub fn sequence_duration(&self) -> f32 {
        self.animation.duration()
    }

    /// Frame resolved by the last update
    pub fn current_frame(&self) -> Option<u32> {
        self.current_frame
    }

    /// Clip being played
    pub fn animation(&self) -> &Arc<Animation> {
        &self.animation
    }

    /// Every bone matrix from the last update
    pub fn bone_transforms(&self) -> &HashMap<String, Mat4> {
        &self.transforms
    }

    fn frame_for_time(&self) -> u32 {
        let frame = (self.sequence_time * self.animation.fps()).floor() as u32;
        frame % self.animation.frame_count()
    }
}

impl BoneAnimator for Animator {
    fn update(&mut self, delta: f32, bones: &BoneMap) {
        if self.finished {
            return;
        }

        let duration = self.sequence_duration();
        self.sequence_time = (self.sequence_time + delta).rem_euclid(duration);
        let frame = self.frame_for_time();

        if self.mode == PlayMode::SingleLoop && self.played_one_frame && frame == 0 {
            self.finished = true;
            log::debug!("Animation '{}' finished", self.animation.path());
            return;
        }
        self.played_one_frame |= frame > 1;

        let pose = self.animation.frame_pose(frame, bones);
        self.transforms.clear();
        self.transforms.extend(
            pose.iter()
                .map(|(name, keyframe)| (name.clone(), keyframe.transform)),
        );
        self.current_frame = Some(frame);
    }

    fn set_current_frame(&mut self, frame: u32) {
        let frame = frame % self.animation.frame_count();
        self.sequence_time = (frame as f32 / self.animation.fps())
            .rem_euclid(self.sequence_duration());
    }

    fn bone_transform(&self, bone: &str) -> Option<Mat4> {
        self.transforms.get(bone).copied()
    }

    fn name(&self) -> &str {
        self.animation.path()
    }

    fn finished(&self) -> bool {
        self.finished
    }
}

//! Keyframe types

use bitflags::bitflags;

use crate::foundation::math::{Mat4, Vec3};

bitflags! {
    /// Channels authored by a raw keyframe
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct KeyframeChannels: u8 {
        /// Translation
        const POSITION = 0b001;
        /// Scale
        const SCALE = 0b010;
        /// Euler rotation
        const ROTATION = 0b100;
    }
}

/// One transform channel of a bone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Translation
    Position,
    /// Scale
    Scale,
    /// Euler rotation in degrees
    Rotation,
}

/// Authored values for one bone at one frame.
///
/// A `None` channel was not authored here and gets interpolated.
#[derive(Debug, Clone, PartialEq)]
pub struct RawKeyframe {
    /// Frame index
    pub frame: u32,
    /// Bone the values apply to
    pub bone_name: String,
    /// Translation
    pub position: Option<Vec3>,
    /// Scale
    pub scale: Option<Vec3>,
    /// Euler rotation in degrees
    pub rotation: Option<Vec3>,
}

impl RawKeyframe {
    /// Keyframe with no channels yet
    pub fn new(frame: u32, bone_name: impl Into<String>) -> Self {
        Self {
            frame,
            bone_name: bone_name.into(),
            position: None,
            scale: None,
            rotation: None,
        }
    }

    /// Set the position channel
    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = Some(position);
        self
    }

    /// Set the scale channel
    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = Some(scale);
        self
    }

    /// Set the rotation channel
    pub fn with_rotation(mut self, rotation: Vec3) -> Self {
        self.rotation = Some(rotation);
        self
    }

    /// Authored channels
    pub fn channels(&self) -> KeyframeChannels {
        let mut channels = KeyframeChannels::empty();
        channels.set(KeyframeChannels::POSITION, self.position.is_some());
        channels.set(KeyframeChannels::SCALE, self.scale.is_some());
        channels.set(KeyframeChannels::ROTATION, self.rotation.is_some());
        channels
    }

    /// Value of one channel, if authored
    pub fn value(&self, channel: Channel) -> Option<Vec3> {
        match channel {
            Channel::Position => self.position,
            Channel::Scale => self.scale,
            Channel::Rotation => self.rotation,
        }
    }
}

/// Resolved matrix of one bone at one frame
#[derive(Debug, Clone, PartialEq)]
pub struct TransformKeyframe {
    /// Frame index
    pub frame: u32,
    /// Bone name
    pub bone_name: String,
    /// Bone matrix after tweening and hierarchy composition
    pub transform: Mat4,
}

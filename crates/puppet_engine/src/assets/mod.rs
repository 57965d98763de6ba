//! Asset collaborator interface
//!
//! Archive parsing lives outside the engine. Sources hand over already
//! parsed animation sets and skeletons as the serde data types below;
//! [`FileAnimationSource`] reads them from RON files and
//! [`InMemoryAnimationSource`] serves them from memory.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

use crate::animation::{Bone, BoneMap, RawKeyframe};
use crate::foundation::math::Vec3;

/// Asset loading errors
#[derive(Error, Debug)]
pub enum AssetError {
    /// Asset not found
    #[error("Asset not found: {0}")]
    NotFound(String),

    /// Invalid asset data
    #[error("Invalid data in {path}: {message}")]
    InvalidData {
        /// Asset path
        path: String,
        /// Parser message
        message: String,
    },

    /// IO error during asset loading
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

fn one() -> [f32; 3] {
    [1.0, 1.0, 1.0]
}

/// One authored keyframe as stored in asset files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyframeData {
    /// Frame index
    pub frame: u32,
    /// Bone name
    pub bone: String,
    /// Translation
    #[serde(default)]
    pub position: Option<[f32; 3]>,
    /// Scale
    #[serde(default)]
    pub scale: Option<[f32; 3]>,
    /// Euler rotation in degrees
    #[serde(default)]
    pub rotation: Option<[f32; 3]>,
}

impl From<&KeyframeData> for RawKeyframe {
    fn from(data: &KeyframeData) -> Self {
        RawKeyframe {
            frame: data.frame,
            bone_name: data.bone.clone(),
            position: data.position.map(Vec3::from),
            scale: data.scale.map(Vec3::from),
            rotation: data.rotation.map(Vec3::from),
        }
    }
}

/// One animation of an animation set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationData {
    /// Path the animation is registered under
    pub path: String,
    /// Frames per second
    pub fps: f32,
    /// Total frame count
    pub frame_count: u32,
    /// Authored keyframes, any order
    #[serde(default)]
    pub keyframes: Vec<KeyframeData>,
}

impl AnimationData {
    /// Keyframes in engine form
    pub fn raw_keyframes(&self) -> Vec<RawKeyframe> {
        self.keyframes.iter().map(RawKeyframe::from).collect()
    }
}

/// One bone of a skeleton asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoneData {
    /// Unique name
    pub name: String,
    /// Parent bone, `None` for roots
    #[serde(default)]
    pub parent: Option<String>,
    /// Local translation
    #[serde(default)]
    pub offset: [f32; 3],
    /// Local scale
    #[serde(default = "one")]
    pub scale: [f32; 3],
    /// Local Euler rotation in degrees
    #[serde(default)]
    pub rotation: [f32; 3],
}

/// Skeleton asset; bones may be listed in any order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoneMapData {
    /// Bones
    pub bones: Vec<BoneData>,
}

impl BoneMapData {
    /// Build the engine skeleton, adding each bone once its parent is in.
    ///
    /// Bones that cannot be added (missing or circular parent, duplicate or
    /// empty name) are logged and skipped.
    pub fn build(&self) -> BoneMap {
        let mut map = BoneMap::new();
        let mut pending: Vec<&BoneData> = self.bones.iter().collect();

        loop {
            let before = pending.len();
            pending.retain(|data| {
                let ready = data
                    .parent
                    .as_deref()
                    .map_or(true, |parent| map.get(parent).is_some());
                if !ready {
                    return true;
                }
                let bone = Bone::new(
                    Vec3::from(data.offset),
                    Vec3::from(data.scale),
                    Vec3::from(data.rotation),
                );
                if let Err(e) = map.add_bone(&data.name, data.parent.as_deref(), bone) {
                    log::warn!("Skipping bone '{}': {}", data.name, e);
                }
                false
            });
            if pending.is_empty() || pending.len() == before {
                break;
            }
        }

        for data in pending {
            log::warn!(
                "Skipping bone '{}': parent '{}' is missing or circular",
                data.name,
                data.parent.as_deref().unwrap_or_default()
            );
        }
        map
    }
}

/// Supplier of parsed animation sets
pub trait AnimationSource: Send + Sync {
    /// Load every animation stored under `path`
    fn load_animation_set(&self, path: &str) -> Result<Vec<AnimationData>, AssetError>;
}

/// Animation sets registered in memory
#[derive(Debug, Default)]
pub struct InMemoryAnimationSource {
    sets: RwLock<HashMap<String, Vec<AnimationData>>>,
}

impl InMemoryAnimationSource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an animation set
    pub fn insert(&self, path: impl Into<String>, animations: Vec<AnimationData>) {
        self.sets.write().insert(path.into(), animations);
    }

    /// Register an animation set written in RON
    pub fn insert_ron(&self, path: &str, text: &str) -> Result<(), AssetError> {
        let animations = parse_animation_set(path, text)?;
        self.insert(path, animations);
        Ok(())
    }
}

impl AnimationSource for InMemoryAnimationSource {
    fn load_animation_set(&self, path: &str) -> Result<Vec<AnimationData>, AssetError> {
        self.sets
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| AssetError::NotFound(path.to_owned()))
    }
}

/// Animation sets stored as RON files below a list of search paths
#[derive(Debug, Clone, Default)]
pub struct FileAnimationSource {
    search_paths: Vec<PathBuf>,
}

impl FileAnimationSource {
    /// Search `paths` in order
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    fn locate(&self, path: &str) -> Option<PathBuf> {
        self.search_paths
            .iter()
            .map(|root| root.join(path))
            .chain(std::iter::once(PathBuf::from(path)))
            .find(|candidate| candidate.exists())
    }
}

impl AnimationSource for FileAnimationSource {
    fn load_animation_set(&self, path: &str) -> Result<Vec<AnimationData>, AssetError> {
        let file = self
            .locate(path)
            .ok_or_else(|| AssetError::NotFound(path.to_owned()))?;
        let text = fs::read_to_string(&file)?;
        parse_animation_set(path, &text)
    }
}

/// Parse a RON animation set (a list of [`AnimationData`])
pub fn parse_animation_set(path: &str, text: &str) -> Result<Vec<AnimationData>, AssetError> {
    ron::from_str(text).map_err(|e| AssetError::InvalidData {
        path: path.to_owned(),
        message: e.to_string(),
    })
}

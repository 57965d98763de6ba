//! Named animations loaded from an asset source

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::animator::{Animator, BoneAnimator, PlayMode};
use super::cache::FrameCache;
use super::clip::Animation;
use super::keyframe::RawKeyframe;
use super::skeleton::BoneMap;
use super::AnimationError;
use crate::assets::AnimationSource;
use crate::foundation::time::Stopwatch;

/// Path -> animation registry handing out fresh animators
pub struct AnimationCatalogue {
    source: Option<Arc<dyn AnimationSource>>,
    animations: RwLock<HashMap<String, Arc<Animation>>>,
    cache: Option<Arc<FrameCache>>,
}

impl AnimationCatalogue {
    /// Catalogue backed by an asset source.
    ///
    /// With `cache_frames` every animation built here shares one frame
    /// cache.
    pub fn new(source: Arc<dyn AnimationSource>, cache_frames: bool) -> Self {
        Self {
            source: Some(source),
            ..Self::empty(cache_frames)
        }
    }

    /// Catalogue without a source; animations are added with
    /// [`AnimationCatalogue::build`] or [`AnimationCatalogue::insert`]
    pub fn empty(cache_frames: bool) -> Self {
        Self {
            source: None,
            animations: RwLock::new(HashMap::new()),
            cache: cache_frames.then(|| Arc::new(FrameCache::new())),
        }
    }

    /// Load an animation set from the source.
    ///
    /// Animations that fail validation are logged and skipped. Returns
    /// false when the set could not be read or nothing in it was usable.
    pub fn load(&self, path: &str) -> bool {
        let Some(source) = &self.source else {
            log::error!("Cannot load '{}': catalogue has no animation source", path);
            return false;
        };

        let set = match source.load_animation_set(path) {
            Ok(set) => set,
            Err(e) => {
                log::error!("Failed to load animation set '{}': {}", path, e);
                return false;
            }
        };

        let mut loaded = 0;
        for data in set {
            match self.build(&data.path, data.fps, data.frame_count, data.raw_keyframes()) {
                Ok(_) => loaded += 1,
                Err(e) => log::warn!("Skipping animation in '{}': {}", path, e),
            }
        }

        log::info!("Loaded {} animation(s) from '{}'", loaded, path);
        loaded > 0
    }

    /// Build an animation with this catalogue's cache and register it
    pub fn build(
        &self,
        path: &str,
        fps: f32,
        frame_count: u32,
        keyframes: Vec<RawKeyframe>,
    ) -> Result<Arc<Animation>, AnimationError> {
        let animation = Animation::new(path, fps, frame_count, keyframes, self.cache.clone())?;
        Ok(self.insert(animation))
    }

    /// Register an already built animation under its path
    pub fn insert(&self, animation: Animation) -> Arc<Animation> {
        let animation = Arc::new(animation);
        let previous = self
            .animations
            .write()
            .insert(animation.path().to_owned(), Arc::clone(&animation));
        if previous.is_some() {
            log::debug!("Replaced animation '{}'", animation.path());
        }
        animation
    }

    /// True if an animation is registered under `path`
    pub fn contains(&self, path: &str) -> bool {
        self.animations.read().contains_key(path)
    }

    /// Registered animation data
    pub fn animation(&self, path: &str) -> Option<Arc<Animation>> {
        self.animations.read().get(path).cloned()
    }

    /// New looping animator for `path`
    pub fn get(&self, path: &str) -> Option<Box<dyn BoneAnimator>> {
        self.get_with_mode(path, PlayMode::Endless)
    }

    /// New animator for `path` with a play mode
    pub fn get_with_mode(&self, path: &str, mode: PlayMode) -> Option<Box<dyn BoneAnimator>> {
        match self.animation(path) {
            Some(animation) => Some(Box::new(Animator::with_mode(animation, mode))),
            None => {
                log::warn!("Unknown animation '{}'", path);
                None
            }
        }
    }

    /// Resolve and cache every frame of `path` for `bones`.
    /// Returns the number of frames resolved.
    pub fn preload(&self, path: &str, bones: &BoneMap) -> Result<u32, AnimationError> {
        let animation = self
            .animation(path)
            .ok_or_else(|| AnimationError::UnknownAnimation(path.to_owned()))?;
        let stopwatch = Stopwatch::start_new();
        for frame in 0..animation.frame_count() {
            animation.frame_pose(frame, bones);
        }
        log::debug!(
            "Preloaded '{}' ({} frames) in {:.2} ms",
            path,
            animation.frame_count(),
            stopwatch.elapsed_millis()
        );
        Ok(animation.frame_count())
    }

    /// Registered paths, sorted
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.animations.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Number of registered animations
    pub fn len(&self) -> usize {
        self.animations.read().len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.animations.read().is_empty()
    }

    /// Shared frame cache, if caching is enabled
    pub fn cache(&self) -> Option<&Arc<FrameCache>> {
        self.cache.as_ref()
    }
}

impl fmt::Debug for AnimationCatalogue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnimationCatalogue")
            .field("animations", &self.paths())
            .field("caching", &self.cache.is_some())
            .finish()
    }
}

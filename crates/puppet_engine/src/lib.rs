//! # Puppet Engine
//!
//! The frame core of a real-time engine: a publish/subscribe entity
//! pipeline and a skeletal animation engine.
//!
//! ## Features
//!
//! - **Message broker**: named topics, synchronous delivery, type-erased payloads
//! - **Pipeline**: dense per-entity data stores kept in step with an entity directory
//! - **Object components**: AI, actions, positioning, physics and animation run in a fixed order
//! - **Skeletal animation**: sparse keyframes interpolated per bone, composed up the hierarchy and cached
//! - **Value references**: lazily resolved transforms that never dangle
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use puppet_engine::prelude::*;
//!
//! struct MyApp;
//!
//! impl Application for MyApp {
//!     fn initialize(&mut self, engine: &mut Engine) -> Result<(), AppError> {
//!         let id = engine.spawn();
//!         engine.broker().publish_event(
//!             topics::SET_ENTITY_POSITION,
//!             VectorEvent { id, value: Vec3::new(0.0, 1.0, 0.0) },
//!         );
//!         Ok(())
//!     }
//!
//!     fn update(&mut self, _engine: &mut Engine, _delta_time: f32) -> Result<(), AppError> {
//!         Ok(())
//!     }
//!
//!     fn cleanup(&mut self, _engine: &mut Engine) {}
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig {
//!         max_frames: Some(60),
//!         ..EngineConfig::default()
//!     };
//!     Engine::run(config, &mut MyApp)?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod animation;
pub mod assets;
pub mod config;
pub mod ecs;
pub mod events;
pub mod foundation;
pub mod pipeline;

mod application;
mod engine;

pub use application::{AppError, Application};
pub use engine::{
    AiConfig, AnimationConfig, AssetConfig, Engine, EngineConfig, EngineError, LoggingConfig,
    PositionConfig,
};

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        animation::{
            AnimationCatalogue, Animator, Bone, BoneAnimator, BoneMap, PlayMode, RawKeyframe,
        },
        assets::{AnimationData, AnimationSource, InMemoryAnimationSource},
        config::Config,
        ecs::{
            components::Model,
            systems::{Behavior, EntityAction, WanderBehavior},
            EntityId, ValueReference,
        },
        events::{
            topics::{
                self, ActionEvent, AnimatorEvent, AttachEvent, BehaviorEvent, BoneMapEvent,
                BoneTransformsEvent, EntityEvent, MatricesEvent, ModelEvent, VectorEvent,
            },
            MessageBroker,
        },
        foundation::{
            math::{Mat4, Vec3},
            time::{Stopwatch, Timer},
        },
        pipeline::{Pipeline, PipelineError, RenderBackend, RenderFrame},
        AppError, Application, Engine, EngineConfig, EngineError,
    };
}

//! Core engine implementation

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::{
    animation::AnimationCatalogue,
    application::{AppError, Application},
    assets::{AnimationSource, FileAnimationSource},
    config::Config,
    ecs::entity::EntityId,
    events::{topics, MessageBroker},
    foundation::{logging, time::Timer},
    pipeline::{Pipeline, PipelineConfig, PipelineError},
};

/// Main engine struct
///
/// The engine owns the broker, the standard pipeline and the animation
/// catalogue, and drives the frame loop.
pub struct Engine {
    broker: Arc<MessageBroker>,
    pipeline: Pipeline,
    catalogue: Arc<AnimationCatalogue>,
    timer: Timer,
    config: EngineConfig,
    running: bool,
}

impl Engine {
    /// Create a new engine instance, loading animations from the configured search paths
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let source: Option<Arc<dyn AnimationSource>> = if config.assets.search_paths.is_empty() {
            None
        } else {
            Some(Arc::new(FileAnimationSource::new(
                config.assets.search_paths.clone(),
            )))
        };
        Self::with_source(config, source)
    }

    /// Create a new engine instance with an explicit animation source
    pub fn with_source(
        config: EngineConfig,
        source: Option<Arc<dyn AnimationSource>>,
    ) -> Result<Self, EngineError> {
        logging::init_with_filter(&config.logging.filter);
        log::info!("Initializing engine...");

        let broker = MessageBroker::shared();
        let catalogue = Arc::new(match source {
            Some(source) => AnimationCatalogue::new(source, config.animation.cache_frames),
            None => AnimationCatalogue::empty(config.animation.cache_frames),
        });
        let pipeline = Pipeline::standard(Arc::clone(&broker), &config, Some(Arc::clone(&catalogue)))
            .map_err(|e| EngineError::InitializationFailed(format!("Pipeline: {}", e)))?;
        let timer = match config.fixed_delta {
            Some(delta) => Timer::fixed(delta),
            None => Timer::new(),
        };

        Ok(Self {
            broker,
            pipeline,
            catalogue,
            timer,
            config,
            running: true,
        })
    }

    /// Run the engine main loop with the given application
    pub fn run<T: Application>(config: EngineConfig, app: &mut T) -> Result<(), EngineError> {
        let mut engine = Self::new(config)?;
        engine.run_app(app)
    }

    /// Run the main loop on an already constructed engine
    pub fn run_app<T: Application>(&mut self, app: &mut T) -> Result<(), EngineError> {
        app.initialize(self)
            .map_err(|e| EngineError::ApplicationError(format!("App initialization: {}", e)))?;

        log::info!("Starting main loop...");

        let result = self.main_loop(app);

        app.cleanup(self);
        self.pipeline.tear_down();

        log::info!(
            "Engine shutdown complete after {} frames ({:.1} fps)",
            self.timer.frame_count(),
            self.timer.average_fps()
        );
        result
    }

    fn main_loop<T: Application>(&mut self, app: &mut T) -> Result<(), EngineError> {
        while self.running {
            self.timer.update();
            let delta_time = self.timer.delta_time();

            app.update(self, delta_time)
                .map_err(|e| EngineError::ApplicationError(format!("App update: {}", e)))?;

            self.update(delta_time)?;

            app.render(self)
                .map_err(|e| EngineError::ApplicationError(format!("App render: {}", e)))?;

            if let Some(max_frames) = self.config.max_frames {
                if self.pipeline.frame() >= max_frames {
                    log::info!("Reached frame limit {}", max_frames);
                    self.running = false;
                }
            }
        }
        Ok(())
    }

    /// Run one pipeline frame
    pub fn update(&mut self, delta_time: f32) -> Result<(), EngineError> {
        self.pipeline.update(delta_time)?;
        Ok(())
    }

    /// Render the current frame
    pub fn render(&mut self) -> Result<(), AppError> {
        self.pipeline
            .render()
            .map_err(|e| AppError::Custom(format!("Render error: {}", e)))
    }

    /// Create an entity through the pipeline topics
    pub fn spawn(&self) -> EntityId {
        let id = EntityId::new();
        self.broker
            .publish_event(topics::ADD_ENTITY, topics::EntityEvent { id });
        id
    }

    /// Remove an entity through the pipeline topics
    pub fn despawn(&self, id: EntityId) {
        self.broker
            .publish_event(topics::REMOVE_ENTITY, topics::EntityEvent { id });
    }

    /// Request engine shutdown
    pub fn quit(&mut self) {
        log::info!("Engine shutdown requested");
        self.running = false;
    }

    /// True until `quit` or the frame limit
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// The message broker
    pub fn broker(&self) -> &Arc<MessageBroker> {
        &self.broker
    }

    /// The pipeline
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Mutable access to the pipeline
    pub fn pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.pipeline
    }

    /// Animation catalogue shared with the action component
    pub fn catalogue(&self) -> &Arc<AnimationCatalogue> {
        &self.catalogue
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get the current frame delta time
    pub fn delta_time(&self) -> f32 {
        self.timer.delta_time()
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `env_logger` filter; `RUST_LOG` still wins
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// Animation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    /// Cache resolved poses per (animation, frame)
    pub cache_frames: bool,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self { cache_frames: true }
    }
}

/// Position component configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionConfig {
    /// Queued changes applied per frame; 0 is unlimited
    pub max_updates_per_frame: usize,
}

/// AI configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Seed of the behavior random source
    pub seed: u64,
    /// Wander walking speed in units per second
    pub wander_speed: f32,
    /// Wander target radius
    pub wander_radius: f32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            seed: 0x5eed,
            wander_speed: 8.0,
            wander_radius: 64.0,
        }
    }
}

/// Asset system configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    /// Animation search paths
    pub search_paths: Vec<PathBuf>,
}

/// Engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Pipeline configuration
    pub pipeline: PipelineConfig,

    /// Animation configuration
    pub animation: AnimationConfig,

    /// Position component configuration
    pub position: PositionConfig,

    /// AI configuration
    pub ai: AiConfig,

    /// Asset system configuration
    pub assets: AssetConfig,

    /// Stop after this many frames
    pub max_frames: Option<u64>,

    /// Use a constant frame time instead of the wall clock
    pub fixed_delta: Option<f32>,
}

impl Config for EngineConfig {}

/// Engine-level errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// Initialization error
    #[error("Engine initialization failed: {0}")]
    InitializationFailed(String),

    /// A frame failed
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Application error
    #[error("Application error: {0}")]
    ApplicationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::config::ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFormat;

    #[derive(Default)]
    struct CountingApp {
        initialized: bool,
        updates: u32,
        cleaned_up: bool,
        spawned: Option<EntityId>,
    }

    impl Application for CountingApp {
        fn initialize(&mut self, engine: &mut Engine) -> Result<(), AppError> {
            self.initialized = true;
            self.spawned = Some(engine.spawn());
            Ok(())
        }

        fn update(&mut self, _engine: &mut Engine, delta_time: f32) -> Result<(), AppError> {
            assert!((delta_time - 0.25).abs() < f32::EPSILON);
            self.updates += 1;
            Ok(())
        }

        fn cleanup(&mut self, engine: &mut Engine) {
            self.cleaned_up = true;
            assert_eq!(engine.pipeline().entity_count(), 1);
        }
    }

    fn headless(max_frames: u64) -> EngineConfig {
        EngineConfig {
            max_frames: Some(max_frames),
            fixed_delta: Some(0.25),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let text = "max_frames = 10\n[ai]\nseed = 7\n";
        let config = EngineConfig::from_str_with_format(text, ConfigFormat::Toml).unwrap();
        assert_eq!(config.max_frames, Some(10));
        assert_eq!(config.ai.seed, 7);
        assert_eq!(config.ai.wander_radius, AiConfig::default().wander_radius);
        assert!(config.pipeline.defer_removals);
        assert!(config.animation.cache_frames);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_run_stops_at_frame_limit() {
        let mut app = CountingApp::default();
        Engine::run(headless(5), &mut app).unwrap();
        assert!(app.initialized);
        assert!(app.cleaned_up);
        assert_eq!(app.updates, 5);
        assert!(app.spawned.is_some());
    }

    #[test]
    fn test_quit_ends_the_loop() {
        struct QuitAfterTwo(u32);

        impl Application for QuitAfterTwo {
            fn initialize(&mut self, _engine: &mut Engine) -> Result<(), AppError> {
                Ok(())
            }

            fn update(&mut self, engine: &mut Engine, _delta_time: f32) -> Result<(), AppError> {
                self.0 += 1;
                if self.0 == 2 {
                    engine.quit();
                }
                Ok(())
            }

            fn cleanup(&mut self, _engine: &mut Engine) {}
        }

        let mut app = QuitAfterTwo(0);
        Engine::run(headless(100), &mut app).unwrap();
        assert_eq!(app.0, 2);
    }

    #[test]
    fn test_app_error_aborts_run() {
        struct Failing;

        impl Application for Failing {
            fn initialize(&mut self, _engine: &mut Engine) -> Result<(), AppError> {
                Ok(())
            }

            fn update(&mut self, _engine: &mut Engine, _delta_time: f32) -> Result<(), AppError> {
                Err(AppError::GameLogic("boom".to_owned()))
            }

            fn cleanup(&mut self, _engine: &mut Engine) {}
        }

        let result = Engine::run(headless(3), &mut Failing);
        assert!(matches!(result, Err(EngineError::ApplicationError(_))));
    }
}

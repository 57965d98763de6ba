//! Headless puppet demo
//!
//! A few walkers wander around playing a looping walk cycle, one carries a
//! sword attached to its right hand, a patch of grass is drawn instanced
//! around the origin, and a drifter is pushed to random spots from a
//! background thread. Frames go to the logging render backend.
//!
//! Usage: `puppet_demo [config.toml|config.ron]`

use puppet_engine::animation::AnimationError;
use puppet_engine::assets::AssetError;
use puppet_engine::config::ConfigError;
use puppet_engine::pipeline::LoggingBackend;
use puppet_engine::prelude::*;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

const WALKERS: usize = 4;
const DESPAWN_FRAME: u64 = 90;
const REPORT_EVERY: u64 = 60;
const ANIMATION_SET: &str = "sets/humanoid";
const WALK: &str = "humanoid/walk";

const HUMANOID_ANIMATIONS: &str = r#"[
    (
        path: "humanoid/walk",
        fps: 12.0,
        frame_count: 24,
        keyframes: [
            (frame: 0, bone: "left_hand", rotation: Some((30.0, 0.0, 0.0))),
            (frame: 12, bone: "left_hand", rotation: Some((-30.0, 0.0, 0.0))),
            (frame: 0, bone: "right_hand", rotation: Some((-30.0, 0.0, 0.0))),
            (frame: 12, bone: "right_hand", rotation: Some((30.0, 0.0, 0.0))),
            (frame: 6, bone: "body", position: Some((0.0, 1.1, 0.0))),
            (frame: 18, bone: "body", position: Some((0.0, 0.9, 0.0))),
        ],
    ),
    (
        path: "humanoid/wave",
        fps: 12.0,
        frame_count: 12,
        keyframes: [
            (frame: 0, bone: "right_hand", rotation: Some((0.0, 0.0, 0.0))),
            (frame: 6, bone: "right_hand", rotation: Some((0.0, 0.0, 120.0))),
        ],
    ),
]"#;

#[derive(Error, Debug)]
enum DemoError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Asset(#[from] AssetError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

fn humanoid() -> Result<BoneMap, AnimationError> {
    let mut bones = BoneMap::new();
    let unit = Vec3::new(1.0, 1.0, 1.0);
    bones.add_bone("root", None, Bone::default())?;
    bones.add_bone("body", Some("root"), Bone::new(Vec3::new(0.0, 1.0, 0.0), unit, Vec3::zeros()))?;
    bones.add_bone("head", Some("body"), Bone::new(Vec3::new(0.0, 0.8, 0.0), unit, Vec3::zeros()))?;
    bones.add_bone(
        "left_hand",
        Some("body"),
        Bone::new(Vec3::new(-0.5, 0.3, 0.0), unit, Vec3::zeros()),
    )?;
    bones.add_bone(
        "right_hand",
        Some("body"),
        Bone::new(Vec3::new(0.5, 0.3, 0.0), unit, Vec3::zeros()),
    )?;
    Ok(bones)
}

/// Publishes random positions for one entity until stopped
struct Drifter {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<usize>,
}

impl Drifter {
    fn start(broker: Arc<MessageBroker>, id: EntityId) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            let mut rng = rand::thread_rng();
            let mut sent = 0;
            while !flag.load(Ordering::Relaxed) {
                let value = Vec3::new(rng.gen_range(-20.0..20.0), 0.0, rng.gen_range(-20.0..20.0));
                broker.publish_event(topics::SET_ENTITY_POSITION, VectorEvent { id, value });
                sent += 1;
                thread::sleep(Duration::from_millis(5));
            }
            sent
        });
        Self { stop, handle }
    }

    fn stop(self) -> usize {
        self.stop.store(true, Ordering::Relaxed);
        self.handle.join().unwrap_or_else(|_| {
            log::error!("Drifter thread panicked");
            0
        })
    }
}

#[derive(Default)]
struct PuppetDemo {
    walkers: Vec<EntityId>,
    sword: Option<EntityId>,
    drifter: Option<Drifter>,
    transform_events: Arc<AtomicUsize>,
}

impl PuppetDemo {
    fn spawn_walker(&mut self, engine: &Engine, bones: &BoneMap, index: usize) {
        let broker = engine.broker();
        let id = engine.spawn();

        broker.publish_event(
            topics::SET_BONE_MAP,
            BoneMapEvent { id, bone_map: bones.clone() },
        );
        broker.publish_event(
            topics::ADD_MODEL,
            ModelEvent { id, model: Model::new("walker.mesh", "walker.mat") },
        );
        broker.publish_event(
            topics::SET_ENTITY_POSITION,
            VectorEvent { id, value: Vec3::new(index as f32 * 4.0, 0.0, 0.0) },
        );
        broker.publish_event(
            topics::PERFORM_ACTION,
            ActionEvent {
                id,
                action: EntityAction::PlayAnimation {
                    path: WALK.to_owned(),
                    mode: PlayMode::Endless,
                },
            },
        );
        broker.publish_event(
            topics::SET_BEHAVIOR,
            BehaviorEvent::new(id, Box::new(WanderBehavior::from_config(&engine.config().ai))),
        );
        self.walkers.push(id);
    }

    fn report(&self, engine: &Engine) {
        let pipeline = engine.pipeline();
        for id in &self.walkers {
            if let Some(transform) = pipeline.transform_of(*id) {
                log::info!(
                    "Walker {} at ({:.2}, {:.2}, {:.2})",
                    id,
                    transform.position.x,
                    transform.position.y,
                    transform.position.z
                );
            }
        }
        if let Some(sword) = self.sword.and_then(|id| pipeline.transform_of(id)) {
            log::info!(
                "Sword world position ({:.2}, {:.2}, {:.2})",
                sword.world[(0, 3)],
                sword.world[(1, 3)],
                sword.world[(2, 3)]
            );
        }
        log::info!(
            "{} entities, {} transform events so far",
            pipeline.entity_count(),
            self.transform_events.load(Ordering::Relaxed)
        );
    }
}

impl Application for PuppetDemo {
    fn initialize(&mut self, engine: &mut Engine) -> Result<(), AppError> {
        if !engine.catalogue().load(ANIMATION_SET) {
            return Err(AppError::Asset(format!("No animations in '{}'", ANIMATION_SET)));
        }
        let bones = humanoid().map_err(|e| AppError::Asset(e.to_string()))?;
        let frames = engine
            .catalogue()
            .preload(WALK, &bones)
            .map_err(|e| AppError::Asset(e.to_string()))?;
        log::info!("Preloaded {} frames of '{}'", frames, WALK);

        let counter = Arc::clone(&self.transform_events);
        engine
            .broker()
            .subscribe(topics::ENTITY_TRANSFORM, move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            });

        for index in 0..WALKERS {
            self.spawn_walker(engine, &bones, index);
        }

        let broker = Arc::clone(engine.broker());
        if let Some(carrier) = self.walkers.first().copied() {
            let sword = engine.spawn();
            broker.publish_event(
                topics::SET_INSTANCE_MODEL,
                ModelEvent { id: sword, model: Model::new("sword.mesh", "steel.mat") },
            );
            broker.publish_event(
                topics::SET_INSTANCES,
                MatricesEvent { id: sword, transforms: vec![Mat4::identity()] },
            );
            broker.publish_event(
                topics::ATTACH_OBJECT_TO,
                AttachEvent { id: sword, host: carrier, bone: Some("right_hand".to_owned()) },
            );
            self.sword = Some(sword);
        }

        let grass = engine.spawn();
        let mut rng = rand::thread_rng();
        let blades = (0..32)
            .map(|_| {
                Mat4::new_translation(&Vec3::new(
                    rng.gen_range(-10.0..10.0),
                    0.0,
                    rng.gen_range(-10.0..10.0),
                ))
            })
            .collect();
        broker.publish_event(
            topics::SET_INSTANCE_MODEL,
            ModelEvent { id: grass, model: Model::new("grass.mesh", "grass.mat") },
        );
        broker.publish_event(topics::SET_INSTANCES, MatricesEvent { id: grass, transforms: blades });

        let drifter = engine.spawn();
        self.drifter = Some(Drifter::start(broker, drifter));

        engine
            .pipeline_mut()
            .set_render_component(Box::new(LoggingBackend::new()));
        Ok(())
    }

    fn update(&mut self, engine: &mut Engine, _delta_time: f32) -> Result<(), AppError> {
        let frame = engine.pipeline().frame();

        if frame > 0 && frame % REPORT_EVERY == 0 {
            self.report(engine);
        }

        if frame == DESPAWN_FRAME {
            if let Some(id) = self.walkers.pop() {
                log::info!("Despawning walker {}", id);
                engine.despawn(id);
            }
            if let Some(id) = self.walkers.first().copied() {
                engine.broker().publish_event(
                    topics::PERFORM_ACTION,
                    ActionEvent {
                        id,
                        action: EntityAction::PlayAnimation {
                            path: "humanoid/wave".to_owned(),
                            mode: PlayMode::SingleLoop,
                        },
                    },
                );
            }
        }
        Ok(())
    }

    fn cleanup(&mut self, engine: &mut Engine) {
        if let Some(drifter) = self.drifter.take() {
            let sent = drifter.stop();
            log::info!("Drifter thread published {} positions", sent);
        }
        self.report(engine);
    }
}

fn main() -> Result<(), DemoError> {
    let mut config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load_from_file(path)?,
        None => EngineConfig::default(),
    };
    config.max_frames.get_or_insert(180);
    config.fixed_delta.get_or_insert(1.0 / 60.0);

    let source = InMemoryAnimationSource::new();
    source.insert_ron(ANIMATION_SET, HUMANOID_ANIMATIONS)?;
    let source: Arc<dyn AnimationSource> = Arc::new(source);

    let mut engine = Engine::with_source(config, Some(source))?;
    engine.run_app(&mut PuppetDemo::default())?;
    Ok(())
}

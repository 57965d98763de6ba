//! Pipeline-level integration tests: lifecycle, frame order, deferral,
//! attachment and rendering through the standard component set.

use super::*;
use crate::animation::{Bone, BoneMap, PlayMode, RawKeyframe};
use crate::ecs::components::Model;
use crate::ecs::systems::EntityAction;
use crate::events::topics::{ActionEvent, BoneMapEvent, VectorEvent};
use crate::foundation::math::Vec3;
use approx::assert_relative_eq;
use crossbeam_channel::{Receiver, Sender};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::thread;

fn standard() -> Pipeline {
    crate::foundation::logging::init_for_tests();
    Pipeline::standard(MessageBroker::shared(), &EngineConfig::default(), None).unwrap()
}

fn spawn(pipeline: &Pipeline) -> EntityId {
    let id = EntityId::new();
    pipeline
        .broker()
        .publish_event(topics::ADD_ENTITY, EntityEvent { id });
    id
}

fn despawn(pipeline: &Pipeline, id: EntityId) {
    pipeline
        .broker()
        .publish_event(topics::REMOVE_ENTITY, EntityEvent { id });
}

fn set_position(pipeline: &Pipeline, id: EntityId, value: Vec3) {
    pipeline
        .broker()
        .publish_event(topics::SET_ENTITY_POSITION, VectorEvent { id, value });
}

fn translation(matrix: &Mat4) -> Vec3 {
    Vec3::new(matrix[(0, 3)], matrix[(1, 3)], matrix[(2, 3)])
}

/// Records its kind into a shared log every frame
struct OrderRecorder {
    kind: ComponentKind,
    log: Arc<Mutex<Vec<ComponentKind>>>,
    state: Mutex<()>,
}

impl ObjectComponent for OrderRecorder {
    fn kind(&self) -> ComponentKind {
        self.kind
    }

    fn init(&mut self, _context: &ComponentContext) {}

    fn update(&mut self, _delta: f32) -> Result<(), PipelineError> {
        self.log.lock().push(self.kind);
        Ok(())
    }

    fn tear_down(&mut self) {}

    fn lock(&self) -> Box<dyn LockGuard + '_> {
        Box::new(self.state.lock())
    }
}

/// Publishes a removal mid-frame and checks the entity is still live
struct Remover {
    target: EntityId,
    context: Option<ComponentContext>,
    live_after_publish: Arc<Mutex<Option<bool>>>,
    state: Mutex<()>,
}

impl ObjectComponent for Remover {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Ai
    }

    fn init(&mut self, context: &ComponentContext) {
        self.context = Some(context.clone());
    }

    fn update(&mut self, _delta: f32) -> Result<(), PipelineError> {
        let context = self
            .context
            .as_ref()
            .ok_or(PipelineError::NotInitialized(ComponentKind::Ai))?;
        context
            .broker
            .publish_event(topics::REMOVE_ENTITY, EntityEvent { id: self.target });
        *self.live_after_publish.lock() = Some(context.directory.read().contains(self.target));
        Ok(())
    }

    fn tear_down(&mut self) {}

    fn lock(&self) -> Box<dyn LockGuard + '_> {
        Box::new(self.state.lock())
    }
}

/// Signals that its update started, then blocks until released
struct Gate {
    started: Sender<()>,
    resume: Receiver<()>,
    state: Mutex<()>,
}

impl ObjectComponent for Gate {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Ai
    }

    fn init(&mut self, _context: &ComponentContext) {}

    fn update(&mut self, _delta: f32) -> Result<(), PipelineError> {
        let _ = self.started.send(());
        let _ = self.resume.recv();
        Ok(())
    }

    fn tear_down(&mut self) {}

    fn lock(&self) -> Box<dyn LockGuard + '_> {
        Box::new(self.state.lock())
    }
}

#[test]
fn test_add_entity_creates_a_row_in_every_store() {
    let pipeline = standard();
    let a = spawn(&pipeline);
    let b = spawn(&pipeline);

    assert_eq!(pipeline.entity_count(), 2);
    for store in pipeline.stores().all() {
        assert_eq!(store.len(), 2, "store '{}'", store.name());
    }
    assert!(pipeline.contains(a));
    assert!(pipeline.contains(b));
    assert_eq!(pipeline.transform_of(a).unwrap().world, Mat4::identity());
    assert_eq!(pipeline.bone_transforms_of(b).unwrap(), vec![Mat4::identity()]);
}

#[test]
fn test_duplicate_add_is_ignored() {
    let pipeline = standard();
    let id = spawn(&pipeline);
    pipeline
        .broker()
        .publish_event(topics::ADD_ENTITY, EntityEvent { id });

    assert_eq!(pipeline.entity_count(), 1);
    for store in pipeline.stores().all() {
        assert_eq!(store.len(), 1);
    }
}

#[test]
fn test_removal_keeps_other_rows_addressable() {
    let mut pipeline = standard();
    let ids: Vec<EntityId> = (0..4).map(|_| spawn(&pipeline)).collect();
    for (i, id) in ids.iter().enumerate() {
        set_position(&pipeline, *id, Vec3::new(i as f32, 0.0, 0.0));
    }
    pipeline.update(0.016).unwrap();

    let last = pipeline.transform_reference(ids[3]).unwrap();
    despawn(&pipeline, ids[1]);

    assert_eq!(pipeline.entity_count(), 3);
    for store in pipeline.stores().all() {
        assert_eq!(store.len(), 3);
    }
    // The last entity was swapped into the hole; its reference follows it
    assert_relative_eq!(translation(&last.get_mat4().unwrap()).x, 3.0);
    assert_relative_eq!(pipeline.transform_of(ids[2]).unwrap().position.x, 2.0);
    assert!(pipeline.transform_of(ids[1]).is_none());
}

#[test]
fn test_reference_goes_stale_after_removal() {
    let pipeline = standard();
    let id = spawn(&pipeline);
    let reference = pipeline.transform_reference(id).unwrap();
    assert!(reference.get_mat4().is_ok());

    despawn(&pipeline, id);
    assert_eq!(reference.get_mat4(), Err(ResolveError::Stale(id)));

    // Re-adding the same id issues a new key; the old reference stays stale
    pipeline
        .broker()
        .publish_event(topics::ADD_ENTITY, EntityEvent { id });
    assert_eq!(reference.get_mat4(), Err(ResolveError::Stale(id)));
}

#[test]
fn test_components_run_in_kind_order() {
    let mut pipeline = Pipeline::new(MessageBroker::shared(), &PipelineConfig::default());
    let log = Arc::new(Mutex::new(Vec::new()));
    for kind in [
        ComponentKind::Animation,
        ComponentKind::Ai,
        ComponentKind::Physics,
        ComponentKind::Position,
        ComponentKind::Action,
    ] {
        pipeline
            .add_component(Box::new(OrderRecorder {
                kind,
                log: Arc::clone(&log),
                state: Mutex::new(()),
            }))
            .unwrap();
    }

    pipeline.update(0.016).unwrap();
    assert_eq!(
        *log.lock(),
        vec![
            ComponentKind::Ai,
            ComponentKind::Action,
            ComponentKind::Position,
            ComponentKind::Physics,
            ComponentKind::Animation,
        ]
    );
}

#[test]
fn test_components_rejected_after_first_frame() {
    let mut pipeline = standard();
    pipeline.update(0.016).unwrap();

    let result = pipeline.add_component(Box::new(PhysicsComponent::new()));
    assert_eq!(result, Err(PipelineError::AlreadyStarted(ComponentKind::Physics)));
    assert_eq!(pipeline.component_kinds().len(), 5);
}

#[test]
fn test_removal_during_update_is_deferred() {
    let seen = Arc::new(Mutex::new(None));
    let mut pipeline = Pipeline::new(MessageBroker::shared(), &PipelineConfig::default());
    pipeline.add_pipeline_data(DataStore::<Transform>::shared(TRANSFORM_STORE));
    pipeline.init();
    let target = spawn(&pipeline);
    pipeline
        .add_component(Box::new(Remover {
            target,
            context: None,
            live_after_publish: Arc::clone(&seen),
            state: Mutex::new(()),
        }))
        .unwrap();

    pipeline.update(0.016).unwrap();
    assert_eq!(*seen.lock(), Some(true));
    assert!(!pipeline.contains(target));
}

#[test]
fn test_removal_from_another_thread_lands_in_the_running_frame() {
    let (started_tx, started_rx) = crossbeam_channel::bounded(1);
    let (resume_tx, resume_rx) = crossbeam_channel::bounded(1);
    let mut pipeline = Pipeline::new(MessageBroker::shared(), &PipelineConfig::default());
    pipeline.add_pipeline_data(DataStore::<Transform>::shared(TRANSFORM_STORE));
    pipeline.init();
    let target = spawn(&pipeline);
    pipeline
        .add_component(Box::new(Gate {
            started: started_tx,
            resume: resume_rx,
            state: Mutex::new(()),
        }))
        .unwrap();

    let broker = Arc::clone(pipeline.broker());
    let directory = Arc::clone(&pipeline.shared.directory);
    let remover = thread::spawn(move || {
        started_rx.recv().unwrap();
        broker.publish_event(topics::REMOVE_ENTITY, EntityEvent { id: target });
        let live_mid_frame = directory.read().contains(target);
        resume_tx.send(()).unwrap();
        live_mid_frame
    });

    pipeline.update(0.016).unwrap();
    assert!(remover.join().unwrap());
    assert!(!pipeline.contains(target));
    assert!(pipeline.shared.defer.lock().queue.is_empty());
}

#[test]
fn test_tear_down_applies_queued_removals() {
    let mut pipeline = standard();
    let target = spawn(&pipeline);

    pipeline.shared.begin_frame();
    despawn(&pipeline, target);
    assert!(pipeline.contains(target));

    pipeline.tear_down();
    assert!(!pipeline.contains(target));
}

#[test]
fn test_removal_outside_update_is_immediate() {
    let pipeline = standard();
    let target = spawn(&pipeline);
    despawn(&pipeline, target);
    assert!(!pipeline.contains(target));
}

#[test]
fn test_removal_applies_immediately_when_deferral_is_off() {
    let seen = Arc::new(Mutex::new(None));
    let mut pipeline = Pipeline::new(
        MessageBroker::shared(),
        &PipelineConfig {
            defer_removals: false,
        },
    );
    pipeline.add_pipeline_data(DataStore::<Transform>::shared(TRANSFORM_STORE));
    pipeline.init();
    let target = spawn(&pipeline);
    pipeline
        .add_component(Box::new(Remover {
            target,
            context: None,
            live_after_publish: Arc::clone(&seen),
            state: Mutex::new(()),
        }))
        .unwrap();

    pipeline.update(0.016).unwrap();
    assert_eq!(*seen.lock(), Some(false));
}

#[test]
fn test_random_add_remove_keeps_rows_with_their_entity() {
    let pipeline = standard();
    let mut rng = StdRng::seed_from_u64(23);
    let mut live: Vec<EntityId> = Vec::new();
    let mut tags: HashMap<EntityId, f32> = HashMap::new();

    for step in 0..400 {
        if live.is_empty() || rng.gen_bool(0.6) {
            let id = spawn(&pipeline);
            // Transform rows carry no id; tag them so a misplaced row shows up
            let tag = step as f32;
            pipeline
                .shared
                .with_row(TRANSFORM_STORE, id, |row: &mut Transform| row.position.x = tag);
            tags.insert(id, tag);
            live.push(id);
        } else {
            let victim = live.swap_remove(rng.gen_range(0..live.len()));
            tags.remove(&victim);
            despawn(&pipeline, victim);
        }

        let stores = pipeline.stores();
        let transforms = stores.get::<Transform>(TRANSFORM_STORE).unwrap();
        let animators = stores.get::<EntityAnimator>(ANIMATOR_STORE).unwrap();
        let singles = stores.get::<SingleRenderData>(SINGLE_RENDER_STORE).unwrap();
        let instances = stores.get::<InstanceRenderData>(INSTANCE_RENDER_STORE).unwrap();
        for store in stores.all() {
            assert_eq!(store.len(), live.len(), "store '{}'", store.name());
        }

        let directory = pipeline.shared.directory.read();
        for id in &live {
            let index = directory.index_of(*id).unwrap();
            assert_eq!(transforms.lock()[index].position.x, tags[id]);
            assert_eq!(animators.lock()[index].entity, *id);
            assert_eq!(singles.lock()[index].entity, *id);
            assert_eq!(instances.lock()[index].entity, *id);
        }
    }
}

#[test]
fn test_late_store_is_backfilled() {
    let mut pipeline = Pipeline::new(MessageBroker::shared(), &PipelineConfig::default());
    pipeline.add_pipeline_data(DataStore::<Transform>::shared(TRANSFORM_STORE));
    pipeline.init();
    let a = spawn(&pipeline);
    let b = spawn(&pipeline);

    let animators = DataStore::<EntityAnimator>::shared(ANIMATOR_STORE);
    pipeline.add_pipeline_data(Arc::clone(&animators));

    let rows = animators.lock();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].entity, a);
    assert_eq!(rows[1].entity, b);
}

#[test]
fn test_set_position_reaches_the_transform_store() {
    let mut pipeline = standard();
    let id = spawn(&pipeline);
    set_position(&pipeline, id, Vec3::new(1.0, 2.0, 3.0));
    assert_eq!(pipeline.transform_of(id).unwrap().position, Vec3::zeros());

    pipeline.update(0.016).unwrap();
    let transform = pipeline.transform_of(id).unwrap();
    assert_eq!(transform.position, Vec3::new(1.0, 2.0, 3.0));
    assert_relative_eq!(translation(&transform.world), Vec3::new(1.0, 2.0, 3.0));
}

#[test]
fn test_velocity_moves_entity_over_frames() {
    let mut pipeline = standard();
    let id = spawn(&pipeline);
    pipeline.broker().publish_event(
        topics::SET_ENTITY_VELOCITY,
        VectorEvent { id, value: Vec3::new(2.0, 0.0, 0.0) },
    );

    // Physics publishes after Position ran, so each step lands one frame later
    for _ in 0..3 {
        pipeline.update(0.5).unwrap();
    }
    assert_relative_eq!(pipeline.transform_of(id).unwrap().position.x, 2.0, epsilon = 1.0e-5);
}

#[test]
fn test_play_animation_action_drives_bones() {
    let catalogue = Arc::new(AnimationCatalogue::empty(true));
    catalogue
        .build(
            "wave",
            1.0,
            2,
            vec![
                RawKeyframe::new(0, "root").with_position(Vec3::zeros()),
                RawKeyframe::new(1, "root").with_position(Vec3::new(0.0, 4.0, 0.0)),
            ],
        )
        .unwrap();

    let mut pipeline =
        Pipeline::standard(MessageBroker::shared(), &EngineConfig::default(), Some(catalogue))
            .unwrap();
    let id = spawn(&pipeline);
    pipeline.broker().publish_event(
        topics::PERFORM_ACTION,
        ActionEvent {
            id,
            action: EntityAction::PlayAnimation {
                path: "wave".to_owned(),
                mode: PlayMode::Endless,
            },
        },
    );

    // First frame attaches the animator at time 0
    pipeline.update(0.0).unwrap();
    pipeline.update(1.0).unwrap();

    let bones = pipeline.bone_transforms_of(id).unwrap();
    assert_eq!(bones.len(), 1);
    assert_relative_eq!(translation(&bones[0]).y, 4.0, epsilon = 1.0e-5);
}

#[test]
fn test_attached_entity_follows_host_bone() {
    let mut pipeline = standard();
    let host = spawn(&pipeline);
    let child = spawn(&pipeline);

    let mut skeleton = BoneMap::new();
    skeleton.add_bone("root", None, Bone::default()).unwrap();
    skeleton
        .add_bone(
            "hand",
            Some("root"),
            Bone::new(Vec3::new(0.0, 1.0, 0.0), Vec3::new(1.0, 1.0, 1.0), Vec3::zeros()),
        )
        .unwrap();
    pipeline.broker().publish_event(
        topics::SET_BONE_MAP,
        BoneMapEvent { id: host, bone_map: skeleton },
    );
    set_position(&pipeline, host, Vec3::new(10.0, 0.0, 0.0));
    pipeline.broker().publish_event(
        topics::ATTACH_OBJECT_TO,
        AttachEvent { id: child, host, bone: Some("hand".to_owned()) },
    );

    // Bone matrices exist once Animation has run
    pipeline.update(0.016).unwrap();
    pipeline.update(0.016).unwrap();

    let world = pipeline.transform_of(child).unwrap().world;
    assert_relative_eq!(translation(&world), Vec3::new(10.0, 1.0, 0.0), epsilon = 1.0e-5);

    // Detach by attaching to nil
    pipeline.broker().publish_event(
        topics::ATTACH_OBJECT_TO,
        AttachEvent { id: child, host: EntityId::nil(), bone: None },
    );
    pipeline.update(0.016).unwrap();
    assert_relative_eq!(translation(&pipeline.transform_of(child).unwrap().world), Vec3::zeros());
}

#[test]
fn test_circular_attachment_aborts_the_frame() {
    let mut pipeline = standard();
    let a = spawn(&pipeline);
    let b = spawn(&pipeline);
    pipeline.broker().publish_event(
        topics::ATTACH_OBJECT_TO,
        AttachEvent { id: a, host: b, bone: None },
    );
    pipeline.broker().publish_event(
        topics::ATTACH_OBJECT_TO,
        AttachEvent { id: b, host: a, bone: None },
    );

    let result = pipeline.update(0.016);
    assert!(matches!(result, Err(PipelineError::CircularDependency(_))));
}

#[test]
fn test_render_frame_resolves_references() {
    let mut pipeline = standard();
    let hero = spawn(&pipeline);
    let grass = spawn(&pipeline);
    let hidden = spawn(&pipeline);

    pipeline.broker().publish_event(
        topics::ADD_MODEL,
        ModelEvent { id: hero, model: Model::new("hero.mesh", "hero.mat") },
    );
    pipeline.broker().publish_event(
        topics::SET_INSTANCE_MODEL,
        ModelEvent { id: grass, model: Model::new("grass.mesh", "grass.mat") },
    );
    pipeline.broker().publish_event(
        topics::SET_INSTANCES,
        MatricesEvent {
            id: grass,
            transforms: vec![Mat4::identity(); 3],
        },
    );
    pipeline.broker().publish_event(
        topics::ATTACH_OBJECT_TO,
        AttachEvent { id: grass, host: hero, bone: None },
    );
    set_position(&pipeline, hero, Vec3::new(0.0, 0.0, 7.0));
    pipeline.update(0.016).unwrap();

    let frame = pipeline.render_frame().unwrap();
    assert_eq!(frame.singles.len(), 1);
    assert_eq!(frame.instances.len(), 1);
    assert_eq!(frame.draw_count(), 4);
    assert!(frame.singles.iter().all(|item| item.entity != hidden));

    let single = &frame.singles[0];
    assert_eq!(single.entity, hero);
    assert_relative_eq!(translation(&single.world).z, 7.0);
    assert_eq!(single.bones.len(), 1);

    let instanced = &frame.instances[0];
    assert_relative_eq!(translation(&instanced.world).z, 7.0);
    assert_relative_eq!(translation(&instanced.host.unwrap()).z, 7.0);

    pipeline.set_render_component(Box::new(LoggingBackend::new()));
    pipeline.render().unwrap();
}

#[test]
fn test_lock_holds_everything_and_releases_on_drop() {
    let pipeline = standard();
    spawn(&pipeline);
    {
        let _lock = pipeline.lock();
        assert!(pipeline.shared.directory.try_read().is_none());
    }
    assert_eq!(pipeline.entity_count(), 1);
}

#[test]
fn test_tear_down_unsubscribes_everything() {
    let broker = MessageBroker::shared();
    let mut pipeline =
        Pipeline::standard(Arc::clone(&broker), &EngineConfig::default(), None).unwrap();
    pipeline.init();
    assert!(broker.subscriber_count(topics::ADD_ENTITY) > 0);

    pipeline.tear_down();
    for topic in [
        topics::ADD_ENTITY,
        topics::REMOVE_ENTITY,
        topics::SET_ENTITY_POSITION,
        topics::SET_BEHAVIOR,
        topics::PERFORM_ACTION,
        topics::ADD_ANIMATOR,
        topics::ATTACH_OBJECT_TO,
    ] {
        assert_eq!(broker.subscriber_count(topic), 0, "{}", topic);
    }
}

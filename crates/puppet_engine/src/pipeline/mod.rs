//! Pipeline orchestrator
//!
//! The pipeline owns the entity directory, the data stores and the object
//! components. It reacts to the lifecycle topics (`pipeline.add_entity`,
//! `pipeline.remove_entity`) and the render-store topics, runs the
//! components once per frame in [`ComponentKind`] order and snapshots the
//! render stores for the installed [`RenderBackend`].
//!
//! Lock order everywhere is component state, then directory, then stores in
//! registration order. The broker lock is never held while callbacks run.

pub mod render;

#[cfg(test)]
mod tests;

pub use render::{
    BackendResult, BoneMatrixBuffer, InstanceRenderItem, LoggingBackend, RenderBackend,
    RenderFrame, SingleRenderItem,
};

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::animation::AnimationCatalogue;
use crate::ecs::components::{EntityAnimator, InstanceRenderData, SingleRenderData, Transform};
use crate::ecs::entity::{EntityDirectory, EntityId};
use crate::ecs::reference::{
    AttachedTransformReference, BoneTransformReference, ResolveError, TransformReference,
    ValueReference,
};
use crate::ecs::storage::{
    DataStore, LockGuard, PipelineData, PipelineRow, RowContext, SharedDirectory, StoreRegistry,
    ANIMATOR_STORE, INSTANCE_RENDER_STORE, SINGLE_RENDER_STORE, TRANSFORM_STORE,
};
use crate::ecs::systems::{
    ActionComponent, AiComponent, AnimationComponent, ComponentContext, ComponentKind,
    ObjectComponent, PhysicsComponent, PositionComponent,
};
use crate::engine::EngineConfig;
use crate::events::topics::{self, AttachEvent, EntityEvent, MatricesEvent, ModelEvent};
use crate::events::{MessageBroker, SubscriptionId};
use crate::foundation::math::Mat4;

/// Pipeline-level errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Components can only be added before the first frame
    #[error("Cannot add {0} component after the pipeline started")]
    AlreadyStarted(ComponentKind),

    /// A component ran before `init`
    #[error("The {0} component was updated before init")]
    NotInitialized(ComponentKind),

    /// A store a component depends on was never registered
    #[error("Pipeline data store '{0}' is not registered")]
    MissingStore(String),

    /// Attachments form a loop
    #[error("Circular attachment dependency involving entity {0}")]
    CircularDependency(EntityId),

    /// A value reference could not be read
    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    /// The render backend failed
    #[error("Render error: {0}")]
    Render(String),
}

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Queue removals that arrive during `update` until the frame ends
    pub defer_removals: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            defer_removals: true,
        }
    }
}

/// Frame flag and the removals parked behind it, changed together
#[derive(Debug, Default)]
struct DeferState {
    updating: bool,
    queue: Vec<EntityId>,
}

/// State reachable from the pipeline's own subscriptions
struct PipelineShared {
    directory: SharedDirectory,
    stores: Arc<StoreRegistry>,
    defer: Mutex<DeferState>,
    defer_removals: bool,
}

impl PipelineShared {
    fn add_entity(&self, id: EntityId) {
        let mut directory = self.directory.write();
        let Some((key, index)) = directory.insert(id) else {
            return;
        };

        let context = RowContext {
            directory: &self.directory,
            stores: &self.stores,
        };
        for store in self.stores.all() {
            store.add_data(id, key, &context);
        }
        log::debug!("Added entity {} at index {}", id, index);
    }

    fn request_removal(&self, id: EntityId) {
        if self.defer_removals {
            let mut defer = self.defer.lock();
            if defer.updating {
                log::debug!("Deferring removal of entity {} to the end of the frame", id);
                defer.queue.push(id);
                return;
            }
        }
        self.remove_entity(id);
    }

    fn begin_frame(&self) {
        self.defer.lock().updating = true;
    }

    fn remove_entity(&self, id: EntityId) {
        let mut directory = self.directory.write();
        let Some(index) = directory.index_of(id) else {
            log::warn!("Remove requested for unknown entity {}", id);
            return;
        };

        for store in self.stores.all() {
            store.remove_data_at(index);
        }
        if let Some(removal) = directory.remove(id) {
            if let Some(moved) = removal.moved {
                log::trace!("Entity {} moved to index {}", moved, removal.index);
            }
        }
        log::debug!("Removed entity {}", id);
    }

    /// Ends the frame and applies everything queued during it.
    ///
    /// The flag drops and the queue is taken under one lock, so a removal
    /// either lands in this batch or is applied by its publisher directly.
    fn flush_removals(&self) {
        let deferred = {
            let mut defer = self.defer.lock();
            defer.updating = false;
            std::mem::take(&mut defer.queue)
        };
        for id in deferred {
            self.remove_entity(id);
        }
    }

    fn with_row<T, R>(&self, store: &str, id: EntityId, f: impl FnOnce(&mut T) -> R) -> Option<R>
    where
        T: PipelineRow,
    {
        let Some(store) = self.stores.get::<T>(store) else {
            log::warn!("Pipeline data store '{}' is not registered", store);
            return None;
        };
        let directory = self.directory.read();
        let Some(index) = directory.index_of(id) else {
            log::warn!("Event for unknown entity {}", id);
            return None;
        };
        store.with_row(index, f)
    }

    fn attach_reference(&self, event: &AttachEvent) -> Option<Arc<dyn ValueReference>> {
        if event.host == EntityId::nil() {
            return None;
        }

        let Some(host_key) = self.directory.read().key_of(event.host) else {
            log::warn!("Entity {} attached to unknown host {}", event.id, event.host);
            return None;
        };
        let transforms = self.stores.get::<Transform>(TRANSFORM_STORE)?;
        let host: Arc<dyn ValueReference> = Arc::new(TransformReference::new(
            event.host,
            host_key,
            Arc::clone(&self.directory),
            transforms,
        ));

        let offset = event.bone.as_ref().and_then(|bone| {
            let animators = self.stores.get::<EntityAnimator>(ANIMATOR_STORE)?;
            let reference: Arc<dyn ValueReference> = Arc::new(BoneTransformReference::new(
                event.host,
                host_key,
                bone.clone(),
                Arc::clone(&self.directory),
                animators,
            ));
            Some(reference)
        });

        Some(Arc::new(AttachedTransformReference::new(host, offset)))
    }

    fn snapshot(&self, frame: u64) -> Result<RenderFrame, PipelineError> {
        let singles = self
            .stores
            .get::<SingleRenderData>(SINGLE_RENDER_STORE)
            .ok_or_else(|| PipelineError::MissingStore(SINGLE_RENDER_STORE.to_owned()))?;
        let instances = self
            .stores
            .get::<InstanceRenderData>(INSTANCE_RENDER_STORE)
            .ok_or_else(|| PipelineError::MissingStore(INSTANCE_RENDER_STORE.to_owned()))?;

        // Copy the rows out so no store is locked while references resolve
        let single_rows: Vec<SingleRenderData> = singles.lock().clone();
        let instance_rows: Vec<InstanceRenderData> = instances.lock().clone();

        let mut render_frame = RenderFrame {
            frame,
            ..RenderFrame::default()
        };

        for row in single_rows {
            if row.models.is_empty() {
                continue;
            }
            let Some(reference) = row.transform_reference else {
                continue;
            };
            match reference.get_mat4() {
                Ok(world) => render_frame.singles.push(SingleRenderItem {
                    entity: row.entity,
                    reference,
                    world,
                    bones: BoneMatrixBuffer::from_matrices(&row.bone_transforms),
                    models: row.models,
                }),
                Err(e) => log::warn!("Skipping entity {}: {}", row.entity, e),
            }
        }

        for row in instance_rows {
            let (Some(model), Some(reference)) = (row.model, row.transform_reference) else {
                continue;
            };
            if row.instance_transforms.is_empty() {
                continue;
            }
            let world = match reference.get_mat4() {
                Ok(world) => world,
                Err(e) => {
                    log::warn!("Skipping instanced entity {}: {}", row.entity, e);
                    continue;
                }
            };
            let host = match row.attach_reference.map(|r| r.get_mat4()).transpose() {
                Ok(host) => host,
                Err(e) => {
                    log::warn!("Entity {} lost its attachment: {}", row.entity, e);
                    None
                }
            };
            render_frame.instances.push(InstanceRenderItem {
                entity: row.entity,
                reference,
                world,
                host,
                model,
                instances: row.instance_transforms,
            });
        }

        Ok(render_frame)
    }
}

/// Every component, the directory and every store, held together.
///
/// Dropping the lock releases everything in reverse order.
pub struct PipelineLock<'a> {
    // Field order is drop order: stores first, components last
    _stores: Vec<Box<dyn LockGuard + 'a>>,
    _directory: RwLockWriteGuard<'a, EntityDirectory>,
    _components: Vec<Box<dyn LockGuard + 'a>>,
}

/// Owns the entity directory, the data stores and the object components
pub struct Pipeline {
    broker: Arc<MessageBroker>,
    shared: Arc<PipelineShared>,
    stores: Vec<Arc<dyn PipelineData>>,
    components: Vec<Box<dyn ObjectComponent>>,
    render_component: Option<Box<dyn RenderBackend>>,
    subscriptions: Vec<SubscriptionId>,
    frame: u64,
}

impl Pipeline {
    /// Create an empty pipeline on `broker`
    pub fn new(broker: Arc<MessageBroker>, config: &PipelineConfig) -> Self {
        let shared = PipelineShared {
            directory: Arc::new(RwLock::new(EntityDirectory::new())),
            stores: Arc::new(StoreRegistry::new()),
            defer: Mutex::new(DeferState::default()),
            defer_removals: config.defer_removals,
        };
        Self {
            broker,
            shared: Arc::new(shared),
            stores: Vec::new(),
            components: Vec::new(),
            render_component: None,
            subscriptions: Vec::new(),
            frame: 0,
        }
    }

    /// Default stores and all five components
    pub fn standard(
        broker: Arc<MessageBroker>,
        config: &EngineConfig,
        catalogue: Option<Arc<AnimationCatalogue>>,
    ) -> Result<Self, PipelineError> {
        let mut pipeline = Self::new(broker, &config.pipeline);

        pipeline.add_pipeline_data(DataStore::<Transform>::shared(TRANSFORM_STORE));
        pipeline.add_pipeline_data(DataStore::<EntityAnimator>::shared(ANIMATOR_STORE));
        pipeline.add_pipeline_data(DataStore::<SingleRenderData>::shared(SINGLE_RENDER_STORE));
        pipeline.add_pipeline_data(DataStore::<InstanceRenderData>::shared(INSTANCE_RENDER_STORE));

        pipeline.add_component(Box::new(AiComponent::new(config.ai.seed)))?;
        pipeline.add_component(Box::new(ActionComponent::new(catalogue)))?;
        pipeline.add_component(Box::new(PositionComponent::new(
            config.position.max_updates_per_frame,
        )))?;
        pipeline.add_component(Box::new(PhysicsComponent::new()))?;
        pipeline.add_component(Box::new(AnimationComponent::new()))?;

        Ok(pipeline)
    }

    /// Register a store and give every existing entity a default row
    pub fn add_pipeline_data<T: PipelineRow>(&mut self, store: Arc<DataStore<T>>) {
        let directory = self.shared.directory.write();

        if store.is_empty() {
            let context = RowContext {
                directory: &self.shared.directory,
                stores: &self.shared.stores,
            };
            for (_, id) in directory.iter() {
                if let Some(key) = directory.key_of(id) {
                    store.add_data(id, key, &context);
                }
            }
        } else if store.len() != directory.len() {
            log::warn!(
                "Store '{}' arrived with {} rows for {} entities",
                store.name(),
                store.len(),
                directory.len()
            );
        }

        let erased: Arc<dyn PipelineData> = store.clone();
        match self.stores.iter_mut().find(|s| s.name() == erased.name()) {
            Some(existing) => *existing = erased,
            None => self.stores.push(erased),
        }
        self.shared.stores.register(store);
    }

    /// Initialize `component` and schedule it by kind
    pub fn add_component(
        &mut self,
        mut component: Box<dyn ObjectComponent>,
    ) -> Result<(), PipelineError> {
        if self.frame > 0 {
            log::error!(
                "Rejected {} component: pipeline already ran {} frames",
                component.kind(),
                self.frame
            );
            return Err(PipelineError::AlreadyStarted(component.kind()));
        }

        self.init();
        component.init(&self.context());
        log::debug!("Added {} component", component.kind());

        self.components.push(component);
        self.components.sort_by_key(|c| c.kind());
        Ok(())
    }

    /// Install the backend `render` hands frames to
    pub fn set_render_component(&mut self, backend: Box<dyn RenderBackend>) {
        log::info!("Render backend set to '{}'", backend.name());
        self.render_component = Some(backend);
    }

    /// Subscribe the lifecycle and render-store topics. A second call is a no-op.
    pub fn init(&mut self) {
        if !self.subscriptions.is_empty() {
            return;
        }

        let shared = Arc::clone(&self.shared);
        self.subscriptions.push(
            self.broker
                .subscribe_event::<EntityEvent, _>(topics::ADD_ENTITY, move |event| {
                    shared.add_entity(event.id);
                }),
        );

        let shared = Arc::clone(&self.shared);
        self.subscriptions.push(
            self.broker
                .subscribe_event::<EntityEvent, _>(topics::REMOVE_ENTITY, move |event| {
                    shared.request_removal(event.id);
                }),
        );

        let shared = Arc::clone(&self.shared);
        self.subscriptions.push(
            self.broker
                .subscribe_event::<ModelEvent, _>(topics::ADD_MODEL, move |event| {
                    let model = event.model.clone();
                    shared.with_row(SINGLE_RENDER_STORE, event.id, |row: &mut SingleRenderData| {
                        row.models.push(model);
                    });
                }),
        );

        let shared = Arc::clone(&self.shared);
        self.subscriptions.push(
            self.broker
                .subscribe_event::<ModelEvent, _>(topics::SET_INSTANCE_MODEL, move |event| {
                    let model = event.model.clone();
                    shared.with_row(
                        INSTANCE_RENDER_STORE,
                        event.id,
                        |row: &mut InstanceRenderData| row.model = Some(model),
                    );
                }),
        );

        let shared = Arc::clone(&self.shared);
        self.subscriptions.push(
            self.broker
                .subscribe_event::<MatricesEvent, _>(topics::SET_INSTANCES, move |event| {
                    let transforms = event.transforms.clone();
                    shared.with_row(
                        INSTANCE_RENDER_STORE,
                        event.id,
                        |row: &mut InstanceRenderData| row.instance_transforms = transforms,
                    );
                }),
        );

        let shared = Arc::clone(&self.shared);
        self.subscriptions.push(
            self.broker
                .subscribe_event::<AttachEvent, _>(topics::ATTACH_OBJECT_TO, move |event| {
                    let reference = shared.attach_reference(event);
                    shared.with_row(
                        INSTANCE_RENDER_STORE,
                        event.id,
                        |row: &mut InstanceRenderData| row.attach_reference = reference,
                    );
                }),
        );

        log::debug!("Pipeline subscribed to {} topics", self.subscriptions.len());
    }

    /// Run every component once, then apply deferred removals
    pub fn update(&mut self, delta: f32) -> Result<(), PipelineError> {
        self.init();

        self.shared.begin_frame();
        let result = self
            .components
            .iter_mut()
            .try_for_each(|component| component.update(delta));
        self.shared.flush_removals();
        self.frame += 1;

        if let Err(e) = &result {
            log::error!("Frame {} aborted: {}", self.frame, e);
        }
        result
    }

    /// Snapshot the render stores and pass them to the backend
    pub fn render(&mut self) -> Result<(), PipelineError> {
        if self.render_component.is_none() {
            return Ok(());
        }
        let frame = self.render_frame()?;
        match self.render_component.as_mut() {
            Some(backend) => backend.render(&frame).map_err(PipelineError::Render),
            None => Ok(()),
        }
    }

    /// Resolved render data for the current state
    pub fn render_frame(&self) -> Result<RenderFrame, PipelineError> {
        self.shared.snapshot(self.frame)
    }

    /// Hold every component, the directory and every store
    pub fn lock(&self) -> PipelineLock<'_> {
        let components = self.components.iter().map(|c| c.lock()).collect();
        let directory = self.shared.directory.write();
        let stores = self.stores.iter().map(|s| s.lock_erased()).collect();
        PipelineLock {
            _stores: stores,
            _directory: directory,
            _components: components,
        }
    }

    /// Unsubscribe the pipeline and every component, applying any removal still queued
    pub fn tear_down(&mut self) {
        self.shared.flush_removals();
        for id in self.subscriptions.drain(..) {
            self.broker.unsubscribe(id);
        }
        for component in &mut self.components {
            component.tear_down();
        }
    }

    /// What components see during `init`
    pub fn context(&self) -> ComponentContext {
        ComponentContext {
            broker: Arc::clone(&self.broker),
            directory: Arc::clone(&self.shared.directory),
            stores: Arc::clone(&self.shared.stores),
        }
    }

    /// Message broker
    pub fn broker(&self) -> &Arc<MessageBroker> {
        &self.broker
    }

    /// Registered stores
    pub fn stores(&self) -> &Arc<StoreRegistry> {
        &self.shared.stores
    }

    /// Frames run so far
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Registered component kinds in frame order
    pub fn component_kinds(&self) -> Vec<ComponentKind> {
        self.components.iter().map(|c| c.kind()).collect()
    }

    /// Live entities
    pub fn entity_count(&self) -> usize {
        self.shared.directory.read().len()
    }

    /// True if `id` is live
    pub fn contains(&self, id: EntityId) -> bool {
        self.shared.directory.read().contains(id)
    }

    /// Current transform row of `id`
    pub fn transform_of(&self, id: EntityId) -> Option<Transform> {
        let store = self.shared.stores.get::<Transform>(TRANSFORM_STORE)?;
        let index = self.shared.directory.read().index_of(id)?;
        store.with_row(index, |row| row.clone())
    }

    /// Current bone matrices of `id` in render order
    pub fn bone_transforms_of(&self, id: EntityId) -> Option<Vec<Mat4>> {
        let store = self.shared.stores.get::<EntityAnimator>(ANIMATOR_STORE)?;
        let index = self.shared.directory.read().index_of(id)?;
        store.with_row(index, |row| row.bone_transformations.clone())
    }

    /// Live reference to `id`'s world transform
    pub fn transform_reference(&self, id: EntityId) -> Option<TransformReference> {
        let store = self.shared.stores.get::<Transform>(TRANSFORM_STORE)?;
        let key = self.shared.directory.read().key_of(id)?;
        Some(TransformReference::new(
            id,
            key,
            Arc::clone(&self.shared.directory),
            store,
        ))
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.tear_down();
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("frame", &self.frame)
            .field("entities", &self.entity_count())
            .field("stores", &self.shared.stores)
            .field("components", &self.component_kinds())
            .finish()
    }
}

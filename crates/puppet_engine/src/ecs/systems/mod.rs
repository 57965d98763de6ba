//! Object components
//!
//! Each component owns one domain of per-frame behavior (AI, actions,
//! positioning, physics, animation). Components never reference each
//! other: they subscribe to pipeline topics in `init`, keep their state
//! behind their own mutex, and publish what they derive.
//!
//! The pipeline runs components in [`ComponentKind`] order every frame,
//! whatever order they were registered in.

pub mod action;
pub mod ai;
pub mod animation;
pub mod physics;
pub mod position;

pub use action::{ActionComponent, EntityAction};
pub use ai::{AiComponent, Behavior, WanderBehavior};
pub use animation::AnimationComponent;
pub use physics::PhysicsComponent;
pub use position::PositionComponent;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::ecs::components::{EntityAnimator, SingleRenderData, Transform};
use crate::ecs::storage::{
    DataStore, LockGuard, PipelineRow, SharedDirectory, StoreRegistry, ANIMATOR_STORE,
    SINGLE_RENDER_STORE, TRANSFORM_STORE,
};
use crate::events::{MessageBroker, SubscriptionId};
use crate::pipeline::PipelineError;

/// Fixed per-frame execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentKind {
    /// Behaviors deciding where entities go
    Ai,
    /// Queued scripted actions
    Action,
    /// Transform bookkeeping and world matrices
    Position,
    /// Velocity integration
    Physics,
    /// Skeletal animation
    Animation,
}

impl ComponentKind {
    /// Display name
    pub fn name(self) -> &'static str {
        match self {
            ComponentKind::Ai => "ai",
            ComponentKind::Action => "action",
            ComponentKind::Position => "position",
            ComponentKind::Physics => "physics",
            ComponentKind::Animation => "animation",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything a component may reach during `init`
#[derive(Clone)]
pub struct ComponentContext {
    /// Message broker
    pub broker: Arc<MessageBroker>,
    /// Entity directory
    pub directory: SharedDirectory,
    /// Pipeline data stores
    pub stores: Arc<StoreRegistry>,
}

impl ComponentContext {
    /// Typed store lookup that reports a missing store as an error
    pub fn store<T: PipelineRow>(&self, name: &str) -> Result<Arc<DataStore<T>>, PipelineError> {
        self.stores
            .get(name)
            .ok_or_else(|| PipelineError::MissingStore(name.to_owned()))
    }

    /// The transform store
    pub fn transforms(&self) -> Result<Arc<DataStore<Transform>>, PipelineError> {
        self.store(TRANSFORM_STORE)
    }

    /// The animator store
    pub fn animators(&self) -> Result<Arc<DataStore<EntityAnimator>>, PipelineError> {
        self.store(ANIMATOR_STORE)
    }

    /// The single render store
    pub fn single_render(&self) -> Result<Arc<DataStore<SingleRenderData>>, PipelineError> {
        self.store(SINGLE_RENDER_STORE)
    }
}

impl fmt::Debug for ComponentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentContext")
            .field("broker", &self.broker)
            .field("stores", &self.stores)
            .finish()
    }
}

/// Capability contract of an object component
pub trait ObjectComponent: Send {
    /// Position in the frame order
    fn kind(&self) -> ComponentKind;

    /// Subscribe to topics. A second call is a no-op.
    fn init(&mut self, context: &ComponentContext);

    /// Run one frame
    fn update(&mut self, delta: f32) -> Result<(), PipelineError>;

    /// Unsubscribe everything `init` registered
    fn tear_down(&mut self);

    /// Hold the component's state lock
    fn lock(&self) -> Box<dyn LockGuard + '_>;
}

/// Init/tear-down bookkeeping shared by the components
#[derive(Default)]
pub struct ComponentBase {
    context: Option<ComponentContext>,
    subscriptions: Vec<SubscriptionId>,
}

impl ComponentBase {
    /// Create an uninitialized base
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the context. Returns false if already initialized.
    pub fn attach(&mut self, context: &ComponentContext) -> bool {
        if self.context.is_some() {
            return false;
        }
        self.context = Some(context.clone());
        true
    }

    /// True between `attach` and `tear_down`
    pub fn is_initialized(&self) -> bool {
        self.context.is_some()
    }

    /// Context stored by `attach`
    pub fn context(&self) -> Option<&ComponentContext> {
        self.context.as_ref()
    }

    /// Context, or an error naming the component
    pub fn require_context(&self, kind: ComponentKind) -> Result<&ComponentContext, PipelineError> {
        self.context
            .as_ref()
            .ok_or(PipelineError::NotInitialized(kind))
    }

    /// Subscribe with a typed callback and remember the subscription
    pub fn subscribe<T, F>(&mut self, topic: &str, callback: F)
    where
        T: Any + Send + Sync,
        F: Fn(&T) + Send + Sync + 'static,
    {
        match &self.context {
            Some(context) => {
                let id = context.broker.subscribe_event::<T, F>(topic, callback);
                self.subscriptions.push(id);
            }
            None => log::warn!("Subscribe to '{}' before init ignored", topic),
        }
    }

    /// Publish a typed event, if initialized
    pub fn publish<T: Any + Send + Sync>(&self, topic: &str, event: T) {
        if let Some(context) = &self.context {
            context.broker.publish_event(topic, event);
        }
    }

    /// Number of live subscriptions
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Unsubscribe everything and forget the context
    pub fn tear_down(&mut self) {
        if let Some(context) = self.context.take() {
            for id in self.subscriptions.drain(..) {
                context.broker.unsubscribe(id);
            }
        }
    }
}

impl fmt::Debug for ComponentBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentBase")
            .field("initialized", &self.is_initialized())
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_kind_order_is_frame_order() {
        let mut kinds = vec![
            ComponentKind::Animation,
            ComponentKind::Position,
            ComponentKind::Ai,
            ComponentKind::Physics,
            ComponentKind::Action,
        ];
        kinds.sort();
        assert_eq!(
            kinds,
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
    fn test_base_tear_down_leaves_no_subscriptions() {
        let context = test_support::context();
        let mut base = ComponentBase::new();
        assert!(base.attach(&context));
        assert!(!base.attach(&context));

        let hits = Arc::new(Mutex::new(0));
        let h = Arc::clone(&hits);
        base.subscribe::<u8, _>("ping", move |_| *h.lock() += 1);
        assert_eq!(context.broker.subscriber_count("ping"), 1);

        base.tear_down();
        context.broker.publish_event("ping", 1u8);
        assert_eq!(context.broker.subscriber_count("ping"), 0);
        assert_eq!(*hits.lock(), 0);
        assert!(!base.is_initialized());
    }
}

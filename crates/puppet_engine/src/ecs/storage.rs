//! Pipeline data stores
//!
//! Each store owns one kind of per-entity row in a dense `Vec`, indexed by
//! the entity directory. Stores never search by id: the pipeline resolves
//! id -> index first and calls [`PipelineData::remove_data_at`] while it
//! still holds the directory write lock, so stores and directory never
//! disagree.

use parking_lot::{Mutex, MutexGuard, RwLock};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::entity::{EntityDirectory, EntityId, EntityKey};

/// Name of the [`Transform`](super::components::Transform) store
pub const TRANSFORM_STORE: &str = "transform";
/// Name of the [`EntityAnimator`](super::components::EntityAnimator) store
pub const ANIMATOR_STORE: &str = "animator";
/// Name of the [`SingleRenderData`](super::components::SingleRenderData) store
pub const SINGLE_RENDER_STORE: &str = "single_render";
/// Name of the [`InstanceRenderData`](super::components::InstanceRenderData) store
pub const INSTANCE_RENDER_STORE: &str = "instance_render";

/// Shared handle to the entity directory
pub type SharedDirectory = Arc<RwLock<EntityDirectory>>;

/// Type-erased lock guard.
///
/// Anything can be held as a guard; dropping the box releases the lock.
pub trait LockGuard {}

impl<T> LockGuard for T {}

/// What a new row may need to know about its surroundings
pub struct RowContext<'a> {
    /// Directory the row's entity lives in
    pub directory: &'a SharedDirectory,
    /// Every registered store
    pub stores: &'a StoreRegistry,
}

/// A row type stored in a [`DataStore`]
pub trait PipelineRow: Send + 'static {
    /// Default row for a freshly added entity
    fn new_row(id: EntityId, key: EntityKey, context: &RowContext<'_>) -> Self;
}

/// Lifecycle contract shared by all stores
pub trait PipelineData: Send + Sync {
    /// Store name used for lookup by components
    fn name(&self) -> &str;

    /// Append a default row for `id`
    fn add_data(&self, id: EntityId, key: EntityKey, context: &RowContext<'_>);

    /// Swap-remove the row at `index`. Returns false if out of range.
    fn remove_data_at(&self, index: usize) -> bool;

    /// Number of rows
    fn len(&self) -> usize;

    /// True when the store has no rows
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lock the store for pipeline-wide exclusion
    fn lock_erased(&self) -> Box<dyn LockGuard + '_>;
}

/// Mutex-guarded dense row storage
pub struct DataStore<T> {
    name: String,
    rows: Mutex<Vec<T>>,
}

impl<T: PipelineRow> DataStore<T> {
    /// Create an empty store
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: Mutex::new(Vec::new()),
        }
    }

    /// Create an empty store ready to register
    pub fn shared(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(name))
    }

    /// Lock the rows
    pub fn lock(&self) -> MutexGuard<'_, Vec<T>> {
        self.rows.lock()
    }

    /// Run `f` on one row, if it exists
    pub fn with_row<R>(&self, index: usize, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.rows.lock().get_mut(index).map(f)
    }
}

impl<T: PipelineRow> PipelineData for DataStore<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn add_data(&self, id: EntityId, key: EntityKey, context: &RowContext<'_>) {
        let row = T::new_row(id, key, context);
        self.rows.lock().push(row);
    }

    fn remove_data_at(&self, index: usize) -> bool {
        let mut rows = self.rows.lock();
        if index >= rows.len() {
            log::warn!(
                "Store '{}' has no row {} ({} rows)",
                self.name,
                index,
                rows.len()
            );
            return false;
        }
        rows.swap_remove(index);
        true
    }

    fn len(&self) -> usize {
        self.rows.lock().len()
    }

    fn lock_erased(&self) -> Box<dyn LockGuard + '_> {
        Box::new(self.rows.lock())
    }
}

impl<T> fmt::Debug for DataStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataStore")
            .field("name", &self.name)
            .field("rows", &self.rows.lock().len())
            .finish()
    }
}

struct StoreEntry {
    erased: Arc<dyn PipelineData>,
    typed: Arc<dyn Any + Send + Sync>,
}

/// Name -> store lookup shared by the pipeline and its components
#[derive(Default)]
pub struct StoreRegistry {
    entries: RwLock<Vec<StoreEntry>>,
}

impl StoreRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store. A store with the same name is replaced.
    pub fn register<T: PipelineRow>(&self, store: Arc<DataStore<T>>) {
        let entry = StoreEntry {
            erased: store.clone(),
            typed: store,
        };

        let mut entries = self.entries.write();
        let name = entry.erased.name().to_owned();
        if let Some(existing) = entries.iter_mut().find(|e| e.erased.name() == name) {
            log::warn!("Replacing pipeline data store '{}'", name);
            *existing = entry;
        } else {
            log::debug!("Registered pipeline data store '{}'", name);
            entries.push(entry);
        }
    }

    /// Typed lookup; `None` if missing or of another row type
    pub fn get<T: PipelineRow>(&self, name: &str) -> Option<Arc<DataStore<T>>> {
        let typed = self
            .entries
            .read()
            .iter()
            .find(|e| e.erased.name() == name)
            .map(|e| Arc::clone(&e.typed))?;
        typed.downcast::<DataStore<T>>().ok()
    }

    /// Erased lookup
    pub fn get_erased(&self, name: &str) -> Option<Arc<dyn PipelineData>> {
        self.entries
            .read()
            .iter()
            .find(|e| e.erased.name() == name)
            .map(|e| Arc::clone(&e.erased))
    }

    /// Snapshot of every store in registration order
    pub fn all(&self) -> Vec<Arc<dyn PipelineData>> {
        self.entries
            .read()
            .iter()
            .map(|e| Arc::clone(&e.erased))
            .collect()
    }

    /// Number of registered stores
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .entries
            .read()
            .iter()
            .map(|e| e.erased.name().to_owned())
            .collect();
        f.debug_struct("StoreRegistry").field("stores", &names).finish()
    }
}

use std::fmt::{self, Debug};
use std::hash::Hash;
use std::sync::Arc;

use foldhash::{HashMap, HashMapExt};
use parking_lot::Mutex;
use tracing::debug;
use unified_malloc::{Error, MemoryPool, Result};

use crate::PoolDescriptor;

/// Owns one memory pool per pool descriptor.
///
/// The manager is the authoritative registry of the pools of one owning context. Keys are
/// compared with the descriptor's own equality, so for [`PoolDescriptor`] all Host descriptors
/// of a context share one entry no matter which device they were enumerated for.
///
/// Registration never replaces an existing entry. When the manager is dropped, it releases
/// its reference to every distinct pool exactly once; a pool is destroyed at that point unless
/// a caller still holds a reference obtained from [`get_pool()`](Self::get_pool).
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use unified_malloc::{HostMemoryProvider, MemoryPool, NullPool, ProviderHandle};
/// use usm_pools::{ContextId, PoolDescriptor, PoolManager};
///
/// let manager = PoolManager::new();
/// let descriptor = PoolDescriptor::host(ContextId::new(1));
///
/// let provider: ProviderHandle = Arc::new(HostMemoryProvider::new());
/// let pool = MemoryPool::builder().provider(provider).build::<NullPool>(()).unwrap();
///
/// manager.add_pool(descriptor, Arc::clone(&pool)).unwrap();
/// assert_eq!(manager.get_pool(&descriptor).unwrap().id(), pool.id());
/// ```
///
/// # Thread safety
///
/// The manager is thread-safe. All operations on the registry are serialized by an internal
/// lock, so check-then-act sequences via [`get_or_create()`](Self::get_or_create) are atomic.
pub struct PoolManager<D = PoolDescriptor> {
    pools: Mutex<HashMap<D, Arc<MemoryPool>>>,
}

impl<D> PoolManager<D>
where
    D: Clone + Debug + Eq + Hash,
{
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Registers `pool` as the pool for `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if a pool is already registered for an equivalent
    /// descriptor. The existing registration is kept and `pool` is dropped.
    pub fn add_pool(&self, descriptor: D, pool: Arc<MemoryPool>) -> Result<()> {
        let mut pools = self.pools.lock();

        if let Some(existing) = pools.get(&descriptor) {
            return Err(Error::InvalidArgument {
                reason: format!(
                    "{descriptor:?} already has a registered pool ({})",
                    existing.id()
                ),
            });
        }

        debug!(descriptor = ?descriptor, pool_id = %pool.id(), "registered pool");
        pools.insert(descriptor, pool);

        Ok(())
    }

    /// Returns the pool registered for `descriptor`, if any.
    ///
    /// Absence is a normal outcome and has no side effects.
    #[must_use]
    pub fn get_pool(&self, descriptor: &D) -> Option<Arc<MemoryPool>> {
        self.pools.lock().get(descriptor).map(Arc::clone)
    }

    /// Returns the pool registered for `descriptor`, creating and registering it first if there
    /// is none.
    ///
    /// The registry stays locked while `create` runs, so concurrent callers for the same
    /// descriptor never create more than one pool. `create` must not call back into this
    /// manager.
    ///
    /// # Errors
    ///
    /// Passes through any error from `create`; nothing is registered in that case.
    pub fn get_or_create<F>(&self, descriptor: D, create: F) -> Result<Arc<MemoryPool>>
    where
        F: FnOnce(&D) -> Result<Arc<MemoryPool>>,
    {
        let mut pools = self.pools.lock();

        if let Some(existing) = pools.get(&descriptor) {
            return Ok(Arc::clone(existing));
        }

        let pool = create(&descriptor)?;

        debug!(descriptor = ?descriptor, pool_id = %pool.id(), "created pool on first use");
        pools.insert(descriptor, Arc::clone(&pool));

        Ok(pool)
    }

    /// Number of registered pools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.lock().len()
    }

    /// Whether no pool is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pools.lock().is_empty()
    }

    /// The descriptors of all registered pools, in no particular order.
    #[must_use]
    pub fn descriptors(&self) -> Vec<D> {
        self.pools.lock().keys().cloned().collect()
    }
}

impl<D> Default for PoolManager<D>
where
    D: Clone + Debug + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<D> Debug for PoolManager<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolManager")
            .field("pool_count", &self.pools.lock().len())
            .finish()
    }
}

impl<D> Drop for PoolManager<D> {
    fn drop(&mut self) {
        let pools = self.pools.get_mut();

        if !pools.is_empty() {
            debug!(pool_count = pools.len(), "tearing down pool manager");
        }

        // Each entry holds one reference to a distinct pool; draining releases each once.
        pools.clear();
    }
}

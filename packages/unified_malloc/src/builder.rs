use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::{MemoryPool, MemoryTracker, PoolKind, ProviderHandle, Result};

/// Builder for creating an instance of [`MemoryPool`].
///
/// At least one provider is mandatory. A tracker is optional; without one the pool's allocations
/// cannot be resolved by pointer.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use unified_malloc::{HostMemoryProvider, MemoryPool, MemoryTracker, ProviderHandle, ProxyPool};
///
/// let tracker = Arc::new(MemoryTracker::new());
/// let provider: ProviderHandle = Arc::new(HostMemoryProvider::new());
///
/// let pool = MemoryPool::builder()
///     .provider(provider)
///     .tracker(Arc::clone(&tracker))
///     .build::<ProxyPool>(())
///     .unwrap();
///
/// let ptr = pool.malloc(8).unwrap();
/// assert_eq!(tracker.pool_by_ptr(ptr.as_ptr()).unwrap().id(), pool.id());
/// pool.free(ptr).unwrap();
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) and can be safely transferred between threads,
/// allowing pool configuration to happen on different threads than where the pool is used.
/// However, it is not thread-safe ([`Sync`]) as it contains mutable configuration state.
#[derive(Debug)]
#[must_use]
pub struct MemoryPoolBuilder {
    providers: Vec<ProviderHandle>,
    tracker: Option<Arc<MemoryTracker>>,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

impl MemoryPoolBuilder {
    pub(crate) fn new() -> Self {
        Self {
            providers: Vec::new(),
            tracker: None,
            _not_sync: PhantomData,
        }
    }

    /// Appends a provider to the pool's ordered provider list.
    pub fn provider(mut self, provider: ProviderHandle) -> Self {
        self.providers.push(provider);
        self
    }

    /// Appends several providers to the pool's ordered provider list.
    pub fn providers(mut self, providers: impl IntoIterator<Item = ProviderHandle>) -> Self {
        self.providers.extend(providers);
        self
    }

    /// Records every allocation of the pool in `tracker`, making it resolvable by pointer.
    pub fn tracker(mut self, tracker: Arc<MemoryTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Builds a pool of kind `K`, passing `params` to [`PoolKind::initialize()`].
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArgument`][crate::Error::InvalidArgument] if no provider was added.
    /// * [`Error::OutOfHostMemory`][crate::Error::OutOfHostMemory] if the provider list cannot
    ///   be allocated.
    /// * Any error returned by [`PoolKind::initialize()`], unchanged.
    ///
    /// No provider wrapper or pool outlives a failed build.
    pub fn build<K: PoolKind>(self, params: K::Params) -> Result<Arc<MemoryPool>> {
        MemoryPool::create::<K>(self.providers, self.tracker, params)
    }
}

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::{
    Error, MemoryPoolBuilder, MemoryTracker, PoolKind, PoolOps, ProviderHandle, Result,
    TrackingProvider,
};

/// Global counter for generating unique pool IDs.
static POOL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`MemoryPool`].
///
/// Tracked allocations are tagged with the ID of the pool whose providers made them.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PoolId(u64);

impl PoolId {
    pub(crate) fn next() -> Self {
        Self(POOL_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The numeric value of the ID.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool#{}", self.0)
    }
}

/// A provider slot of a pool. Tracked slots own a wrapper around the caller's provider.
#[derive(Debug)]
enum OwnedProvider {
    Untracked(ProviderHandle),
    Tracked(Arc<TrackingProvider>),
}

impl OwnedProvider {
    /// The handle the pool strategy allocates through.
    fn handle(&self) -> ProviderHandle {
        match self {
            Self::Untracked(provider) => Arc::clone(provider),
            Self::Tracked(wrapper) => Arc::clone(wrapper) as ProviderHandle,
        }
    }

    /// The provider the caller supplied, with any tracking wrapper removed.
    fn upstream(&self) -> &ProviderHandle {
        match self {
            Self::Untracked(provider) => provider,
            Self::Tracked(wrapper) => wrapper.upstream(),
        }
    }
}

/// An allocation front-end that combines a pool strategy with one or more memory providers.
///
/// Create pools via [`MemoryPool::builder()`] or, to share pointer tracking between pools, via
/// [`Framework::pool_builder()`][crate::Framework::pool_builder]. Pools are handed out as
/// `Arc<MemoryPool>` and are destroyed when the last reference is dropped: the pool strategy
/// is finalized first, then the pool's own provider wrappers are released.
///
/// Allocations must not be used after their pool has been destroyed.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use unified_malloc::{HostMemoryProvider, MemoryPool, ProviderHandle, ProxyPool};
///
/// let provider: ProviderHandle = Arc::new(HostMemoryProvider::new());
/// let pool = MemoryPool::builder()
///     .provider(provider)
///     .build::<ProxyPool>(())
///     .unwrap();
///
/// let ptr = pool.calloc(4, 16).unwrap();
/// assert_eq!(pool.malloc_usable_size(ptr), 64);
/// pool.free(ptr).unwrap();
/// ```
///
/// # Thread safety
///
/// Pools are thread-safe ([`Send`] and [`Sync`]). Whether concurrent allocation calls proceed
/// in parallel depends on the pool kind.
pub struct MemoryPool {
    id: PoolId,

    // Declared before `providers` because the strategy may still hold references to the
    // provider wrappers and must be gone before they are.
    ops: Box<dyn PoolOps>,

    providers: Vec<OwnedProvider>,

    /// Present if allocations made by this pool are tracked for pointer-based lookup.
    tracker: Option<Arc<MemoryTracker>>,
}

impl MemoryPool {
    /// Creates a builder for configuring and constructing a [`MemoryPool`].
    ///
    /// Pools created through this builder do not track their allocations unless a tracker is
    /// explicitly supplied via [`MemoryPoolBuilder::tracker()`].
    pub fn builder() -> MemoryPoolBuilder {
        MemoryPoolBuilder::new()
    }

    /// Builds a pool of kind `K` on top of `providers`.
    ///
    /// On failure every provider wrapper created so far is dropped before returning, leaving
    /// the caller's providers exactly as they were.
    pub(crate) fn create<K: PoolKind>(
        providers: Vec<ProviderHandle>,
        tracker: Option<Arc<MemoryTracker>>,
        params: K::Params,
    ) -> Result<Arc<Self>> {
        if providers.is_empty() {
            return Err(Error::invalid_argument(
                "a memory pool requires at least one memory provider",
            ));
        }

        let id = PoolId::next();

        let mut owned = Vec::new();
        if owned.try_reserve_exact(providers.len()).is_err() {
            return Err(Error::OutOfHostMemory);
        }

        for provider in providers {
            owned.push(match &tracker {
                Some(tracker) => OwnedProvider::Tracked(Arc::new(TrackingProvider::new(
                    provider,
                    id,
                    Arc::clone(tracker),
                ))),
                None => OwnedProvider::Untracked(provider),
            });
        }

        let handles = owned.iter().map(OwnedProvider::handle).collect::<Vec<_>>();

        // On error, `owned` and `handles` go out of scope here and take the wrappers with them.
        let ops = K::initialize(&handles, params).inspect_err(|e| {
            debug!(pool_id = %id, error = %e, "memory pool initialization failed");
        })?;

        let pool = Arc::new(Self {
            id,
            ops: Box::new(ops),
            providers: owned,
            tracker,
        });

        if let Some(tracker) = &pool.tracker {
            tracker.register_pool(&pool);
        }

        debug!(
            pool_id = %id,
            provider_count = pool.providers.len(),
            tracked = pool.is_tracked(),
            "memory pool created"
        );

        Ok(pool)
    }

    /// The process-unique identity of this pool.
    #[must_use]
    pub fn id(&self) -> PoolId {
        self.id
    }

    /// Whether allocations made by this pool are recorded for pointer-based lookup.
    #[must_use]
    pub fn is_tracked(&self) -> bool {
        self.tracker.is_some()
    }

    /// Allocates `size` bytes.
    ///
    /// Returns `None` on failure; [`last_allocation_error()`](Self::last_allocation_error) then
    /// describes the failure.
    #[must_use]
    pub fn malloc(&self, size: usize) -> Option<NonNull<u8>> {
        self.ops.malloc(size)
    }

    /// Allocates `size` bytes aligned to `alignment`.
    #[must_use]
    pub fn aligned_malloc(&self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        self.ops.aligned_malloc(size, alignment)
    }

    /// Allocates zero-initialized memory for `num` elements of `size` bytes each.
    #[must_use]
    pub fn calloc(&self, num: usize, size: usize) -> Option<NonNull<u8>> {
        self.ops.calloc(num, size)
    }

    /// Resizes an allocation made by this pool, or allocates if `ptr` is `None`.
    #[must_use]
    pub fn realloc(&self, ptr: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
        self.ops.realloc(ptr, size)
    }

    /// The number of usable bytes behind an allocation made by this pool.
    #[must_use]
    pub fn malloc_usable_size(&self, ptr: NonNull<u8>) -> usize {
        self.ops.malloc_usable_size(ptr)
    }

    /// Releases an allocation made by this pool.
    ///
    /// The caller must know that this pool owns `ptr`. If it does not, use
    /// [`Framework::free()`][crate::Framework::free] instead.
    ///
    /// # Errors
    ///
    /// Passes through whatever error the pool strategy or its providers report.
    pub fn free(&self, ptr: NonNull<u8>) -> Result<()> {
        self.ops.free(ptr)
    }

    /// The error behind the most recent failed allocation of this pool, if any.
    #[must_use]
    pub fn last_allocation_error(&self) -> Option<Error> {
        self.ops.last_allocation_error()
    }

    /// The number of providers backing this pool. Always at least one.
    #[must_use]
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// The providers backing this pool, as supplied by the caller.
    ///
    /// Tracking wrappers are not visible here; the original providers are returned.
    #[must_use]
    pub fn providers(&self) -> Vec<ProviderHandle> {
        self.providers
            .iter()
            .map(|provider| Arc::clone(provider.upstream()))
            .collect()
    }

    /// Copies the providers backing this pool into `out`, returning how many were written.
    ///
    /// Slots of `out` beyond the provider count are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `out` is shorter than
    /// [`provider_count()`](Self::provider_count).
    pub fn fill_providers(&self, out: &mut [Option<ProviderHandle>]) -> Result<usize> {
        if out.len() < self.providers.len() {
            return Err(Error::invalid_argument(format!(
                "output buffer holds {} providers but the pool has {}",
                out.len(),
                self.providers.len()
            )));
        }

        for (slot, provider) in out.iter_mut().zip(&self.providers) {
            *slot = Some(Arc::clone(provider.upstream()));
        }

        Ok(self.providers.len())
    }
}

impl fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPool")
            .field("id", &self.id)
            .field("ops", &self.ops)
            .field("provider_count", &self.providers.len())
            .field("tracked", &self.is_tracked())
            .finish_non_exhaustive()
    }
}

impl Drop for MemoryPool {
    fn drop(&mut self) {
        self.ops.finalize();

        if let Some(tracker) = &self.tracker {
            let stale = tracker.release_pool(self.id);

            if stale > 0 {
                warn!(
                    pool_id = %self.id,
                    count = stale,
                    "memory pool destroyed with tracked allocations still live, forgetting them"
                );
            }
        }

        debug!(pool_id = %self.id, "memory pool destroyed");
    }
}

use std::collections::BTreeMap;
use std::fmt;
use std::ptr::NonNull;
use std::sync::{Arc, Weak};

use foldhash::{HashMap, HashMapExt};
use parking_lot::RwLock;
use tracing::trace;

use crate::{Error, MemoryPool, PoolId, Result};

/// An address range handed out by a tracked provider, together with the pool that owns it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TrackedRange {
    base: usize,
    size: usize,
    pool_id: PoolId,
}

impl TrackedRange {
    /// The first address of the range.
    #[must_use]
    pub fn base(&self) -> usize {
        self.base
    }

    /// The length of the range in bytes, as requested from the provider.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// The pool whose providers allocated this range.
    #[must_use]
    pub fn pool_id(&self) -> PoolId {
        self.pool_id
    }

    /// Whether `address` falls inside the range.
    ///
    /// A zero-sized range still covers its base address, as the provider handed out that address.
    #[must_use]
    pub fn contains(&self, address: usize) -> bool {
        address
            .checked_sub(self.base)
            .is_some_and(|offset| offset < self.size.max(1))
    }
}

#[derive(Default)]
struct TrackerState {
    /// Keyed by range base. Ranges never overlap, so the containing range of any address is the
    /// one with the greatest base not above that address, if it extends far enough.
    ranges: BTreeMap<usize, TrackedRange>,

    /// Pools that have finished construction and can be handed out by pointer lookups.
    pools: HashMap<PoolId, Weak<MemoryPool>>,
}

/// Concurrent index that maps any tracked address back to the range and pool that own it.
///
/// Pools created with pointer tracking enabled wrap each of their providers so that every
/// allocation and release passes through the tracker. One tracker is shared by every pool of a
/// [`Framework`][crate::Framework] and may be used from any number of threads at once.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use unified_malloc::{Framework, HostMemoryProvider, ProviderHandle, ProxyPool};
///
/// let framework = Framework::with_tracking();
/// let provider: ProviderHandle = Arc::new(HostMemoryProvider::new());
///
/// let pool = framework
///     .pool_builder()
///     .provider(provider)
///     .build::<ProxyPool>(())
///     .unwrap();
///
/// let ptr = pool.malloc(64).unwrap();
///
/// let tracker = framework.tracker().unwrap();
/// let range = tracker.find(ptr.as_ptr().wrapping_add(10)).unwrap();
/// assert_eq!(range.pool_id(), pool.id());
///
/// pool.free(ptr).unwrap();
/// assert!(tracker.find(ptr.as_ptr()).is_none());
/// ```
pub struct MemoryTracker {
    state: RwLock<TrackerState>,
}

impl MemoryTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(TrackerState {
                ranges: BTreeMap::new(),
                pools: HashMap::new(),
            }),
        }
    }

    /// Number of live tracked ranges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().ranges.len()
    }

    /// Whether no ranges are currently tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().ranges.is_empty()
    }

    /// Finds the tracked range containing `ptr`, which need not be the base of the range.
    #[must_use]
    pub fn find(&self, ptr: *const u8) -> Option<TrackedRange> {
        let address = ptr as usize;
        let state = self.state.read();

        Self::containing(&state.ranges, address).copied()
    }

    /// Finds the live pool owning the allocation that contains `ptr`.
    ///
    /// Returns `None` if the address is not tracked or if the owning pool has already been
    /// destroyed.
    #[must_use]
    pub fn pool_by_ptr(&self, ptr: *const u8) -> Option<Arc<MemoryPool>> {
        let address = ptr as usize;
        let state = self.state.read();

        let range = Self::containing(&state.ranges, address)?;
        state.pools.get(&range.pool_id).and_then(Weak::upgrade)
    }

    fn containing(
        ranges: &BTreeMap<usize, TrackedRange>,
        address: usize,
    ) -> Option<&TrackedRange> {
        ranges
            .range(..=address)
            .next_back()
            .map(|(_, range)| range)
            .filter(|range| range.contains(address))
    }

    /// Records a new allocation of `size` bytes at `ptr` owned by `pool_id`.
    pub(crate) fn add(&self, pool_id: PoolId, ptr: NonNull<u8>, size: usize) -> Result<()> {
        let base = ptr.as_ptr() as usize;
        let new_range = TrackedRange {
            base,
            size,
            pool_id,
        };

        let mut state = self.state.write();

        // Providers promise never to hand out overlapping live ranges. If one does anyway, we
        // refuse to track it instead of corrupting the index.
        let overlaps_previous = state
            .ranges
            .range(..=base)
            .next_back()
            .is_some_and(|(_, existing)| existing.contains(base));

        let overlaps_next = state
            .ranges
            .range(base..)
            .next()
            .is_some_and(|(&next_base, _)| new_range.contains(next_base));

        if overlaps_previous || overlaps_next {
            return Err(Error::invalid_argument(format!(
                "allocation at {base:#x} of {size} bytes overlaps a live tracked allocation"
            )));
        }

        state.ranges.insert(base, new_range);
        trace!(%pool_id, base, size, "tracked allocation");

        Ok(())
    }

    /// Removes the range that was recorded for exactly this base, size and pool.
    pub(crate) fn remove(
        &self,
        pool_id: PoolId,
        ptr: NonNull<u8>,
        size: usize,
    ) -> Result<TrackedRange> {
        let base = ptr.as_ptr() as usize;

        let mut state = self.state.write();

        let Some(existing) = state.ranges.get(&base).copied() else {
            return Err(Error::invalid_argument(format!(
                "release of untracked address {base:#x}"
            )));
        };

        if existing.pool_id != pool_id || existing.size != size {
            return Err(Error::invalid_argument(format!(
                "release of {base:#x} ({size} bytes, {pool_id}) does not match the tracked allocation ({} bytes, {})",
                existing.size, existing.pool_id
            )));
        }

        state.ranges.remove(&base);
        trace!(%pool_id, base, size, "untracked allocation");

        Ok(existing)
    }

    /// Makes a fully constructed pool resolvable through its pool ID.
    pub(crate) fn register_pool(&self, pool: &Arc<MemoryPool>) {
        self.state
            .write()
            .pools
            .insert(pool.id(), Arc::downgrade(pool));
    }

    /// Forgets a destroyed pool along with every range still tagged with its ID.
    ///
    /// Pool kinds are not required to release their allocations when finalized, and the
    /// providers may hand the same addresses to other pools afterwards. Returns the number of
    /// ranges that were still tracked.
    pub(crate) fn release_pool(&self, pool_id: PoolId) -> usize {
        let mut state = self.state.write();

        state.pools.remove(&pool_id);

        let before = state.ranges.len();
        state.ranges.retain(|_, range| range.pool_id != pool_id);
        let stale = before.saturating_sub(state.ranges.len());

        if stale > 0 {
            trace!(%pool_id, stale, "dropped ranges of destroyed pool");
        }

        stale
    }
}

impl Default for MemoryTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();

        f.debug_struct("MemoryTracker")
            .field("range_count", &state.ranges.len())
            .field("pool_count", &state.pools.len())
            .finish()
    }
}

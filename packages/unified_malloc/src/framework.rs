use std::cell::Cell;
use std::env;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::{Error, MemoryPool, MemoryPoolBuilder, MemoryTracker, Result};

/// Environment variable consulted by [`Framework::from_env()`].
///
/// The values `0`, `false` and `off` (in any letter case) disable pointer tracking. Any other
/// value, or the variable being absent, enables it.
pub const TRACKING_ENV_VAR: &str = "UNIFIED_MALLOC_TRACKING";

/// The entry point for creating pools that share one pointer tracking configuration.
///
/// With tracking enabled, the framework owns a [`MemoryTracker`] shared by every pool built via
/// [`pool_builder()`](Self::pool_builder). This makes it possible to release memory given only
/// a pointer, via [`free()`](Self::free), without knowing which pool allocated it.
///
/// Cloning a framework is cheap and the clones share the same tracker.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use unified_malloc::{Framework, HostMemoryProvider, ProviderHandle, ProxyPool};
///
/// let framework = Framework::with_tracking();
///
/// let host: ProviderHandle = Arc::new(HostMemoryProvider::new());
/// let first = framework
///     .pool_builder()
///     .provider(Arc::clone(&host))
///     .build::<ProxyPool>(())
///     .unwrap();
/// let second = framework
///     .pool_builder()
///     .provider(host)
///     .build::<ProxyPool>(())
///     .unwrap();
///
/// let a = first.malloc(32).unwrap();
/// let b = second.malloc(32).unwrap();
///
/// // No need to remember which pool each pointer came from.
/// framework.free(a).unwrap();
/// framework.free(b).unwrap();
/// ```
#[derive(Clone, Debug)]
pub struct Framework {
    tracker: Option<Arc<MemoryTracker>>,
}

impl Framework {
    /// Creates a builder for configuring a [`Framework`].
    pub fn builder() -> FrameworkBuilder {
        FrameworkBuilder::new()
    }

    /// Creates a framework whose pools track their allocations in a new, private tracker.
    #[must_use]
    pub fn with_tracking() -> Self {
        Self::builder().tracking(true).build()
    }

    /// Creates a framework whose pools do not track their allocations.
    #[must_use]
    pub fn without_tracking() -> Self {
        Self::builder().tracking(false).build()
    }

    /// Creates a framework with tracking configured by the [`TRACKING_ENV_VAR`] environment
    /// variable.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Reads process environment; the parsing is tested separately.
    pub fn from_env() -> Self {
        let value = env::var(TRACKING_ENV_VAR).ok();
        Self::builder()
            .tracking(tracking_enabled_by(value.as_deref()))
            .build()
    }

    /// Whether pools created through this framework track their allocations.
    #[must_use]
    pub fn is_tracking_enabled(&self) -> bool {
        self.tracker.is_some()
    }

    /// The tracker shared by this framework's pools, if tracking is enabled.
    #[must_use]
    pub fn tracker(&self) -> Option<&Arc<MemoryTracker>> {
        self.tracker.as_ref()
    }

    /// Creates a pool builder preconfigured with this framework's tracking setup.
    pub fn pool_builder(&self) -> MemoryPoolBuilder {
        match &self.tracker {
            Some(tracker) => MemoryPool::builder().tracker(Arc::clone(tracker)),
            None => MemoryPool::builder(),
        }
    }

    /// Finds the pool that owns the allocation containing `ptr`.
    ///
    /// `ptr` may point anywhere inside an allocation. Returns `Ok(None)` if no live pool of this
    /// framework owns the address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSupported`] if tracking is disabled.
    pub fn pool_by_ptr(&self, ptr: *const u8) -> Result<Option<Arc<MemoryPool>>> {
        let tracker = self.tracker.as_ref().ok_or(Error::NotSupported {
            operation: "pool lookup by pointer without pointer tracking",
        })?;

        Ok(tracker.pool_by_ptr(ptr))
    }

    /// Releases an allocation made by any tracked pool of this framework.
    ///
    /// # Errors
    ///
    /// * [`Error::NotSupported`] if tracking is disabled, or if no live pool owns `ptr`, e.g.
    ///   because it was already released or never came from a tracked pool.
    /// * Any error reported by the owning pool's release logic.
    pub fn free(&self, ptr: NonNull<u8>) -> Result<()> {
        let Some(pool) = self.pool_by_ptr(ptr.as_ptr())? else {
            warn!(
                address = ptr.as_ptr() as usize,
                "free of a pointer that no tracked pool owns"
            );

            return Err(Error::NotSupported {
                operation: "free of a pointer not owned by any tracked memory pool",
            });
        };

        pool.free(ptr)
    }
}

impl Default for Framework {
    fn default() -> Self {
        Self::with_tracking()
    }
}

/// Builder for creating an instance of [`Framework`].
///
/// Tracking is enabled by default.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use unified_malloc::{Framework, MemoryTracker};
///
/// // Two frameworks that resolve each other's pointers.
/// let tracker = Arc::new(MemoryTracker::new());
/// let first = Framework::builder().tracker(Arc::clone(&tracker)).build();
/// let second = Framework::builder().tracker(tracker).build();
///
/// assert!(first.is_tracking_enabled());
/// assert!(second.is_tracking_enabled());
/// ```
#[derive(Debug)]
#[must_use]
pub struct FrameworkBuilder {
    tracking: bool,
    tracker: Option<Arc<MemoryTracker>>,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

impl FrameworkBuilder {
    fn new() -> Self {
        Self {
            tracking: true,
            tracker: None,
            _not_sync: PhantomData,
        }
    }

    /// Enables or disables pointer tracking.
    pub fn tracking(mut self, enabled: bool) -> Self {
        self.tracking = enabled;
        self
    }

    /// Enables pointer tracking using an existing tracker instead of creating a new one.
    pub fn tracker(mut self, tracker: Arc<MemoryTracker>) -> Self {
        self.tracking = true;
        self.tracker = Some(tracker);
        self
    }

    /// Builds the framework.
    pub fn build(self) -> Framework {
        let tracker = self
            .tracking
            .then(|| self.tracker.unwrap_or_else(|| Arc::new(MemoryTracker::new())));

        debug!(tracking = tracker.is_some(), "allocation framework created");

        Framework { tracker }
    }
}

fn tracking_enabled_by(value: Option<&str>) -> bool {
    match value {
        None => true,
        Some(value) => {
            let value = value.trim();
            let disabled = value == "0"
                || value.eq_ignore_ascii_case("false")
                || value.eq_ignore_ascii_case("off");

            !disabled
        }
    }
}

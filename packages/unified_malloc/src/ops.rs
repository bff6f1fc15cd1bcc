use std::fmt::Debug;
use std::ptr::NonNull;

use crate::{Error, ProviderHandle, Result};

/// A pool allocation strategy, i.e. the private state of one [`MemoryPool`][crate::MemoryPool].
///
/// The pool forwards every allocation call to this object as-is. Implementations decide the
/// allocation policy (size classes, slabs, direct forwarding, ...) and draw memory from the
/// providers they were given in [`PoolKind::initialize()`].
///
/// Allocation methods return `None` on failure and record the reason, which callers can then
/// retrieve via [`last_allocation_error()`](Self::last_allocation_error).
///
/// # Thread safety
///
/// The trait requires `Send + Sync` so that pools can be shared, but whether concurrent calls
/// are efficient (or merely serialized) is up to each implementation and must be documented
/// by it.
pub trait PoolOps: Debug + Send + Sync {
    /// Allocates `size` bytes with the strategy's default alignment.
    fn malloc(&self, size: usize) -> Option<NonNull<u8>>;

    /// Allocates `size` bytes aligned to `alignment`.
    fn aligned_malloc(&self, size: usize, alignment: usize) -> Option<NonNull<u8>>;

    /// Allocates zero-initialized memory for `num` elements of `size` bytes each.
    fn calloc(&self, num: usize, size: usize) -> Option<NonNull<u8>>;

    /// Resizes an allocation, moving it if necessary. `None` as input behaves like `malloc()`.
    fn realloc(&self, ptr: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>>;

    /// Returns the number of usable bytes behind an allocation made by this pool.
    fn malloc_usable_size(&self, ptr: NonNull<u8>) -> usize;

    /// Releases an allocation made by this pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the pointer does not belong to the pool or if a provider fails to
    /// release the memory.
    fn free(&self, ptr: NonNull<u8>) -> Result<()>;

    /// The error behind the most recent failed allocation, if any.
    fn last_allocation_error(&self) -> Option<Error>;

    /// Releases pool-private resources. Called exactly once, right before the pool releases
    /// its providers.
    fn finalize(&mut self) {}
}

/// A kind of memory pool, able to build [`PoolOps`] on top of a set of providers.
///
/// This is the constructor half of the pool contract; the [`PoolOps`] it returns are the rest.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use unified_malloc::{HostMemoryProvider, MemoryPool, NullPool, ProviderHandle};
///
/// let provider: ProviderHandle = Arc::new(HostMemoryProvider::new());
/// let pool = MemoryPool::builder().provider(provider).build::<NullPool>(()).unwrap();
///
/// assert!(pool.malloc(16).is_none());
/// ```
pub trait PoolKind {
    /// Parameters that configure a new pool of this kind.
    type Params;

    /// The pool-private state created by [`initialize()`](Self::initialize).
    type Ops: PoolOps + 'static;

    /// Builds the pool state on top of `providers`, which are the pool's own (possibly
    /// tracking-wrapped) provider handles in the order they were given to the pool builder.
    ///
    /// # Errors
    ///
    /// Any error returned here fails pool creation and is passed to the caller unchanged.
    fn initialize(providers: &[ProviderHandle], params: Self::Params) -> Result<Self::Ops>;
}

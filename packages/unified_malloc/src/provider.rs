use std::fmt::Debug;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::Result;

/// A low-level allocator that memory pools draw their memory from.
///
/// A provider hands out raw address ranges, e.g. from the operating system or from a device
/// driver. Pools carve those ranges up according to their own policy. Providers are shared
/// between the caller and any pools built on top of them via [`ProviderHandle`].
///
/// Initialization of provider-specific state happens in the constructor of the implementing type.
///
/// # Contract
///
/// * A provider must never return overlapping ranges for two allocations that are live at the
///   same time. Pointer tracking relies on this.
/// * `free()` receives the same `size` that was passed to the `alloc()` call that produced the
///   address.
///
/// # Thread safety
///
/// Providers may be called concurrently from any thread, as pools are shared between threads.
pub trait MemoryProvider: Debug + Send + Sync {
    /// Allocates `size` bytes aligned to `alignment`.
    ///
    /// An `alignment` of zero means the provider may choose its default alignment.
    ///
    /// # Errors
    ///
    /// Returns the provider's own error if the memory cannot be allocated.
    fn alloc(&self, size: usize, alignment: usize) -> Result<NonNull<u8>>;

    /// Releases memory previously returned by [`alloc()`](Self::alloc) on this provider.
    ///
    /// # Errors
    ///
    /// Returns the provider's own error if the memory cannot be released.
    fn free(&self, ptr: NonNull<u8>, size: usize) -> Result<()>;

    /// Returns the native error code of the most recent failed operation, or zero if none
    /// has failed.
    fn last_native_error(&self) -> i32;

    /// A short human-readable name of the provider, used in diagnostics.
    fn name(&self) -> &str;
}

/// A shared handle to a memory provider.
///
/// The caller keeps its own handle when giving one to a pool, so a pool never takes away a
/// provider that the caller created.
pub type ProviderHandle = Arc<dyn MemoryProvider>;

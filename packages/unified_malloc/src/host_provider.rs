use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, Ordering};

use foldhash::{HashMap, HashMapExt};
use parking_lot::Mutex;

use crate::{Error, MemoryProvider, Result};

/// Alignment used when the caller lets the provider choose.
const DEFAULT_ALIGNMENT: usize = 16;

/// Native error code reported when the system allocator returns null.
pub const HOST_OUT_OF_MEMORY: i32 = 12;

const NAME: &str = "host";

/// A provider that serves host memory from the Rust global allocator.
///
/// The provider remembers the layout of every live allocation because the provider contract only
/// passes the size back on release, not the alignment.
///
/// # Thread safety
///
/// The provider is thread-safe and may be shared by any number of pools.
#[derive(Debug)]
pub struct HostMemoryProvider {
    live: Mutex<HashMap<usize, Layout>>,
    last_error: AtomicI32,
}

impl HostMemoryProvider {
    /// Creates a provider with no live allocations.
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: Mutex::new(HashMap::new()),
            last_error: AtomicI32::new(0),
        }
    }

    /// Number of allocations made by this provider that have not been released yet.
    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.live.lock().len()
    }
}

impl Default for HostMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider for HostMemoryProvider {
    fn alloc(&self, size: usize, alignment: usize) -> Result<NonNull<u8>> {
        let alignment = if alignment == 0 {
            DEFAULT_ALIGNMENT
        } else {
            alignment
        };

        // The global allocator does not accept zero-sized layouts, so a zero-sized request
        // still reserves one byte to produce a unique address.
        let layout = Layout::from_size_align(size.max(1), alignment).map_err(|e| {
            Error::invalid_argument(format!(
                "cannot allocate {size} bytes with alignment {alignment}: {e}"
            ))
        })?;

        // SAFETY: The layout has a non-zero size.
        let ptr = unsafe { alloc::alloc(layout) };

        let Some(ptr) = NonNull::new(ptr) else {
            self.last_error.store(HOST_OUT_OF_MEMORY, Ordering::Relaxed);

            return Err(Error::Provider {
                provider: NAME.to_string(),
                code: HOST_OUT_OF_MEMORY,
            });
        };

        self.live.lock().insert(ptr.as_ptr() as usize, layout);

        Ok(ptr)
    }

    fn free(&self, ptr: NonNull<u8>, size: usize) -> Result<()> {
        let address = ptr.as_ptr() as usize;

        let layout = {
            let mut live = self.live.lock();

            let Some(layout) = live.get(&address).copied() else {
                return Err(Error::invalid_argument(format!(
                    "release of {address:#x} which was not allocated by this provider"
                )));
            };

            if layout.size() != size.max(1) {
                return Err(Error::invalid_argument(format!(
                    "release of {address:#x} with size {size} but it was allocated with size {}",
                    layout.size()
                )));
            }

            live.remove(&address);
            layout
        };

        // SAFETY: The pointer was returned by `alloc::alloc` with this exact layout and we
        // just removed it from the live set, so it cannot be released twice.
        unsafe {
            alloc::dealloc(ptr.as_ptr(), layout);
        }

        Ok(())
    }

    fn last_native_error(&self) -> i32 {
        self.last_error.load(Ordering::Relaxed)
    }

    fn name(&self) -> &str {
        NAME
    }
}

impl Drop for HostMemoryProvider {
    fn drop(&mut self) {
        for (address, layout) in self.live.get_mut().drain() {
            // SAFETY: Every entry in the live set was returned by `alloc::alloc` with this
            // layout and has not been released yet. Nobody can use the provider anymore.
            unsafe {
                alloc::dealloc(address as *mut u8, layout);
            }
        }
    }
}

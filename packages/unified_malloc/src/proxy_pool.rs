use std::ptr::{self, NonNull};
use std::sync::Arc;

use foldhash::{HashMap, HashMapExt};
use parking_lot::Mutex;
use tracing::warn;

use crate::{Error, PoolKind, PoolOps, ProviderHandle, Result};

/// A pool kind that forwards every allocation directly to its first provider.
///
/// The pool adds no caching of its own. It remembers the size and alignment of each live
/// allocation so that releases reach the provider with the size the provider handed out and
/// reallocations keep the alignment the caller asked for.
///
/// # Thread safety
///
/// Calls may be made concurrently from any thread. Bookkeeping is guarded by a lock held only
/// briefly around each map update; provider calls happen outside the lock. The last allocation
/// error is shared by all threads using the pool.
#[derive(Debug)]
pub struct ProxyPool {
    provider: ProviderHandle,
    live: Mutex<HashMap<usize, LiveAllocation>>,
    last_error: Mutex<Option<Error>>,
}

#[derive(Clone, Copy, Debug)]
struct LiveAllocation {
    size: usize,

    // Zero means the provider's default.
    alignment: usize,
}

impl PoolKind for ProxyPool {
    type Params = ();
    type Ops = Self;

    fn initialize(providers: &[ProviderHandle], _params: Self::Params) -> Result<Self::Ops> {
        let provider = providers.first().ok_or_else(|| {
            Error::invalid_argument("a proxy pool requires at least one memory provider")
        })?;

        Ok(Self {
            provider: Arc::clone(provider),
            live: Mutex::new(HashMap::new()),
            last_error: Mutex::new(None),
        })
    }
}

impl ProxyPool {
    fn record_failure(&self, error: Error) -> Option<NonNull<u8>> {
        *self.last_error.lock() = Some(error);
        None
    }

    fn allocate(&self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        match self.provider.alloc(size, alignment) {
            Ok(ptr) => {
                self.live
                    .lock()
                    .insert(ptr.as_ptr() as usize, LiveAllocation { size, alignment });
                Some(ptr)
            }
            Err(e) => self.record_failure(e),
        }
    }
}

impl PoolOps for ProxyPool {
    fn malloc(&self, size: usize) -> Option<NonNull<u8>> {
        self.allocate(size, 0)
    }

    fn aligned_malloc(&self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        self.allocate(size, alignment)
    }

    fn calloc(&self, num: usize, size: usize) -> Option<NonNull<u8>> {
        let Some(total) = num.checked_mul(size) else {
            return self.record_failure(Error::invalid_argument(format!(
                "calloc of {num} elements of {size} bytes overflows"
            )));
        };

        let ptr = self.allocate(total, 0)?;

        // SAFETY: The provider just handed us `total` writable bytes at `ptr`.
        unsafe {
            ptr::write_bytes(ptr.as_ptr(), 0, total);
        }

        Some(ptr)
    }

    fn realloc(&self, ptr: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
        let Some(old_ptr) = ptr else {
            return self.malloc(size);
        };

        let Some(old) = self.live.lock().get(&(old_ptr.as_ptr() as usize)).copied() else {
            return self.record_failure(Error::invalid_argument(format!(
                "realloc of {:#x} which was not allocated by this pool",
                old_ptr.as_ptr() as usize
            )));
        };

        let new_ptr = self.allocate(size, old.alignment)?;

        // SAFETY: Both allocations are live, belong to us and are distinct provider ranges,
        // so they cannot overlap. We copy no more than either of them holds.
        unsafe {
            ptr::copy_nonoverlapping(old_ptr.as_ptr(), new_ptr.as_ptr(), old.size.min(size));
        }

        if let Err(e) = self.free(old_ptr) {
            warn!(error = %e, "failed to release the old allocation after realloc");
        }

        Some(new_ptr)
    }

    fn malloc_usable_size(&self, ptr: NonNull<u8>) -> usize {
        self.live
            .lock()
            .get(&(ptr.as_ptr() as usize))
            .map_or(0, |allocation| allocation.size)
    }

    fn free(&self, ptr: NonNull<u8>) -> Result<()> {
        let address = ptr.as_ptr() as usize;

        let allocation = self.live.lock().remove(&address).ok_or_else(|| {
            Error::invalid_argument(format!(
                "release of {address:#x} which was not allocated by this pool"
            ))
        })?;

        self.provider.free(ptr, allocation.size).inspect_err(|_| {
            // Still allocated as far as the provider is concerned.
            self.live.lock().insert(address, allocation);
        })
    }

    fn last_allocation_error(&self) -> Option<Error> {
        self.last_error.lock().clone()
    }

    fn finalize(&mut self) {
        let leftovers = self.live.get_mut().drain().collect::<Vec<_>>();

        if !leftovers.is_empty() {
            warn!(
                count = leftovers.len(),
                provider = self.provider.name(),
                "proxy pool destroyed with live allocations, releasing them"
            );
        }

        for (address, LiveAllocation { size, .. }) in leftovers {
            let Some(ptr) = NonNull::new(address as *mut u8) else {
                continue;
            };

            if let Err(e) = self.provider.free(ptr, size) {
                warn!(error = %e, address, size, "failed to release leftover allocation");
            }
        }
    }
}

use std::ptr::NonNull;
use std::sync::Arc;

use tracing::warn;

use crate::{MemoryProvider, MemoryTracker, PoolId, ProviderHandle, Result};

/// Decorates a provider so that every allocation it makes is recorded in a [`MemoryTracker`],
/// tagged with the pool that owns the wrapper.
///
/// Wrappers are created and owned by [`MemoryPool`][crate::MemoryPool] and are never handed out
/// to callers; the pool reports the upstream provider instead.
#[derive(Debug)]
pub(crate) struct TrackingProvider {
    upstream: ProviderHandle,
    pool_id: PoolId,
    tracker: Arc<MemoryTracker>,
}

impl TrackingProvider {
    pub(crate) fn new(
        upstream: ProviderHandle,
        pool_id: PoolId,
        tracker: Arc<MemoryTracker>,
    ) -> Self {
        Self {
            upstream,
            pool_id,
            tracker,
        }
    }

    /// The wrapped provider.
    pub(crate) fn upstream(&self) -> &ProviderHandle {
        &self.upstream
    }
}

impl MemoryProvider for TrackingProvider {
    fn alloc(&self, size: usize, alignment: usize) -> Result<NonNull<u8>> {
        let ptr = self.upstream.alloc(size, alignment)?;

        if let Err(e) = self.tracker.add(self.pool_id, ptr, size) {
            // The caller never sees this allocation, so give it back right away.
            if let Err(free_error) = self.upstream.free(ptr, size) {
                warn!(
                    provider = self.upstream.name(),
                    error = %free_error,
                    "failed to release an allocation that could not be tracked"
                );
            }

            return Err(e);
        }

        Ok(ptr)
    }

    fn free(&self, ptr: NonNull<u8>, size: usize) -> Result<()> {
        let removed = self.tracker.remove(self.pool_id, ptr, size).inspect_err(|e| {
            warn!(
                pool_id = %self.pool_id,
                error = %e,
                "refusing to release memory that this pool is not tracking"
            );
        })?;

        if let Err(e) = self.upstream.free(ptr, size) {
            // The memory is still allocated, so it must stay resolvable.
            if let Err(restore_error) = self.tracker.add(removed.pool_id(), ptr, removed.size()) {
                warn!(
                    error = %restore_error,
                    "failed to restore tracking after the upstream provider rejected a release"
                );
            }

            return Err(e);
        }

        Ok(())
    }

    fn last_native_error(&self) -> i32 {
        self.upstream.last_native_error()
    }

    fn name(&self) -> &str {
        self.upstream.name()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::{Error, HostMemoryProvider};

    assert_impl_all!(TrackingProvider: Send, Sync);

    /// Allocates from the host but can be told to reject releases.
    #[derive(Debug)]
    struct FlakyProvider {
        inner: HostMemoryProvider,
        reject_free: AtomicBool,
    }

    impl MemoryProvider for FlakyProvider {
        fn alloc(&self, size: usize, alignment: usize) -> Result<NonNull<u8>> {
            self.inner.alloc(size, alignment)
        }

        fn free(&self, ptr: NonNull<u8>, size: usize) -> Result<()> {
            if self.reject_free.load(Ordering::Relaxed) {
                return Err(Error::Provider {
                    provider: "flaky".to_string(),
                    code: 99,
                });
            }

            self.inner.free(ptr, size)
        }

        fn last_native_error(&self) -> i32 {
            0
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    #[test]
    fn alloc_and_free_update_tracker() {
        let tracker = Arc::new(MemoryTracker::new());
        let upstream: ProviderHandle = Arc::new(HostMemoryProvider::new());
        let pool_id = PoolId::next();
        let provider = TrackingProvider::new(upstream, pool_id, Arc::clone(&tracker));

        let ptr = provider.alloc(128, 8).unwrap();
        assert_eq!(tracker.find(ptr.as_ptr()).unwrap().pool_id(), pool_id);

        provider.free(ptr, 128).unwrap();
        assert!(tracker.is_empty());
    }

    #[test]
    fn free_of_untracked_pointer_is_not_forwarded() {
        let tracker = Arc::new(MemoryTracker::new());
        let host = Arc::new(HostMemoryProvider::new());
        let upstream: ProviderHandle = Arc::clone(&host) as ProviderHandle;
        let provider = TrackingProvider::new(upstream, PoolId::next(), Arc::clone(&tracker));

        // Allocated directly from the host provider, bypassing the tracking wrapper.
        let ptr = host.alloc(32, 8).unwrap();

        let result = provider.free(ptr, 32);
        assert!(matches!(result, Err(Error::InvalidArgument { .. })));

        // Still owned by the host provider, so we can release it there.
        host.free(ptr, 32).unwrap();
    }

    #[test]
    fn failed_upstream_free_keeps_tracking() {
        let tracker = Arc::new(MemoryTracker::new());
        let flaky = Arc::new(FlakyProvider {
            inner: HostMemoryProvider::new(),
            reject_free: AtomicBool::new(false),
        });
        let upstream: ProviderHandle = Arc::clone(&flaky) as ProviderHandle;
        let pool_id = PoolId::next();
        let provider = TrackingProvider::new(upstream, pool_id, Arc::clone(&tracker));

        let ptr = provider.alloc(16, 0).unwrap();

        flaky.reject_free.store(true, Ordering::Relaxed);
        let result = provider.free(ptr, 16);
        assert!(matches!(result, Err(Error::Provider { code: 99, .. })));
        assert_eq!(tracker.find(ptr.as_ptr()).unwrap().pool_id(), pool_id);

        flaky.reject_free.store(false, Ordering::Relaxed);
        provider.free(ptr, 16).unwrap();
        assert!(tracker.is_empty());
    }

    #[test]
    fn name_and_upstream_are_passed_through() {
        let tracker = Arc::new(MemoryTracker::new());
        let upstream: ProviderHandle = Arc::new(HostMemoryProvider::new());
        let provider = TrackingProvider::new(Arc::clone(&upstream), PoolId::next(), tracker);

        assert_eq!(provider.name(), upstream.name());
        assert!(Arc::ptr_eq(provider.upstream(), &upstream));
    }
}

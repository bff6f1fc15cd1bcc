//! Pool construction, rollback and destruction as seen from outside the crate.

#![allow(clippy::indexing_slicing, reason = "panic is fine in tests")]

use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use testing::{CountingPool, CountingProvider, FailingPool, PoolCounters};
use unified_malloc::{
    Error, Framework, HostMemoryProvider, MemoryPool, PoolKind, PoolOps, ProviderHandle,
    ProxyPool, Result, ResultCode,
};

/// Allocates straight from its first provider and never gives anything back.
#[derive(Debug)]
struct LeakingPool {
    provider: ProviderHandle,
}

impl PoolKind for LeakingPool {
    type Params = ();
    type Ops = Self;

    fn initialize(providers: &[ProviderHandle], _params: Self::Params) -> Result<Self::Ops> {
        Ok(Self {
            provider: Arc::clone(providers.first().unwrap()),
        })
    }
}

impl PoolOps for LeakingPool {
    fn malloc(&self, size: usize) -> Option<NonNull<u8>> {
        self.provider.alloc(size, 0).ok()
    }

    fn aligned_malloc(&self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        self.provider.alloc(size, alignment).ok()
    }

    fn calloc(&self, _num: usize, _size: usize) -> Option<NonNull<u8>> {
        None
    }

    fn realloc(&self, _ptr: Option<NonNull<u8>>, _size: usize) -> Option<NonNull<u8>> {
        None
    }

    fn malloc_usable_size(&self, _ptr: NonNull<u8>) -> usize {
        0
    }

    fn free(&self, _ptr: NonNull<u8>) -> Result<()> {
        Ok(())
    }

    fn last_allocation_error(&self) -> Option<Error> {
        None
    }
}

#[test]
fn zero_providers_fail_with_invalid_argument() {
    let counters = PoolCounters::shared();

    for framework in [Framework::with_tracking(), Framework::without_tracking()] {
        let result = framework
            .pool_builder()
            .providers(Vec::<ProviderHandle>::new())
            .build::<CountingPool>(Arc::clone(&counters));

        let error = result.unwrap_err();
        assert_eq!(error.code(), ResultCode::InvalidArgument);
    }

    // No pool strategy was ever initialized.
    assert_eq!(counters.initialized(), 0);
}

#[test]
fn failed_initialization_leaves_caller_providers_untouched() {
    let drops = Arc::new(AtomicUsize::new(0));
    let first = Arc::new(CountingProvider::new(Arc::clone(&drops)));
    let second = Arc::new(CountingProvider::new(Arc::clone(&drops)));

    let framework = Framework::with_tracking();

    let result = framework
        .pool_builder()
        .provider(Arc::clone(&first) as ProviderHandle)
        .provider(Arc::clone(&second) as ProviderHandle)
        .build::<FailingPool>(Error::Provider {
            provider: "device".to_string(),
            code: -5,
        });

    // The original error is returned unchanged.
    assert_eq!(
        result.unwrap_err(),
        Error::Provider {
            provider: "device".to_string(),
            code: -5,
        }
    );

    // Every wrapper is gone, the caller's handles are intact.
    assert_eq!(Arc::strong_count(&first), 1);
    assert_eq!(Arc::strong_count(&second), 1);
    assert_eq!(drops.load(Ordering::Relaxed), 0);
    assert!(framework.tracker().unwrap().is_empty());
}

#[test]
fn destroy_finalizes_then_releases_wrappers() {
    let counters = PoolCounters::shared();
    let drops = Arc::new(AtomicUsize::new(0));
    let provider = Arc::new(CountingProvider::new(Arc::clone(&drops)));

    let framework = Framework::with_tracking();
    let pool = framework
        .pool_builder()
        .provider(Arc::clone(&provider) as ProviderHandle)
        .build::<CountingPool>(Arc::clone(&counters))
        .unwrap();

    // The pool's tracking wrapper holds the only other reference.
    assert_eq!(Arc::strong_count(&provider), 2);

    drop(pool);

    assert_eq!(counters.finalized(), 1);
    assert_eq!(Arc::strong_count(&provider), 1);

    drop(provider);
    assert_eq!(drops.load(Ordering::Relaxed), 1);
}

#[test]
fn get_providers_returns_unwrapped_providers_in_order() {
    let first = CountingProvider::handle();
    let second = CountingProvider::handle();

    for framework in [Framework::with_tracking(), Framework::without_tracking()] {
        let pool = framework
            .pool_builder()
            .providers([
                Arc::clone(&first) as ProviderHandle,
                Arc::clone(&second) as ProviderHandle,
            ])
            .build::<CountingPool>(PoolCounters::shared())
            .unwrap();

        assert_eq!(pool.provider_count(), 2);

        let mut out: Vec<Option<ProviderHandle>> = vec![None; 1];
        let error = pool.fill_providers(&mut out).unwrap_err();
        assert_eq!(error.code(), ResultCode::InvalidArgument);

        let mut out: Vec<Option<ProviderHandle>> = vec![None; 2];
        assert_eq!(pool.fill_providers(&mut out).unwrap(), 2);

        let expected_first: ProviderHandle = Arc::clone(&first) as ProviderHandle;
        let expected_second: ProviderHandle = Arc::clone(&second) as ProviderHandle;
        assert!(Arc::ptr_eq(out[0].as_ref().unwrap(), &expected_first));
        assert!(Arc::ptr_eq(out[1].as_ref().unwrap(), &expected_second));
        assert_eq!(out[0].as_ref().unwrap().name(), "counting");
    }
}

#[test]
fn allocation_calls_reach_the_provider() {
    let provider = CountingProvider::handle();

    let pool = MemoryPool::builder()
        .provider(Arc::clone(&provider) as ProviderHandle)
        .build::<CountingPool>(PoolCounters::shared())
        .unwrap();

    let a = pool.malloc(10).unwrap();
    let b = pool.aligned_malloc(10, 128).unwrap();
    let c = pool.calloc(3, 3).unwrap();
    let d = pool.realloc(Some(c), 100).unwrap();

    assert_eq!(b.as_ptr() as usize % 128, 0);
    assert_eq!(pool.malloc_usable_size(d), 100);
    assert!(pool.last_allocation_error().is_none());

    pool.free(a).unwrap();
    pool.free(b).unwrap();
    pool.free(d).unwrap();

    assert_eq!(provider.allocs(), 4);
    assert_eq!(provider.frees(), 4);
}

#[test]
fn destroyed_pool_leftovers_do_not_block_address_reuse() {
    const ALLOCATIONS: usize = 64;

    let framework = Framework::with_tracking();
    let tracker = Arc::clone(framework.tracker().unwrap());

    let leaking = framework
        .pool_builder()
        .provider(Arc::new(HostMemoryProvider::new()))
        .build::<LeakingPool>(())
        .unwrap();

    let leaked = (0..ALLOCATIONS)
        .map(|_| leaking.malloc(64).unwrap())
        .collect::<Vec<_>>();
    assert_eq!(tracker.len(), ALLOCATIONS);

    // The pool holds the only reference to its provider, which returns the leaked memory to the
    // system allocator when dropped.
    drop(leaking);
    assert!(tracker.is_empty());

    for ptr in &leaked {
        assert!(framework.pool_by_ptr(ptr.as_ptr()).unwrap().is_none());
    }

    let fresh = framework
        .pool_builder()
        .provider(Arc::new(HostMemoryProvider::new()))
        .build::<ProxyPool>(())
        .unwrap();

    let reused = (0..ALLOCATIONS)
        .map(|_| fresh.malloc(64))
        .collect::<Vec<_>>();
    assert!(fresh.last_allocation_error().is_none());
    assert_eq!(tracker.len(), ALLOCATIONS);

    for ptr in reused {
        let ptr = ptr.unwrap();
        let owner = framework.pool_by_ptr(ptr.as_ptr()).unwrap().unwrap();
        assert_eq!(owner.id(), fresh.id());

        framework.free(ptr).unwrap();
    }

    assert!(tracker.is_empty());
}

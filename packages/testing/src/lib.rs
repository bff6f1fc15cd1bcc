#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private test doubles for the memory allocation packages.
//!
//! These are shared by the integration tests of several packages, so they live in their own
//! package instead of being duplicated in every `tests/` directory.

use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use unified_malloc::{
    Error, HostMemoryProvider, MemoryPool, MemoryProvider, NullPool, PoolKind, PoolOps,
    ProviderHandle, ProxyPool, Result,
};

/// A host memory provider that counts how often it is called and when it is dropped.
#[derive(Debug)]
pub struct CountingProvider {
    inner: HostMemoryProvider,
    allocs: AtomicUsize,
    frees: AtomicUsize,
    drops: Arc<AtomicUsize>,
}

impl CountingProvider {
    /// Creates a provider that increments `drops` when dropped.
    #[must_use]
    pub fn new(drops: Arc<AtomicUsize>) -> Self {
        Self {
            inner: HostMemoryProvider::new(),
            allocs: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
            drops,
        }
    }

    /// Creates a provider ready to be handed to a pool, with its own drop counter.
    #[must_use]
    pub fn handle() -> Arc<Self> {
        Arc::new(Self::new(Arc::new(AtomicUsize::new(0))))
    }

    /// Number of successful allocations.
    #[must_use]
    pub fn allocs(&self) -> usize {
        self.allocs.load(Ordering::Relaxed)
    }

    /// Number of successful releases.
    #[must_use]
    pub fn frees(&self) -> usize {
        self.frees.load(Ordering::Relaxed)
    }
}

impl MemoryProvider for CountingProvider {
    fn alloc(&self, size: usize, alignment: usize) -> Result<NonNull<u8>> {
        let ptr = self.inner.alloc(size, alignment)?;
        self.allocs.fetch_add(1, Ordering::Relaxed);
        Ok(ptr)
    }

    fn free(&self, ptr: NonNull<u8>, size: usize) -> Result<()> {
        self.inner.free(ptr, size)?;
        self.frees.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn last_native_error(&self) -> i32 {
        self.inner.last_native_error()
    }

    fn name(&self) -> &str {
        "counting"
    }
}

impl Drop for CountingProvider {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::Relaxed);
    }
}

/// Lifecycle counters shared between a test and the pools it creates.
#[derive(Debug, Default)]
pub struct PoolCounters {
    /// How many pools were initialized with these counters.
    pub initialized: AtomicUsize,

    /// How many pools were finalized with these counters.
    pub finalized: AtomicUsize,
}

impl PoolCounters {
    /// Creates zeroed counters ready to be passed as [`CountingPool`] parameters.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of pools initialized so far.
    #[must_use]
    pub fn initialized(&self) -> usize {
        self.initialized.load(Ordering::Relaxed)
    }

    /// Number of pools finalized so far.
    #[must_use]
    pub fn finalized(&self) -> usize {
        self.finalized.load(Ordering::Relaxed)
    }
}

/// A pool kind that behaves like [`ProxyPool`] and counts its lifecycle events.
#[derive(Debug)]
pub struct CountingPool {
    inner: ProxyPool,
    counters: Arc<PoolCounters>,
}

impl PoolKind for CountingPool {
    type Params = Arc<PoolCounters>;
    type Ops = Self;

    fn initialize(providers: &[ProviderHandle], params: Self::Params) -> Result<Self::Ops> {
        let inner = ProxyPool::initialize(providers, ())?;
        params.initialized.fetch_add(1, Ordering::Relaxed);

        Ok(Self {
            inner,
            counters: params,
        })
    }
}

impl PoolOps for CountingPool {
    fn malloc(&self, size: usize) -> Option<NonNull<u8>> {
        self.inner.malloc(size)
    }

    fn aligned_malloc(&self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        self.inner.aligned_malloc(size, alignment)
    }

    fn calloc(&self, num: usize, size: usize) -> Option<NonNull<u8>> {
        self.inner.calloc(num, size)
    }

    fn realloc(&self, ptr: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
        self.inner.realloc(ptr, size)
    }

    fn malloc_usable_size(&self, ptr: NonNull<u8>) -> usize {
        self.inner.malloc_usable_size(ptr)
    }

    fn free(&self, ptr: NonNull<u8>) -> Result<()> {
        self.inner.free(ptr)
    }

    fn last_allocation_error(&self) -> Option<Error> {
        self.inner.last_allocation_error()
    }

    fn finalize(&mut self) {
        self.counters.finalized.fetch_add(1, Ordering::Relaxed);
        self.inner.finalize();
    }
}

/// A pool kind whose initialization always fails with the given error.
#[derive(Debug)]
pub struct FailingPool;

impl PoolKind for FailingPool {
    type Params = Error;
    type Ops = NullPool;

    fn initialize(_providers: &[ProviderHandle], params: Self::Params) -> Result<Self::Ops> {
        Err(params)
    }
}

/// Creates an untracked pool that never allocates, backed by a fresh host provider.
///
/// # Panics
///
/// Panics if pool creation fails, which it cannot with a provider present.
#[must_use]
pub fn null_pool() -> Arc<MemoryPool> {
    MemoryPool::builder()
        .provider(Arc::new(HostMemoryProvider::new()))
        .build::<NullPool>(())
        .expect("a null pool with one provider is always valid")
}

/// Creates an untracked counting pool backed by a fresh host provider.
///
/// # Panics
///
/// Panics if pool creation fails, which it cannot with a provider present.
#[must_use]
pub fn counting_pool(counters: &Arc<PoolCounters>) -> Arc<MemoryPool> {
    MemoryPool::builder()
        .provider(Arc::new(HostMemoryProvider::new()))
        .build::<CountingPool>(Arc::clone(counters))
        .expect("a counting pool with one provider is always valid")
}

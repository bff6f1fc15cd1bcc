//! Pool manager behavior over enumerated descriptors, as a runtime would drive it.

use std::sync::Arc;

use testing::{CountingPool, CountingProvider, PoolCounters, null_pool};
use unified_malloc::{Framework, MemoryPool, NullPool, ProviderHandle, Result, ResultCode};
use usm_pools::{AllocationKind, ContextDevices, ContextId, DeviceId, PoolDescriptor, PoolManager};

/// A context with a fixed set of devices.
struct FakeContext {
    id: ContextId,
    device_count: u64,
}

impl ContextDevices for FakeContext {
    fn context(&self) -> ContextId {
        self.id
    }

    fn devices(&self) -> Result<Vec<DeviceId>> {
        Ok((0..self.device_count).map(DeviceId::new).collect())
    }
}

fn descriptors_for(device_count: u64) -> Vec<PoolDescriptor> {
    let context = FakeContext {
        id: ContextId::new(100),
        device_count,
    };

    PoolDescriptor::enumerate(&context).unwrap()
}

fn count_kind(descriptors: &[PoolDescriptor], kind: AllocationKind) -> usize {
    descriptors.iter().filter(|d| d.kind() == kind).count()
}

#[test]
fn populate_collapses_host_pools() {
    for device_count in [1_u64, 2, 5] {
        let descriptors = descriptors_for(device_count);
        let devices = usize::try_from(device_count).unwrap();
        assert_eq!(descriptors.len(), 4 * devices);

        let counters = PoolCounters::shared();
        let manager = PoolManager::new();

        for descriptor in &descriptors {
            manager
                .get_or_create(*descriptor, |_| {
                    MemoryPool::builder()
                        .provider(CountingProvider::handle() as ProviderHandle)
                        .build::<CountingPool>(Arc::clone(&counters))
                })
                .unwrap();
        }

        let registered = manager.descriptors();
        assert_eq!(registered.len(), 3 * devices + 1);
        assert_eq!(count_kind(&registered, AllocationKind::Host), 1);
        assert_eq!(count_kind(&registered, AllocationKind::Device), devices);
        assert_eq!(count_kind(&registered, AllocationKind::Shared), devices);
        assert_eq!(count_kind(&registered, AllocationKind::SharedReadOnly), devices);

        // Only distinct pools were ever created.
        assert_eq!(counters.initialized(), 3 * devices + 1);

        // Every enumerated descriptor, Host included, finds a pool.
        for descriptor in &descriptors {
            assert!(manager.get_pool(descriptor).is_some());
        }

        drop(manager);
        assert_eq!(counters.finalized(), 3 * devices + 1);
    }
}

#[test]
fn add_pool_rejects_second_host_enumeration() {
    let descriptors = descriptors_for(3);
    let manager = PoolManager::new();

    let mut accepted = 0;
    let mut rejected = 0;

    for descriptor in descriptors {
        match manager.add_pool(descriptor, null_pool()) {
            Ok(()) => accepted += 1,
            Err(e) => {
                assert_eq!(e.code(), ResultCode::InvalidArgument);
                assert_eq!(descriptor.kind(), AllocationKind::Host);
                rejected += 1;
            }
        }
    }

    assert_eq!(accepted, 10);
    assert_eq!(rejected, 2);
    assert_eq!(manager.len(), 10);
}

#[test]
fn get_pool_on_fresh_manager_finds_nothing() {
    let manager = PoolManager::new();

    for descriptor in descriptors_for(2) {
        assert!(manager.get_pool(&descriptor).is_none());
    }

    assert!(manager.is_empty());
}

#[test]
fn insert_existing_keeps_original_and_teardown_spares_rejected_pool() {
    let framework = Framework::with_tracking();
    let manager = PoolManager::new();

    let first_provider = CountingProvider::handle();
    let second_provider = CountingProvider::handle();

    let kept_counters = PoolCounters::shared();
    let kept = framework
        .pool_builder()
        .provider(Arc::clone(&first_provider) as ProviderHandle)
        .provider(Arc::clone(&second_provider) as ProviderHandle)
        .build::<CountingPool>(Arc::clone(&kept_counters))
        .unwrap();

    let rejected_counters = PoolCounters::shared();
    let rejected = framework
        .pool_builder()
        .provider(CountingProvider::handle() as ProviderHandle)
        .build::<CountingPool>(Arc::clone(&rejected_counters))
        .unwrap();

    let descriptor = PoolDescriptor::host(ContextId::new(9));

    manager.add_pool(descriptor, Arc::clone(&kept)).unwrap();
    assert_eq!(manager.get_pool(&descriptor).unwrap().id(), kept.id());

    let error = manager
        .add_pool(descriptor, Arc::clone(&rejected))
        .unwrap_err();
    assert_eq!(error.code(), ResultCode::InvalidArgument);
    assert_eq!(manager.get_pool(&descriptor).unwrap().id(), kept.id());

    let kept_id = kept.id();
    drop(kept);

    // The manager's reference is now the only one.
    drop(manager);
    assert_eq!(kept_counters.finalized(), 1);
    assert_eq!(rejected_counters.finalized(), 0);

    // The wrappers of the destroyed pool are gone too.
    assert_eq!(Arc::strong_count(&first_provider), 1);
    assert_eq!(Arc::strong_count(&second_provider), 1);

    let ptr = rejected.malloc(8).unwrap();
    let owner = framework.pool_by_ptr(ptr.as_ptr()).unwrap().unwrap();
    assert_eq!(owner.id(), rejected.id());
    assert_ne!(owner.id(), kept_id);
    rejected.free(ptr).unwrap();
}

#[test]
fn pools_from_manager_resolve_by_pointer() {
    let framework = Framework::with_tracking();
    let manager = PoolManager::new();

    for descriptor in descriptors_for(2) {
        manager
            .get_or_create(descriptor, |_| {
                framework
                    .pool_builder()
                    .provider(CountingProvider::handle() as ProviderHandle)
                    .build::<CountingPool>(PoolCounters::shared())
            })
            .unwrap();
    }

    let device_pool = manager
        .get_pool(&PoolDescriptor::new(
            ContextId::new(100),
            Some(DeviceId::new(1)),
            AllocationKind::Device,
        ))
        .unwrap();
    let host_pool = manager
        .get_pool(&PoolDescriptor::host(ContextId::new(100)))
        .unwrap();

    let on_device = device_pool.malloc(512).unwrap();
    let on_host = host_pool.malloc(512).unwrap();

    assert_eq!(
        framework.pool_by_ptr(on_device.as_ptr()).unwrap().unwrap().id(),
        device_pool.id()
    );
    assert_eq!(
        framework.pool_by_ptr(on_host.as_ptr()).unwrap().unwrap().id(),
        host_pool.id()
    );

    framework.free(on_device).unwrap();
    framework.free(on_host).unwrap();
}

#[test]
fn null_pools_can_fill_a_manager() {
    let manager = PoolManager::new();

    for descriptor in descriptors_for(1) {
        _ = manager.get_or_create(descriptor, |_| {
            MemoryPool::builder()
                .provider(CountingProvider::handle() as ProviderHandle)
                .build::<NullPool>(())
        });
    }

    assert_eq!(manager.len(), 4);
}

//! Releasing memory without knowing which pool allocated it.
//!
//! Two pools share one tracking-enabled framework. Allocations from both are collected into a
//! single list and released through the pointer-only `Framework::free()`.

use std::sync::Arc;

use unified_malloc::{Framework, HostMemoryProvider, ProviderHandle, ProxyPool};

fn main() {
    let framework = Framework::from_env();

    if !framework.is_tracking_enabled() {
        println!("Pointer tracking is disabled via the environment; nothing to demonstrate.");
        return;
    }

    let small: ProviderHandle = Arc::new(HostMemoryProvider::new());
    let large: ProviderHandle = Arc::new(HostMemoryProvider::new());

    let small_pool = framework
        .pool_builder()
        .provider(small)
        .build::<ProxyPool>(())
        .expect("pool with one provider");
    let large_pool = framework
        .pool_builder()
        .provider(large)
        .build::<ProxyPool>(())
        .expect("pool with one provider");

    println!("Created {} and {}", small_pool.id(), large_pool.id());

    let mut pointers = Vec::new();
    for i in 1..=4 {
        pointers.push(small_pool.malloc(i * 16).expect("host allocation"));
        pointers.push(large_pool.malloc(i * 4096).expect("host allocation"));
    }

    for ptr in &pointers {
        let owner = framework
            .pool_by_ptr(ptr.as_ptr())
            .expect("tracking is enabled")
            .expect("pointer is live");
        println!("{:p} belongs to {}", ptr.as_ptr(), owner.id());
    }

    for ptr in pointers {
        framework.free(ptr).expect("pointer is live");
    }

    let tracker = framework.tracker().expect("tracking is enabled");
    println!("Tracked allocations remaining: {}", tracker.len());
}

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Composes pluggable memory providers into memory pools and resolves any tracked pointer back
//! to the pool that owns it.
//!
//! The crate is the orchestration layer of a unified memory allocation subsystem. It does not
//! decide how memory is carved out of the operating system or a device; that is the job of a
//! [`MemoryProvider`]. It also does not decide allocation policy; that is the job of a pool
//! kind ([`PoolKind`] and its [`PoolOps`]). What it does is:
//!
//! * Combine one or more providers with a pool strategy into a [`MemoryPool`], with atomic
//!   rollback if construction fails halfway.
//! * Optionally wrap every provider of a pool so that each allocation is recorded in a
//!   [`MemoryTracker`], a concurrent index from address ranges to owning pools.
//! * Offer a pointer-only [`Framework::free()`] that finds the owning pool via the tracker.
//!
//! # Key Features
//!
//! - **Pluggable providers**: any type implementing [`MemoryProvider`], shared via [`ProviderHandle`]
//! - **Pluggable pool strategies**: any type implementing [`PoolKind`]
//! - **Pointer-to-pool resolution**: interior pointers resolve too, not only allocation bases
//! - **Explicit tracking configuration**: trackers are injected, never process-global
//! - **Built-in building blocks**: [`HostMemoryProvider`], [`ProxyPool`], [`NullPool`]
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use unified_malloc::{Framework, HostMemoryProvider, ProviderHandle, ProxyPool};
//!
//! let framework = Framework::with_tracking();
//! let provider: ProviderHandle = Arc::new(HostMemoryProvider::new());
//!
//! let pool = framework
//!     .pool_builder()
//!     .provider(provider)
//!     .build::<ProxyPool>(())
//!     .unwrap();
//!
//! let ptr = pool.malloc(256).unwrap();
//!
//! // Anyone holding the framework can find the pool again.
//! let owner = framework.pool_by_ptr(ptr.as_ptr()).unwrap().unwrap();
//! assert_eq!(owner.id(), pool.id());
//!
//! framework.free(ptr).unwrap();
//! ```
//!
//! # Logging
//!
//! The crate emits [`tracing`](https://docs.rs/tracing) events: `debug` for pool lifecycle,
//! `trace` for tracker updates and `warn` for misuse detected at runtime. It never installs a
//! subscriber.

mod builder;
mod error;
mod framework;
mod host_provider;
mod null_pool;
mod ops;
mod pool;
mod provider;
mod proxy_pool;
mod tracker;
mod tracking_provider;

pub use builder::*;
pub use error::*;
pub use framework::*;
pub use host_provider::*;
pub use null_pool::*;
pub use ops::*;
pub use pool::{MemoryPool, PoolId};
pub use provider::*;
pub use proxy_pool::*;
pub use tracker::*;
pub(crate) use tracking_provider::*;

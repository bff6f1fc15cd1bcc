#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Keyed registry that owns one memory pool per context, device and allocation kind.
//!
//! A runtime that serves unified shared memory needs one pool per allocation scope: one Host
//! pool per context, plus one Device, one Shared and one SharedReadOnly pool per device of that
//! context. This crate provides:
//!
//! * [`PoolDescriptor`], the key that identifies such a scope, with Host descriptors collapsing
//!   to one key per context regardless of device.
//! * [`PoolDescriptor::enumerate()`], which lists every descriptor a context needs, given a
//!   [`ContextDevices`] implementation supplied by the runtime.
//! * [`PoolManager`], the registry that owns the pools and creates them lazily.
//!
//! The pools themselves come from the [`unified_malloc`] crate.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use unified_malloc::{Framework, HostMemoryProvider, ProviderHandle, ProxyPool, Result};
//! use usm_pools::{ContextDevices, ContextId, DeviceId, PoolDescriptor, PoolManager};
//!
//! struct TwoGpus;
//!
//! impl ContextDevices for TwoGpus {
//!     fn context(&self) -> ContextId {
//!         ContextId::new(42)
//!     }
//!
//!     fn devices(&self) -> Result<Vec<DeviceId>> {
//!         Ok(vec![DeviceId::new(0), DeviceId::new(1)])
//!     }
//! }
//!
//! let framework = Framework::with_tracking();
//! let manager = PoolManager::new();
//!
//! for descriptor in PoolDescriptor::enumerate(&TwoGpus).unwrap() {
//!     manager
//!         .get_or_create(descriptor, |_| {
//!             let provider: ProviderHandle = Arc::new(HostMemoryProvider::new());
//!             framework.pool_builder().provider(provider).build::<ProxyPool>(())
//!         })
//!         .unwrap();
//! }
//!
//! // One Host pool for the context, three pools per device.
//! assert_eq!(manager.len(), 1 + 3 * 2);
//! ```

mod descriptor;
mod kind;
mod manager;

pub use descriptor::*;
pub use kind::*;
pub use manager::*;

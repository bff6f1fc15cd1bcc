use std::hash::{Hash, Hasher};

use derive_more::derive::Display;
use unified_malloc::Result;

use crate::AllocationKind;

/// Identifies an execution context, e.g. by its native handle value.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[display("context#{_0}")]
pub struct ContextId(u64);

impl ContextId {
    /// Wraps a raw context identifier.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Identifies a device, e.g. by its native handle value.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[display("device#{_0}")]
pub struct DeviceId(u64);

impl DeviceId {
    /// Wraps a raw device identifier.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Answers which devices belong to a context. Implemented by the runtime that owns contexts.
#[cfg_attr(test, mockall::automock)]
pub trait ContextDevices {
    /// The context being described.
    fn context(&self) -> ContextId;

    /// The devices of the context, in a stable order.
    ///
    /// # Errors
    ///
    /// Passes through whatever the runtime reports if the devices cannot be queried.
    fn devices(&self) -> Result<Vec<DeviceId>>;
}

/// The scope a memory pool serves: a context, optionally a device, and an allocation kind.
///
/// # Identity
///
/// [`AllocationKind::Host`] pools are shared by every device of a context, so two Host
/// descriptors are equal (and hash equally) whenever their contexts match, whatever their
/// devices are. Descriptors of every other kind are equal only if context, device and kind all
/// match.
///
/// # Examples
///
/// ```
/// use usm_pools::{AllocationKind, ContextId, DeviceId, PoolDescriptor};
///
/// let context = ContextId::new(1);
///
/// let host_via_gpu0 = PoolDescriptor::new(context, Some(DeviceId::new(0)), AllocationKind::Host);
/// let host_via_gpu1 = PoolDescriptor::new(context, Some(DeviceId::new(1)), AllocationKind::Host);
/// assert_eq!(host_via_gpu0, host_via_gpu1);
/// assert_eq!(host_via_gpu0, PoolDescriptor::host(context));
///
/// let device0 = PoolDescriptor::new(context, Some(DeviceId::new(0)), AllocationKind::Device);
/// let device1 = PoolDescriptor::new(context, Some(DeviceId::new(1)), AllocationKind::Device);
/// assert_ne!(device0, device1);
/// ```
#[derive(Clone, Copy, Debug, Display)]
#[display("{kind} pool of {context}")]
pub struct PoolDescriptor {
    context: ContextId,
    device: Option<DeviceId>,
    kind: AllocationKind,
}

impl PoolDescriptor {
    /// Creates a descriptor for the given scope.
    #[must_use]
    pub const fn new(context: ContextId, device: Option<DeviceId>, kind: AllocationKind) -> Self {
        Self {
            context,
            device,
            kind,
        }
    }

    /// Creates the context-wide Host descriptor of `context`.
    #[must_use]
    pub const fn host(context: ContextId) -> Self {
        Self::new(context, None, AllocationKind::Host)
    }

    /// Enumerates the descriptors of every pool a context needs.
    ///
    /// For each device, in the order the context reports them, this yields one descriptor of
    /// each [`AllocationKind`] in [`AllocationKind::ALL`] order. The Host descriptors this
    /// produces for different devices are all equal, so registering the full list leaves one
    /// Host pool plus one pool of each other kind per device.
    ///
    /// # Errors
    ///
    /// Passes through any error from [`ContextDevices::devices()`].
    pub fn enumerate(context: &impl ContextDevices) -> Result<Vec<Self>> {
        let context_id = context.context();
        let devices = context.devices()?;

        Ok(devices
            .into_iter()
            .flat_map(|device| {
                AllocationKind::ALL
                    .into_iter()
                    .map(move |kind| Self::new(context_id, Some(device), kind))
            })
            .collect())
    }

    /// The context the pool belongs to.
    #[must_use]
    pub fn context(&self) -> ContextId {
        self.context
    }

    /// The device the descriptor was created for, if any.
    ///
    /// For Host descriptors this is informational only and does not take part in identity.
    #[must_use]
    pub fn device(&self) -> Option<DeviceId> {
        self.device
    }

    /// The kind of memory the pool allocates.
    #[must_use]
    pub fn kind(&self) -> AllocationKind {
        self.kind
    }
}

impl PartialEq for PoolDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.context == other.context
            && self.kind == other.kind
            && (self.kind.is_context_scoped() || self.device == other.device)
    }
}

impl Eq for PoolDescriptor {}

impl Hash for PoolDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.context.hash(state);
        self.kind.hash(state);

        // Must agree with `eq()`: context-scoped descriptors ignore the device.
        if !self.kind.is_context_scoped() {
            self.device.hash(state);
        }
    }
}

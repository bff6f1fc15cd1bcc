use derive_more::derive::Display;

/// The kind of unified shared memory an allocation is made from.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[non_exhaustive]
pub enum AllocationKind {
    /// Host memory accessible by every device of a context. Scoped to the context, not to any
    /// single device.
    Host,

    /// Memory that lives on and is accessible by one device.
    Device,

    /// Memory that migrates between the host and one device, writable by both.
    Shared,

    /// Like [`Shared`](Self::Shared) but the device only reads it.
    SharedReadOnly,
}

impl AllocationKind {
    /// Every allocation kind, in the order descriptor enumeration produces them per device.
    pub const ALL: [Self; 4] = [
        Self::Host,
        Self::Device,
        Self::Shared,
        Self::SharedReadOnly,
    ];

    /// Whether pools of this kind are shared by all devices of a context.
    ///
    /// Descriptors of a context-scoped kind identify the same pool regardless of device.
    #[must_use]
    pub fn is_context_scoped(self) -> bool {
        matches!(self, Self::Host)
    }
}

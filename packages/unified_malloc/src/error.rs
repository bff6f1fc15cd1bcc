use thiserror::Error;

/// Errors reported by memory providers, pools and the framework itself.
///
/// Provider and pool implementations may report any of these. Errors that originate in a
/// lower-level allocator (an OS call, a device driver) should use [`Error::Provider`] so that the
/// native code survives the trip through the framework unchanged.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// The caller passed a value that the operation cannot accept.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// A human-readable description of what was wrong with the argument.
        reason: String,
    },

    /// The framework could not allocate the host memory it needs for its own bookkeeping.
    #[error("out of host memory")]
    OutOfHostMemory,

    /// The operation is not available in the current configuration, e.g. resolving a pointer
    /// to its pool while pointer tracking is disabled.
    #[error("operation not supported: {operation}")]
    NotSupported {
        /// The operation that was attempted.
        operation: &'static str,
    },

    /// A memory provider reported a failure, identified by its provider-specific native code.
    #[error("memory provider '{provider}' failed with native error code {code}")]
    Provider {
        /// Name of the provider that failed.
        provider: String,

        /// The provider-specific error code, passed through verbatim.
        code: i32,
    },

    /// A provider or pool failed for a reason that does not fit any other category.
    #[error("{message}")]
    Other {
        /// A human-readable description of the failure.
        message: String,
    },
}

impl Error {
    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Returns the stable result code that corresponds to this error.
    ///
    /// Layers that expose the framework through a code-based API translate errors with this.
    #[must_use]
    pub fn code(&self) -> ResultCode {
        match self {
            Self::InvalidArgument { .. } => ResultCode::InvalidArgument,
            Self::OutOfHostMemory => ResultCode::OutOfHostMemory,
            Self::NotSupported { .. } => ResultCode::NotSupported,
            Self::Provider { .. } => ResultCode::ProviderSpecific,
            Self::Other { .. } => ResultCode::Unknown,
        }
    }
}

/// Flat result codes for callers that translate framework results into their own result type.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum ResultCode {
    /// The operation completed successfully.
    Success,

    /// See [`Error::InvalidArgument`].
    InvalidArgument,

    /// See [`Error::OutOfHostMemory`].
    OutOfHostMemory,

    /// See [`Error::NotSupported`].
    NotSupported,

    /// See [`Error::Provider`].
    ProviderSpecific,

    /// See [`Error::Other`].
    Unknown,
}

impl<T> From<&Result<T>> for ResultCode {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(e) => e.code(),
        }
    }
}

/// A specialized `Result` type for allocation framework operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;

use std::ptr::NonNull;

use crate::{Error, PoolKind, PoolOps, ProviderHandle, Result};

/// A pool kind that never allocates.
///
/// Every allocation returns `None` without recording an error and every release succeeds. This
/// is useful as a placeholder pool and for exercising pool bookkeeping without touching memory.
///
/// # Thread safety
///
/// The pool has no state, so concurrent calls never contend.
#[derive(Debug, Default)]
#[non_exhaustive]
pub struct NullPool;

impl PoolKind for NullPool {
    type Params = ();
    type Ops = Self;

    fn initialize(_providers: &[ProviderHandle], _params: Self::Params) -> Result<Self::Ops> {
        Ok(Self)
    }
}

impl PoolOps for NullPool {
    fn malloc(&self, _size: usize) -> Option<NonNull<u8>> {
        None
    }

    fn aligned_malloc(&self, _size: usize, _alignment: usize) -> Option<NonNull<u8>> {
        None
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

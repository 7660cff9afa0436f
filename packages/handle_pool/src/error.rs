use std::result::Result as StdResult;

use thiserror::Error;

use crate::Handle;

/// Errors that can occur when creating or operating a [`HandlePool`][crate::HandlePool].
///
/// Every error is local to the failed operation: the pool is left exactly as it was before the
/// call and remains usable.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The pool could not be created with the requested parameters.
    #[error("invalid pool parameters: {problem}")]
    InvalidArgument {
        /// A human-readable description of the problem.
        problem: String,
    },

    /// The system allocator could not provide memory for the pool.
    #[error("failed to allocate {size} bytes for the pool")]
    AllocationFailed {
        /// The requested arena size in bytes.
        size: usize,
    },

    /// Every block in the pool is already allocated.
    #[error("pool exhausted: all {num_blocks} blocks are allocated")]
    PoolExhausted {
        /// The total number of blocks in the pool.
        num_blocks: usize,
    },

    /// The pool has issued every sequence number a handle can carry.
    #[error("handle space exhausted: the sequence counter has wrapped around")]
    HandleSpaceExhausted,

    /// Every salt candidate drawn collided with the salt of a live allocation.
    #[error("salt generation failed: {attempts} candidates all collided with live handles")]
    SaltGenerationFailed {
        /// How many candidates were drawn before giving up.
        attempts: usize,
    },

    /// The handle is the reserved invalid value.
    #[error("invalid handle")]
    InvalidHandle,

    /// No block in the pool is bound to the handle's salt.
    #[error("handle {handle} does not match any block in the pool")]
    HandleNotFound {
        /// The handle that failed to resolve.
        handle: Handle,
    },

    /// The handle's salt is present in the handle table but the block is marked free.
    #[error("handle {handle} refers to a block that is not allocated")]
    BlockNotAllocated {
        /// The handle that refers to a free block.
        handle: Handle,
    },
}

/// A specialized `Result` type for pool operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = StdResult<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn messages_identify_the_handle() {
        let handle = Handle::from_raw(0x1234_0001);

        let not_found = Error::HandleNotFound { handle }.to_string();
        let not_allocated = Error::BlockNotAllocated { handle }.to_string();

        assert!(not_found.contains("0x12340001"));
        assert!(not_allocated.contains("0x12340001"));
        assert_ne!(not_found, not_allocated);
    }

    #[test]
    fn invalid_argument_carries_problem() {
        let error = Error::InvalidArgument {
            problem: "block size must be non-zero".to_string(),
        };

        assert!(error.to_string().contains("block size must be non-zero"));
    }

    #[test]
    fn allocation_failure_reports_size() {
        let error = Error::AllocationFailed { size: 4096 };

        assert!(error.to_string().contains("4096"));
    }
}

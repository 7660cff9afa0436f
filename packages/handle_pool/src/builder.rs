use std::cell::Cell;
use std::marker::PhantomData;

use crate::{DropPolicy, Error, HandlePool, PoolLayout, Result, SaltGenerator};

/// Builder for creating an instance of [`HandlePool`].
///
/// The total pool size and the block size are mandatory. The pool carves both the metadata
/// and the blocks out of the total size, so the number of usable blocks is smaller than
/// `total_size / block_size`.
///
/// # Examples
///
/// ```
/// use handle_pool::HandlePool;
///
/// let pool = HandlePool::builder()
///     .total_size(1024 * 1024)
///     .block_size(1024)
///     .build()
///     .unwrap();
///
/// assert!(pool.num_blocks() > 500);
/// ```
///
/// Reproducible salts for tests and benchmarks:
///
/// ```
/// use handle_pool::HandlePool;
///
/// let build = || {
///     HandlePool::builder()
///         .total_size(8 * 1024)
///         .block_size(32)
///         .salt_seed(1234)
///         .build()
///         .unwrap()
/// };
///
/// let mut a = build();
/// let mut b = build();
///
/// assert_eq!(a.allocate().unwrap(), b.allocate().unwrap());
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) and can be safely transferred between threads,
/// allowing pool configuration to happen on different threads than where the pool is used.
/// However, it is not thread-safe ([`Sync`]) as it contains mutable configuration state.
#[derive(Debug)]
#[must_use]
pub struct HandlePoolBuilder {
    total_size: Option<usize>,
    block_size: Option<usize>,
    salt_seed: Option<u64>,
    drop_policy: DropPolicy,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

impl HandlePoolBuilder {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            total_size: None,
            block_size: None,
            salt_seed: None,
            drop_policy: DropPolicy::default(),
            _not_sync: PhantomData,
        }
    }

    /// Sets the size in bytes of the memory pool, including all metadata.
    ///
    /// Must be greater than [`MIN_POOL_SIZE`][crate::MIN_POOL_SIZE].
    #[inline]
    pub fn total_size(mut self, total_size: usize) -> Self {
        self.total_size = Some(total_size);
        self
    }

    /// Sets the size in bytes of each block handed out by the pool.
    #[inline]
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = Some(block_size);
        self
    }

    /// Seeds the salt generator with a fixed value.
    ///
    /// A seeded pool issues the same sequence of handles for the same sequence of operations.
    /// Without a seed, the generator is seeded from the thread-local random number generator.
    #[inline]
    pub fn salt_seed(mut self, seed: u64) -> Self {
        self.salt_seed = Some(seed);
        self
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs how
    /// to treat remaining allocations when the pool is dropped.
    #[inline]
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Builds the pool with the specified configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the total size or block size has not been set, or
    /// if the combination does not produce a usable layout (see [`PoolLayout::plan()`]).
    ///
    /// Returns [`Error::AllocationFailed`] if the system allocator cannot provide the arena.
    pub fn build(self) -> Result<HandlePool> {
        let total_size = self.total_size.ok_or_else(|| Error::InvalidArgument {
            problem: "total size must be set using .total_size() before calling .build()"
                .to_string(),
        })?;

        let block_size = self.block_size.ok_or_else(|| Error::InvalidArgument {
            problem: "block size must be set using .block_size() before calling .build()"
                .to_string(),
        })?;

        let layout = PoolLayout::plan(total_size, block_size)?;

        let salts = self
            .salt_seed
            .map_or_else(SaltGenerator::from_entropy, SaltGenerator::from_seed);

        HandlePool::new_inner(layout, salts, self.drop_policy)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;
    use std::thread;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(HandlePoolBuilder: Send, Debug);
    assert_not_impl_any!(HandlePoolBuilder: Sync);

    #[test]
    fn builder_new_creates_default_state() {
        let builder = HandlePoolBuilder::new();
        assert!(builder.total_size.is_none());
        assert!(builder.block_size.is_none());
        assert!(builder.salt_seed.is_none());
        assert_eq!(builder.drop_policy, DropPolicy::default());
    }

    #[test]
    fn setters_record_values() {
        let builder = HandlePoolBuilder::new()
            .total_size(4096)
            .block_size(64)
            .salt_seed(9)
            .drop_policy(DropPolicy::MustNotDropBlocks);

        assert_eq!(builder.total_size, Some(4096));
        assert_eq!(builder.block_size, Some(64));
        assert_eq!(builder.salt_seed, Some(9));
        assert_eq!(builder.drop_policy, DropPolicy::MustNotDropBlocks);
    }

    #[test]
    fn sizes_can_be_overridden() {
        let builder = HandlePoolBuilder::new()
            .total_size(4096)
            .total_size(8192)
            .block_size(16)
            .block_size(32);

        assert_eq!(builder.total_size, Some(8192));
        assert_eq!(builder.block_size, Some(32));
    }

    #[test]
    fn build_without_total_size_fails() {
        let result = HandlePoolBuilder::new().block_size(64).build();
        assert!(matches!(result, Err(Error::InvalidArgument { .. })));
    }

    #[test]
    fn build_without_block_size_fails() {
        let result = HandlePoolBuilder::new().total_size(4096).build();
        assert!(matches!(result, Err(Error::InvalidArgument { .. })));
    }

    #[test]
    fn build_propagates_layout_errors() {
        let result = HandlePoolBuilder::new()
            .total_size(512)
            .block_size(8)
            .build();
        assert!(matches!(result, Err(Error::InvalidArgument { .. })));

        let result = HandlePoolBuilder::new()
            .total_size(4096)
            .block_size(0)
            .build();
        assert!(matches!(result, Err(Error::InvalidArgument { .. })));
    }

    #[test]
    fn build_rejects_unallocatable_size() {
        let result = HandlePoolBuilder::new()
            .total_size(usize::MAX)
            .block_size(1 << 20)
            .build();
        assert!(matches!(result, Err(Error::InvalidArgument { .. })));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn build_reports_allocation_failure() {
        // A valid layout that no allocator can satisfy.
        let result = HandlePoolBuilder::new()
            .total_size(1 << 60)
            .block_size(1 << 20)
            .build();
        assert!(matches!(
            result,
            Err(Error::AllocationFailed { size }) if size == 1 << 60
        ));
    }

    #[test]
    fn build_applies_layout() {
        let pool = HandlePoolBuilder::new()
            .total_size(4096)
            .block_size(64)
            .build()
            .unwrap();

        assert_eq!(pool.total_size(), 4096);
        assert_eq!(pool.block_size(), 64);
        assert_eq!(*pool.layout(), PoolLayout::plan(4096, 64).unwrap());
    }

    #[test]
    fn builder_send_trait() {
        // Verify builder can be moved between threads.
        let builder = HandlePoolBuilder::new().total_size(4096).block_size(64);
        let handle = thread::spawn(move || builder.build());
        let _pool = handle
            .join()
            .expect("thread completed successfully")
            .unwrap();
    }
}

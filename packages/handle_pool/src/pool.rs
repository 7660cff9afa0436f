use std::ptr::NonNull;
use std::result::Result as StdResult;
use std::{slice, thread};

use tracing::{debug, trace};

use crate::bitmap::Bitmap;
use crate::handle_table::HandleTable;
use crate::layout::HEADER_SIZE;
use crate::{
    Arena, DropPolicy, Error, Handle, HandlePoolBuilder, PoolLayout, PoolStats, Result,
    SaltGenerator,
};

/// A fixed-capacity pool of equal-size memory blocks, addressed through opaque handles.
///
/// The pool reserves a single arena from the system allocator when it is built and divides it
/// into a header, an allocation bitmap, a handle table and the data blocks (see
/// [`PoolLayout`]). Allocating a block returns a [`Handle`] rather than an address; the
/// address is obtained by resolving the handle through the pool, which fails once the block
/// has been freed.
///
/// # Handles
///
/// Each allocation draws a random 16-bit salt that no other live allocation is using, records
/// it in the block's handle table slot and combines it with an allocation sequence number into
/// the handle. Resolving a handle searches the handle table for an allocated block carrying the
/// handle's salt. The sequence number does not participate in resolution.
///
/// Allocation, freeing and resolution are linear scans over the blocks. This is intended for
/// pools of up to a few thousand blocks.
///
/// # Examples
///
/// ```
/// use handle_pool::HandlePool;
///
/// let mut pool = HandlePool::builder()
///     .total_size(1024 * 1024)
///     .block_size(1024)
///     .build()
///     .unwrap();
///
/// let handle = pool.allocate().unwrap();
///
/// pool.block_mut(handle).unwrap()[..5].copy_from_slice(b"hello");
/// assert_eq!(&pool.block(handle).unwrap()[..5], b"hello");
///
/// pool.free(handle).unwrap();
///
/// // The handle no longer resolves.
/// assert!(pool.resolve_pointer(handle).is_none());
/// assert!(pool.free(handle).is_err());
/// ```
///
/// # Thread safety
///
/// The pool is thread-mobile ([`Send`]) and can be moved between threads, but it is not
/// thread-safe ([`Sync`]) and cannot be shared between threads without additional
/// synchronization, such as a mutex around the whole pool.
#[derive(Debug)]
pub struct HandlePool {
    arena: Arena,
    layout: PoolLayout,

    /// The header plus every allocated block, in bytes.
    used_size: usize,

    num_allocated: usize,

    /// Sequence number for the next handle. Starts at 1; reaching 0 again means every sequence
    /// number has been issued and no further allocations are possible.
    next_sequence: u16,

    salts: SaltGenerator,

    drop_policy: DropPolicy,
}

/// The outcome of [`HandlePool::validate()`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum Validation {
    /// The handle is bound to an allocated block.
    Valid,

    /// The handle is [`Handle::INVALID`].
    Invalid,

    /// No block carries the handle's salt.
    ///
    /// This is what a handle looks like after its block was freed, because freeing a block
    /// erases its salt.
    NotFound,

    /// A block carries the handle's salt but is marked free.
    NotAllocated,
}

/// Why a handle did not resolve to an allocated block.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Unresolved {
    Invalid,
    NotFound,
    NotAllocated,
}

impl Unresolved {
    fn into_error(self, handle: Handle) -> Error {
        match self {
            Self::Invalid => Error::InvalidHandle,
            Self::NotFound => Error::HandleNotFound { handle },
            Self::NotAllocated => Error::BlockNotAllocated { handle },
        }
    }
}

impl From<Unresolved> for Validation {
    fn from(value: Unresolved) -> Self {
        match value {
            Unresolved::Invalid => Self::Invalid,
            Unresolved::NotFound => Self::NotFound,
            Unresolved::NotAllocated => Self::NotAllocated,
        }
    }
}

impl HandlePool {
    /// Creates a builder for configuring and constructing a [`HandlePool`].
    ///
    /// # Example
    ///
    /// ```
    /// use handle_pool::HandlePool;
    ///
    /// let pool = HandlePool::builder()
    ///     .total_size(4096)
    ///     .block_size(64)
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(pool.num_allocated(), 0);
    /// assert_eq!(pool.block_size(), 64);
    /// ```
    #[inline]
    pub fn builder() -> HandlePoolBuilder {
        HandlePoolBuilder::new()
    }

    pub(crate) fn new_inner(
        layout: PoolLayout,
        salts: SaltGenerator,
        drop_policy: DropPolicy,
    ) -> Result<Self> {
        let total_size = layout.total_size();
        let arena = Arena::new(total_size, layout.data_offset())
            .ok_or(Error::AllocationFailed { size: total_size })?;

        debug!(
            total_size = layout.total_size(),
            block_size = layout.block_size(),
            num_blocks = layout.num_blocks(),
            data_offset = layout.data_offset(),
            "handle pool created"
        );

        Ok(Self {
            arena,
            layout,
            used_size: HEADER_SIZE,
            num_allocated: 0,
            next_sequence: 1,
            salts,
            drop_policy,
        })
    }

    /// The byte layout of the pool's arena.
    #[must_use]
    #[inline]
    pub fn layout(&self) -> &PoolLayout {
        &self.layout
    }

    /// Total size of the pool in bytes.
    #[must_use]
    #[inline]
    pub fn total_size(&self) -> usize {
        self.layout.total_size()
    }

    /// Bytes in use: the header plus every allocated block.
    ///
    /// The bitmap and handle table are not counted, so this starts out at
    /// [`HEADER_SIZE`][crate::HEADER_SIZE] for an empty pool.
    #[must_use]
    #[inline]
    pub fn used_size(&self) -> usize {
        self.used_size
    }

    /// Size of each block in bytes.
    #[must_use]
    #[inline]
    pub fn block_size(&self) -> usize {
        self.layout.block_size()
    }

    /// Number of blocks the pool can hand out.
    #[must_use]
    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.layout.num_blocks()
    }

    /// Number of blocks currently allocated.
    #[must_use]
    #[inline]
    pub fn num_allocated(&self) -> usize {
        self.num_allocated
    }

    /// Sequence number the next allocation will carry, or 0 if every sequence number has been
    /// issued.
    #[must_use]
    #[inline]
    pub fn next_sequence(&self) -> u16 {
        self.next_sequence
    }

    /// Whether the block at `index` is allocated, or `None` if there is no such block.
    #[must_use]
    pub fn is_block_allocated(&self, index: usize) -> Option<bool> {
        (index < self.num_blocks()).then(|| self.bitmap().is_set(index))
    }

    /// A snapshot of the pool's counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            total_size: self.total_size(),
            used_size: self.used_size,
            block_size: self.block_size(),
            num_blocks: self.num_blocks(),
            num_allocated: self.num_allocated,
            next_sequence: self.next_sequence,
        }
    }

    /// Allocates the lowest-indexed free block and returns a handle to it.
    ///
    /// The contents of a newly allocated block are unspecified; a block previously used by
    /// another allocation keeps its old bytes.
    ///
    /// # Errors
    ///
    /// * [`Error::PoolExhausted`] if every block is allocated.
    /// * [`Error::HandleSpaceExhausted`] if the pool has issued all 65535 sequence numbers.
    /// * [`Error::SaltGenerationFailed`] if no salt free of collisions with live allocations
    ///   was found.
    ///
    /// The pool is not modified when an error is returned.
    ///
    /// # Example
    ///
    /// ```
    /// use handle_pool::HandlePool;
    ///
    /// let mut pool = HandlePool::builder()
    ///     .total_size(4096)
    ///     .block_size(64)
    ///     .build()
    ///     .unwrap();
    ///
    /// let first = pool.allocate().unwrap();
    /// let second = pool.allocate().unwrap();
    ///
    /// assert_ne!(first, second);
    /// assert_eq!(first.sequence(), 1);
    /// assert_eq!(second.sequence(), 2);
    /// assert_eq!(pool.num_allocated(), 2);
    /// ```
    pub fn allocate(&mut self) -> Result<Handle> {
        if self.num_allocated >= self.num_blocks() {
            trace!(num_blocks = self.num_blocks(), "allocation failed: pool is full");
            return Err(Error::PoolExhausted {
                num_blocks: self.num_blocks(),
            });
        }

        let sequence = self.next_sequence;

        if sequence == 0 {
            trace!("allocation failed: sequence counter exhausted");
            return Err(Error::HandleSpaceExhausted);
        }

        let index = self
            .bitmap()
            .first_clear()
            .expect("num_allocated < num_blocks so at least one block must be free");

        let salt = {
            let bitmap = bitmap_view(&self.arena, &self.layout);
            let table = handle_table_view(&self.arena, &self.layout);

            self.salts
                .generate(|candidate| find_allocated(&bitmap, &table, candidate).is_some())?
        };

        // Nothing below can fail.
        let block_size = self.block_size();
        let (mut bitmap, mut table) = self.metadata_mut();
        table.set(index, salt);
        bitmap.set(index);

        // Cannot overflow: bounded by num_blocks, which is bounded by virtual memory.
        self.num_allocated = self.num_allocated.wrapping_add(1);
        self.used_size = self
            .used_size
            .checked_add(block_size)
            .expect("used size is bounded by the total size of the pool");

        // Wrapping to 0 marks the sequence as exhausted.
        self.next_sequence = sequence.wrapping_add(1);

        #[cfg(debug_assertions)]
        self.integrity_check();

        let handle = Handle::new(salt, sequence);
        trace!(block_index = index, salt, sequence, "block allocated");

        Ok(handle)
    }

    /// Frees the block bound to `handle`.
    ///
    /// The handle, and every copy of it, stops resolving. The block's contents are left as is.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidHandle`] if `handle` is [`Handle::INVALID`].
    /// * [`Error::HandleNotFound`] if no block is bound to the handle, including when it has
    ///   already been freed.
    /// * [`Error::BlockNotAllocated`] if the handle's salt is recorded for a block that is
    ///   marked free.
    ///
    /// The pool is not modified when an error is returned.
    ///
    /// # Example
    ///
    /// ```
    /// use handle_pool::{Error, HandlePool};
    ///
    /// let mut pool = HandlePool::builder()
    ///     .total_size(4096)
    ///     .block_size(64)
    ///     .build()
    ///     .unwrap();
    ///
    /// let handle = pool.allocate().unwrap();
    /// pool.free(handle).unwrap();
    ///
    /// assert!(matches!(pool.free(handle), Err(Error::HandleNotFound { .. })));
    /// ```
    pub fn free(&mut self, handle: Handle) -> Result<()> {
        let index = self.locate(handle)?;

        let block_size = self.block_size();
        let (mut bitmap, mut table) = self.metadata_mut();
        bitmap.clear(index);
        table.clear(index);

        self.num_allocated = self
            .num_allocated
            .checked_sub(1)
            .expect("the block was allocated so the count must be non-zero");
        self.used_size = self
            .used_size
            .checked_sub(block_size)
            .expect("the block was counted as used when it was allocated");

        #[cfg(debug_assertions)]
        self.integrity_check();

        trace!(block_index = index, %handle, "block freed");

        Ok(())
    }

    /// Checks whether `handle` is bound to an allocated block, without modifying the pool.
    ///
    /// # Example
    ///
    /// ```
    /// use handle_pool::{Handle, HandlePool, Validation};
    ///
    /// let mut pool = HandlePool::builder()
    ///     .total_size(4096)
    ///     .block_size(64)
    ///     .build()
    ///     .unwrap();
    ///
    /// let handle = pool.allocate().unwrap();
    /// assert_eq!(pool.validate(handle), Validation::Valid);
    /// assert_eq!(pool.validate(Handle::INVALID), Validation::Invalid);
    ///
    /// pool.free(handle).unwrap();
    /// assert_eq!(pool.validate(handle), Validation::NotFound);
    /// ```
    #[must_use]
    pub fn validate(&self, handle: Handle) -> Validation {
        self.find(handle)
            .map_or_else(Validation::from, |_| Validation::Valid)
    }

    /// Returns a pointer to the first byte of the block bound to `handle`, or `None` if the
    /// handle does not refer to an allocated block.
    ///
    /// The pointer is valid for reads and writes of exactly [`block_size()`](Self::block_size)
    /// bytes until the block is freed or the pool is dropped. Accessing bytes beyond the block
    /// reaches into the neighboring block. The pointer is aligned only to the extent that the
    /// block size and the data region offset allow; no alignment is promised.
    ///
    /// The pool never creates references to block contents except when asked to via
    /// [`block()`](Self::block) or [`block_mut()`](Self::block_mut), so it is valid to access
    /// the block through this pointer from unsafe code as long as such a conflicting reference
    /// is not alive at the same time. Only initialized bytes may be written through the
    /// pointer.
    ///
    /// # Example
    ///
    /// ```
    /// use handle_pool::HandlePool;
    ///
    /// let mut pool = HandlePool::builder()
    ///     .total_size(4096)
    ///     .block_size(64)
    ///     .build()
    ///     .unwrap();
    ///
    /// let handle = pool.allocate().unwrap();
    /// let ptr = pool.resolve_pointer(handle).unwrap();
    ///
    /// // SAFETY: The block is allocated and 64 bytes long; no references to it exist.
    /// unsafe {
    ///     ptr.as_ptr().write_bytes(0x5A, 64);
    /// }
    ///
    /// assert!(pool.block(handle).unwrap().iter().all(|&b| b == 0x5A));
    /// ```
    #[must_use]
    pub fn resolve_pointer(&self, handle: Handle) -> Option<NonNull<u8>> {
        match self.locate(handle) {
            Ok(index) => Some(self.block_ptr(index)),
            Err(error) => {
                trace!(%handle, %error, "handle did not resolve");
                None
            }
        }
    }

    /// Returns the contents of the block bound to `handle`.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`free()`](Self::free) if the handle does not refer to an
    /// allocated block.
    pub fn block(&self, handle: Handle) -> Result<&[u8]> {
        let index = self.locate(handle)?;
        let ptr = self.block_ptr(index);

        // SAFETY: The block lies within the arena, which was zero-initialized and only ever
        // receives initialized bytes. We hold `&self`, so the pool will not hand out a
        // conflicting `&mut` to the same block while this reference is alive.
        Ok(unsafe { slice::from_raw_parts(ptr.as_ptr(), self.block_size()) })
    }

    /// Returns the contents of the block bound to `handle` for modification.
    ///
    /// Exactly [`block_size()`](Self::block_size) bytes are available.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`free()`](Self::free) if the handle does not refer to an
    /// allocated block.
    pub fn block_mut(&mut self, handle: Handle) -> Result<&mut [u8]> {
        let index = self.locate(handle)?;
        let ptr = self.block_ptr(index);

        // SAFETY: The block lies within the arena, which was zero-initialized and only ever
        // receives initialized bytes. We hold `&mut self`, so no other reference created by
        // the pool can be alive, and the metadata the pool modifies is outside the data region.
        Ok(unsafe { slice::from_raw_parts_mut(ptr.as_ptr(), self.block_size()) })
    }

    /// Resolves `handle` to a block index or the reason it does not resolve.
    fn find(&self, handle: Handle) -> StdResult<usize, Unresolved> {
        if !handle.is_valid() {
            return Err(Unresolved::Invalid);
        }

        let salt = handle.salt();

        // Zero marks an empty handle table slot and is never issued as a salt.
        if salt == 0 {
            return Err(Unresolved::NotFound);
        }

        let bitmap = self.bitmap();
        let table = self.handle_table();

        if let Some(index) = find_allocated(&bitmap, &table, salt) {
            return Ok(index);
        }

        let recorded_for_free_block = table
            .iter()
            .any(|(index, slot_salt)| slot_salt == salt && !bitmap.is_set(index));

        if recorded_for_free_block {
            Err(Unresolved::NotAllocated)
        } else {
            Err(Unresolved::NotFound)
        }
    }

    fn locate(&self, handle: Handle) -> Result<usize> {
        self.find(handle)
            .map_err(|outcome| outcome.into_error(handle))
    }

    fn block_ptr(&self, index: usize) -> NonNull<u8> {
        self.arena.ptr_at(self.layout.block_offset(index))
    }

    fn bitmap(&self) -> Bitmap<&[u8]> {
        bitmap_view(&self.arena, &self.layout)
    }

    fn handle_table(&self) -> HandleTable<&[u8]> {
        handle_table_view(&self.arena, &self.layout)
    }

    fn metadata_mut(&mut self) -> (Bitmap<&mut [u8]>, HandleTable<&mut [u8]>) {
        let num_blocks = self.layout.num_blocks();
        let bitmap_offset = self.layout.bitmap_offset();

        let (head, table_bytes) = self
            .arena
            .metadata_mut()
            .split_at_mut(self.layout.handle_table_offset());

        let bitmap_bytes = head
            .get_mut(bitmap_offset..)
            .expect("bitmap region lies within the metadata");

        (
            Bitmap::new(bitmap_bytes, num_blocks),
            HandleTable::new(table_bytes, num_blocks),
        )
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    pub(crate) fn integrity_check(&self) {
        let bitmap = self.bitmap();
        let table = self.handle_table();

        assert_eq!(bitmap.len(), self.num_blocks());

        let observed_allocated = bitmap.count_set();
        assert!(
            observed_allocated == self.num_allocated,
            "num_allocated {} does not match the {} set bits in the bitmap",
            self.num_allocated,
            observed_allocated
        );

        let mut live_salts = Vec::with_capacity(observed_allocated);

        for (index, salt) in table.iter() {
            if bitmap.is_set(index) {
                assert!(salt != 0, "allocated block {index} has no salt");
                live_salts.push(salt);
            } else {
                assert!(
                    salt == 0,
                    "free block {index} still carries salt {salt:#06x}"
                );
            }
        }

        live_salts.sort_unstable();
        assert!(
            live_salts.windows(2).all(|pair| pair.first() != pair.last()),
            "two live allocations share a salt"
        );

        let expected_used_size = self
            .block_size()
            .checked_mul(self.num_allocated)
            .and_then(|blocks| blocks.checked_add(HEADER_SIZE))
            .expect("used size is bounded by the total size of the pool");
        assert!(
            self.used_size == expected_used_size,
            "used_size {} does not match the expected {}",
            self.used_size,
            expected_used_size
        );
    }
}

impl Drop for HandlePool {
    fn drop(&mut self) {
        debug!(
            num_allocated = self.num_allocated,
            total_size = self.total_size(),
            "handle pool dropped"
        );

        // If we are already panicking, we do not want to panic again because that will
        // simply obscure whatever the original panic was, leading to debug difficulties.
        if self.drop_policy == DropPolicy::MustNotDropBlocks && !thread::panicking() {
            assert!(
                self.num_allocated == 0,
                "dropped a pool with {} allocated blocks with a policy that says it must be empty when dropped",
                self.num_allocated
            );
        }
    }
}

fn bitmap_view<'a>(arena: &'a Arena, layout: &PoolLayout) -> Bitmap<&'a [u8]> {
    let bytes = arena
        .metadata()
        .get(layout.bitmap_range())
        .expect("bitmap region lies within the metadata");

    Bitmap::new(bytes, layout.num_blocks())
}

fn handle_table_view<'a>(arena: &'a Arena, layout: &PoolLayout) -> HandleTable<&'a [u8]> {
    let bytes = arena
        .metadata()
        .get(layout.handle_table_range())
        .expect("handle table region lies within the metadata");

    HandleTable::new(bytes, layout.num_blocks())
}

/// Index of the allocated block that carries `salt`, if any.
fn find_allocated<B, T>(bitmap: &Bitmap<B>, table: &HandleTable<T>, salt: u16) -> Option<usize>
where
    B: AsRef<[u8]>,
    T: AsRef<[u8]>,
{
    table
        .iter()
        .find_map(|(index, slot_salt)| (slot_salt == salt && bitmap.is_set(index)).then_some(index))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::collections::HashSet;
    use std::fmt::Debug;
    use std::iter;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(HandlePool: Send, Debug);
    assert_not_impl_any!(HandlePool: Sync);

    fn small_pool() -> HandlePool {
        HandlePool::builder()
            .total_size(2048)
            .block_size(128)
            .salt_seed(5)
            .build()
            .unwrap()
    }

    #[test]
    fn smoke_test() {
        let mut pool = small_pool();

        assert_eq!(pool.num_allocated(), 0);
        assert_eq!(pool.used_size(), HEADER_SIZE);
        assert_eq!(pool.next_sequence(), 1);

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();

        assert_eq!(pool.num_allocated(), 3);
        assert_eq!(pool.used_size(), HEADER_SIZE + 3 * 128);
        assert_eq!(pool.next_sequence(), 4);

        pool.block_mut(a).unwrap().fill(b'a');
        pool.block_mut(b).unwrap().fill(b'b');
        pool.block_mut(c).unwrap().fill(b'c');

        pool.free(b).unwrap();
        let d = pool.allocate().unwrap();
        pool.block_mut(d).unwrap().fill(b'd');

        assert!(pool.block(a).unwrap().iter().all(|&x| x == b'a'));
        assert!(pool.block(c).unwrap().iter().all(|&x| x == b'c'));
        assert!(pool.block(d).unwrap().iter().all(|&x| x == b'd'));
    }

    #[test]
    fn first_fit_reuses_lowest_free_block() {
        let mut pool = small_pool();

        let handles: Vec<_> = iter::repeat_with(|| pool.allocate().unwrap())
            .take(4)
            .collect();
        let addresses: Vec<_> = handles
            .iter()
            .map(|&h| pool.resolve_pointer(h).unwrap())
            .collect();

        // Blocks are handed out in index order.
        for (index, pair) in addresses.windows(2).enumerate() {
            assert_eq!(
                pair[1].as_ptr() as usize - pair[0].as_ptr() as usize,
                128,
                "block {index} and its successor are not adjacent"
            );
        }

        pool.free(handles[2]).unwrap();
        pool.free(handles[1]).unwrap();

        let reused = pool.allocate().unwrap();
        assert_eq!(pool.resolve_pointer(reused), Some(addresses[1]));
        assert_eq!(pool.is_block_allocated(1), Some(true));
        assert_eq!(pool.is_block_allocated(2), Some(false));
    }

    #[test]
    fn block_addresses_match_layout() {
        let mut pool = small_pool();
        let handle = pool.allocate().unwrap();

        let ptr = pool.resolve_pointer(handle).unwrap();
        let base = pool.arena.ptr_at(0);

        assert_eq!(
            ptr.as_ptr() as usize - base.as_ptr() as usize,
            pool.layout().data_offset()
        );
    }

    #[test]
    fn allocation_updates_metadata() {
        let mut pool = small_pool();
        let handle = pool.allocate().unwrap();

        assert_eq!(pool.is_block_allocated(0), Some(true));
        assert_eq!(pool.handle_table().get(0), handle.salt());

        pool.free(handle).unwrap();

        assert_eq!(pool.is_block_allocated(0), Some(false));
        assert_eq!(pool.handle_table().get(0), 0);
    }

    #[test]
    fn is_block_allocated_out_of_range_is_none() {
        let pool = small_pool();
        assert_eq!(pool.is_block_allocated(pool.num_blocks()), None);
        assert_eq!(pool.is_block_allocated(usize::MAX), None);
    }

    #[test]
    fn exhaustion_leaves_state_unchanged() {
        let mut pool = small_pool();

        let num_blocks = pool.num_blocks();
        let handles: Vec<_> = iter::repeat_with(|| pool.allocate().unwrap())
            .take(num_blocks)
            .collect();

        let before = pool.stats();

        let result = pool.allocate();
        assert!(matches!(
            result,
            Err(Error::PoolExhausted { num_blocks }) if num_blocks == pool.num_blocks()
        ));
        assert_eq!(pool.stats(), before);

        // Every live handle still resolves.
        for handle in handles {
            assert_eq!(pool.validate(handle), Validation::Valid);
        }
    }

    #[test]
    fn sequence_exhaustion_fails_without_mutation() {
        let mut pool = small_pool();

        pool.next_sequence = u16::MAX;
        let last = pool.allocate().unwrap();
        assert_eq!(last.sequence(), u16::MAX);
        assert_eq!(pool.next_sequence(), 0);

        let before = pool.stats();
        assert!(matches!(pool.allocate(), Err(Error::HandleSpaceExhausted)));
        assert_eq!(pool.stats(), before);

        // Freeing still works, but the sequence does not come back.
        pool.free(last).unwrap();
        assert!(matches!(pool.allocate(), Err(Error::HandleSpaceExhausted)));
    }

    #[test]
    fn free_reports_distinct_errors() {
        let mut pool = small_pool();
        let handle = pool.allocate().unwrap();

        assert!(matches!(
            pool.free(Handle::INVALID),
            Err(Error::InvalidHandle)
        ));

        let unknown = Handle::new(handle.salt().wrapping_add(1).max(1), 1);
        assert!(matches!(
            pool.free(unknown),
            Err(Error::HandleNotFound { handle }) if handle == unknown
        ));

        pool.free(handle).unwrap();
        assert!(matches!(
            pool.free(handle),
            Err(Error::HandleNotFound { .. })
        ));
    }

    #[test]
    fn salt_left_behind_in_free_block_is_not_allocated() {
        let mut pool = small_pool();
        let handle = pool.allocate().unwrap();

        // Simulate a stale table entry: the bit is cleared but the salt is not erased.
        {
            let (mut bitmap, _) = pool.metadata_mut();
            bitmap.clear(0);
        }
        pool.num_allocated = 0;
        pool.used_size = HEADER_SIZE;

        assert_eq!(pool.validate(handle), Validation::NotAllocated);
        assert!(matches!(
            pool.free(handle),
            Err(Error::BlockNotAllocated { .. })
        ));
        assert!(pool.resolve_pointer(handle).is_none());
    }

    #[test]
    fn unresolved_outcomes_keep_their_meaning() {
        let handle = Handle::from_raw(0x0042_0001);

        for (outcome, validation) in [
            (Unresolved::Invalid, Validation::Invalid),
            (Unresolved::NotFound, Validation::NotFound),
            (Unresolved::NotAllocated, Validation::NotAllocated),
        ] {
            assert_eq!(Validation::from(outcome), validation);
        }

        assert!(matches!(
            Unresolved::Invalid.into_error(handle),
            Error::InvalidHandle
        ));
        assert!(matches!(
            Unresolved::NotFound.into_error(handle),
            Error::HandleNotFound { handle: h } if h == handle
        ));
        assert!(matches!(
            Unresolved::NotAllocated.into_error(handle),
            Error::BlockNotAllocated { handle: h } if h == handle
        ));
    }

    #[test]
    fn zero_salt_never_matches_free_slots() {
        let mut pool = small_pool();
        let _handle = pool.allocate().unwrap();

        // Free blocks have zeroed slots, but a zero salt must not resolve to them.
        let zero_salt = Handle::from_raw(0x0000_0001);
        assert_eq!(pool.validate(zero_salt), Validation::NotFound);
        assert!(pool.resolve_pointer(zero_salt).is_none());
    }

    #[test]
    fn resolution_ignores_sequence() {
        let mut pool = small_pool();
        let handle = pool.allocate().unwrap();

        // Only the salt is a lookup key. A handle with the same salt and a different sequence
        // resolves to the same block. This documents current behavior of the handle format.
        let forged = Handle::new(handle.salt(), handle.sequence().wrapping_add(100));

        assert_eq!(pool.validate(forged), Validation::Valid);
        assert_eq!(pool.resolve_pointer(forged), pool.resolve_pointer(handle));
    }

    #[test]
    fn colliding_candidate_is_retried() {
        let mut pool = small_pool();
        let live = pool.allocate().unwrap();

        // Bind the first salt a seeded generator will draw to the live block, then make the
        // pool draw from an identically seeded generator.
        let colliding = SaltGenerator::from_seed(99).generate(|_| false).unwrap();
        pool.salts = SaltGenerator::from_seed(99);

        {
            let (_, mut table) = pool.metadata_mut();
            table.set(0, colliding);
        }

        let next = pool.allocate().unwrap();
        assert_ne!(next.salt(), colliding);

        let rebound = Handle::new(colliding, live.sequence());
        assert_eq!(pool.validate(rebound), Validation::Valid);
        assert_ne!(pool.resolve_pointer(rebound), pool.resolve_pointer(next));
    }

    #[test]
    fn salt_generation_failure_leaves_state_unchanged() {
        let mut pool = small_pool();

        // Record every candidate a seeded generator will draw before giving up.
        let mut candidates = Vec::new();
        let result = SaltGenerator::from_seed(77).generate(|candidate| {
            candidates.push(candidate);
            true
        });
        assert!(result.is_err());

        // Bind all of them to live blocks so that every draw collides.
        let handles: Vec<_> = iter::repeat_with(|| pool.allocate().unwrap())
            .take(candidates.len())
            .collect();
        {
            let (_, mut table) = pool.metadata_mut();
            for (index, &salt) in candidates.iter().enumerate() {
                table.set(index, salt);
            }
        }
        pool.salts = SaltGenerator::from_seed(77);

        let before = pool.stats();
        assert!(matches!(
            pool.allocate(),
            Err(Error::SaltGenerationFailed { .. })
        ));
        assert_eq!(pool.stats(), before);
        assert_eq!(pool.is_block_allocated(handles.len()), Some(false));
    }

    #[test]
    fn stats_track_counters() {
        let mut pool = small_pool();
        let handle = pool.allocate().unwrap();

        let stats = pool.stats();
        assert_eq!(stats.total_size, 2048);
        assert_eq!(stats.used_size, HEADER_SIZE + 128);
        assert_eq!(stats.block_size, 128);
        assert_eq!(stats.num_blocks, pool.num_blocks());
        assert_eq!(stats.num_allocated, 1);
        assert_eq!(stats.next_sequence, 2);

        pool.free(handle).unwrap();
        assert_eq!(pool.stats().num_allocated, 0);
        assert_eq!(pool.stats().used_size, HEADER_SIZE);
    }

    #[test]
    fn handles_are_unique_when_full() {
        let mut pool = small_pool();

        let num_blocks = pool.num_blocks();
        let handles: HashSet<_> = iter::repeat_with(|| pool.allocate().unwrap())
            .take(num_blocks)
            .collect();
        assert_eq!(handles.len(), pool.num_blocks());

        let salts: HashSet<_> = handles.iter().map(|h| h.salt()).collect();
        assert_eq!(salts.len(), pool.num_blocks());
    }

    #[test]
    fn seeded_pools_are_reproducible() {
        let mut a = small_pool();
        let mut b = small_pool();

        for _ in 0..5 {
            assert_eq!(a.allocate().unwrap(), b.allocate().unwrap());
        }
    }

    #[test]
    fn drop_with_no_allocations_does_not_panic_if_policy_must_not_drop() {
        let mut pool = HandlePool::builder()
            .total_size(2048)
            .block_size(64)
            .drop_policy(DropPolicy::MustNotDropBlocks)
            .build()
            .unwrap();

        let handle = pool.allocate().unwrap();
        pool.free(handle).unwrap();

        drop(pool);
    }

    #[test]
    #[should_panic]
    fn drop_with_allocations_panics_if_policy_must_not_drop() {
        let mut pool = HandlePool::builder()
            .total_size(2048)
            .block_size(64)
            .drop_policy(DropPolicy::MustNotDropBlocks)
            .build()
            .unwrap();

        _ = pool.allocate().unwrap();

        drop(pool);
    }

    #[test]
    fn drop_with_allocations_is_fine_by_default() {
        let mut pool = small_pool();
        _ = pool.allocate().unwrap();

        let result = catch_unwind(AssertUnwindSafe(move || drop(pool)));
        assert!(result.is_ok());
    }

    #[test]
    fn pool_can_move_between_threads() {
        let mut pool = small_pool();
        let handle = pool.allocate().unwrap();
        pool.block_mut(handle).unwrap()[0] = 42;

        let pool = thread::spawn(move || {
            assert_eq!(pool.block(handle).unwrap()[0], 42);
            pool
        })
        .join()
        .unwrap();

        assert_eq!(pool.num_allocated(), 1);
    }
}

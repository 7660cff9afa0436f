use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::ptr::NonNull;
use std::slice;

/// The single heap allocation backing a pool.
///
/// The arena starts out zeroed, which leaves every block free in the bitmap and every slot of
/// the handle table empty.
///
/// # Out of band access
///
/// The arena never creates references into the data region. The pool hands out raw pointers to
/// blocks, which callers may turn into references from unsafe code, so only the metadata prefix
/// (`0..metadata_len`) is ever exposed as a slice by the arena itself.
#[derive(Debug)]
pub(crate) struct Arena {
    ptr: NonNull<u8>,
    layout: Layout,

    /// Length of the prefix holding the header, bitmap and handle table.
    metadata_len: usize,
}

/// Alignment of the arena base. The header region holds machine words.
const ARENA_ALIGN: usize = align_of::<usize>();

impl Arena {
    /// Allocates a zeroed arena of `size` bytes whose first `metadata_len` bytes hold metadata.
    ///
    /// Returns `None` if `size` cannot be described as an allocation layout or if the system
    /// allocator cannot satisfy the request.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero or if `metadata_len` exceeds `size`.
    #[must_use]
    pub(crate) fn new(size: usize, metadata_len: usize) -> Option<Self> {
        assert!(size > 0, "arena must have non-zero size");
        assert!(
            metadata_len <= size,
            "metadata length {metadata_len} exceeds arena size {size}"
        );

        let layout = Layout::from_size_align(size, ARENA_ALIGN).ok()?;

        // SAFETY: The layout is not zero-sized (guarded by assertion above).
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })?;

        Some(Self {
            ptr,
            layout,
            metadata_len,
        })
    }

    /// Size of the arena in bytes.
    #[must_use]
    pub(crate) fn size(&self) -> usize {
        self.layout.size()
    }

    /// The header, bitmap and handle table bytes.
    #[must_use]
    pub(crate) fn metadata(&self) -> &[u8] {
        // SAFETY: The allocation is valid for `size` bytes, `metadata_len <= size`, the memory
        // was zero-initialized at allocation and no other reference to the metadata prefix
        // can exist while we hold `&self` (the arena only exposes it through these methods).
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.metadata_len) }
    }

    /// The header, bitmap and handle table bytes, for modification.
    #[must_use]
    pub(crate) fn metadata_mut(&mut self) -> &mut [u8] {
        // SAFETY: As in `metadata()`, plus we hold `&mut self` so the slice is exclusive.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.metadata_len) }
    }

    /// Pointer to the byte at `offset` from the start of the arena.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is not inside the arena.
    #[must_use]
    pub(crate) fn ptr_at(&self, offset: usize) -> NonNull<u8> {
        assert!(
            offset < self.size(),
            "offset {offset} out of bounds in arena of {} bytes",
            self.size()
        );

        // SAFETY: Guarded by bounds check above, so the result stays within the allocation.
        unsafe { self.ptr.add(offset) }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // SAFETY: The layout matches the one used in `new()` and the pointer came from that
        // allocation. The arena is the only owner of the allocation.
        unsafe {
            dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}

// SAFETY: The arena exclusively owns plain bytes. Nothing about it is tied to a thread.
unsafe impl Send for Arena {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(Arena: Send);
    assert_not_impl_any!(Arena: Sync);

    #[test]
    fn starts_zeroed() {
        let arena = Arena::new(4096, 128).unwrap();

        assert_eq!(arena.size(), 4096);
        assert_eq!(arena.metadata().len(), 128);
        assert!(arena.metadata().iter().all(|&b| b == 0));

        let last = arena.ptr_at(4095);
        assert_eq!(unsafe { last.read() }, 0);
    }

    #[test]
    fn metadata_writes_persist() {
        let mut arena = Arena::new(2048, 16).unwrap();

        arena.metadata_mut()[3] = 0xAB;

        assert_eq!(arena.metadata()[3], 0xAB);
        assert_eq!(unsafe { arena.ptr_at(3).read() }, 0xAB);
    }

    #[test]
    fn base_is_word_aligned() {
        let arena = Arena::new(2048, 0).unwrap();
        assert_eq!(arena.ptr_at(0).as_ptr().align_offset(ARENA_ALIGN), 0);
    }

    #[test]
    #[should_panic]
    fn out_of_bounds_pointer_panics() {
        let arena = Arena::new(2048, 0).unwrap();
        _ = arena.ptr_at(2048);
    }

    #[test]
    fn unrepresentable_size_is_none() {
        assert!(Arena::new(usize::MAX, 0).is_none());
    }

    #[test]
    #[should_panic]
    fn oversized_metadata_panics() {
        _ = Arena::new(1024, 1025);
    }
}

use std::ops::Range;

use crate::{Error, Result};

/// Pools must be strictly larger than this many bytes.
pub const MIN_POOL_SIZE: usize = 1024;

/// Pools can be at most this many bytes, the largest size an allocation may have.
pub const MAX_POOL_SIZE: usize = isize::MAX.unsigned_abs();

/// Bytes reserved at the start of the arena for pool bookkeeping.
///
/// This is the footprint of a record holding the pool's eight bookkeeping fields (sizes,
/// counters and region offsets), one machine word each.
pub const HEADER_SIZE: usize = 8 * size_of::<usize>();

/// Bits tracked by each word of the allocation bitmap.
pub(crate) const BITMAP_WORD_BITS: usize = u32::BITS as usize;

/// Bytes in each word of the allocation bitmap.
pub(crate) const BITMAP_WORD_SIZE: usize = size_of::<u32>();

/// Bytes in each slot of the handle table. Only the low 16 bits of a slot are used.
pub(crate) const HANDLE_SLOT_SIZE: usize = size_of::<u32>();

/// Byte layout of a pool arena.
///
/// The arena is divided into four contiguous regions, in this order:
///
/// ```text
/// | header | bitmap | handle table | data blocks ... | unused tail |
/// 0        ^ bitmap_offset         ^ data_offset
///                   ^ handle_table_offset
/// ```
///
/// The bitmap and handle table are sized for an upper bound on the block count, computed before
/// their own overhead is known. The final block count is then derived from the space that
/// remains after them, so it is never larger than the estimate and the metadata regions may
/// have a few unused entries at the end. This two-pass approximation is not an exact optimum.
///
/// # Example
///
/// ```
/// use handle_pool::{HEADER_SIZE, PoolLayout};
///
/// let layout = PoolLayout::plan(64 * 1024, 512).unwrap();
///
/// assert_eq!(layout.bitmap_offset(), HEADER_SIZE);
/// assert!(layout.num_blocks() < 64 * 1024 / 512);
/// assert!(layout.data_offset() + layout.num_blocks() * 512 <= 64 * 1024);
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PoolLayout {
    total_size: usize,
    block_size: usize,

    /// The block count estimate used to size the bitmap and handle table.
    max_blocks: usize,

    /// The block count that actually fits after the metadata regions.
    num_blocks: usize,

    bitmap_offset: usize,
    handle_table_offset: usize,
    data_offset: usize,
}

impl PoolLayout {
    /// Computes the layout of a pool of `total_size` bytes divided into `block_size` blocks.
    ///
    /// This is a pure calculation; no memory is reserved.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `total_size` is not larger than
    /// [`MIN_POOL_SIZE`] or is larger than [`MAX_POOL_SIZE`], if `block_size` is zero or if the
    /// metadata leaves no room for even a single block.
    pub fn plan(total_size: usize, block_size: usize) -> Result<Self> {
        if total_size <= MIN_POOL_SIZE {
            return Err(invalid(format!(
                "total size {total_size} must be greater than {MIN_POOL_SIZE} bytes"
            )));
        }

        if total_size > MAX_POOL_SIZE {
            return Err(invalid(format!(
                "total size {total_size} exceeds the maximum of {MAX_POOL_SIZE} bytes"
            )));
        }

        if block_size == 0 {
            return Err(invalid("block size must be non-zero".to_string()));
        }

        let Some(space_after_header) = total_size.checked_sub(HEADER_SIZE) else {
            return Err(invalid(format!(
                "total size {total_size} cannot hold the {HEADER_SIZE} byte header"
            )));
        };

        // First pass: size the metadata for as many blocks as could possibly fit.
        let max_blocks = space_after_header
            .checked_div(block_size)
            .expect("guarded by block_size != 0 above");

        let bitmap_size = max_blocks
            .div_ceil(BITMAP_WORD_BITS)
            .checked_mul(BITMAP_WORD_SIZE)
            .ok_or_else(overflow)?;
        let handle_table_size = max_blocks
            .checked_mul(HANDLE_SLOT_SIZE)
            .ok_or_else(overflow)?;

        let bitmap_offset = HEADER_SIZE;
        let handle_table_offset = bitmap_offset.checked_add(bitmap_size).ok_or_else(overflow)?;
        let data_offset = handle_table_offset
            .checked_add(handle_table_size)
            .ok_or_else(overflow)?;

        // Second pass: count the blocks that fit into whatever the metadata left over.
        let num_blocks = total_size
            .checked_sub(data_offset)
            .and_then(|remaining| remaining.checked_div(block_size))
            .unwrap_or(0);

        if num_blocks == 0 {
            return Err(invalid(format!(
                "total size {total_size} leaves no room for a block of {block_size} bytes after metadata"
            )));
        }

        debug_assert!(num_blocks <= max_blocks);

        Ok(Self {
            total_size,
            block_size,
            max_blocks,
            num_blocks,
            bitmap_offset,
            handle_table_offset,
            data_offset,
        })
    }

    /// Total size of the arena in bytes, including metadata and any unused tail.
    #[must_use]
    #[inline]
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Size of each block in bytes.
    #[must_use]
    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of blocks the pool can hand out.
    #[must_use]
    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    /// The block count estimate the metadata regions were sized for.
    #[must_use]
    #[inline]
    pub fn max_blocks(&self) -> usize {
        self.max_blocks
    }

    /// Byte offset of the allocation bitmap from the start of the arena.
    #[must_use]
    #[inline]
    pub fn bitmap_offset(&self) -> usize {
        self.bitmap_offset
    }

    /// Byte offset of the handle table from the start of the arena.
    #[must_use]
    #[inline]
    pub fn handle_table_offset(&self) -> usize {
        self.handle_table_offset
    }

    /// Byte offset of the first data block from the start of the arena.
    #[must_use]
    #[inline]
    pub fn data_offset(&self) -> usize {
        self.data_offset
    }

    /// Byte range of the allocation bitmap.
    #[must_use]
    pub(crate) fn bitmap_range(&self) -> Range<usize> {
        self.bitmap_offset..self.handle_table_offset
    }

    /// Byte range of the handle table.
    #[must_use]
    pub(crate) fn handle_table_range(&self) -> Range<usize> {
        self.handle_table_offset..self.data_offset
    }

    /// Byte offset of the block at `index` from the start of the arena.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[must_use]
    pub(crate) fn block_offset(&self, index: usize) -> usize {
        assert!(
            index < self.num_blocks,
            "block {index} out of bounds in pool of {} blocks",
            self.num_blocks
        );

        // Cannot overflow: the last block ends within total_size, as established in plan().
        self.data_offset
            .wrapping_add(index.wrapping_mul(self.block_size))
    }
}

fn invalid(problem: String) -> Error {
    Error::InvalidArgument { problem }
}

fn overflow() -> Error {
    invalid("pool metadata size overflows usize".to_string())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::arithmetic_side_effects,
    clippy::integer_division,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use super::*;

    fn assert_layout_invariants(layout: &PoolLayout) {
        assert!(layout.bitmap_offset() >= HEADER_SIZE);
        assert!(layout.bitmap_offset() < layout.handle_table_offset());
        assert!(layout.handle_table_offset() < layout.data_offset());
        assert!(layout.data_offset() <= layout.total_size());
        assert!(
            layout.data_offset() + layout.num_blocks() * layout.block_size()
                <= layout.total_size()
        );
        assert!(layout.num_blocks() <= layout.max_blocks());

        // The metadata regions must be large enough for the final block count.
        assert!(
            layout.handle_table_offset() - layout.bitmap_offset()
                >= layout.num_blocks().div_ceil(32) * 4
        );
        assert!(layout.data_offset() - layout.handle_table_offset() >= layout.num_blocks() * 4);
    }

    #[test]
    fn one_mebibyte_of_kibibyte_blocks() {
        let layout = PoolLayout::plan(1_048_576, 1024).unwrap();

        let max_blocks = (1_048_576 - HEADER_SIZE) / 1024;
        assert_eq!(layout.max_blocks(), max_blocks);
        assert_eq!(layout.bitmap_offset(), HEADER_SIZE);
        assert_eq!(
            layout.handle_table_offset(),
            HEADER_SIZE + max_blocks.div_ceil(32) * 4
        );
        assert_eq!(
            layout.data_offset(),
            layout.handle_table_offset() + max_blocks * 4
        );
        assert_eq!(
            layout.num_blocks(),
            (1_048_576 - layout.data_offset()) / 1024
        );

        // Several hundred blocks survive the overhead.
        assert!(layout.num_blocks() > 500);
        assert!(layout.num_blocks() < 1024);

        assert_layout_invariants(&layout);
    }

    #[test]
    fn invariants_hold_across_sizes() {
        for total_size in [1025, 1500, 4096, 10_000, 65_536, 1_000_003, 1_048_576] {
            for block_size in [1, 3, 8, 16, 64, 100, 512, 1000] {
                match PoolLayout::plan(total_size, block_size) {
                    Ok(layout) => assert_layout_invariants(&layout),
                    Err(Error::InvalidArgument { .. }) => {
                        // Only legitimate when not even one block fits: either the per-block
                        // metadata outweighs the block itself or the blocks are huge.
                        assert!(
                            block_size <= HANDLE_SLOT_SIZE
                                || block_size * 2 > total_size - HEADER_SIZE
                        );
                    }
                    Err(other) => panic!("unexpected error {other:?}"),
                }
            }
        }
    }

    #[test]
    fn pool_must_exceed_minimum() {
        assert!(matches!(
            PoolLayout::plan(MIN_POOL_SIZE, 16),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            PoolLayout::plan(0, 16),
            Err(Error::InvalidArgument { .. })
        ));
        PoolLayout::plan(MIN_POOL_SIZE + 1, 16).unwrap();
    }

    #[test]
    fn pool_must_fit_an_allocation() {
        assert!(matches!(
            PoolLayout::plan(usize::MAX, 1 << 20),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            PoolLayout::plan(MAX_POOL_SIZE + 1, 1 << 20),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn zero_block_size_is_rejected() {
        assert!(matches!(
            PoolLayout::plan(4096, 0),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn metadata_heavier_than_blocks_is_rejected() {
        // Each block costs more than a byte of metadata, so one-byte blocks never fit.
        assert!(matches!(
            PoolLayout::plan(4096, 1),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn block_larger_than_pool_is_rejected() {
        assert!(matches!(
            PoolLayout::plan(4096, 4096),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn block_offsets_are_contiguous() {
        let layout = PoolLayout::plan(8192, 100).unwrap();

        assert_eq!(layout.block_offset(0), layout.data_offset());
        assert_eq!(layout.block_offset(1), layout.data_offset() + 100);

        let last = layout.num_blocks() - 1;
        assert!(layout.block_offset(last) + 100 <= layout.total_size());
    }

    #[test]
    #[should_panic]
    fn block_offset_out_of_bounds_panics() {
        let layout = PoolLayout::plan(8192, 100).unwrap();
        _ = layout.block_offset(layout.num_blocks());
    }

    #[test]
    fn regions_cover_metadata() {
        let layout = PoolLayout::plan(8192, 100).unwrap();

        assert_eq!(layout.bitmap_range().start, HEADER_SIZE);
        assert_eq!(layout.bitmap_range().end, layout.handle_table_range().start);
        assert_eq!(layout.handle_table_range().end, layout.data_offset());
    }
}

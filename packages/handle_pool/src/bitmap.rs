use crate::layout::{BITMAP_WORD_BITS, BITMAP_WORD_SIZE};

/// A fixed-length bit set stored in 32-bit words inside a borrowed byte buffer.
///
/// The pool keeps its allocation bitmap inside the arena, so this type does not own its storage.
/// It is constructed over the bitmap region whenever the pool needs to read (`B = &[u8]`) or
/// modify (`B = &mut [u8]`) the allocation state. Words are stored in native byte order.
///
/// Bit `i` lives in word `i / 32` at bit position `i % 32`. A set bit means the block at that
/// index is allocated.
#[derive(Debug)]
pub(crate) struct Bitmap<B> {
    bytes: B,
    len: usize,
}

impl<B> Bitmap<B>
where
    B: AsRef<[u8]>,
{
    /// Creates a view of `len` bits over `bytes`.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is too small to hold `len` bits.
    #[must_use]
    pub(crate) fn new(bytes: B, len: usize) -> Self {
        let required = len
            .div_ceil(BITMAP_WORD_BITS)
            .checked_mul(BITMAP_WORD_SIZE)
            .expect("bitmap size cannot overflow for a bitmap that fits in memory");

        assert!(
            bytes.as_ref().len() >= required,
            "bitmap of {len} bits needs {required} bytes but only {} were provided",
            bytes.as_ref().len()
        );

        Self { bytes, len }
    }

    /// Number of bits in the bitmap.
    #[must_use]
    #[cfg_attr(
        all(not(debug_assertions), not(test)),
        expect(dead_code, reason = "used by the pool integrity check in debug builds")
    )]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[must_use]
    pub(crate) fn is_set(&self, index: usize) -> bool {
        let (word_index, mask) = self.locate(index);
        self.word(word_index) & mask != 0
    }

    /// Returns the lowest index whose bit is clear, if any.
    #[must_use]
    pub(crate) fn first_clear(&self) -> Option<usize> {
        let word_count = self.len.div_ceil(BITMAP_WORD_BITS);

        (0..word_count)
            .find_map(|word_index| {
                let word = self.word(word_index);

                if word == u32::MAX {
                    return None;
                }

                // trailing_ones() is at most 31 here, so the cast and the arithmetic are exact.
                let bit = word.trailing_ones() as usize;
                Some(word_index.wrapping_mul(BITMAP_WORD_BITS).wrapping_add(bit))
            })
            // The last word may have clear padding bits beyond `len`.
            .filter(|&index| index < self.len)
    }

    /// Counts the set bits.
    #[must_use]
    #[cfg_attr(
        all(not(debug_assertions), not(test)),
        expect(dead_code, reason = "used by the pool integrity check in debug builds")
    )]
    pub(crate) fn count_set(&self) -> usize {
        (0..self.len).filter(|&index| self.is_set(index)).count()
    }

    fn locate(&self, index: usize) -> (usize, u32) {
        assert!(
            index < self.len,
            "bit {index} out of bounds in bitmap of {} bits",
            self.len
        );

        let word_index = index
            .checked_div(BITMAP_WORD_BITS)
            .expect("word size is non-zero");
        let bit = index
            .checked_rem(BITMAP_WORD_BITS)
            .expect("word size is non-zero");

        (word_index, 1_u32 << bit)
    }

    fn word(&self, word_index: usize) -> u32 {
        let bytes = self
            .bytes
            .as_ref()
            .chunks_exact(BITMAP_WORD_SIZE)
            .nth(word_index)
            .expect("word index was derived from a bounds-checked bit index");

        u32::from_ne_bytes(
            bytes
                .try_into()
                .expect("chunks_exact yields word-sized chunks"),
        )
    }
}

impl<B> Bitmap<B>
where
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    /// Sets the bit at `index`. Setting an already set bit has no effect.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub(crate) fn set(&mut self, index: usize) {
        let (word_index, mask) = self.locate(index);
        let word = self.word(word_index);
        self.set_word(word_index, word | mask);
    }

    /// Clears the bit at `index`. Clearing an already clear bit has no effect.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub(crate) fn clear(&mut self, index: usize) {
        let (word_index, mask) = self.locate(index);
        let word = self.word(word_index);
        self.set_word(word_index, word & !mask);
    }

    fn set_word(&mut self, word_index: usize, value: u32) {
        let bytes = self
            .bytes
            .as_mut()
            .chunks_exact_mut(BITMAP_WORD_SIZE)
            .nth(word_index)
            .expect("word index was derived from a bounds-checked bit index");

        bytes.copy_from_slice(&value.to_ne_bytes());
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use super::*;

    #[test]
    fn starts_clear_over_zeroed_storage() {
        let storage = [0_u8; 8];
        let bitmap = Bitmap::new(&storage[..], 40);

        assert_eq!(bitmap.len(), 40);
        assert_eq!(bitmap.count_set(), 0);
        assert_eq!(bitmap.first_clear(), Some(0));

        for index in 0..40 {
            assert!(!bitmap.is_set(index));
        }
    }

    #[test]
    fn set_and_clear_are_idempotent() {
        let mut storage = [0_u8; 4];
        let mut bitmap = Bitmap::new(&mut storage[..], 32);

        bitmap.set(5);
        bitmap.set(5);
        assert!(bitmap.is_set(5));
        assert_eq!(bitmap.count_set(), 1);

        bitmap.clear(5);
        bitmap.clear(5);
        assert!(!bitmap.is_set(5));
        assert_eq!(bitmap.count_set(), 0);
    }

    #[test]
    fn bits_do_not_interfere() {
        let mut storage = [0_u8; 8];
        let mut bitmap = Bitmap::new(&mut storage[..], 64);

        bitmap.set(0);
        bitmap.set(31);
        bitmap.set(32);
        bitmap.set(63);

        for index in 0..64 {
            assert_eq!(bitmap.is_set(index), matches!(index, 0 | 31 | 32 | 63));
        }

        bitmap.clear(31);
        assert!(bitmap.is_set(0));
        assert!(!bitmap.is_set(31));
        assert!(bitmap.is_set(32));
    }

    #[test]
    fn first_clear_skips_full_words() {
        let mut storage = [0_u8; 12];
        let mut bitmap = Bitmap::new(&mut storage[..], 70);

        for index in 0..33 {
            bitmap.set(index);
        }
        assert_eq!(bitmap.first_clear(), Some(33));

        bitmap.clear(7);
        assert_eq!(bitmap.first_clear(), Some(7));
    }

    #[test]
    fn first_clear_ignores_padding_bits() {
        let mut storage = [0_u8; 4];
        let mut bitmap = Bitmap::new(&mut storage[..], 3);

        bitmap.set(0);
        bitmap.set(1);
        bitmap.set(2);

        // Bits 3..32 are clear but are padding, not blocks.
        assert_eq!(bitmap.first_clear(), None);
    }

    #[test]
    fn writes_land_in_backing_storage() {
        let mut storage = [0_u8; 4];

        {
            let mut bitmap = Bitmap::new(&mut storage[..], 32);
            bitmap.set(0);
            bitmap.set(9);
        }

        assert_eq!(u32::from_ne_bytes(storage), (1 << 0) | (1 << 9));
    }

    #[test]
    #[should_panic]
    fn out_of_bounds_query_panics() {
        let storage = [0_u8; 4];
        let bitmap = Bitmap::new(&storage[..], 10);
        _ = bitmap.is_set(10);
    }

    #[test]
    #[should_panic]
    fn undersized_storage_panics() {
        let storage = [0_u8; 4];
        _ = Bitmap::new(&storage[..], 33);
    }
}

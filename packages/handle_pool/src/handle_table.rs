use crate::layout::HANDLE_SLOT_SIZE;

/// Per-block record of the salt bound to each allocated block, stored in a borrowed byte buffer.
///
/// Each block owns one 32-bit slot of which only the low 16 bits carry the salt. A slot is only
/// meaningful while the matching bitmap bit is set; the pool zeroes the slot when the block is
/// freed. Like [`Bitmap`][crate::bitmap::Bitmap], this is a view that the pool constructs over
/// the handle table region of the arena on demand.
#[derive(Debug)]
pub(crate) struct HandleTable<B> {
    bytes: B,
    len: usize,
}

impl<B> HandleTable<B>
where
    B: AsRef<[u8]>,
{
    /// Creates a view of `len` slots over `bytes`.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is too small to hold `len` slots.
    #[must_use]
    pub(crate) fn new(bytes: B, len: usize) -> Self {
        let required = len
            .checked_mul(HANDLE_SLOT_SIZE)
            .expect("handle table size cannot overflow for a table that fits in memory");

        assert!(
            bytes.as_ref().len() >= required,
            "handle table of {len} slots needs {required} bytes but only {} were provided",
            bytes.as_ref().len()
        );

        Self { bytes, len }
    }

    /// Returns the salt stored for the block at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[must_use]
    pub(crate) fn get(&self, index: usize) -> u16 {
        let slot = self.slot(index);
        let value = u32::from_ne_bytes(slot.try_into().expect("slots are word-sized"));

        #[expect(
            clippy::cast_possible_truncation,
            reason = "only the low 16 bits of a slot are ever written"
        )]
        let salt = value as u16;

        salt
    }

    /// Iterates over `(block_index, salt)` for every slot.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (usize, u16)> + '_ {
        (0..self.len).map(|index| (index, self.get(index)))
    }

    fn slot(&self, index: usize) -> &[u8] {
        assert!(
            index < self.len,
            "slot {index} out of bounds in handle table of {} slots",
            self.len
        );

        self.bytes
            .as_ref()
            .chunks_exact(HANDLE_SLOT_SIZE)
            .nth(index)
            .expect("guarded by bounds check above")
    }
}

impl<B> HandleTable<B>
where
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    /// Binds `salt` to the block at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub(crate) fn set(&mut self, index: usize, salt: u16) {
        assert!(
            index < self.len,
            "slot {index} out of bounds in handle table of {} slots",
            self.len
        );

        let slot = self
            .bytes
            .as_mut()
            .chunks_exact_mut(HANDLE_SLOT_SIZE)
            .nth(index)
            .expect("guarded by bounds check above");

        slot.copy_from_slice(&u32::from(salt).to_ne_bytes());
    }

    /// Zeroes the slot of the block at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub(crate) fn clear(&mut self, index: usize) {
        self.set(index, 0);
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::indexing_slicing,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_storage_has_empty_slots() {
        let storage = [0_u8; 16];
        let table = HandleTable::new(&storage[..], 4);

        assert!(table.iter().all(|(_, salt)| salt == 0));
        assert_eq!(table.iter().count(), 4);
    }

    #[test]
    fn set_get_clear() {
        let mut storage = [0_u8; 16];
        let mut table = HandleTable::new(&mut storage[..], 4);

        table.set(2, 0xBEEF);
        table.set(3, u16::MAX);

        assert_eq!(table.get(0), 0);
        assert_eq!(table.get(2), 0xBEEF);
        assert_eq!(table.get(3), u16::MAX);

        table.clear(2);
        assert_eq!(table.get(2), 0);
        assert_eq!(table.get(3), u16::MAX);
    }

    #[test]
    fn slots_use_full_words() {
        let mut storage = [0xFF_u8; 8];

        {
            let mut table = HandleTable::new(&mut storage[..], 2);
            table.set(0, 0x0102);
        }

        // The whole slot is rewritten, including the unused upper half.
        assert_eq!(u32::from_ne_bytes(storage[..4].try_into().unwrap()), 0x0102);
        assert_eq!(storage[4..], [0xFF; 4]);
    }

    #[test]
    #[should_panic]
    fn out_of_bounds_get_panics() {
        let storage = [0_u8; 8];
        let table = HandleTable::new(&storage[..], 2);
        _ = table.get(2);
    }

    #[test]
    #[should_panic]
    fn out_of_bounds_set_panics() {
        let mut storage = [0_u8; 8];
        let mut table = HandleTable::new(&mut storage[..], 2);
        table.set(2, 1);
    }
}

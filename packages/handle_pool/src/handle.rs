use std::fmt;

/// Opaque reference to a block allocated from a [`HandlePool`][crate::HandlePool].
///
/// A handle packs two 16-bit halves into a `u32`:
///
/// * the upper half is the block's **salt**, a value unique among the live allocations of the
///   pool and recorded in the pool's handle table;
/// * the lower half is the **sequence** number, a counter assigned in allocation order.
///
/// Only the salt takes part in resolving a handle to a block. The sequence number identifies
/// the allocation for diagnostic purposes but is not checked by the pool.
///
/// The raw value `0` is reserved as [`Handle::INVALID`] and is never returned by the pool.
/// Handles can be freely converted to and from `u32` to pass them across boundaries that
/// cannot carry Rust types; the pool validates every handle it is given.
///
/// # Example
///
/// ```
/// use handle_pool::Handle;
///
/// let handle = Handle::from_raw(0xBEEF_0007);
///
/// assert_eq!(handle.salt(), 0xBEEF);
/// assert_eq!(handle.sequence(), 7);
/// assert!(handle.is_valid());
/// assert!(!Handle::INVALID.is_valid());
/// ```
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct Handle(u32);

const SALT_SHIFT: u32 = 16;
const SEQUENCE_MASK: u32 = 0xFFFF;

impl Handle {
    /// The reserved handle value that never refers to a block.
    pub const INVALID: Self = Self(0);

    /// Combines a salt and a sequence number into a handle.
    #[must_use]
    pub(crate) fn new(salt: u16, sequence: u16) -> Self {
        Self((u32::from(salt) << SALT_SHIFT) | u32::from(sequence))
    }

    /// Reinterprets a raw value previously obtained from [`to_raw()`](Self::to_raw).
    #[must_use]
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw value of the handle.
    #[must_use]
    #[inline]
    pub const fn to_raw(self) -> u32 {
        self.0
    }

    /// The salt half of the handle, used as the lookup key in the pool's handle table.
    #[must_use]
    #[inline]
    pub const fn salt(self) -> u16 {
        (self.0 >> SALT_SHIFT) as u16
    }

    /// The allocation sequence half of the handle.
    #[must_use]
    #[inline]
    pub const fn sequence(self) -> u16 {
        (self.0 & SEQUENCE_MASK) as u16
    }

    /// Whether the handle is anything other than [`Handle::INVALID`].
    ///
    /// A valid-looking handle is not necessarily bound to a block; only the pool can tell.
    #[must_use]
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("salt", &format_args!("{:#06x}", self.salt()))
            .field("sequence", &self.sequence())
            .finish()
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl From<Handle> for u32 {
    #[inline]
    fn from(value: Handle) -> Self {
        value.to_raw()
    }
}

impl From<u32> for Handle {
    #[inline]
    fn from(value: u32) -> Self {
        Self::from_raw(value)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Handle: Send, Sync, Copy, fmt::Debug, fmt::Display);

    #[test]
    fn packs_salt_above_sequence() {
        let handle = Handle::new(0xABCD, 0x0102);

        assert_eq!(handle.to_raw(), 0xABCD_0102);
        assert_eq!(handle.salt(), 0xABCD);
        assert_eq!(handle.sequence(), 0x0102);
    }

    #[test]
    fn extremes_do_not_bleed_between_halves() {
        let handle = Handle::new(u16::MAX, 0);
        assert_eq!(handle.salt(), u16::MAX);
        assert_eq!(handle.sequence(), 0);

        let handle = Handle::new(0, u16::MAX);
        assert_eq!(handle.salt(), 0);
        assert_eq!(handle.sequence(), u16::MAX);
    }

    #[test]
    fn zero_is_invalid() {
        assert!(!Handle::INVALID.is_valid());
        assert!(!Handle::from_raw(0).is_valid());
        assert!(Handle::from_raw(1).is_valid());
    }

    #[test]
    fn raw_conversions() {
        let handle = Handle::from(0x0001_0002_u32);
        assert_eq!(u32::from(handle), 0x0001_0002);
        assert_eq!(Handle::from_raw(handle.to_raw()), handle);
    }

    #[test]
    fn formatting() {
        let handle = Handle::new(0x00AB, 3);

        assert_eq!(handle.to_string(), "0x00ab0003");

        let debug_output = format!("{handle:?}");
        assert!(debug_output.contains("0x00ab"));
        assert!(debug_output.contains("sequence: 3"));
    }
}

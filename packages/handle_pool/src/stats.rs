/// A point-in-time snapshot of the usage of a [`HandlePool`][crate::HandlePool].
///
/// Obtained from [`HandlePool::stats()`][crate::HandlePool::stats]. Presenting the numbers is
/// up to the caller.
///
/// # Example
///
/// ```
/// use handle_pool::HandlePool;
///
/// let mut pool = HandlePool::builder()
///     .total_size(64 * 1024)
///     .block_size(256)
///     .build()
///     .unwrap();
///
/// let _handle = pool.allocate().unwrap();
/// let stats = pool.stats();
///
/// assert_eq!(stats.num_allocated, 1);
/// assert_eq!(stats.free_blocks(), stats.num_blocks - 1);
/// assert_eq!(stats.free_size(), stats.total_size - stats.used_size);
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct PoolStats {
    /// Total size of the pool in bytes.
    pub total_size: usize,

    /// Bytes in use: the header plus every allocated block.
    pub used_size: usize,

    /// Size of each block in bytes.
    pub block_size: usize,

    /// Number of blocks the pool can hand out.
    pub num_blocks: usize,

    /// Number of blocks currently allocated.
    pub num_allocated: usize,

    /// Sequence number the next allocation will carry, or 0 if the sequence is exhausted.
    pub next_sequence: u16,
}

impl PoolStats {
    /// Bytes not counted as used.
    #[must_use]
    pub fn free_size(&self) -> usize {
        self.total_size.saturating_sub(self.used_size)
    }

    /// Number of blocks available for allocation.
    #[must_use]
    pub fn free_blocks(&self) -> usize {
        self.num_blocks.saturating_sub(self.num_allocated)
    }

    /// Fraction of the total size that is in use, in the range `0.0..=1.0`.
    #[must_use]
    #[expect(
        clippy::cast_precision_loss,
        reason = "an approximate ratio is all we promise"
    )]
    pub fn usage_ratio(&self) -> f64 {
        self.used_size as f64 / self.total_size as f64
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn sample() -> PoolStats {
        PoolStats {
            total_size: 1000,
            used_size: 250,
            block_size: 50,
            num_blocks: 15,
            num_allocated: 3,
            next_sequence: 4,
        }
    }

    #[test]
    fn derived_values() {
        let stats = sample();

        assert_eq!(stats.free_size(), 750);
        assert_eq!(stats.free_blocks(), 12);
        assert!((stats.usage_ratio() - 0.25).abs() < f64::EPSILON);
    }
}

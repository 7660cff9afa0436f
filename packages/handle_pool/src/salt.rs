use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::warn;

use crate::{Error, Result};

/// How many salt candidates are drawn before allocation gives up.
pub(crate) const SALT_ATTEMPTS: usize = 10;

/// Draws salts that do not collide with the salts of live allocations.
///
/// Salts only need to be unique among the blocks allocated right now, so freed salts are
/// eligible again immediately. The salt space is 16 bits wide and the candidate zero is never
/// produced, because a zero handle table slot marks a free block. With many thousands of live
/// allocations, collisions become likely and allocation may fail with
/// [`Error::SaltGenerationFailed`].
#[derive(Debug)]
pub(crate) struct SaltGenerator {
    rng: SmallRng,
}

impl SaltGenerator {
    /// Creates a generator with a fixed seed, producing the same salt sequence on every run.
    #[must_use]
    pub(crate) fn from_seed(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Creates a generator seeded from the thread-local random number generator.
    #[must_use]
    pub(crate) fn from_entropy() -> Self {
        Self {
            rng: SmallRng::from_rng(&mut rand::rng()),
        }
    }

    /// Returns a non-zero salt for which `is_taken` returns `false`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SaltGenerationFailed`] if all [`SALT_ATTEMPTS`] candidates are taken.
    pub(crate) fn generate(&mut self, mut is_taken: impl FnMut(u16) -> bool) -> Result<u16> {
        for _ in 0..SALT_ATTEMPTS {
            let candidate = self.rng.random_range(1..=u16::MAX);

            if !is_taken(candidate) {
                return Ok(candidate);
            }
        }

        warn!(
            attempts = SALT_ATTEMPTS,
            "every salt candidate collided with a live allocation"
        );

        Err(Error::SaltGenerationFailed {
            attempts: SALT_ATTEMPTS,
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::arithmetic_side_effects,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::cell::Cell;
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn never_produces_zero() {
        let mut salts = SaltGenerator::from_seed(0);

        for _ in 0..10_000 {
            assert_ne!(salts.generate(|_| false).unwrap(), 0);
        }
    }

    #[test]
    fn same_seed_same_salts() {
        let mut a = SaltGenerator::from_seed(42);
        let mut b = SaltGenerator::from_seed(42);

        for _ in 0..100 {
            assert_eq!(
                a.generate(|_| false).unwrap(),
                b.generate(|_| false).unwrap()
            );
        }
    }

    #[test]
    fn skips_taken_candidates() {
        let mut salts = SaltGenerator::from_seed(7);
        let mut taken = HashSet::new();

        // Fill a few hundred salts, each of which must avoid all previous ones.
        for _ in 0..500 {
            let salt = salts
                .generate(|candidate| taken.contains(&candidate))
                .unwrap();
            assert!(taken.insert(salt));
        }
    }

    #[test]
    fn retries_after_collision() {
        let mut salts = SaltGenerator::from_seed(1);
        let calls = Cell::new(0);

        // The first three candidates "collide".
        let salt = salts
            .generate(|_| {
                calls.set(calls.get() + 1);
                calls.get() <= 3
            })
            .unwrap();

        assert_ne!(salt, 0);
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn gives_up_after_bounded_attempts() {
        let mut salts = SaltGenerator::from_seed(1);
        let calls = Cell::new(0);

        let result = salts.generate(|_| {
            calls.set(calls.get() + 1);
            true
        });

        assert!(matches!(
            result,
            Err(Error::SaltGenerationFailed {
                attempts: SALT_ATTEMPTS
            })
        ));
        assert_eq!(calls.get(), SALT_ATTEMPTS);
    }

    #[test]
    fn entropy_seeded_generators_work() {
        let mut salts = SaltGenerator::from_entropy();
        assert_ne!(salts.generate(|_| false).unwrap(), 0);
    }
}

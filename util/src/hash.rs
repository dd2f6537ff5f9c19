//! Utilities for computing hashes.
use std::hash::{BuildHasher, Hasher};

use zwohash::ZwoHasher;

/// Seed used by [`hash_value`] and [`SeededState::default`].
pub const DEFAULT_SEED: u64 = 0x2545_f491_4f6c_dd1d;

/// A [`BuildHasher`] producing [`ZwoHasher`]s that are keyed by a 64-bit seed.
///
/// The seed is written into every hasher before the hashed value, so two states with different
/// seeds produce unrelated hashes for the same input while a single state is fully deterministic.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SeededState {
    seed: u64,
}

impl SeededState {
    /// Returns a state with a freshly drawn random seed.
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    /// Returns a state using the given seed.
    pub const fn with_seed(seed: u64) -> Self {
        Self { seed }
    }

    /// Returns the seed of this state.
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

/// Uses [`DEFAULT_SEED`], so that default constructed states agree with each other.
impl Default for SeededState {
    fn default() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }
}

impl BuildHasher for SeededState {
    type Hasher = ZwoHasher;

    #[inline]
    fn build_hasher(&self) -> ZwoHasher {
        let mut hasher = ZwoHasher::default();
        hasher.write_u64(self.seed);
        hasher
    }
}

/// Computes the hash of a value using the toolkit's default seeded hasher.
#[inline]
pub fn hash_value<T: std::hash::Hash>(value: T) -> u64 {
    SeededState::default().hash_one(value)
}

/// Computes the hash of a reference using the toolkit's default seeded hasher.
///
/// This forwards to [`hash_value`]. Restricting the argument to be a reference is occasionally
/// useful for type inference or for avoiding warnings.
#[inline]
pub fn hash_ref<T: std::hash::Hash>(value: &T) -> u64 {
    hash_value(value)
}

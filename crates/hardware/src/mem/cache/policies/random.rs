//! Random Replacement Policy.
//!
//! Evicts a pseudo-random way. A xorshift generator keeps runs reproducible:
//! the same configuration and access stream always pick the same victims.

use super::ReplacementPolicy;

/// Random Policy state.
#[derive(Debug)]
pub struct RandomPolicy {
    ways: usize,
    state: u64,
}

impl RandomPolicy {
    /// Creates a new Random policy instance.
    ///
    /// # Arguments
    ///
    /// * `ways` - The associativity (number of ways) of the cache.
    /// * `seed` - Generator seed; zero is remapped to a fixed non-zero value.
    pub fn new(ways: usize, seed: u64) -> Self {
        Self {
            ways,
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
        }
    }
}

impl ReplacementPolicy for RandomPolicy {
    fn touch(&mut self, _set: usize, _way: usize) {}

    fn victim(&mut self, _set: usize) -> usize {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        (x % self.ways as u64) as usize
    }
}

//! Pseudo-LRU (PLRU) Replacement Policy.
//!
//! Bit-PLRU: each way owns one "recently used" bit. Touching a way sets its bit;
//! when every bit in the set would be set, all others are cleared. The victim is
//! the lowest way whose bit is clear.
//!
//! # Performance
//!
//! - **Time Complexity:**
//!   - `touch()`: O(W) on the reset path, O(1) otherwise
//!   - `victim()`: O(W)
//! - **Space Complexity:** O(S × W) bits
//! - **Hardware Cost:** Low - one bit per way

use super::ReplacementPolicy;

/// PLRU Policy state.
#[derive(Debug)]
pub struct PlruPolicy {
    used: Vec<bool>,
    ways: usize,
}

impl PlruPolicy {
    /// Creates a new PLRU policy instance.
    ///
    /// # Arguments
    ///
    /// * `sets` - The number of sets in the cache.
    /// * `ways` - The associativity (number of ways) of the cache.
    pub fn new(sets: usize, ways: usize) -> Self {
        Self {
            used: vec![false; sets * ways],
            ways,
        }
    }
}

impl ReplacementPolicy for PlruPolicy {
    fn touch(&mut self, set: usize, way: usize) {
        let row = &mut self.used[set * self.ways..(set + 1) * self.ways];
        row[way] = true;
        if row.iter().all(|&b| b) {
            row.fill(false);
            row[way] = true;
        }
    }

    fn victim(&mut self, set: usize) -> usize {
        let row = &self.used[set * self.ways..(set + 1) * self.ways];
        row.iter().position(|&b| !b).unwrap_or(0)
    }
}

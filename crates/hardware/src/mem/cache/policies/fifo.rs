//! First-In, First-Out (FIFO) Replacement Policy.
//!
//! Evicts the block that was filled earliest, regardless of how often it has
//! been hit since. Only `insert` advances the order; lookups are ignored.
//!
//! # Performance
//!
//! - **Time Complexity:**
//!   - `insert()`: O(1)
//!   - `victim()`: O(W)
//! - **Space Complexity:** O(S × W) fill stamps

use super::ReplacementPolicy;

/// FIFO Policy state.
#[derive(Debug)]
pub struct FifoPolicy {
    filled_at: Vec<u64>,
    ways: usize,
    fills: u64,
}

impl FifoPolicy {
    /// Creates a new FIFO policy instance.
    ///
    /// # Arguments
    ///
    /// * `sets` - The number of sets in the cache.
    /// * `ways` - The associativity (number of ways) of the cache.
    pub fn new(sets: usize, ways: usize) -> Self {
        Self {
            filled_at: vec![0; sets * ways],
            ways,
            fills: 0,
        }
    }
}

impl ReplacementPolicy for FifoPolicy {
    fn touch(&mut self, _set: usize, _way: usize) {}

    fn insert(&mut self, set: usize, way: usize) {
        self.fills += 1;
        self.filled_at[set * self.ways + way] = self.fills;
    }

    fn victim(&mut self, set: usize) -> usize {
        let row = &self.filled_at[set * self.ways..(set + 1) * self.ways];
        row.iter()
            .enumerate()
            .min_by_key(|&(way, &stamp)| (stamp, way))
            .map_or(0, |(way, _)| way)
    }
}

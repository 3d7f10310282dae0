//! Least Recently Used (LRU) Replacement Policy.
//!
//! Every way carries the logical time of its last touch; the victim is the way
//! with the oldest stamp. Ties (never-touched ways) resolve to the lowest index.
//!
//! # Performance
//!
//! - **Time Complexity:**
//!   - `touch()`: O(1)
//!   - `victim()`: O(W) where W is the number of ways
//! - **Space Complexity:** O(S × W) stamps

use super::ReplacementPolicy;

/// LRU Policy state.
#[derive(Debug)]
pub struct LruPolicy {
    stamps: Vec<u64>,
    ways: usize,
    clock: u64,
}

impl LruPolicy {
    /// Creates a new LRU policy instance.
    ///
    /// # Arguments
    ///
    /// * `sets` - The number of sets in the cache.
    /// * `ways` - The associativity (number of ways) of the cache.
    pub fn new(sets: usize, ways: usize) -> Self {
        Self {
            stamps: vec![0; sets * ways],
            ways,
            clock: 0,
        }
    }
}

impl ReplacementPolicy for LruPolicy {
    fn touch(&mut self, set: usize, way: usize) {
        self.clock += 1;
        self.stamps[set * self.ways + way] = self.clock;
    }

    fn victim(&mut self, set: usize) -> usize {
        let row = &self.stamps[set * self.ways..(set + 1) * self.ways];
        row.iter()
            .enumerate()
            .min_by_key(|&(way, &stamp)| (stamp, way))
            .map_or(0, |(way, _)| way)
    }
}

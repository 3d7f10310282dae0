//! Cache Replacement Policies.
//!
//! Victim selection for a module's tag array. The cache store asks a policy for
//! a victim only when every way of the set holds a valid block; invalid ways are
//! always reused first.
//!
//! # Policies
//!
//! - `Fifo`: First-In, First-Out by fill order.
//! - `Lru`: Least Recently Used.
//! - `Plru`: Pseudo-LRU (one MRU bit per way).
//! - `Random`: Pseudo-random selection.

/// First-In, First-Out replacement policy.
pub mod fifo;

/// Least Recently Used replacement policy.
pub mod lru;

/// Pseudo-LRU replacement policy.
pub mod plru;

/// Random replacement policy.
pub mod random;

pub use fifo::FifoPolicy;
pub use lru::LruPolicy;
pub use plru::PlruPolicy;
pub use random::RandomPolicy;

use crate::config::ReplacementPolicy as PolicyKind;

/// Trait for cache replacement policies.
///
/// Policies only observe the store; they never change tags or states.
pub trait ReplacementPolicy: Send + Sync {
    /// Records a lookup that locked `way` in `set`.
    ///
    /// # Arguments
    ///
    /// * `set` - The set index.
    /// * `way` - The way that was accessed.
    fn touch(&mut self, set: usize, way: usize);

    /// Records that `way` in `set` received a new block.
    ///
    /// Defaults to a plain access; order-of-arrival policies override it.
    fn insert(&mut self, set: usize, way: usize) {
        self.touch(set, way);
    }

    /// Chooses the way to replace in a full set.
    ///
    /// # Arguments
    ///
    /// * `set` - The set index.
    ///
    /// # Returns
    ///
    /// A way index in `0..ways`.
    fn victim(&mut self, set: usize) -> usize;
}

/// Builds the policy selected in a module's configuration.
///
/// # Arguments
///
/// * `kind` - Configured policy.
/// * `sets` - Number of sets.
/// * `ways` - Associativity.
/// * `seed` - Seed for randomized policies (modules get distinct seeds).
pub fn build(kind: PolicyKind, sets: usize, ways: usize, seed: u64) -> Box<dyn ReplacementPolicy> {
    match kind {
        PolicyKind::Lru => Box::new(LruPolicy::new(sets, ways)),
        PolicyKind::Fifo => Box::new(FifoPolicy::new(sets, ways)),
        PolicyKind::Plru => Box::new(PlruPolicy::new(sets, ways)),
        PolicyKind::Random => Box::new(RandomPolicy::new(ways, seed)),
    }
}

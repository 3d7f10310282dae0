//! Block address decomposition.
//!
//! Every module splits a physical address the same way:
//! 1. **Tag:** The address rounded down to the module's block size.
//! 2. **Set:** `(addr / block_size) % sets`.
//! 3. **Offset:** The byte position inside the block.
//!
//! Block sizes and set counts are validated as powers of two before a
//! `Geometry` is ever built, so all arithmetic here is mask and shift.

/// Set-associative geometry of a module's tag array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    /// Number of sets.
    pub sets: usize,
    /// Associativity (ways per set).
    pub ways: usize,
    /// Block size in bytes.
    pub block_size: u64,
    log_block_size: u32,
}

impl Geometry {
    /// Creates a geometry from already-validated parameters.
    ///
    /// # Arguments
    ///
    /// * `sets` - Number of sets (power of two).
    /// * `ways` - Associativity.
    /// * `block_size` - Block size in bytes (power of two).
    pub fn new(sets: usize, ways: usize, block_size: u64) -> Self {
        Self {
            sets,
            ways,
            block_size,
            log_block_size: block_size.trailing_zeros(),
        }
    }

    /// Returns the block-aligned tag of `addr`.
    #[inline]
    pub const fn tag(&self, addr: u64) -> u64 {
        addr & !(self.block_size - 1)
    }

    /// Returns the set index `addr` maps to.
    #[inline]
    pub const fn set_of(&self, addr: u64) -> usize {
        ((addr >> self.log_block_size) % self.sets as u64) as usize
    }

    /// Returns the byte offset of `addr` inside its block.
    #[inline]
    pub const fn offset(&self, addr: u64) -> u64 {
        addr & (self.block_size - 1)
    }

    /// Returns true if both addresses fall in the same block.
    #[inline]
    pub const fn same_block(&self, a: u64, b: u64) -> bool {
        a >> self.log_block_size == b >> self.log_block_size
    }

    /// Total number of block frames (sets times ways).
    #[inline]
    pub const fn frames(&self) -> usize {
        self.sets * self.ways
    }
}

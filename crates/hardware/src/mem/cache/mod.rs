//! Cache Store.
//!
//! The per-module tag/state array. It provides:
//! 1. **Lookup:** `find_block` resolves a tag to its (set, way) and MOESI state.
//! 2. **Update:** `set_block` and `access_block` change state and recency.
//! 3. **Replacement:** `replace_block` picks a victim way without mutating it.
//! 4. **Transient tags:** A way being filled remembers the incoming tag so that a
//!    second request for the same block finds (and queues on) that way.
//!
//! The store does no locking of its own. Callers hold the directory lock of every
//! (set, way) they modify, and all updates are instantaneous in simulated time.

/// Cache replacement policy implementations (FIFO, LRU, PLRU, Random).
pub mod policies;

use std::fmt;

use self::policies::ReplacementPolicy;
use crate::common::Geometry;
use crate::config::ReplacementPolicy as PolicyKind;

/// MOESI coherence state of a block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlockState {
    /// No valid copy.
    #[default]
    Invalid,
    /// Clean copy; other modules may hold copies too.
    Shared,
    /// Only copy, clean.
    Exclusive,
    /// Dirty copy responsible for supplying sharers and writing back.
    Owned,
    /// Only copy, dirty.
    Modified,
}

impl BlockState {
    /// Returns true for every state except Invalid.
    #[inline]
    pub const fn is_valid(self) -> bool {
        !matches!(self, Self::Invalid)
    }

    /// Returns true for Modified and Exclusive (sole-writer states).
    #[inline]
    pub const fn is_exclusive(self) -> bool {
        matches!(self, Self::Modified | Self::Exclusive)
    }

    /// Returns true for Modified and Owned (data must be written back).
    #[inline]
    pub const fn is_dirty(self) -> bool {
        matches!(self, Self::Modified | Self::Owned)
    }
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Invalid => "I",
            Self::Shared => "S",
            Self::Exclusive => "E",
            Self::Owned => "O",
            Self::Modified => "M",
        })
    }
}

/// One block frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheBlock {
    /// Block-aligned address held by the frame.
    pub tag: u64,
    /// Tag of a block currently being brought into this frame.
    pub transient_tag: Option<u64>,
    /// Coherence state.
    pub state: BlockState,
}

/// Result of a tag lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Probe {
    /// The tag matched a valid frame.
    pub hit: bool,
    /// Set the tag maps to.
    pub set: usize,
    /// Matching way on a hit.
    pub way: usize,
    /// Block-aligned tag that was searched for.
    pub tag: u64,
    /// State of the matching frame (Invalid on a miss).
    pub state: BlockState,
}

/// Set-associative tag/state array with a pluggable replacement policy.
pub struct CacheStore {
    geometry: Geometry,
    blocks: Vec<CacheBlock>,
    policy: Box<dyn ReplacementPolicy>,
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("geometry", &self.geometry)
            .field("valid", &self.blocks.iter().filter(|b| b.state.is_valid()).count())
            .finish_non_exhaustive()
    }
}

impl CacheStore {
    /// Creates an empty store using the configured policy.
    ///
    /// # Arguments
    ///
    /// * `geometry` - Sets, ways and block size.
    /// * `policy` - Replacement policy selected in the configuration.
    /// * `seed` - Seed for the random policy.
    pub fn new(geometry: Geometry, policy: PolicyKind, seed: u64) -> Self {
        let policy = policies::build(policy, geometry.sets, geometry.ways, seed);
        Self::with_policy(geometry, policy)
    }

    /// Creates an empty store driven by an explicit policy object.
    pub fn with_policy(geometry: Geometry, policy: Box<dyn ReplacementPolicy>) -> Self {
        Self {
            geometry,
            blocks: vec![CacheBlock::default(); geometry.frames()],
            policy,
        }
    }

    /// Returns the store geometry.
    #[inline]
    pub const fn geometry(&self) -> Geometry {
        self.geometry
    }

    #[inline]
    const fn index(&self, set: usize, way: usize) -> usize {
        set * self.geometry.ways + way
    }

    /// Looks up the block holding `addr`.
    ///
    /// Only valid frames match; transient tags are resolved separately with
    /// [`CacheStore::transient_way`] because they depend on directory locks.
    pub fn find_block(&self, addr: u64) -> Probe {
        let tag = self.geometry.tag(addr);
        let set = self.geometry.set_of(addr);
        for way in 0..self.geometry.ways {
            let blk = &self.blocks[self.index(set, way)];
            if blk.state.is_valid() && blk.tag == tag {
                return Probe {
                    hit: true,
                    set,
                    way,
                    tag,
                    state: blk.state,
                };
            }
        }
        Probe {
            hit: false,
            set,
            way: 0,
            tag,
            state: BlockState::Invalid,
        }
    }

    /// Returns the first way of `set` whose transient tag equals `tag`.
    pub fn transient_way(&self, set: usize, tag: u64) -> Option<usize> {
        (0..self.geometry.ways).find(|&way| self.blocks[self.index(set, way)].transient_tag == Some(tag))
    }

    /// Returns the tag and state held by a frame.
    #[inline]
    pub fn get_block(&self, set: usize, way: usize) -> (u64, BlockState) {
        let blk = &self.blocks[self.index(set, way)];
        (blk.tag, blk.state)
    }

    /// Returns the full frame, transient tag included.
    #[inline]
    pub fn block(&self, set: usize, way: usize) -> &CacheBlock {
        &self.blocks[self.index(set, way)]
    }

    /// Writes a frame's tag and state.
    ///
    /// Installing a valid block under a new tag counts as a fill for the
    /// replacement policy.
    pub fn set_block(&mut self, set: usize, way: usize, tag: u64, state: BlockState) {
        let idx = self.index(set, way);
        let blk = &mut self.blocks[idx];
        let filled = state.is_valid() && (!blk.state.is_valid() || blk.tag != tag);
        blk.tag = tag;
        blk.state = state;
        if filled {
            self.policy.insert(set, way);
        }
    }

    /// Records an access to a frame for recency tracking.
    #[inline]
    pub fn access_block(&mut self, set: usize, way: usize) {
        self.policy.touch(set, way);
    }

    /// Chooses the way to fill in `set`.
    ///
    /// The lowest invalid way wins; otherwise the replacement policy decides.
    /// No frame is modified.
    pub fn replace_block(&mut self, set: usize) -> usize {
        let base = self.index(set, 0);
        self.blocks[base..base + self.geometry.ways]
            .iter()
            .position(|b| !b.state.is_valid())
            .unwrap_or_else(|| self.policy.victim(set) % self.geometry.ways)
    }

    /// Marks `tag` as the block being brought into a frame.
    #[inline]
    pub fn set_transient_tag(&mut self, set: usize, way: usize, tag: u64) {
        let idx = self.index(set, way);
        self.blocks[idx].transient_tag = Some(tag);
    }

    /// Iterates over every frame as `(set, way, block)`.
    pub fn blocks(&self) -> impl Iterator<Item = (usize, usize, &CacheBlock)> + '_ {
        let ways = self.geometry.ways;
        self.blocks
            .iter()
            .enumerate()
            .map(move |(i, b)| (i / ways, i % ways, b))
    }
}

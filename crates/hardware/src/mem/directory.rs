//! Directory & Lock Manager.
//!
//! Every (set, way) frame of a module carries:
//! 1. **Entries:** One per sub-block, recording which upper modules hold a copy
//!    (the sharer set) and which one of them is responsible for it (the owner).
//!    Upper modules are named by their node index on this module's high network.
//! 2. **A lock:** A single holder plus a FIFO of waiting continuations. This is the
//!    only mutual-exclusion primitive of the memory system.
//!
//! Releasing a lock with waiters hands it straight to the oldest waiter and
//! schedules that waiter's resume event one cycle later.

use std::collections::VecDeque;

use crate::common::{LockBusy, NodeId};
use crate::protocol::Scheduled;
use crate::sim::{EventQueue, StackId};

/// Delay between a lock handoff and the new holder resuming.
const HANDOFF_DELAY: u64 = 1;

/// Sharer set and owner of one sub-block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirEntry {
    sharers: Vec<u64>,
    num_sharers: usize,
    owner: Option<NodeId>,
}

impl DirEntry {
    fn with_nodes(nodes: usize) -> Self {
        Self {
            sharers: vec![0; nodes.div_ceil(64)],
            num_sharers: 0,
            owner: None,
        }
    }

    /// Returns true if `node` is recorded as a sharer.
    #[inline]
    pub fn is_sharer(&self, node: NodeId) -> bool {
        self.sharers
            .get(node.0 / 64)
            .is_some_and(|w| w & (1 << (node.0 % 64)) != 0)
    }

    /// Number of recorded sharers.
    #[inline]
    pub const fn num_sharers(&self) -> usize {
        self.num_sharers
    }

    /// Owner node, if any.
    #[inline]
    pub const fn owner(&self) -> Option<NodeId> {
        self.owner
    }

    /// Sharer nodes in ascending index order.
    pub fn sharers(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.sharers.iter().enumerate().flat_map(|(w, &bits)| {
            (0..64)
                .filter(move |b| bits & (1u64 << b) != 0)
                .map(move |b| NodeId(w * 64 + b))
        })
    }

    fn set_sharer(&mut self, node: NodeId) {
        if !self.is_sharer(node) {
            self.sharers[node.0 / 64] |= 1 << (node.0 % 64);
            self.num_sharers += 1;
        }
    }

    fn clear_sharer(&mut self, node: NodeId) {
        if self.is_sharer(node) {
            self.sharers[node.0 / 64] &= !(1 << (node.0 % 64));
            self.num_sharers -= 1;
        }
    }
}

/// Lock guarding all entries of one frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirLock {
    holder: Option<StackId>,
    waiters: VecDeque<Scheduled>,
}

impl DirLock {
    /// Current holder.
    #[inline]
    pub const fn holder(&self) -> Option<StackId> {
        self.holder
    }

    /// Returns true if some continuation holds the lock.
    #[inline]
    pub const fn is_locked(&self) -> bool {
        self.holder.is_some()
    }

    /// Continuations queued behind the holder, oldest first.
    pub fn waiters(&self) -> impl Iterator<Item = StackId> + '_ {
        self.waiters.iter().map(|w| w.stack)
    }
}

/// Outcome of a lock request that did not fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockOutcome {
    /// The caller now holds the lock.
    Acquired,
    /// The caller was queued and will be resumed when the lock is handed over.
    Queued,
}

/// Per-module directory.
#[derive(Debug)]
pub struct Directory {
    sets: usize,
    ways: usize,
    subblocks: usize,
    nodes: usize,
    entries: Vec<DirEntry>,
    locks: Vec<DirLock>,
}

impl Directory {
    /// Creates an empty directory.
    ///
    /// # Arguments
    ///
    /// * `sets` - Number of sets of the owning module.
    /// * `ways` - Associativity of the owning module.
    /// * `subblocks` - Sub-blocks per block (`block_size / sub_block_size`).
    /// * `nodes` - Node count of the owning module's high network.
    pub fn new(sets: usize, ways: usize, subblocks: usize, nodes: usize) -> Self {
        Self {
            sets,
            ways,
            subblocks,
            nodes,
            entries: vec![DirEntry::with_nodes(nodes); sets * ways * subblocks],
            locks: vec![DirLock::default(); sets * ways],
        }
    }

    /// Sub-blocks tracked per frame.
    #[inline]
    pub const fn subblocks(&self) -> usize {
        self.subblocks
    }

    /// Nodes that can be recorded as sharers.
    #[inline]
    pub const fn nodes(&self) -> usize {
        self.nodes
    }

    #[inline]
    const fn frame(&self, set: usize, way: usize) -> usize {
        set * self.ways + way
    }

    #[inline]
    const fn slot(&self, set: usize, way: usize, z: usize) -> usize {
        self.frame(set, way) * self.subblocks + z
    }

    /// Returns the entry of sub-block `z` of a frame.
    #[inline]
    pub fn entry(&self, set: usize, way: usize, z: usize) -> &DirEntry {
        &self.entries[self.slot(set, way, z)]
    }

    /// Records `node` as a sharer of a sub-block.
    pub fn set_sharer(&mut self, set: usize, way: usize, z: usize, node: NodeId) {
        let i = self.slot(set, way, z);
        self.entries[i].set_sharer(node);
    }

    /// Removes `node` from the sharers of a sub-block.
    pub fn clear_sharer(&mut self, set: usize, way: usize, z: usize, node: NodeId) {
        let i = self.slot(set, way, z);
        self.entries[i].clear_sharer(node);
    }

    /// Removes every sharer of a sub-block.
    pub fn clear_all_sharers(&mut self, set: usize, way: usize, z: usize) {
        let i = self.slot(set, way, z);
        let entry = &mut self.entries[i];
        entry.sharers.fill(0);
        entry.num_sharers = 0;
    }

    /// Sets (or clears, with `None`) the owner of a sub-block.
    pub fn set_owner(&mut self, set: usize, way: usize, z: usize, owner: Option<NodeId>) {
        let i = self.slot(set, way, z);
        self.entries[i].owner = owner;
    }

    /// Returns true if any sub-block of the frame has a sharer or an owner.
    pub fn is_shared_or_owned(&self, set: usize, way: usize) -> bool {
        let base = self.slot(set, way, 0);
        self.entries[base..base + self.subblocks]
            .iter()
            .any(|e| e.num_sharers > 0 || e.owner.is_some())
    }

    /// Returns the lock of a frame.
    #[inline]
    pub fn lock_of(&self, set: usize, way: usize) -> &DirLock {
        &self.locks[self.frame(set, way)]
    }

    /// Requests the lock of a frame for `resume.stack`.
    ///
    /// # Arguments
    ///
    /// * `set`, `way` - Frame to lock.
    /// * `resume` - Continuation and event to run once the lock is handed over.
    /// * `blocking` - Queue behind the holder instead of failing.
    ///
    /// # Returns
    ///
    /// `Acquired` if the lock was free or is already held by the caller,
    /// `Queued` if a blocking caller must wait, or `LockBusy` if a
    /// non-blocking caller found it held.
    pub fn lock(
        &mut self,
        set: usize,
        way: usize,
        resume: Scheduled,
        blocking: bool,
    ) -> Result<LockOutcome, LockBusy> {
        let i = self.frame(set, way);
        let lock = &mut self.locks[i];
        match lock.holder {
            None => {
                lock.holder = Some(resume.stack);
                Ok(LockOutcome::Acquired)
            }
            Some(holder) if holder == resume.stack => Ok(LockOutcome::Acquired),
            Some(_) if !blocking => Err(LockBusy { set, way }),
            Some(holder) => {
                tracing::trace!(set, way, %holder, waiter = %resume.stack, "directory lock queued");
                lock.waiters.push_back(resume);
                Ok(LockOutcome::Queued)
            }
        }
    }

    /// Releases the lock of a frame.
    ///
    /// The oldest waiter, if any, becomes the holder and its resume event is
    /// scheduled one cycle later. Returns the new holder.
    pub fn unlock(
        &mut self,
        set: usize,
        way: usize,
        events: &mut EventQueue<Scheduled>,
    ) -> Option<StackId> {
        let i = self.frame(set, way);
        let lock = &mut self.locks[i];
        match lock.waiters.pop_front() {
            Some(next) => {
                lock.holder = Some(next.stack);
                tracing::trace!(set, way, holder = %next.stack, "directory lock handed over");
                events.schedule(next, HANDOFF_DELAY);
                lock.holder
            }
            None => {
                lock.holder = None;
                None
            }
        }
    }

    /// Iterates over every frame's lock as `(set, way, lock)`.
    pub fn locks(&self) -> impl Iterator<Item = (usize, usize, &DirLock)> + '_ {
        let ways = self.ways;
        self.locks
            .iter()
            .enumerate()
            .map(move |(i, l)| (i / ways, i % ways, l))
    }

    /// Number of sets covered.
    #[inline]
    pub const fn sets(&self) -> usize {
        self.sets
    }
}

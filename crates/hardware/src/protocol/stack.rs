//! Continuation record.
//!
//! A `Frame` is the reified state of one protocol operation in flight: the
//! top-level Load/Store, or any FindAndLock, Evict, request, Invalidate or peer
//! transfer it spawns. Children report results by writing into their parent's
//! fields before resuming it through `ret`.

use super::Event;
use crate::common::{AccessId, AccessKind, ModuleId, NetId};
use crate::interconnect::MessageId;
use crate::mem::BlockState;
use crate::sim::StackId;

/// Where a finished frame resumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Return {
    /// Event to schedule on the parent.
    pub event: Event,
    /// Parent frame.
    pub parent: StackId,
}

/// Direction of a coherence request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Direction {
    /// Toward main memory, to satisfy a miss or gain ownership.
    #[default]
    UpDown,
    /// Toward upper sharers, to demote or invalidate their copies.
    DownUp,
}

/// Kind of reply a request produced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Reply {
    /// No reply yet.
    #[default]
    None,
    /// Control-only acknowledgement.
    Ack,
    /// Acknowledgement carrying the block.
    AckData,
    /// Acknowledgement; the block went straight to the peer.
    AckDataSentToPeer,
    /// The request failed on a lock conflict and must be retried.
    AckError,
}

/// Directory lock held (or awaited) by a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirLockRef {
    /// Module owning the directory.
    pub module: ModuleId,
    /// Set of the locked frame.
    pub set: usize,
    /// Way of the locked frame.
    pub way: usize,
}

/// An in-flight message a frame must receive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MsgRef {
    /// Network carrying the message.
    pub net: NetId,
    /// Message handle.
    pub id: MessageId,
}

/// Continuation record stored in the arena.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Top-level access this frame works for.
    pub id: AccessId,
    /// Module running the operation (the requester for requests).
    pub module: ModuleId,
    /// Module a request or eviction is sent to.
    pub target: Option<ModuleId>,
    /// Address the operation was created with.
    pub addr: u64,
    /// Block tag resolved by FindAndLock.
    pub tag: u64,
    /// Set resolved by FindAndLock.
    pub set: usize,
    /// Way resolved by FindAndLock.
    pub way: usize,
    /// Block state resolved by FindAndLock.
    pub state: BlockState,
    /// Evicted frame's set.
    pub src_set: usize,
    /// Evicted frame's way.
    pub src_way: usize,
    /// Evicted frame's tag.
    pub src_tag: u64,
    /// Resume point; `None` for a top-level access.
    pub ret: Option<Return>,

    /// Top-level access kind (also the read/write flag of lookups).
    pub kind: AccessKind,
    /// FindAndLock queues on a held lock instead of failing.
    pub blocking: bool,
    /// The access already failed at least once.
    pub retry: bool,
    /// Module that receives data directly on a demotion.
    pub peer: Option<ModuleId>,
    /// Upper module Invalidate must leave alone.
    pub except: Option<ModuleId>,
    /// Request direction.
    pub direction: Direction,

    /// A lock conflict occurred below this frame.
    pub err: bool,
    /// FindAndLock found the block.
    pub hit: bool,
    /// A read reply reported other copies.
    pub shared: bool,
    /// FindAndLock evicted a valid victim.
    pub eviction: bool,
    /// The eviction carries dirty data.
    pub writeback: bool,
    /// A down-up lookup missed; nothing was locked.
    pub block_not_found: bool,
    /// FindAndLock already held a port for this access.
    pub port_locked: bool,
    /// A down-up child returned the block's data to this frame.
    pub dirty_data: bool,

    /// Directory lock held by this frame.
    pub dir_lock: Option<DirLockRef>,
    /// Message to receive when the next stage runs.
    pub msg: Option<MsgRef>,

    /// Sub-requests still outstanding plus one for the frame itself.
    pub pending: u32,
    /// Reply kind to send back.
    pub reply: Reply,
    /// Reply size in bytes.
    pub reply_size: u64,

    /// Access this one was coalesced into.
    pub master: Option<StackId>,
    /// Cycle the top-level access started.
    pub start_cycle: u64,
    /// Frames waiting for this access to finish.
    pub waiters: Vec<super::Scheduled>,
}

impl Frame {
    /// Creates a frame with every result field cleared.
    ///
    /// # Arguments
    ///
    /// * `id` - Top-level access identity.
    /// * `module` - Module running the operation.
    /// * `addr` - Address or tag the operation works on.
    /// * `ret` - Resume point, `None` for a top-level access.
    pub fn new(id: AccessId, module: ModuleId, addr: u64, ret: Option<Return>) -> Self {
        Self {
            id,
            module,
            target: None,
            addr,
            tag: 0,
            set: 0,
            way: 0,
            state: BlockState::Invalid,
            src_set: 0,
            src_way: 0,
            src_tag: 0,
            ret,
            kind: AccessKind::Load,
            blocking: false,
            retry: false,
            peer: None,
            except: None,
            direction: Direction::UpDown,
            err: false,
            hit: false,
            shared: false,
            eviction: false,
            writeback: false,
            block_not_found: false,
            port_locked: false,
            dirty_data: false,
            dir_lock: None,
            msg: None,
            pending: 0,
            reply: Reply::None,
            reply_size: 0,
            master: None,
            start_cycle: 0,
            waiters: Vec::new(),
        }
    }

    /// Returns true if the frame's lookup is a read.
    #[inline]
    pub const fn is_read(&self) -> bool {
        !self.kind.is_write()
    }
}

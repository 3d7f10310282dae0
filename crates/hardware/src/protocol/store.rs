//! Store state machine.
//!
//! Mirrors the load path with two differences: a store waits for any older
//! access to the block (not only writes), and a hit in Shared or Owned still
//! needs an up-down WriteRequest to invalidate the other copies. The frame
//! ends Modified.

use super::{Direction, Event, FindAndLockStage, WriteStage};
use crate::common::AccessKind;
use crate::common::error::Result;
use crate::mem::BlockState;
use crate::sim::{StackId, System};

/// Store stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreStage {
    /// Enter the access list or coalesce.
    Start,
    /// Order behind older accesses and lock the frame.
    Lock,
    /// Dispatch on exclusive hit or not.
    Action,
    /// Mark the frame Modified and release its lock.
    Unlock,
    /// Leave the access list and complete.
    Finish,
}

impl StoreStage {
    /// Stage name used in traces and errors.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Start => "store start",
            Self::Lock => "store lock",
            Self::Action => "store action",
            Self::Unlock => "store unlock",
            Self::Finish => "store finish",
        }
    }
}

impl System {
    pub(crate) fn handle_store(&mut self, stage: StoreStage, stack: StackId) -> Result<()> {
        let name = stage.name();
        let (module, addr) = {
            let f = self.frame(stack, name)?;
            (f.module, f.addr)
        };
        self.trace_stage(stack, module, name);

        match stage {
            StoreStage::Start => {
                self.enter_access_list(stack, module, AccessKind::Store)?;
                if let Some(master) = self.coalesce_target(stack, module, AccessKind::Store)? {
                    self.module_mut(module).stats.coalesced_writes += 1;
                    return self.coalesce(stack, master, Event::Store(StoreStage::Finish));
                }
                self.schedule(Event::Store(StoreStage::Lock), stack, 0);
            }

            StoreStage::Lock => {
                if let Some(older) = self.older_access(stack, module, false)? {
                    tracing::trace!(%stack, %older, "store waits for older access");
                    return self.wait_for_access(stack, older, Event::Store(StoreStage::Lock));
                }
                let retry = self.frame(stack, name)?.retry;
                let child =
                    self.create_frame(stack, module, addr, Event::Store(StoreStage::Action), name)?;
                let f = self.frame_mut(child, name)?;
                f.blocking = true;
                f.kind = AccessKind::Store;
                f.retry = retry;
                self.schedule(Event::FindAndLock(FindAndLockStage::Start), child, 0);
            }

            StoreStage::Action => {
                let f = self.frame(stack, name)?;
                if f.err {
                    return self.schedule_retry(stack, module, Event::Store(StoreStage::Lock));
                }
                if f.state.is_exclusive() {
                    self.schedule(Event::Store(StoreStage::Unlock), stack, 0);
                    return Ok(());
                }
                let tag = f.tag;
                let low = self.low_module_for(module, tag)?;
                let child =
                    self.create_frame(stack, module, tag, Event::Store(StoreStage::Unlock), name)?;
                let f = self.frame_mut(child, name)?;
                f.peer = Some(module);
                f.target = Some(low);
                f.direction = Direction::UpDown;
                self.schedule(Event::WriteRequest(WriteStage::Start), child, 0);
            }

            StoreStage::Unlock => {
                let f = self.frame(stack, name)?;
                if f.err {
                    self.release_lock(stack, name)?;
                    return self.schedule_retry(stack, module, Event::Store(StoreStage::Lock));
                }
                let (set, way, tag) = (f.set, f.way, f.tag);
                self.module_mut(module)
                    .cache
                    .set_block(set, way, tag, BlockState::Modified);
                self.frame_mut(stack, name)?.state = BlockState::Modified;
                self.release_lock(stack, name)?;
                self.schedule(Event::Store(StoreStage::Finish), stack, 0);
            }

            StoreStage::Finish => {
                self.leave_access_list(stack, module, name)?;
                self.stack_return(stack, name)?;
            }
        }
        Ok(())
    }
}

//! Invalidate state machine.
//!
//! Sends a down-up WriteRequest to every upper sharer of a locked frame,
//! except one module the caller names, and clears them from the directory
//! right away. The first sharer attached to the same network as the frame's
//! peer may ship its dirty data straight to that peer.

use super::{Direction, Event, WriteStage};
use crate::common::error::Result;
use crate::mem::BlockState;
use crate::sim::{StackId, System};

/// Invalidate stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidateStage {
    /// Fan out to sharers.
    Start,
    /// Collect replies.
    Finish,
}

impl InvalidateStage {
    /// Stage name used in traces and errors.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Start => "invalidate start",
            Self::Finish => "invalidate finish",
        }
    }
}

impl System {
    pub(crate) fn handle_invalidate(&mut self, stage: InvalidateStage, stack: StackId) -> Result<()> {
        let name = stage.name();
        let module = self.frame(stack, name)?.module;
        self.trace_stage(stack, module, name);

        match stage {
            InvalidateStage::Start => {
                let f = self.frame(stack, name)?;
                let (set, way, except, peer) = (f.set, f.way, f.except, f.peer);
                let (tag, state) = self.module_ref(module).cache.get_block(set, way);
                let f = self.frame_mut(stack, name)?;
                f.tag = tag;
                f.state = state;
                f.pending = 1;

                let peer_net = peer.and_then(|p| self.module_ref(p).low.map(|l| l.net));
                let span = self.module_ref(module).block_size();
                for (z, entry_tag) in self.subblocks_in(module, tag, tag, span) {
                    let mut peer_free = peer.is_some();
                    let sharers: Vec<_> = self.module_ref(module).dir.entry(set, way, z).sharers().collect();
                    for node in sharers {
                        let sharer = self.upper_module(module, node, name)?;
                        if Some(sharer) == except {
                            continue;
                        }
                        let dir = &mut self.module_mut(module).dir;
                        dir.clear_sharer(set, way, z, node);
                        if dir.entry(set, way, z).owner() == Some(node) {
                            dir.set_owner(set, way, z, None);
                        }
                        if entry_tag % self.module_ref(sharer).block_size() != 0 {
                            continue;
                        }

                        let child = self.create_frame(
                            stack,
                            module,
                            entry_tag,
                            Event::Invalidate(InvalidateStage::Finish),
                            name,
                        )?;
                        let same_net = self.module_ref(sharer).low.map(|l| l.net) == peer_net;
                        let c = self.frame_mut(child, name)?;
                        c.target = Some(sharer);
                        c.direction = Direction::DownUp;
                        if peer_free && same_net {
                            c.peer = peer;
                            peer_free = false;
                        }
                        self.frame_mut(stack, name)?.pending += 1;
                        self.module_mut(module).stats.invalidations += 1;
                        self.schedule(Event::WriteRequest(WriteStage::Start), child, 0);
                    }
                }
                self.schedule(Event::Invalidate(InvalidateStage::Finish), stack, 0);
            }

            InvalidateStage::Finish => {
                let f = self.frame_mut(stack, name)?;
                if f.pending == 0 {
                    let tag = f.tag;
                    return Err(self.violation(module, tag, name, "no pending replies"));
                }
                f.pending -= 1;
                if f.pending > 0 {
                    return Ok(());
                }
                let (set, way, dirty) = (f.set, f.way, f.dirty_data);
                if dirty && !self.module_ref(module).is_main_memory() {
                    // Owned stays Owned: other caches may still share it.
                    let (tag, state) = self.module_ref(module).cache.get_block(set, way);
                    if state == BlockState::Exclusive {
                        self.module_mut(module)
                            .cache
                            .set_block(set, way, tag, BlockState::Modified);
                    }
                }
                self.stack_return(stack, name)?;
            }
        }
        Ok(())
    }
}

//! Evict state machine.
//!
//! Empties a victim frame before FindAndLock reuses it. Upper copies are
//! invalidated first; the block then travels to the module below as a
//! writeback (Modified/Owned) or an eviction notice (Shared/Exclusive), where
//! the directory forgets the evicting module. Main memory only drops the frame.
//!
//! Fields: `src_set`/`src_way`/`src_tag` keep the victim at the evicting
//! module, while `set`/`way`/`tag` are overwritten by the lookup at the target.

use super::{Direction, Event, FindAndLockStage, InvalidateStage, WriteStage};
use crate::common::AccessKind;
use crate::common::error::Result;
use crate::config::CONTROL_MESSAGE_SIZE;
use crate::interconnect::MessageKind;
use crate::mem::BlockState;
use crate::sim::{StackId, System};

/// Evict stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvictStage {
    /// Record the victim and invalidate upper copies.
    Start,
    /// Decide whether anything must go down.
    Invalid,
    /// Send the writeback or eviction notice.
    Action,
    /// Target: look up the block.
    Receive,
    /// Target: invalidate its other sharers on a writeback.
    Writeback,
    /// Target: gain exclusivity from below if needed.
    WritebackExclusive,
    /// Target: absorb the dirty data.
    WritebackFinish,
    /// Target: drop the evicting module from the directory.
    Process,
    /// Target: acknowledge.
    Reply,
    /// Evicting module: invalidate the victim frame.
    ReplyReceive,
    /// Return to FindAndLock.
    Finish,
}

impl EvictStage {
    /// Stage name used in traces and errors.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Start => "evict start",
            Self::Invalid => "evict invalid",
            Self::Action => "evict action",
            Self::Receive => "evict receive",
            Self::Writeback => "evict writeback",
            Self::WritebackExclusive => "evict writeback exclusive",
            Self::WritebackFinish => "evict writeback finish",
            Self::Process => "evict process",
            Self::Reply => "evict reply",
            Self::ReplyReceive => "evict reply receive",
            Self::Finish => "evict finish",
        }
    }
}

impl System {
    pub(crate) fn handle_evict(&mut self, stage: EvictStage, stack: StackId) -> Result<()> {
        let name = stage.name();
        let module = self.frame(stack, name)?.module;
        self.trace_stage(stack, module, name);

        match stage {
            EvictStage::Start => {
                self.parent_mut(stack, name)?.err = false;
                let f = self.frame(stack, name)?;
                let (set, way) = (f.set, f.way);
                let m = self.module_ref(module);
                let (tag, state) = m.cache.get_block(set, way);
                if !state.is_valid() && m.dir.is_shared_or_owned(set, way) {
                    return Err(self.violation(module, tag, name, "invalid victim has sharers"));
                }
                let target = if m.is_main_memory() {
                    None
                } else {
                    Some(self.low_module_for(module, tag)?)
                };
                tracing::debug!(
                    module = %self.module_ref(module).name,
                    tag = format_args!("{tag:#x}"),
                    %state,
                    "evicting block"
                );

                let f = self.frame_mut(stack, name)?;
                f.tag = tag;
                f.state = state;
                f.src_set = set;
                f.src_way = way;
                f.src_tag = tag;
                f.target = target;

                let child =
                    self.create_frame(stack, module, 0, Event::Evict(EvictStage::Invalid), name)?;
                let c = self.frame_mut(child, name)?;
                c.set = set;
                c.way = way;
                c.except = None;
                self.schedule(Event::Invalidate(InvalidateStage::Start), child, 0);
            }

            EvictStage::Invalid => {
                let f = self.frame(stack, name)?;
                let (src_set, src_way) = (f.src_set, f.src_way);
                let state = self.module_ref(module).cache.get_block(src_set, src_way).1;
                self.frame_mut(stack, name)?.state = state;
                if self.module_ref(module).is_main_memory() {
                    self.module_mut(module)
                        .cache
                        .set_block(src_set, src_way, 0, BlockState::Invalid);
                    self.schedule(Event::Evict(EvictStage::Finish), stack, 0);
                    return Ok(());
                }
                self.schedule(Event::Evict(EvictStage::Action), stack, 0);
            }

            EvictStage::Action => {
                let state = self.frame(stack, name)?.state;
                if !state.is_valid() {
                    self.schedule(Event::Evict(EvictStage::Finish), stack, 0);
                    return Ok(());
                }
                let target = self.target_of(stack, name)?;
                let (net, src, dst) = self.route(module, target, Direction::UpDown, name)?;
                let (size, kind) = if state.is_dirty() {
                    (
                        self.module_ref(module).block_size() + CONTROL_MESSAGE_SIZE,
                        MessageKind::Writeback,
                    )
                } else {
                    (CONTROL_MESSAGE_SIZE, MessageKind::EvictNotice)
                };
                let sent = self.try_send(
                    stack,
                    net,
                    src,
                    dst,
                    size,
                    kind,
                    Event::Evict(EvictStage::Receive),
                    Event::Evict(EvictStage::Action),
                    name,
                )?;
                if sent && state.is_dirty() {
                    self.frame_mut(stack, name)?.writeback = true;
                    self.module_mut(module).stats.writebacks += 1;
                }
            }

            EvictStage::Receive => {
                let target = self.target_of(stack, name)?;
                let (_, _, dst) = self.route(module, target, Direction::UpDown, name)?;
                self.receive(stack, dst, name)?;
                let src_tag = self.frame(stack, name)?.src_tag;
                let child = self.create_frame(
                    stack,
                    target,
                    src_tag,
                    Event::Evict(EvictStage::Writeback),
                    name,
                )?;
                let c = self.frame_mut(child, name)?;
                c.blocking = false;
                c.kind = AccessKind::Store;
                c.retry = false;
                self.schedule(Event::FindAndLock(FindAndLockStage::Start), child, 0);
            }

            EvictStage::Writeback => {
                let f = self.frame(stack, name)?;
                if f.err {
                    self.parent_mut(stack, name)?.err = true;
                    self.schedule(Event::Evict(EvictStage::Reply), stack, 0);
                    return Ok(());
                }
                if !f.writeback {
                    self.schedule(Event::Evict(EvictStage::Process), stack, 0);
                    return Ok(());
                }
                let (set, way) = (f.set, f.way);
                let target = self.target_of(stack, name)?;
                let child = self.create_frame(
                    stack,
                    target,
                    0,
                    Event::Evict(EvictStage::WritebackExclusive),
                    name,
                )?;
                let c = self.frame_mut(child, name)?;
                c.except = Some(module);
                c.set = set;
                c.way = way;
                self.schedule(Event::Invalidate(InvalidateStage::Start), child, 0);
            }

            EvictStage::WritebackExclusive => {
                let target = self.target_of(stack, name)?;
                let f = self.frame(stack, name)?;
                let (set, way, tag) = (f.set, f.way, f.tag);
                let state = self.module_ref(target).cache.get_block(set, way).1;
                self.frame_mut(stack, name)?.state = state;
                match state {
                    BlockState::Invalid => {
                        return Err(self.violation(target, tag, name, "writeback target lost the block"));
                    }
                    BlockState::Owned | BlockState::Shared => {
                        let low = self.low_module_for(target, tag)?;
                        let child = self.create_frame(
                            stack,
                            target,
                            tag,
                            Event::Evict(EvictStage::WritebackFinish),
                            name,
                        )?;
                        let c = self.frame_mut(child, name)?;
                        c.target = Some(low);
                        c.direction = Direction::UpDown;
                        self.schedule(Event::WriteRequest(WriteStage::Start), child, 0);
                    }
                    BlockState::Modified | BlockState::Exclusive => {
                        self.schedule(Event::Evict(EvictStage::WritebackFinish), stack, 0);
                    }
                }
            }

            EvictStage::WritebackFinish => {
                let target = self.target_of(stack, name)?;
                let f = self.frame(stack, name)?;
                let (set, way, tag) = (f.set, f.way, f.tag);
                if f.err {
                    self.parent_mut(stack, name)?.err = true;
                    self.release_lock(stack, name)?;
                    self.schedule(Event::Evict(EvictStage::Reply), stack, 0);
                    return Ok(());
                }
                if !self.module_ref(target).is_main_memory() {
                    self.module_mut(target)
                        .cache
                        .set_block(set, way, tag, BlockState::Modified);
                }
                self.schedule(Event::Evict(EvictStage::Process), stack, 0);
            }

            EvictStage::Process => {
                let target = self.target_of(stack, name)?;
                let node = self.sharer_node(target, module, name)?;
                let f = self.frame(stack, name)?;
                let (set, way, tag, src_tag) = (f.set, f.way, f.tag, f.src_tag);
                let len = self.module_ref(module).block_size();
                for (z, _) in self.subblocks_in(target, tag, src_tag, len) {
                    let dir = &mut self.module_mut(target).dir;
                    dir.clear_sharer(set, way, z, node);
                    if dir.entry(set, way, z).owner() == Some(node) {
                        dir.set_owner(set, way, z, None);
                    }
                }
                self.release_lock(stack, name)?;
                self.schedule(Event::Evict(EvictStage::Reply), stack, 0);
            }

            EvictStage::Reply => {
                let target = self.target_of(stack, name)?;
                let (net, src, dst) = self.route(module, target, Direction::UpDown, name)?;
                let _ = self.try_send(
                    stack,
                    net,
                    dst,
                    src,
                    CONTROL_MESSAGE_SIZE,
                    MessageKind::Reply,
                    Event::Evict(EvictStage::ReplyReceive),
                    Event::Evict(EvictStage::Reply),
                    name,
                )?;
            }

            EvictStage::ReplyReceive => {
                let target = self.target_of(stack, name)?;
                let (_, src, _) = self.route(module, target, Direction::UpDown, name)?;
                self.receive(stack, src, name)?;
                let f = self.frame(stack, name)?;
                let (src_set, src_way, src_tag, err) = (f.src_set, f.src_way, f.src_tag, f.err);
                if !err {
                    self.module_mut(module)
                        .cache
                        .set_block(src_set, src_way, 0, BlockState::Invalid);
                }
                if self.module_ref(module).dir.is_shared_or_owned(src_set, src_way) {
                    return Err(self.violation(module, src_tag, name, "evicted frame still has sharers"));
                }
                self.schedule(Event::Evict(EvictStage::Finish), stack, 0);
            }

            EvictStage::Finish => {
                self.stack_return(stack, name)?;
            }
        }
        Ok(())
    }
}

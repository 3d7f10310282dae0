//! WriteRequest state machine.
//!
//! Up-down: the target invalidates every other upper copy, obtains
//! exclusivity from below if it lacks it, and records the requester as sole
//! sharer and owner. Down-up: the target (an upper sharer) invalidates its own
//! upper copies, replies with its dirty data (or sends it to the peer) and
//! drops the block.

use super::{Direction, Event, FindAndLockStage, InvalidateStage, PeerStage, Reply};
use crate::common::AccessKind;
use crate::common::error::Result;
use crate::config::CONTROL_MESSAGE_SIZE;
use crate::interconnect::MessageKind;
use crate::mem::BlockState;
use crate::sim::{StackId, System};

/// WriteRequest stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteStage {
    /// Send the request.
    Start,
    /// Target: look up the block.
    Receive,
    /// Target: invalidate other upper copies.
    Action,
    /// Target: dispatch on direction.
    Exclusive,
    /// Target: gain exclusivity from below if needed.
    UpDown,
    /// Target: record the requester as owner.
    UpDownFinish,
    /// Target: pick the reply for an upper sharer.
    DownUp,
    /// Target: drop the block.
    DownUpFinish,
    /// Target: send the reply.
    Reply,
    /// Requester: take the reply.
    Finish,
}

impl WriteStage {
    /// Stage name used in traces and errors.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Start => "write_request start",
            Self::Receive => "write_request receive",
            Self::Action => "write_request action",
            Self::Exclusive => "write_request exclusive",
            Self::UpDown => "write_request updown",
            Self::UpDownFinish => "write_request updown finish",
            Self::DownUp => "write_request downup",
            Self::DownUpFinish => "write_request downup finish",
            Self::Reply => "write_request reply",
            Self::Finish => "write_request finish",
        }
    }
}

impl System {
    pub(crate) fn handle_write_request(&mut self, stage: WriteStage, stack: StackId) -> Result<()> {
        let name = stage.name();
        let (module, addr, direction) = {
            let f = self.frame(stack, name)?;
            (f.module, f.addr, f.direction)
        };
        let target = self.target_of(stack, name)?;
        self.trace_stage(stack, target, name);

        match stage {
            WriteStage::Start => {
                self.parent_mut(stack, name)?.err = false;
                let requester_block = self.module_ref(module).block_size();
                let f = self.frame_mut(stack, name)?;
                f.reply = Reply::AckData;
                f.reply_size = requester_block + CONTROL_MESSAGE_SIZE;
                let (net, src, dst) = self.route(module, target, direction, name)?;
                let _ = self.try_send(
                    stack,
                    net,
                    src,
                    dst,
                    CONTROL_MESSAGE_SIZE,
                    MessageKind::WriteRequest,
                    Event::WriteRequest(WriteStage::Receive),
                    Event::WriteRequest(WriteStage::Start),
                    name,
                )?;
            }

            WriteStage::Receive => {
                let (_, _, dst) = self.route(module, target, direction, name)?;
                self.receive(stack, dst, name)?;
                let child =
                    self.create_frame(stack, target, addr, Event::WriteRequest(WriteStage::Action), name)?;
                let c = self.frame_mut(child, name)?;
                c.blocking = direction == Direction::DownUp;
                c.kind = AccessKind::Store;
                c.retry = false;
                c.direction = direction;
                self.schedule(Event::FindAndLock(FindAndLockStage::Start), child, 0);
            }

            WriteStage::Action => {
                let f = self.frame_mut(stack, name)?;
                if f.block_not_found {
                    f.reply = Reply::Ack;
                    f.reply_size = CONTROL_MESSAGE_SIZE;
                    self.schedule(Event::WriteRequest(WriteStage::Reply), stack, 0);
                    return Ok(());
                }
                if f.err {
                    if direction == Direction::DownUp {
                        return Err(self.violation(target, addr, name, "down-up lookup failed on a lock"));
                    }
                    f.reply = Reply::AckError;
                    f.reply_size = CONTROL_MESSAGE_SIZE;
                    let parent = self.parent_mut(stack, name)?;
                    parent.err = true;
                    parent.reply = Reply::AckError;
                    self.schedule(Event::WriteRequest(WriteStage::Reply), stack, 0);
                    return Ok(());
                }
                let (set, way, peer) = (f.set, f.way, f.peer);
                let child =
                    self.create_frame(stack, target, 0, Event::WriteRequest(WriteStage::Exclusive), name)?;
                let c = self.frame_mut(child, name)?;
                c.except = Some(module);
                c.set = set;
                c.way = way;
                c.peer = peer;
                self.schedule(Event::Invalidate(InvalidateStage::Start), child, 0);
            }

            WriteStage::Exclusive => {
                let f = self.frame(stack, name)?;
                let (set, way) = (f.set, f.way);
                let state = self.module_ref(target).cache.get_block(set, way).1;
                self.frame_mut(stack, name)?.state = state;
                let next = match direction {
                    Direction::UpDown => WriteStage::UpDown,
                    Direction::DownUp => WriteStage::DownUp,
                };
                self.schedule(Event::WriteRequest(next), stack, 0);
            }

            WriteStage::UpDown => {
                let f = self.frame(stack, name)?;
                if f.state.is_exclusive() {
                    self.schedule(Event::WriteRequest(WriteStage::UpDownFinish), stack, 0);
                    return Ok(());
                }
                let tag = f.tag;
                let low = self.low_module_for(target, tag)?;
                let child =
                    self.create_frame(stack, target, tag, Event::WriteRequest(WriteStage::UpDownFinish), name)?;
                let c = self.frame_mut(child, name)?;
                c.peer = Some(target);
                c.target = Some(low);
                c.direction = Direction::UpDown;
                self.schedule(Event::WriteRequest(WriteStage::Start), child, 0);
            }

            WriteStage::UpDownFinish => {
                let f = self.frame(stack, name)?;
                if f.err {
                    self.release_lock(stack, name)?;
                    let f = self.frame_mut(stack, name)?;
                    f.reply = Reply::AckError;
                    f.reply_size = CONTROL_MESSAGE_SIZE;
                    let parent = self.parent_mut(stack, name)?;
                    parent.err = true;
                    parent.reply = Reply::AckError;
                    self.schedule(Event::WriteRequest(WriteStage::Reply), stack, 0);
                    return Ok(());
                }
                let (set, way, tag, state, reply_size) = (f.set, f.way, f.tag, f.state, f.reply_size);
                let requester_block = self.module_ref(module).block_size();
                if addr % requester_block != 0 {
                    return Err(self.violation(target, addr, name, "request not aligned to requester block"));
                }
                let requester = self.sharer_node(target, module, name)?;
                for (z, entry_tag) in self.subblocks_in(target, tag, addr, requester_block) {
                    let dir = &mut self.module_mut(target).dir;
                    dir.set_sharer(set, way, z, requester);
                    dir.set_owner(set, way, z, Some(requester));
                    if dir.entry(set, way, z).num_sharers() != 1 {
                        return Err(self.violation(target, entry_tag, name, "writer is not the only sharer"));
                    }
                }
                if state != BlockState::Modified {
                    self.module_mut(target)
                        .cache
                        .set_block(set, way, tag, BlockState::Exclusive);
                    self.frame_mut(stack, name)?.state = BlockState::Exclusive;
                }
                self.release_lock(stack, name)?;

                let reply = match reply_size {
                    CONTROL_MESSAGE_SIZE => Reply::Ack,
                    s if s > CONTROL_MESSAGE_SIZE => Reply::AckData,
                    _ => return Err(self.violation(target, addr, name, "reply smaller than a control message")),
                };
                self.frame_mut(stack, name)?.reply = reply;
                self.parent_mut(stack, name)?.reply = reply;
                self.schedule(Event::WriteRequest(WriteStage::Reply), stack, 0);
            }

            WriteStage::DownUp => {
                let f = self.frame(stack, name)?;
                let (set, way, tag, state, peer) = (f.set, f.way, f.tag, f.state, f.peer);
                if !state.is_valid() {
                    return Err(self.violation(target, addr, name, "down-up write found an invalid block"));
                }
                if self.module_ref(target).dir.is_shared_or_owned(set, way) {
                    return Err(self.violation(target, addr, name, "upper copies survived invalidation"));
                }
                let target_block = self.module_ref(target).block_size();
                let (reply, size) = match (state.is_dirty(), peer) {
                    (false, _) => (Reply::Ack, CONTROL_MESSAGE_SIZE),
                    (true, None) => (Reply::AckData, target_block + CONTROL_MESSAGE_SIZE),
                    (true, Some(_)) => {
                        let invalidate = self.parent_of(stack, name)?;
                        let requester = self.parent_of(invalidate, name)?;
                        let r = self.frame_mut(requester, name)?;
                        if r.reply_size < target_block + CONTROL_MESSAGE_SIZE {
                            return Err(self.violation(target, addr, name, "peer transfer exceeds reply size"));
                        }
                        r.reply_size -= target_block;
                        (Reply::AckDataSentToPeer, CONTROL_MESSAGE_SIZE)
                    }
                };
                let f = self.frame_mut(stack, name)?;
                f.reply = reply;
                f.reply_size = size;

                if reply == Reply::AckDataSentToPeer {
                    let child = self.create_frame(
                        stack,
                        target,
                        tag,
                        Event::WriteRequest(WriteStage::DownUpFinish),
                        name,
                    )?;
                    let c = self.frame_mut(child, name)?;
                    c.target = Some(target);
                    c.peer = peer;
                    self.schedule(Event::Peer(PeerStage::Send), child, 0);
                    return Ok(());
                }
                self.schedule(Event::WriteRequest(WriteStage::DownUpFinish), stack, 0);
            }

            WriteStage::DownUpFinish => {
                let f = self.frame(stack, name)?;
                let (set, way) = (f.set, f.way);
                self.module_mut(target)
                    .cache
                    .set_block(set, way, 0, BlockState::Invalid);
                self.frame_mut(stack, name)?.state = BlockState::Invalid;
                self.release_lock(stack, name)?;
                self.schedule(Event::WriteRequest(WriteStage::Reply), stack, 0);
            }

            WriteStage::Reply => {
                let (net, src, dst) = self.route(module, target, direction, name)?;
                let size = self.frame(stack, name)?.reply_size;
                let _ = self.try_send(
                    stack,
                    net,
                    dst,
                    src,
                    size,
                    MessageKind::Reply,
                    Event::WriteRequest(WriteStage::Finish),
                    Event::WriteRequest(WriteStage::Reply),
                    name,
                )?;
            }

            WriteStage::Finish => {
                let (_, src, _) = self.route(module, target, direction, name)?;
                self.receive(stack, src, name)?;
                let reply = self.frame(stack, name)?.reply;
                if direction == Direction::DownUp && reply == Reply::AckData {
                    self.parent_mut(stack, name)?.dirty_data = true;
                }
                self.stack_return(stack, name)?;
            }
        }
        Ok(())
    }
}

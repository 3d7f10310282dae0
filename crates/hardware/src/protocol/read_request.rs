//! ReadRequest state machine.
//!
//! The frame lives at the requesting module (`module`) and is aimed at
//! `target`:
//! 1. **Up-down:** The target serves a miss from above. It fetches the block
//!    from below if needed, demotes any other owner (possibly shipping the data
//!    straight to the requester as a peer transfer), records the requester as a
//!    sharer and answers whether other copies exist.
//! 2. **Down-up:** The target is an upper owner being demoted. It first demotes
//!    its own owners, then replies with or without data and drops from
//!    Exclusive/Modified to Shared/Owned.

use super::{Direction, Event, FindAndLockStage, PeerStage, Reply};
use crate::common::AccessKind;
use crate::common::error::Result;
use crate::config::CONTROL_MESSAGE_SIZE;
use crate::interconnect::MessageKind;
use crate::mem::BlockState;
use crate::sim::{StackId, System};

/// ReadRequest stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadStage {
    /// Send the request.
    Start,
    /// Target: look up the block.
    Receive,
    /// Target: dispatch on direction.
    Action,
    /// Target: demote owners or fetch from below.
    UpDown,
    /// Target: fill from the reply below.
    UpDownMiss,
    /// Target: record the requester and compute the reply.
    UpDownFinish,
    /// Target: demote upper owners.
    DownUp,
    /// Target: wait for upper owners, then pick the reply.
    DownUpWaitForReqs,
    /// Target: downgrade the block.
    DownUpFinish,
    /// Target: send the reply.
    Reply,
    /// Requester: take the reply.
    Finish,
}

impl ReadStage {
    /// Stage name used in traces and errors.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Start => "read_request start",
            Self::Receive => "read_request receive",
            Self::Action => "read_request action",
            Self::UpDown => "read_request updown",
            Self::UpDownMiss => "read_request updown miss",
            Self::UpDownFinish => "read_request updown finish",
            Self::DownUp => "read_request downup",
            Self::DownUpWaitForReqs => "read_request downup wait for reqs",
            Self::DownUpFinish => "read_request downup finish",
            Self::Reply => "read_request reply",
            Self::Finish => "read_request finish",
        }
    }
}

impl System {
    pub(crate) fn handle_read_request(&mut self, stage: ReadStage, stack: StackId) -> Result<()> {
        let name = stage.name();
        let (module, addr, direction) = {
            let f = self.frame(stack, name)?;
            (f.module, f.addr, f.direction)
        };
        let target = self.target_of(stack, name)?;
        self.trace_stage(stack, target, name);

        match stage {
            ReadStage::Start => {
                let parent = self.parent_mut(stack, name)?;
                parent.shared = false;
                parent.err = false;
                let (net, src, dst) = self.route(module, target, direction, name)?;
                let _ = self.try_send(
                    stack,
                    net,
                    src,
                    dst,
                    CONTROL_MESSAGE_SIZE,
                    MessageKind::ReadRequest,
                    Event::ReadRequest(ReadStage::Receive),
                    Event::ReadRequest(ReadStage::Start),
                    name,
                )?;
            }

            ReadStage::Receive => {
                let (_, _, dst) = self.route(module, target, direction, name)?;
                self.receive(stack, dst, name)?;
                let child =
                    self.create_frame(stack, target, addr, Event::ReadRequest(ReadStage::Action), name)?;
                let c = self.frame_mut(child, name)?;
                c.blocking = direction == Direction::DownUp;
                c.kind = AccessKind::Load;
                c.retry = false;
                c.direction = direction;
                self.schedule(Event::FindAndLock(FindAndLockStage::Start), child, 0);
            }

            ReadStage::Action => {
                let f = self.frame_mut(stack, name)?;
                if f.block_not_found {
                    f.reply = Reply::Ack;
                    f.reply_size = CONTROL_MESSAGE_SIZE;
                    self.schedule(Event::ReadRequest(ReadStage::Reply), stack, 0);
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
                    self.schedule(Event::ReadRequest(ReadStage::Reply), stack, 0);
                    return Ok(());
                }
                let next = match direction {
                    Direction::UpDown => ReadStage::UpDown,
                    Direction::DownUp => ReadStage::DownUp,
                };
                self.schedule(Event::ReadRequest(next), stack, 0);
            }

            ReadStage::UpDown => {
                let requester_block = self.module_ref(module).block_size();
                let f = self.frame_mut(stack, name)?;
                f.pending = 1;
                f.reply = Reply::AckData;
                f.reply_size = requester_block + CONTROL_MESSAGE_SIZE;
                let (set, way, tag, state) = (f.set, f.way, f.tag, f.state);

                if state.is_valid() {
                    if addr % requester_block != 0 {
                        return Err(self.violation(target, addr, name, "request not aligned to requester block"));
                    }
                    let requester = self.sharer_node(target, module, name)?;
                    for (z, entry_tag) in self.subblocks_in(target, tag, tag, self.module_ref(target).block_size()) {
                        let owner = self.module_ref(target).dir.entry(set, way, z).owner();
                        let in_range = entry_tag >= addr && entry_tag < addr + requester_block;
                        if in_range && owner == Some(requester) {
                            return Err(self.violation(target, entry_tag, name, "requester already owns the block"));
                        }
                        let Some(owner) = owner.filter(|&o| o != requester) else {
                            continue;
                        };
                        let owner_mod = self.upper_module(target, owner, name)?;
                        if entry_tag % self.module_ref(owner_mod).block_size() != 0 {
                            continue;
                        }
                        let child = self.create_frame(
                            stack,
                            target,
                            entry_tag,
                            Event::ReadRequest(ReadStage::UpDownFinish),
                            name,
                        )?;
                        let c = self.frame_mut(child, name)?;
                        if in_range {
                            c.peer = Some(module);
                        }
                        c.target = Some(owner_mod);
                        c.direction = Direction::DownUp;
                        self.frame_mut(stack, name)?.pending += 1;
                        self.schedule(Event::ReadRequest(ReadStage::Start), child, 0);
                    }
                    self.schedule(Event::ReadRequest(ReadStage::UpDownFinish), stack, 0);
                    return Ok(());
                }

                if self.module_ref(target).dir.is_shared_or_owned(set, way) {
                    return Err(self.violation(target, tag, name, "invalid block has sharers"));
                }
                let low = self.low_module_for(target, tag)?;
                let child =
                    self.create_frame(stack, target, tag, Event::ReadRequest(ReadStage::UpDownMiss), name)?;
                let c = self.frame_mut(child, name)?;
                c.target = Some(low);
                c.direction = Direction::UpDown;
                self.schedule(Event::ReadRequest(ReadStage::Start), child, 0);
            }

            ReadStage::UpDownMiss => {
                let f = self.frame(stack, name)?;
                if f.err {
                    self.release_lock(stack, name)?;
                    let f = self.frame_mut(stack, name)?;
                    f.reply = Reply::AckError;
                    f.reply_size = CONTROL_MESSAGE_SIZE;
                    let parent = self.parent_mut(stack, name)?;
                    parent.err = true;
                    parent.reply = Reply::AckError;
                    self.schedule(Event::ReadRequest(ReadStage::Reply), stack, 0);
                    return Ok(());
                }
                let (set, way, tag) = (f.set, f.way, f.tag);
                let state = if f.shared {
                    BlockState::Shared
                } else {
                    BlockState::Exclusive
                };
                self.module_mut(target).cache.set_block(set, way, tag, state);
                self.frame_mut(stack, name)?.state = state;
                self.schedule(Event::ReadRequest(ReadStage::UpDownFinish), stack, 0);
            }

            ReadStage::UpDownFinish => {
                let f = self.frame_mut(stack, name)?;
                if f.pending == 0 {
                    return Err(self.violation(target, addr, name, "no pending replies"));
                }
                f.pending -= 1;
                if f.pending > 0 {
                    return Ok(());
                }
                let (set, way, tag, state, reply_size) = (f.set, f.way, f.tag, f.state, f.reply_size);
                let reply = match reply_size {
                    CONTROL_MESSAGE_SIZE => Reply::Ack,
                    s if s > CONTROL_MESSAGE_SIZE => Reply::AckData,
                    _ => return Err(self.violation(target, addr, name, "reply smaller than a control message")),
                };
                self.frame_mut(stack, name)?.reply = reply;
                self.parent_mut(stack, name)?.reply = reply;

                let requester = self.sharer_node(target, module, name)?;
                let target_block = self.module_ref(target).block_size();
                let requester_block = self.module_ref(module).block_size();
                let mut shared = matches!(state, BlockState::Shared | BlockState::Owned);
                for (z, _) in self.subblocks_in(target, tag, tag, target_block) {
                    let dir = &mut self.module_mut(target).dir;
                    if dir.entry(set, way, z).owner().is_some_and(|o| o != requester) {
                        dir.set_owner(set, way, z, None);
                    }
                }
                let range = self.subblocks_in(target, tag, addr, requester_block);
                for &(z, _) in &range {
                    let dir = &mut self.module_mut(target).dir;
                    dir.set_sharer(set, way, z, requester);
                    shared |= dir.entry(set, way, z).num_sharers() > 1;
                }
                if !shared {
                    for &(z, _) in &range {
                        self.module_mut(target).dir.set_owner(set, way, z, Some(requester));
                    }
                }
                self.parent_mut(stack, name)?.shared = shared;
                self.release_lock(stack, name)?;
                self.schedule(Event::ReadRequest(ReadStage::Reply), stack, 0);
            }

            ReadStage::DownUp => {
                let f = self.frame_mut(stack, name)?;
                let (set, way, tag, state) = (f.set, f.way, f.tag, f.state);
                f.pending = 1;
                if !state.is_valid() || state == BlockState::Shared {
                    return Err(self.violation(target, addr, name, format!("owner holds the block in {state}")));
                }
                for (z, entry_tag) in self.subblocks_in(target, tag, tag, self.module_ref(target).block_size()) {
                    let Some(owner) = self.module_ref(target).dir.entry(set, way, z).owner() else {
                        continue;
                    };
                    let owner_mod = self.upper_module(target, owner, name)?;
                    if entry_tag % self.module_ref(owner_mod).block_size() != 0 {
                        continue;
                    }
                    let child = self.create_frame(
                        stack,
                        target,
                        entry_tag,
                        Event::ReadRequest(ReadStage::DownUpWaitForReqs),
                        name,
                    )?;
                    let c = self.frame_mut(child, name)?;
                    c.target = Some(owner_mod);
                    c.direction = Direction::DownUp;
                    self.frame_mut(stack, name)?.pending += 1;
                    self.schedule(Event::ReadRequest(ReadStage::Start), child, 0);
                }
                self.schedule(Event::ReadRequest(ReadStage::DownUpWaitForReqs), stack, 0);
            }

            ReadStage::DownUpWaitForReqs => {
                let f = self.frame_mut(stack, name)?;
                if f.pending == 0 {
                    return Err(self.violation(target, addr, name, "no pending replies"));
                }
                f.pending -= 1;
                if f.pending > 0 {
                    return Ok(());
                }
                let (set, way, tag, peer) = (f.set, f.way, f.tag, f.peer);
                let mut state = f.state;
                if f.dirty_data && state == BlockState::Exclusive {
                    state = BlockState::Modified;
                    self.module_mut(target).cache.set_block(set, way, tag, state);
                    self.frame_mut(stack, name)?.state = state;
                }

                let target_block = self.module_ref(target).block_size();
                let (reply, size) = match (state, peer) {
                    (BlockState::Exclusive, _) => (Reply::Ack, CONTROL_MESSAGE_SIZE),
                    (BlockState::Modified | BlockState::Owned, None) => {
                        (Reply::AckData, target_block + CONTROL_MESSAGE_SIZE)
                    }
                    (BlockState::Modified | BlockState::Owned, Some(_)) => {
                        let parent = self.parent_mut(stack, name)?;
                        if parent.reply_size < target_block + CONTROL_MESSAGE_SIZE {
                            return Err(self.violation(target, addr, name, "peer transfer exceeds reply size"));
                        }
                        parent.reply_size -= target_block;
                        (Reply::AckDataSentToPeer, CONTROL_MESSAGE_SIZE)
                    }
                    (s, _) => {
                        return Err(self.violation(target, addr, name, format!("cannot reply from {s}")));
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
                        Event::ReadRequest(ReadStage::DownUpFinish),
                        name,
                    )?;
                    let c = self.frame_mut(child, name)?;
                    c.target = Some(target);
                    c.peer = peer;
                    self.schedule(Event::Peer(PeerStage::Send), child, 0);
                    return Ok(());
                }
                self.schedule(Event::ReadRequest(ReadStage::DownUpFinish), stack, 0);
            }

            ReadStage::DownUpFinish => {
                let f = self.frame(stack, name)?;
                let (set, way, tag, state) = (f.set, f.way, f.tag, f.state);
                match state {
                    BlockState::Modified => {
                        self.module_mut(target)
                            .cache
                            .set_block(set, way, tag, BlockState::Owned);
                    }
                    BlockState::Exclusive => {
                        self.module_mut(target)
                            .cache
                            .set_block(set, way, tag, BlockState::Shared);
                        for (z, _) in self.subblocks_in(target, tag, tag, self.module_ref(target).block_size()) {
                            self.module_mut(target).dir.set_owner(set, way, z, None);
                        }
                    }
                    BlockState::Owned => {}
                    s => return Err(self.violation(target, addr, name, format!("cannot downgrade from {s}"))),
                }
                self.release_lock(stack, name)?;
                self.schedule(Event::ReadRequest(ReadStage::Reply), stack, 0);
            }

            ReadStage::Reply => {
                let (net, src, dst) = self.route(module, target, direction, name)?;
                let size = self.frame(stack, name)?.reply_size;
                let _ = self.try_send(
                    stack,
                    net,
                    dst,
                    src,
                    size,
                    MessageKind::Reply,
                    Event::ReadRequest(ReadStage::Finish),
                    Event::ReadRequest(ReadStage::Reply),
                    name,
                )?;
            }

            ReadStage::Finish => {
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

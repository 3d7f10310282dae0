//! Coherence Protocol Engine.
//!
//! Eight cooperating state machines drive every access through the hierarchy:
//! 1. **Load / Store:** Top-level accesses entering at a module.
//! 2. **FindAndLock:** Port acquisition, lookup, victim selection and directory locking.
//! 3. **Evict:** Invalidating upper copies and writing a victim back before its frame is reused.
//! 4. **ReadRequest / WriteRequest:** Requests to the module below (up-down) or to an
//!    upper sharer (down-up).
//! 5. **Invalidate:** Down-up write requests to every sharer of a block.
//! 6. **PeerTransfer:** Direct cache-to-cache data moves during demotions.
//!
//! Each machine is a stage enum plus one `impl System` handler. A stage either
//! schedules its successor, suspends on a port, lock, message or latency, or
//! returns to its parent frame through [`Return`](stack::Return).

/// Evict state machine.
pub mod evict;
/// FindAndLock state machine.
pub mod find_and_lock;
/// Invalidate state machine.
pub mod invalidate;
/// Load state machine.
pub mod load;
/// PeerTransfer state machine.
pub mod peer;
/// ReadRequest state machine.
pub mod read_request;
/// Continuation record.
pub mod stack;
/// Store state machine.
pub mod store;
/// WriteRequest state machine.
pub mod write_request;

pub use evict::EvictStage;
pub use find_and_lock::FindAndLockStage;
pub use invalidate::InvalidateStage;
pub use load::LoadStage;
pub use peer::PeerStage;
pub use read_request::ReadStage;
pub use stack::{Direction, DirLockRef, Frame, MsgRef, Reply, Return};
pub use store::StoreStage;
pub use write_request::WriteStage;

use crate::common::error::Result;
use crate::common::{ModuleId, NetId, NodeId, ProtocolError};
use crate::interconnect::MessageKind;
use crate::mem::Module;
use crate::sim::{StackId, System};

/// A stage of one of the state machines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// Load stage.
    Load(LoadStage),
    /// Store stage.
    Store(StoreStage),
    /// FindAndLock stage.
    FindAndLock(FindAndLockStage),
    /// Evict stage.
    Evict(EvictStage),
    /// ReadRequest stage.
    ReadRequest(ReadStage),
    /// WriteRequest stage.
    WriteRequest(WriteStage),
    /// Invalidate stage.
    Invalidate(InvalidateStage),
    /// PeerTransfer stage.
    Peer(PeerStage),
}

/// An event bound to the frame it resumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scheduled {
    /// Stage to run.
    pub event: Event,
    /// Frame to run it on.
    pub stack: StackId,
}

impl System {
    /// Runs one scheduled stage.
    pub(crate) fn dispatch(&mut self, item: Scheduled) -> Result<()> {
        let Scheduled { event, stack } = item;
        match event {
            Event::Load(stage) => self.handle_load(stage, stack),
            Event::Store(stage) => self.handle_store(stage, stack),
            Event::FindAndLock(stage) => self.handle_find_and_lock(stage, stack),
            Event::Evict(stage) => self.handle_evict(stage, stack),
            Event::ReadRequest(stage) => self.handle_read_request(stage, stack),
            Event::WriteRequest(stage) => self.handle_write_request(stage, stack),
            Event::Invalidate(stage) => self.handle_invalidate(stage, stack),
            Event::Peer(stage) => self.handle_peer(stage, stack),
        }
    }

    pub(crate) fn schedule(&mut self, event: Event, stack: StackId, delay: u64) {
        self.events.schedule(Scheduled { event, stack }, delay);
    }

    pub(crate) fn frame(&self, stack: StackId, stage: &'static str) -> Result<&Frame> {
        self.stacks
            .get(stack)
            .ok_or(ProtocolError::StaleStack { stack, stage })
    }

    pub(crate) fn frame_mut(&mut self, stack: StackId, stage: &'static str) -> Result<&mut Frame> {
        self.stacks
            .get_mut(stack)
            .ok_or(ProtocolError::StaleStack { stack, stage })
    }

    pub(crate) fn parent_of(&self, stack: StackId, stage: &'static str) -> Result<StackId> {
        self.frame(stack, stage)?
            .ret
            .map(|r| r.parent)
            .ok_or(ProtocolError::StaleStack { stack, stage })
    }

    pub(crate) fn parent_mut(&mut self, stack: StackId, stage: &'static str) -> Result<&mut Frame> {
        let parent = self.parent_of(stack, stage)?;
        self.frame_mut(parent, stage)
    }

    /// Creates a child frame of `parent` that resumes `parent` with `ret_event`.
    pub(crate) fn create_frame(
        &mut self,
        parent: StackId,
        module: ModuleId,
        addr: u64,
        ret_event: Event,
        stage: &'static str,
    ) -> Result<StackId> {
        let id = self.frame(parent, stage)?.id;
        Ok(self.stacks.create(Frame::new(
            id,
            module,
            addr,
            Some(Return {
                event: ret_event,
                parent,
            }),
        )))
    }

    /// Destroys a finished frame and resumes its parent in the same cycle.
    ///
    /// A frame without a parent is a top-level access; its completion is recorded.
    pub(crate) fn stack_return(&mut self, stack: StackId, stage: &'static str) -> Result<()> {
        let frame = self
            .stacks
            .destroy(stack)
            .ok_or(ProtocolError::StaleStack { stack, stage })?;
        match frame.ret {
            Some(Return { event, parent }) => self.schedule(event, parent, 0),
            None => self.record_completion(&frame),
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn module_ref(&self, id: ModuleId) -> &Module {
        &self.modules[id.0]
    }

    #[inline]
    pub(crate) fn module_mut(&mut self, id: ModuleId) -> &mut Module {
        &mut self.modules[id.0]
    }

    pub(crate) fn violation(
        &self,
        module: ModuleId,
        addr: u64,
        stage: &'static str,
        detail: impl Into<String>,
    ) -> ProtocolError {
        ProtocolError::violation(&self.module_ref(module).name, addr, stage, detail)
    }

    /// Returns the module a request or eviction frame is aimed at.
    pub(crate) fn target_of(&self, stack: StackId, stage: &'static str) -> Result<ModuleId> {
        let frame = self.frame(stack, stage)?;
        frame
            .target
            .ok_or_else(|| self.violation(frame.module, frame.addr, stage, "frame has no target module"))
    }

    /// Picks the low module of `module` that serves `addr`.
    pub(crate) fn low_module_for(&self, module: ModuleId, addr: u64) -> Result<ModuleId> {
        self.module_ref(module)
            .low_modules
            .iter()
            .copied()
            .find(|&low| self.module_ref(low).range.contains(addr))
            .ok_or_else(|| ProtocolError::NoLowModule {
                module: self.module_ref(module).name.clone(),
                addr,
            })
    }

    /// Resolves the network and end nodes used between `module` and `target`.
    ///
    /// # Returns
    ///
    /// `(network, node of module, node of target)`. Up-down traffic uses the
    /// module's low network; down-up traffic uses its high network.
    pub(crate) fn route(
        &self,
        module: ModuleId,
        target: ModuleId,
        direction: Direction,
        stage: &'static str,
    ) -> Result<(NetId, NodeId, NodeId)> {
        let (m, t) = (self.module_ref(module), self.module_ref(target));
        let (near, far) = match direction {
            Direction::UpDown => (m.low, t.high),
            Direction::DownUp => (m.high, t.low),
        };
        match (near, far) {
            (Some(a), Some(b)) if a.net == b.net => Ok((a.net, a.node, b.node)),
            _ => Err(self.violation(
                module,
                0,
                stage,
                format!("no shared network with {}", t.name),
            )),
        }
    }

    /// Node of an upper module, on `module`'s high network.
    pub(crate) fn sharer_node(&self, module: ModuleId, upper: ModuleId, stage: &'static str) -> Result<NodeId> {
        self.module_ref(upper)
            .low
            .filter(|l| Some(l.net) == self.module_ref(module).high.map(|h| h.net))
            .map(|l| l.node)
            .ok_or_else(|| {
                self.violation(module, 0, stage, format!("{} is not attached above", self.module_ref(upper).name))
            })
    }

    /// Module attached at `node` of `module`'s high network.
    pub(crate) fn upper_module(&self, module: ModuleId, node: NodeId, stage: &'static str) -> Result<ModuleId> {
        self.module_ref(module)
            .high
            .and_then(|h| self.networks[h.net.0].node(node))
            .map(|n| n.module)
            .ok_or_else(|| self.violation(module, 0, stage, format!("unknown sharer node {}", node.0)))
    }

    /// Sends a message on behalf of `stack`, or parks the stage until space frees up.
    ///
    /// # Returns
    ///
    /// `true` if the message was accepted; `arrive` then runs at the destination.
    /// Otherwise `retry` runs again after the destination receives a message.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn try_send(
        &mut self,
        stack: StackId,
        net: NetId,
        src: NodeId,
        dst: NodeId,
        size: u64,
        kind: MessageKind,
        arrive: Event,
        retry: Event,
        stage: &'static str,
    ) -> Result<bool> {
        let network = &mut self.networks[net.0];
        if !network.can_send(src, dst, size) {
            network.wait_for_space(dst, Scheduled { event: retry, stack });
            return Ok(false);
        }
        let id = network.send(src, dst, size, kind, Scheduled { event: arrive, stack }, &mut self.events);
        self.frame_mut(stack, stage)?.msg = Some(MsgRef { net, id });
        Ok(true)
    }

    /// Receives the message a frame is waiting on at `node`.
    pub(crate) fn receive(&mut self, stack: StackId, node: NodeId, stage: &'static str) -> Result<()> {
        let frame = self.frame_mut(stack, stage)?;
        let (module, addr) = (frame.module, frame.addr);
        let Some(msg) = frame.msg.take() else {
            return Err(self.violation(module, addr, stage, "no message to receive"));
        };
        if self.networks[msg.net.0]
            .receive(node, msg.id, &mut self.events)
            .is_none()
        {
            return Err(self.violation(module, addr, stage, "message not addressed to receiving node"));
        }
        Ok(())
    }

    /// Releases the directory lock held by a frame.
    pub(crate) fn release_lock(&mut self, stack: StackId, stage: &'static str) -> Result<()> {
        let frame = self.frame_mut(stack, stage)?;
        let (module, addr) = (frame.module, frame.addr);
        let Some(lock) = frame.dir_lock.take() else {
            return Err(self.violation(module, addr, stage, "no directory lock held"));
        };
        self.unlock_dir(lock);
        Ok(())
    }

    pub(crate) fn unlock_dir(&mut self, lock: DirLockRef) {
        let _ = self.modules[lock.module.0]
            .dir
            .unlock(lock.set, lock.way, &mut self.events);
    }

    /// Releases the lookup port held by `stack` at `module`.
    pub(crate) fn release_port(&mut self, module: ModuleId, stack: StackId) {
        let m = &mut self.modules[module.0];
        if let Some(port) = m.port_of(stack) {
            let _ = m.unlock_port(port, &mut self.events);
        }
    }

    /// Sub-blocks `z` of a frame at `module` whose tags fall in `[lo, lo + len)`.
    pub(crate) fn subblocks_in(&self, module: ModuleId, tag: u64, lo: u64, len: u64) -> Vec<(usize, u64)> {
        let m = self.module_ref(module);
        (0..m.dir.subblocks())
            .map(|z| (z, tag + z as u64 * m.sub_block_size))
            .filter(|&(_, t)| t >= lo && t < lo + len)
            .collect()
    }

    pub(crate) fn trace_stage(&self, stack: StackId, at: ModuleId, stage: &'static str) {
        if let Some(f) = self.stacks.get(stack) {
            tracing::debug!(
                cycle = self.events.now(),
                access = %f.id,
                addr = format_args!("{:#x}", f.addr),
                module = %self.module_ref(at).name,
                "{stage}"
            );
        }
    }
}

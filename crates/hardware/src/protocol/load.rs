//! Load state machine.
//!
//! A load enters at a module and proceeds through:
//! 1. **Start:** Joins the module's access list; coalesces with an in-flight load
//!    of the same block started this cycle.
//! 2. **Lock:** Waits for any older write to the block, then locks the frame
//!    through a blocking FindAndLock.
//! 3. **Action / Miss:** On a hit goes straight to unlock; otherwise issues an
//!    up-down ReadRequest and fills the frame Shared or Exclusive.
//! 4. **Unlock / Finish:** Releases the frame lock, leaves the access list and
//!    wakes every access waiting on this one.
//!
//! A lock conflict reported from below releases everything and retries from
//! `Lock` after the module's retry latency.
//!
//! The access-list helpers shared with stores live here too.

use super::{Direction, Event, FindAndLockStage, ReadStage, Scheduled};
use crate::common::error::Result;
use crate::common::{AccessKind, ModuleId};
use crate::mem::BlockState;
use crate::sim::{StackId, System};

/// Load stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadStage {
    /// Enter the access list or coalesce.
    Start,
    /// Order behind older writes and lock the frame.
    Lock,
    /// Dispatch on hit or miss.
    Action,
    /// Fill the frame from the reply.
    Miss,
    /// Release the frame lock.
    Unlock,
    /// Leave the access list and complete.
    Finish,
}

impl LoadStage {
    /// Stage name used in traces and errors.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Start => "load start",
            Self::Lock => "load lock",
            Self::Action => "load action",
            Self::Miss => "load miss",
            Self::Unlock => "load unlock",
            Self::Finish => "load finish",
        }
    }
}

impl System {
    pub(crate) fn handle_load(&mut self, stage: LoadStage, stack: StackId) -> Result<()> {
        let name = stage.name();
        let (module, addr) = {
            let f = self.frame(stack, name)?;
            (f.module, f.addr)
        };
        self.trace_stage(stack, module, name);

        match stage {
            LoadStage::Start => {
                self.enter_access_list(stack, module, AccessKind::Load)?;
                if let Some(master) = self.coalesce_target(stack, module, AccessKind::Load)? {
                    self.module_mut(module).stats.coalesced_reads += 1;
                    return self.coalesce(stack, master, Event::Load(LoadStage::Finish));
                }
                self.schedule(Event::Load(LoadStage::Lock), stack, 0);
            }

            LoadStage::Lock => {
                if let Some(older) = self.older_access(stack, module, true)? {
                    tracing::trace!(%stack, %older, "load waits for older write");
                    return self.wait_for_access(stack, older, Event::Load(LoadStage::Lock));
                }
                let retry = self.frame(stack, name)?.retry;
                let child =
                    self.create_frame(stack, module, addr, Event::Load(LoadStage::Action), name)?;
                let f = self.frame_mut(child, name)?;
                f.blocking = true;
                f.kind = AccessKind::Load;
                f.retry = retry;
                self.schedule(Event::FindAndLock(FindAndLockStage::Start), child, 0);
            }

            LoadStage::Action => {
                let f = self.frame(stack, name)?;
                if f.err {
                    return self.schedule_retry(stack, module, Event::Load(LoadStage::Lock));
                }
                if f.state.is_valid() {
                    self.schedule(Event::Load(LoadStage::Unlock), stack, 0);
                    return Ok(());
                }
                let tag = f.tag;
                let low = self.low_module_for(module, tag)?;
                let child =
                    self.create_frame(stack, module, tag, Event::Load(LoadStage::Miss), name)?;
                let f = self.frame_mut(child, name)?;
                f.peer = Some(module);
                f.target = Some(low);
                f.direction = Direction::UpDown;
                self.schedule(Event::ReadRequest(ReadStage::Start), child, 0);
            }

            LoadStage::Miss => {
                let f = self.frame(stack, name)?;
                if f.err {
                    self.release_lock(stack, name)?;
                    return self.schedule_retry(stack, module, Event::Load(LoadStage::Lock));
                }
                let (set, way, tag) = (f.set, f.way, f.tag);
                let state = if f.shared {
                    BlockState::Shared
                } else {
                    BlockState::Exclusive
                };
                self.module_mut(module).cache.set_block(set, way, tag, state);
                self.frame_mut(stack, name)?.state = state;
                self.schedule(Event::Load(LoadStage::Unlock), stack, 0);
            }

            LoadStage::Unlock => {
                self.release_lock(stack, name)?;
                self.schedule(Event::Load(LoadStage::Finish), stack, 0);
            }

            LoadStage::Finish => {
                self.leave_access_list(stack, module, name)?;
                self.stack_return(stack, name)?;
            }
        }
        Ok(())
    }

    /// Records the start of a top-level access and appends it to the access list.
    pub(crate) fn enter_access_list(
        &mut self,
        stack: StackId,
        module: ModuleId,
        kind: AccessKind,
    ) -> Result<()> {
        let now = self.events.now();
        let f = self.frame_mut(stack, "access start")?;
        f.kind = kind;
        f.start_cycle = now;
        self.module_mut(module).access_start(stack);
        Ok(())
    }

    /// Finds an in-flight access `stack` can merge into.
    ///
    /// A load merges with the nearest older load of the same block started in
    /// the same cycle, unless a write to any block sits in between. A store
    /// merges only with the store immediately before it, if that store targets
    /// the same block, started this cycle and has not taken a port yet.
    ///
    /// # Returns
    ///
    /// The master access (the head of an existing coalesced group).
    pub(crate) fn coalesce_target(
        &self,
        stack: StackId,
        module: ModuleId,
        kind: AccessKind,
    ) -> Result<Option<StackId>> {
        let stage = "coalesce";
        let m = self.module_ref(module);
        let geometry = m.cache.geometry();
        let now = self.events.now();
        let addr = self.frame(stack, stage)?.addr;
        let Some(pos) = m.accesses().iter().position(|&s| s == stack) else {
            return Ok(None);
        };

        for &older in m.accesses()[..pos].iter().rev() {
            let o = self.frame(older, stage)?;
            match kind {
                AccessKind::Load => {
                    if o.kind.is_write() {
                        return Ok(None);
                    }
                    if geometry.same_block(o.addr, addr) {
                        let fresh = o.start_cycle == now;
                        return Ok(fresh.then_some(o.master.unwrap_or(older)));
                    }
                }
                AccessKind::Store => {
                    let mergeable = o.kind.is_write()
                        && geometry.same_block(o.addr, addr)
                        && o.start_cycle == now
                        && !o.port_locked;
                    return Ok(mergeable.then_some(o.master.unwrap_or(older)));
                }
            }
        }
        Ok(None)
    }

    /// Parks `stack` on `master` so it finishes when the master does.
    pub(crate) fn coalesce(&mut self, stack: StackId, master: StackId, finish: Event) -> Result<()> {
        let stage = "coalesce";
        self.frame_mut(stack, stage)?.master = Some(master);
        self.frame_mut(master, stage)?.waiters.push(Scheduled { event: finish, stack });
        tracing::trace!(%stack, %master, "access coalesced");
        Ok(())
    }

    /// Nearest older access to the same block that `stack` must wait for.
    ///
    /// With `writes_only`, older loads are ignored.
    pub(crate) fn older_access(
        &self,
        stack: StackId,
        module: ModuleId,
        writes_only: bool,
    ) -> Result<Option<StackId>> {
        let stage = "access order";
        let m = self.module_ref(module);
        let geometry = m.cache.geometry();
        let addr = self.frame(stack, stage)?.addr;
        let Some(pos) = m.accesses().iter().position(|&s| s == stack) else {
            return Ok(None);
        };
        for &older in m.accesses()[..pos].iter().rev() {
            let o = self.frame(older, stage)?;
            if geometry.same_block(o.addr, addr) && (!writes_only || o.kind.is_write()) {
                return Ok(Some(older));
            }
        }
        Ok(None)
    }

    /// Re-runs `event` on `stack` once `older` finishes.
    pub(crate) fn wait_for_access(&mut self, stack: StackId, older: StackId, event: Event) -> Result<()> {
        self.frame_mut(older, "access order")?
            .waiters
            .push(Scheduled { event, stack });
        Ok(())
    }

    /// Removes a finished access from the access list and wakes its waiters.
    ///
    /// Coalesced followers inherit the master's tag and final state.
    pub(crate) fn leave_access_list(
        &mut self,
        stack: StackId,
        module: ModuleId,
        stage: &'static str,
    ) -> Result<()> {
        self.module_mut(module).access_finish(stack);
        let f = self.frame_mut(stack, stage)?;
        let (tag, state) = (f.tag, f.state);
        let waiters = std::mem::take(&mut f.waiters);
        for waiter in waiters {
            let w = self.frame_mut(waiter.stack, stage)?;
            if w.master == Some(stack) {
                w.tag = tag;
                w.state = state;
            }
            self.events.schedule(waiter, 0);
        }
        Ok(())
    }

    /// Schedules a retry of a failed access after the module's retry latency.
    pub(crate) fn schedule_retry(&mut self, stack: StackId, module: ModuleId, event: Event) -> Result<()> {
        let m = self.module_mut(module);
        let delay = m.retry_latency;
        let write = matches!(event, Event::Store(_));
        if write {
            m.stats.write_retries += 1;
        } else {
            m.stats.read_retries += 1;
        }
        let f = self.frame_mut(stack, "retry")?;
        f.retry = true;
        tracing::warn!(access = %f.id, addr = format_args!("{:#x}", f.addr), delay, write, "access retried");
        self.schedule(event, stack, delay);
        Ok(())
    }
}

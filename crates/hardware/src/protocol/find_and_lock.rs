//! FindAndLock state machine.
//!
//! Resolves an address to a locked frame at one module:
//! 1. **Start:** Clears the parent's result fields and requests a lookup port.
//! 2. **Port:** Probes the cache. A miss picks a victim way; a down-up miss
//!    gives up with `block_not_found`. The frame's directory lock is then
//!    taken, failed (non-blocking) or queued (blocking). A queued lookup gives
//!    its port back and restarts at `Start` once the lock is handed over.
//! 3. **Action:** After the lookup latency, releases the port and evicts a
//!    valid victim.
//! 4. **Finish:** Reports set, way, tag, state and the held lock to the parent.

use super::{Direction, DirLockRef, EvictStage, Event, Scheduled};
use crate::common::error::Result;
use crate::mem::{BlockState, LockOutcome, Probe};
use crate::sim::{StackId, System};
use crate::stats::ModuleStats;

/// FindAndLock stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FindAndLockStage {
    /// Reset parent results and request a port.
    Start,
    /// Probe, pick a victim and lock.
    Port,
    /// Release the port and evict the victim.
    Action,
    /// Return the locked frame.
    Finish,
}

impl FindAndLockStage {
    /// Stage name used in traces and errors.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Start => "find_and_lock start",
            Self::Port => "find_and_lock port",
            Self::Action => "find_and_lock action",
            Self::Finish => "find_and_lock finish",
        }
    }
}

fn count_lookup(stats: &mut ModuleStats, write: bool, hit: bool, blocking: bool, retry: bool) {
    stats.accesses += 1;
    stats.hits += u64::from(hit);
    if write {
        stats.writes += 1;
        stats.write_hits += u64::from(hit);
        if blocking {
            stats.blocking_writes += 1;
        } else {
            stats.non_blocking_writes += 1;
        }
    } else {
        stats.reads += 1;
        stats.read_hits += u64::from(hit);
        if blocking {
            stats.blocking_reads += 1;
        } else {
            stats.non_blocking_reads += 1;
        }
    }
    if !retry {
        stats.no_retry_accesses += 1;
        stats.no_retry_hits += u64::from(hit);
        if write {
            stats.no_retry_writes += 1;
            stats.no_retry_write_hits += u64::from(hit);
        } else {
            stats.no_retry_reads += 1;
            stats.no_retry_read_hits += u64::from(hit);
        }
    }
}

impl System {
    pub(crate) fn handle_find_and_lock(&mut self, stage: FindAndLockStage, stack: StackId) -> Result<()> {
        let name = stage.name();
        let (module, addr) = {
            let f = self.frame(stack, name)?;
            (f.module, f.addr)
        };
        self.trace_stage(stack, module, name);

        match stage {
            FindAndLockStage::Start => {
                let parent = self.parent_mut(stack, name)?;
                parent.err = false;
                parent.block_not_found = false;
                parent.set = 0;
                parent.way = 0;
                parent.state = BlockState::Invalid;
                parent.tag = 0;
                let waiter = Scheduled {
                    event: Event::FindAndLock(FindAndLockStage::Port),
                    stack,
                };
                if self.module_mut(module).lock_port(waiter).is_some() {
                    self.schedule(waiter.event, stack, 0);
                }
            }

            FindAndLockStage::Port => {
                self.parent_mut(stack, name)?.port_locked = true;

                let probe = self.module_ref(module).find_block(addr, stack);
                let f = self.frame(stack, name)?;
                let (write, blocking, retry, direction, inherited) =
                    (f.kind.is_write(), f.blocking, f.retry, f.direction, f.dir_lock);
                count_lookup(&mut self.module_mut(module).stats, write, probe.hit, blocking, retry);

                let Probe { hit, set, tag, .. } = probe;
                let (way, state) = if hit {
                    (probe.way, probe.state)
                } else {
                    if direction == Direction::DownUp {
                        if let Some(lock) = inherited {
                            self.unlock_dir(lock);
                        }
                        self.release_port(module, stack);
                        self.frame_mut(stack, name)?.dir_lock = None;
                        self.parent_mut(stack, name)?.block_not_found = true;
                        tracing::trace!(%stack, addr = format_args!("{addr:#x}"), "down-up lookup missed");
                        return self.stack_return(stack, name);
                    }
                    let m = self.module_mut(module);
                    let way = m.cache.replace_block(set);
                    let (_, state) = m.cache.get_block(set, way);
                    if !state.is_valid() && m.dir.is_shared_or_owned(set, way) {
                        return Err(self.violation(module, addr, name, "invalid victim has sharers"));
                    }
                    (way, state)
                };

                if let Some(lock) = inherited.filter(|l| (l.set, l.way) != (set, way)) {
                    self.unlock_dir(lock);
                }
                let f = self.frame_mut(stack, name)?;
                f.hit = hit;
                f.set = set;
                f.way = way;
                f.tag = tag;
                f.state = state;
                f.dir_lock = None;

                let resume = Scheduled {
                    event: Event::FindAndLock(FindAndLockStage::Start),
                    stack,
                };
                let held = DirLockRef { module, set, way };
                match self.module_mut(module).dir.lock(set, way, resume, blocking) {
                    Err(busy) => {
                        tracing::debug!(%stack, set = busy.set, way = busy.way, "directory lock busy");
                        self.release_port(module, stack);
                        self.parent_mut(stack, name)?.err = true;
                        return self.stack_return(stack, name);
                    }
                    Ok(LockOutcome::Queued) => {
                        self.module_mut(module).stats.lock_conflicts += 1;
                        self.frame_mut(stack, name)?.dir_lock = Some(held);
                        self.release_port(module, stack);
                    }
                    Ok(LockOutcome::Acquired) => {
                        self.frame_mut(stack, name)?.dir_lock = Some(held);
                        let m = self.module_mut(module);
                        m.cache.set_transient_tag(set, way, tag);
                        m.cache.access_block(set, way);
                        let latency = m.latency;
                        self.schedule(Event::FindAndLock(FindAndLockStage::Action), stack, latency);
                    }
                }
            }

            FindAndLockStage::Action => {
                self.release_port(module, stack);
                let f = self.frame(stack, name)?;
                if !f.hit && f.state.is_valid() {
                    let (set, way) = (f.set, f.way);
                    self.frame_mut(stack, name)?.eviction = true;
                    let child = self.create_frame(
                        stack,
                        module,
                        0,
                        Event::FindAndLock(FindAndLockStage::Finish),
                        name,
                    )?;
                    let e = self.frame_mut(child, name)?;
                    e.set = set;
                    e.way = way;
                    self.schedule(Event::Evict(EvictStage::Start), child, 0);
                    return Ok(());
                }
                self.schedule(Event::FindAndLock(FindAndLockStage::Finish), stack, 0);
            }

            FindAndLockStage::Finish => {
                let f = self.frame(stack, name)?;
                let (set, way, tag, eviction) = (f.set, f.way, f.tag, f.eviction);
                if f.err {
                    self.release_lock(stack, name)?;
                    self.parent_mut(stack, name)?.err = true;
                    return self.stack_return(stack, name);
                }

                let mut state = f.state;
                if eviction {
                    let m = self.module_mut(module);
                    m.stats.evictions += 1;
                    state = m.cache.get_block(set, way).1;
                    if state.is_valid() {
                        return Err(self.violation(module, addr, name, "victim still valid after eviction"));
                    }
                }
                if self.module_ref(module).is_main_memory() && !state.is_valid() {
                    state = BlockState::Exclusive;
                    self.module_mut(module).cache.set_block(set, way, tag, state);
                }

                let lock = self.frame_mut(stack, name)?.dir_lock.take();
                let parent = self.parent_mut(stack, name)?;
                parent.err = false;
                parent.set = set;
                parent.way = way;
                parent.tag = tag;
                parent.state = state;
                parent.dir_lock = lock;
                self.stack_return(stack, name)?;
            }
        }
        Ok(())
    }
}

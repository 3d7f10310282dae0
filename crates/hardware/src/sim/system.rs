//! Simulation context.
//!
//! `System` owns everything a run touches, with no global state:
//! 1. **Clock and events:** The event queue and the current cycle.
//! 2. **Frames:** The continuation arena for every operation in flight.
//! 3. **Hierarchy:** Modules and networks, wired from a validated `Config`.
//! 4. **Results:** Completed top-level accesses and counter snapshots.
//!
//! The protocol engine (`crate::protocol`) extends `System` with one handler
//! per state machine.

use std::collections::HashMap;

use super::arena::{Arena, StackId};
use super::scheduler::EventQueue;
use crate::common::error::Result as ProtocolResult;
use crate::common::{
    AccessId, AccessKind, ConfigError, Geometry, ModuleId, NetId, ProtocolError, SimError,
};
use crate::config::{self, Config};
use crate::interconnect::Network;
use crate::mem::{Attachment, BlockState, DirEntry, Module};
use crate::protocol::{Event, Frame, LoadStage, Scheduled, StoreStage};
use crate::stats::SimStats;

/// A finished top-level access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Completion {
    /// Access identity returned by [`System::access`].
    pub access: AccessId,
    /// Module the access entered at.
    pub module: ModuleId,
    /// Load or store.
    pub kind: AccessKind,
    /// Requested address.
    pub addr: u64,
    /// Block tag the access resolved to.
    pub tag: u64,
    /// Block state when the access finished.
    pub state: BlockState,
    /// Cycle the access started.
    pub issued: u64,
    /// Cycle the access finished.
    pub finished: u64,
    /// The access was merged into an earlier one.
    pub coalesced: bool,
}

impl Completion {
    /// Cycles from issue to completion.
    #[inline]
    pub const fn latency(&self) -> u64 {
        self.finished - self.issued
    }
}

/// The memory system under simulation.
#[derive(Debug)]
pub struct System {
    pub(crate) events: EventQueue<Scheduled>,
    pub(crate) stacks: Arena<Frame>,
    pub(crate) modules: Vec<Module>,
    pub(crate) networks: Vec<Network>,
    completions: Vec<Completion>,
    next_access: u64,
    in_flight: usize,
    loads: u64,
    stores: u64,
}

impl System {
    /// Builds the hierarchy described by `config`.
    ///
    /// Nodes are attached to each network in configuration order, so directory
    /// sharer indices are stable for a given configuration.
    ///
    /// # Errors
    ///
    /// Any `ConfigError` reported by [`Config::validate`].
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;

        let net_index: HashMap<&str, NetId> = config
            .networks
            .iter()
            .enumerate()
            .map(|(i, n)| (n.name.as_str(), NetId(i)))
            .collect();
        let mod_index: HashMap<&str, ModuleId> = config
            .modules
            .iter()
            .enumerate()
            .map(|(i, m)| (m.name.as_str(), ModuleId(i)))
            .collect();

        let mut networks: Vec<Network> = config
            .networks
            .iter()
            .enumerate()
            .map(|(i, n)| Network::new(NetId(i), n, config.record_messages))
            .collect();
        for (i, net) in config.networks.iter().enumerate() {
            for name in config::network_members(config, &net.name) {
                if let Some(&id) = mod_index.get(name) {
                    let _ = networks[i].add_node(name, id);
                }
            }
        }

        let mut modules = Vec::with_capacity(config.modules.len());
        for (i, m) in config.modules.iter().enumerate() {
            let sub_block_size = config
                .modules
                .iter()
                .filter(|up| up.low_modules.iter().any(|l| *l == m.name))
                .map(|up| up.block_size)
                .min()
                .unwrap_or(m.block_size);
            let high = m.high_network.as_deref().and_then(|n| net_index.get(n).copied());
            let high_nodes = high.map_or(0, |n| networks[n.0].nodes().len());

            let id = ModuleId(i);
            let mut module = Module::new(id, m, sub_block_size, high_nodes);
            let attach = |net: Option<NetId>| {
                net.and_then(|net| {
                    networks[net.0]
                        .node_of(id)
                        .map(|node| Attachment { net, node })
                })
            };
            module.high = attach(high);
            module.low = attach(m.low_network.as_deref().and_then(|n| net_index.get(n).copied()));
            module.low_modules = m
                .low_modules
                .iter()
                .filter_map(|l| mod_index.get(l.as_str()).copied())
                .collect();
            modules.push(module);
        }

        tracing::info!(
            modules = modules.len(),
            networks = networks.len(),
            "memory system built"
        );
        Ok(Self {
            events: EventQueue::new(),
            stacks: Arena::new(),
            modules,
            networks,
            completions: Vec::new(),
            next_access: 0,
            in_flight: 0,
            loads: 0,
            stores: 0,
        })
    }

    /// Looks up a module by name.
    pub fn module_id(&self, name: &str) -> Option<ModuleId> {
        self.modules.iter().find(|m| m.name == name).map(|m| m.id)
    }

    /// Returns a module.
    ///
    /// # Panics
    ///
    /// If `id` does not come from this system.
    #[inline]
    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.0]
    }

    /// Returns every module in configuration order.
    #[inline]
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// Returns a network.
    ///
    /// # Panics
    ///
    /// If `id` does not come from this system.
    #[inline]
    pub fn network(&self, id: NetId) -> &Network {
        &self.networks[id.0]
    }

    /// Returns every network in configuration order.
    #[inline]
    pub fn networks(&self) -> &[Network] {
        &self.networks
    }

    /// Current cycle.
    #[inline]
    pub const fn cycle(&self) -> u64 {
        self.events.now()
    }

    /// Issues a top-level access at the current cycle.
    pub fn access(&mut self, module: ModuleId, kind: AccessKind, addr: u64) -> AccessId {
        self.access_after(module, kind, addr, 0)
    }

    /// Issues a top-level access `delay` cycles from now.
    ///
    /// # Returns
    ///
    /// The identity reported back in its [`Completion`].
    pub fn access_after(&mut self, module: ModuleId, kind: AccessKind, addr: u64, delay: u64) -> AccessId {
        self.next_access += 1;
        let id = AccessId(self.next_access);
        let stack = self.stacks.create(Frame::new(id, module, addr, None));
        let event = match kind {
            AccessKind::Load => Event::Load(LoadStage::Start),
            AccessKind::Store => Event::Store(StoreStage::Start),
        };
        self.in_flight += 1;
        tracing::debug!(access = %id, module = %self.modules[module.0].name, ?kind, addr = format_args!("{addr:#x}"), delay, "access issued");
        self.schedule(event, stack, delay);
        id
    }

    /// Runs every event due this cycle, then advances the clock by one.
    ///
    /// # Errors
    ///
    /// The first protocol error raised by a stage; the system is not usable
    /// afterwards.
    pub fn step(&mut self) -> Result<(), ProtocolError> {
        while let Some(item) = self.events.pop_due() {
            self.dispatch(item)?;
        }
        let next = self.events.now() + 1;
        self.events.advance_to(next);
        Ok(())
    }

    /// Runs until no events remain, skipping cycles with nothing scheduled.
    ///
    /// # Returns
    ///
    /// The number of cycles that elapsed.
    ///
    /// # Errors
    ///
    /// `Timeout` after `max_cycles` cycles with work left, or the protocol
    /// error that stopped the run.
    pub fn run_until_idle(&mut self, max_cycles: u64) -> Result<u64, SimError> {
        let start = self.cycle();
        loop {
            let Some(next) = self.events.next_time() else {
                if self.in_flight > 0 {
                    return Err(ProtocolError::violation(
                        "system",
                        0,
                        "run",
                        format!("{} accesses stalled with no pending events", self.in_flight),
                    )
                    .into());
                }
                return Ok(self.cycle() - start);
            };
            if next > self.cycle() {
                self.events.advance_to(next);
            }
            if self.cycle() - start >= max_cycles {
                return Err(SimError::Timeout {
                    cycles: max_cycles,
                    in_flight: self.in_flight,
                });
            }
            self.step()?;
        }
    }

    /// Returns true when no event is pending.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.events.is_empty()
    }

    /// Top-level accesses not yet completed.
    #[inline]
    pub const fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Completed accesses, in completion order.
    #[inline]
    pub fn completions(&self) -> &[Completion] {
        &self.completions
    }

    /// Drains the completed accesses.
    pub fn take_completions(&mut self) -> Vec<Completion> {
        std::mem::take(&mut self.completions)
    }

    pub(crate) fn record_completion(&mut self, frame: &Frame) {
        let completion = Completion {
            access: frame.id,
            module: frame.module,
            kind: frame.kind,
            addr: frame.addr,
            tag: frame.tag,
            state: frame.state,
            issued: frame.start_cycle,
            finished: self.events.now(),
            coalesced: frame.master.is_some(),
        };
        match completion.kind {
            AccessKind::Load => self.loads += 1,
            AccessKind::Store => self.stores += 1,
        }
        self.in_flight = self.in_flight.saturating_sub(1);
        tracing::debug!(
            access = %completion.access,
            module = %self.modules[completion.module.0].name,
            state = %completion.state,
            latency = completion.latency(),
            "access finished"
        );
        self.completions.push(completion);
    }

    /// State of the block holding `addr` at `module` (Invalid if absent).
    pub fn block_state(&self, module: ModuleId, addr: u64) -> BlockState {
        self.modules[module.0].cache.find_block(addr).state
    }

    /// Directory entry of the sub-block holding `addr` at `module`.
    pub fn directory_entry(&self, module: ModuleId, addr: u64) -> Option<DirEntry> {
        let m = &self.modules[module.0];
        let probe = m.cache.find_block(addr);
        if !probe.hit {
            return None;
        }
        let z = ((addr - probe.tag) / m.sub_block_size) as usize;
        Some(m.dir.entry(probe.set, probe.way, z).clone())
    }

    /// Frame holding the directory lock of the way that holds (or is being
    /// filled with) `addr` at `module`.
    pub fn lock_holder(&self, module: ModuleId, addr: u64) -> Option<StackId> {
        let m = &self.modules[module.0];
        let probe = m.cache.find_block(addr);
        let way = if probe.hit {
            probe.way
        } else {
            m.cache.transient_way(probe.set, probe.tag)?
        };
        m.dir.lock_of(probe.set, way).holder()
    }

    /// Checks the coherence invariants over the whole hierarchy.
    ///
    /// # Errors
    ///
    /// The first violated invariant.
    pub fn check_invariants(&self) -> Result<(), ProtocolError> {
        for m in &self.modules {
            self.check_directory(m)?;
        }
        self.check_single_writer()
    }

    fn check_directory(&self, m: &Module) -> ProtocolResult<()> {
        let stage = "check invariants";
        for (set, way, block) in m.cache.blocks() {
            if !block.state.is_valid() && m.dir.is_shared_or_owned(set, way) {
                return Err(ProtocolError::violation(&m.name, block.tag, stage, "invalid block has sharers"));
            }
            for z in 0..m.dir.subblocks() {
                let entry = m.dir.entry(set, way, z);
                if let Some(owner) = entry.owner() {
                    if !entry.is_sharer(owner) {
                        return Err(ProtocolError::violation(
                            &m.name,
                            block.tag,
                            stage,
                            format!("owner node {} is not a sharer", owner.0),
                        ));
                    }
                }
            }
        }
        for (set, way, lock) in m.dir.locks() {
            let waiters: Vec<StackId> = lock.waiters().collect();
            if !waiters.is_empty() && lock.holder().is_none() {
                return Err(ProtocolError::violation(
                    &m.name,
                    0,
                    stage,
                    format!("lock ({set}, {way}) has waiters but no holder"),
                ));
            }
            let mut seen: Vec<StackId> = lock.holder().into_iter().chain(waiters).collect();
            let total = seen.len();
            seen.sort_unstable();
            seen.dedup();
            if seen.len() != total {
                return Err(ProtocolError::violation(
                    &m.name,
                    0,
                    stage,
                    format!("lock ({set}, {way}) lists a frame twice"),
                ));
            }
        }
        Ok(())
    }

    /// Returns true if `upper` reaches `lower` through low-module links.
    fn is_above(&self, upper: ModuleId, lower: ModuleId) -> bool {
        let mut stack = vec![upper];
        while let Some(m) = stack.pop() {
            if m == lower {
                return true;
            }
            stack.extend(self.modules[m.0].low_modules.iter().copied());
        }
        false
    }

    fn check_single_writer(&self) -> ProtocolResult<()> {
        struct Held {
            module: ModuleId,
            start: u64,
            end: u64,
            state: BlockState,
        }
        let copies: Vec<Held> = self
            .modules
            .iter()
            .flat_map(|m| {
                let size = m.block_size();
                m.cache
                    .blocks()
                    .filter(|(_, _, b)| b.state.is_valid())
                    .map(move |(_, _, b)| Held {
                        module: m.id,
                        start: b.tag,
                        end: b.tag + size,
                        state: b.state,
                    })
            })
            .collect();

        for a in copies.iter().filter(|c| c.state.is_exclusive()) {
            for b in &copies {
                let overlap = a.start < b.end && b.start < a.end;
                if !overlap || std::ptr::eq(a, b) {
                    continue;
                }
                let related = a.module != b.module
                    && (self.is_above(a.module, b.module) || self.is_above(b.module, a.module));
                if !related {
                    return Err(ProtocolError::violation(
                        &self.modules[a.module.0].name,
                        a.start,
                        "check invariants",
                        format!(
                            "{} copy conflicts with {} copy at {}",
                            a.state, b.state, self.modules[b.module.0].name
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Snapshot of every counter.
    pub fn stats(&self) -> SimStats {
        SimStats {
            cycles: self.cycle(),
            completed: self.loads + self.stores,
            loads: self.loads,
            stores: self.stores,
            modules: self
                .modules
                .iter()
                .map(|m| (m.name.clone(), m.stats.clone()))
                .collect(),
            networks: self
                .networks
                .iter()
                .map(|n| (n.name.clone(), n.stats.clone()))
                .collect(),
        }
    }

    /// Geometry of a module's cache.
    #[inline]
    pub fn geometry(&self, module: ModuleId) -> Geometry {
        self.modules[module.0].cache.geometry()
    }
}

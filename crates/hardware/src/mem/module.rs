//! Memory module (a cache level or main memory).
//!
//! A module bundles the per-level state the protocol engine works on:
//! 1. **Storage:** The cache store and its directory.
//! 2. **Ports:** A fixed number of lookup ports, handed out FIFO.
//! 3. **Access list:** Top-level accesses in flight here, oldest first, used for
//!    coalescing and per-block ordering.
//! 4. **Wiring:** Attachments to the high and low networks and the low modules
//!    reachable through the low network.

use std::collections::VecDeque;

use super::cache::{BlockState, CacheStore, Probe};
use super::directory::Directory;
use crate::common::{ModuleId, NetId, NodeId};
use crate::config::{AddressRange, ModuleConfig, ModuleKind};
use crate::protocol::Scheduled;
use crate::sim::{EventQueue, StackId};
use crate::stats::ModuleStats;

/// Where a module is attached on one network.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attachment {
    /// Network.
    pub net: NetId,
    /// End node of the module on that network.
    pub node: NodeId,
}

/// One level of the hierarchy.
#[derive(Debug)]
pub struct Module {
    /// Index in the system's module table.
    pub id: ModuleId,
    /// Configured name.
    pub name: String,
    /// Cache or main memory.
    pub kind: ModuleKind,
    /// Tag/state array.
    pub cache: CacheStore,
    /// Sharer/owner directory and frame locks.
    pub dir: Directory,
    /// Granularity of directory entries in bytes.
    pub sub_block_size: u64,
    /// Lookup latency in cycles.
    pub latency: u64,
    /// Delay before a Load/Store retries after a lock conflict.
    pub retry_latency: u64,
    /// Addresses this module serves.
    pub range: AddressRange,
    /// Attachment toward upper modules.
    pub high: Option<Attachment>,
    /// Attachment toward lower modules.
    pub low: Option<Attachment>,
    /// Modules directly below, in configuration order.
    pub low_modules: Vec<ModuleId>,
    ports: Vec<Option<StackId>>,
    port_waiters: VecDeque<Scheduled>,
    accesses: Vec<StackId>,
    /// Counters.
    pub stats: ModuleStats,
}

impl Module {
    /// Builds a module from its configuration.
    ///
    /// Wiring (`high`, `low`, `low_modules`) is filled in by the system builder.
    ///
    /// # Arguments
    ///
    /// * `id` - Index in the system's module table.
    /// * `config` - Validated module configuration.
    /// * `sub_block_size` - Smallest block size among the modules directly above.
    /// * `high_nodes` - Node count of the high network (0 without one).
    pub fn new(id: ModuleId, config: &ModuleConfig, sub_block_size: u64, high_nodes: usize) -> Self {
        let geometry = crate::common::Geometry::new(config.sets, config.assoc, config.block_size);
        let sub_block_size = sub_block_size.clamp(1, config.block_size);
        Self {
            id,
            name: config.name.clone(),
            kind: config.kind,
            cache: CacheStore::new(geometry, config.policy, 0x5EED ^ ((id.0 as u64 + 1) << 17)),
            dir: Directory::new(
                config.sets,
                config.assoc,
                (config.block_size / sub_block_size) as usize,
                high_nodes,
            ),
            sub_block_size,
            latency: config.latency,
            retry_latency: config.retry_latency,
            range: config.range,
            high: None,
            low: None,
            low_modules: Vec::new(),
            ports: vec![None; config.num_ports.max(1)],
            port_waiters: VecDeque::new(),
            accesses: Vec::new(),
            stats: ModuleStats::default(),
        }
    }

    /// Block size in bytes.
    #[inline]
    pub const fn block_size(&self) -> u64 {
        self.cache.geometry().block_size
    }

    /// Returns true for main memory.
    #[inline]
    pub fn is_main_memory(&self) -> bool {
        self.kind == ModuleKind::MainMemory
    }

    /// Looks up `addr` on behalf of `requester`, including ways that are being
    /// filled with it.
    ///
    /// A way whose transient tag matches counts as a hit with state Invalid,
    /// but only while another frame holds its directory lock.
    pub fn find_block(&self, addr: u64, requester: StackId) -> Probe {
        let probe = self.cache.find_block(addr);
        if probe.hit {
            return probe;
        }
        let filling = |way: usize| {
            self.dir
                .lock_of(probe.set, way)
                .holder()
                .is_some_and(|h| h != requester)
        };
        match self.cache.transient_way(probe.set, probe.tag) {
            Some(way) if filling(way) => Probe {
                hit: true,
                way,
                state: BlockState::Invalid,
                ..probe
            },
            _ => probe,
        }
    }

    /// Requests a lookup port for `waiter.stack`.
    ///
    /// # Returns
    ///
    /// The port index if one was free; otherwise the request is queued and
    /// `waiter` runs when a port is handed over.
    pub fn lock_port(&mut self, waiter: Scheduled) -> Option<usize> {
        if let Some(i) = self.ports.iter().position(Option::is_none) {
            self.ports[i] = Some(waiter.stack);
            return Some(i);
        }
        self.port_waiters.push_back(waiter);
        None
    }

    /// Releases a port, handing it to the oldest waiter if there is one.
    ///
    /// # Returns
    ///
    /// The waiter that received the port and the port index.
    pub fn unlock_port(&mut self, port: usize, events: &mut EventQueue<Scheduled>) -> Option<(StackId, usize)> {
        let slot = self.ports.get_mut(port)?;
        match self.port_waiters.pop_front() {
            Some(next) => {
                *slot = Some(next.stack);
                events.schedule(next, 0);
                Some((next.stack, port))
            }
            None => {
                *slot = None;
                None
            }
        }
    }

    /// Ports currently in use.
    pub fn ports_in_use(&self) -> usize {
        self.ports.iter().filter(|p| p.is_some()).count()
    }

    /// Port index held by `stack`, if any.
    pub fn port_of(&self, stack: StackId) -> Option<usize> {
        self.ports.iter().position(|p| *p == Some(stack))
    }

    /// In-flight top-level accesses, oldest first.
    #[inline]
    pub fn accesses(&self) -> &[StackId] {
        &self.accesses
    }

    pub(crate) fn access_start(&mut self, stack: StackId) {
        self.accesses.push(stack);
    }

    pub(crate) fn access_finish(&mut self, stack: StackId) {
        self.accesses.retain(|&s| s != stack);
    }
}

use memsys_core::System;
use memsys_core::common::{AccessId, AccessKind, ModuleId};
use memsys_core::config::{Config, ModuleConfig, ModuleKind, NetworkConfig};
use memsys_core::interconnect::{MessageKind, MessageRecord};
use memsys_core::mem::{BlockState, DirEntry};
use memsys_core::sim::Completion;
use memsys_core::stats::ModuleStats;
use tracing_subscriber::EnvFilter;

/// Cycle limit for draining a test hierarchy.
pub const MAX_CYCLES: u64 = 200_000;

/// Installs a test-writer subscriber once; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A cache named `name` with its low side on `low_net`, served by `low`; latency 2.
pub fn cache(name: &str, sets: usize, assoc: usize, low_net: &str, low: &str) -> ModuleConfig {
    ModuleConfig {
        name: name.to_owned(),
        sets,
        assoc,
        latency: 2,
        low_network: Some(low_net.to_owned()),
        low_modules: vec![low.to_owned()],
        ..ModuleConfig::default()
    }
}

/// Main memory on `high_net`, large enough that test address ranges never evict from it.
pub fn memory(name: &str, high_net: &str) -> ModuleConfig {
    ModuleConfig {
        name: name.to_owned(),
        kind: ModuleKind::MainMemory,
        sets: 64,
        assoc: 8,
        latency: 10,
        high_network: Some(high_net.to_owned()),
        ..ModuleConfig::default()
    }
}

/// `cores` private L1s (`l1-0`, `l1-1`, ...) over a shared L2 over memory.
///
/// L1s are `l1_sets` x `l1_assoc`, the L2 is `l2_sets` x `l2_assoc`; every
/// block is 64 bytes and every message is recorded.
pub fn two_level_with(cores: usize, l1_sets: usize, l1_assoc: usize, l2_sets: usize, l2_assoc: usize) -> Config {
    let mut modules: Vec<ModuleConfig> = (0..cores)
        .map(|i| cache(&format!("l1-{i}"), l1_sets, l1_assoc, "net-l1-l2", "l2"))
        .collect();
    let mut l2 = cache("l2", l2_sets, l2_assoc, "net-l2-mem", "mem");
    l2.latency = 4;
    l2.high_network = Some("net-l1-l2".to_owned());
    modules.push(l2);
    modules.push(memory("mem", "net-l2-mem"));
    Config {
        networks: vec![NetworkConfig::named("net-l1-l2"), NetworkConfig::named("net-l2-mem")],
        modules,
        record_messages: true,
    }
}

/// Two-level hierarchy with roomy caches.
pub fn two_level(cores: usize) -> Config {
    two_level_with(cores, 4, 2, 16, 4)
}

/// Four L1s in pairs under `l2-0` and `l2-1`, a shared `l3`, then memory.
///
/// `l1` and `l2` are (sets, assoc); `blocks` are the L1, L2 and L3/memory
/// block sizes. Every message is recorded.
pub fn three_level_with(l1: (usize, usize), l2: (usize, usize), blocks: [u64; 3]) -> Config {
    let mut modules = Vec::new();
    for i in 0..4 {
        let parent = i / 2;
        let mut m = cache(&format!("l1-{i}"), l1.0, l1.1, &format!("net-l1-l2-{parent}"), &format!("l2-{parent}"));
        m.block_size = blocks[0];
        modules.push(m);
    }
    for i in 0..2 {
        let mut m = cache(&format!("l2-{i}"), l2.0, l2.1, "net-l2-l3", "l3");
        m.latency = 4;
        m.block_size = blocks[1];
        m.high_network = Some(format!("net-l1-l2-{i}"));
        modules.push(m);
    }
    let mut l3 = cache("l3", 16, 4, "net-l3-mem", "mem");
    l3.latency = 8;
    l3.block_size = blocks[2];
    l3.high_network = Some("net-l2-l3".to_owned());
    modules.push(l3);
    let mut mem = memory("mem", "net-l3-mem");
    mem.block_size = blocks[2];
    modules.push(mem);
    Config {
        networks: ["net-l1-l2-0", "net-l1-l2-1", "net-l2-l3", "net-l3-mem"]
            .into_iter()
            .map(NetworkConfig::named)
            .collect(),
        modules,
        record_messages: true,
    }
}

/// Three-level hierarchy with 64-byte blocks everywhere.
pub fn three_level() -> Config {
    three_level_with((4, 2), (8, 2), [64, 64, 64])
}

/// Shrinks every network to `buffer_size` bytes per input buffer and
/// `bandwidth` bytes per cycle.
pub fn congested(mut config: Config, buffer_size: u64, bandwidth: u64) -> Config {
    for net in &mut config.networks {
        net.buffer_size = buffer_size;
        net.bandwidth = bandwidth;
    }
    config
}

/// Gives every module a single lookup port.
pub fn single_ported(mut config: Config) -> Config {
    for m in &mut config.modules {
        m.num_ports = 1;
    }
    config
}

/// Drives a `System` built from a test configuration.
#[derive(Debug)]
pub struct TestContext {
    pub sys: System,
}

impl TestContext {
    /// Builds the system, panicking on an invalid configuration.
    pub fn new(config: &Config) -> Self {
        init_tracing();
        Self {
            sys: System::new(config).unwrap(),
        }
    }

    /// Module id by name.
    pub fn id(&self, name: &str) -> ModuleId {
        self.sys
            .module_id(name)
            .unwrap_or_else(|| panic!("no module named {name}"))
    }

    /// Issues an access at the current cycle without running it.
    pub fn issue(&mut self, name: &str, kind: AccessKind, addr: u64) -> AccessId {
        let id = self.id(name);
        self.sys.access(id, kind, addr)
    }

    /// Issues an access `delay` cycles from now without running it.
    pub fn issue_after(&mut self, name: &str, kind: AccessKind, addr: u64, delay: u64) -> AccessId {
        let id = self.id(name);
        self.sys.access_after(id, kind, addr, delay)
    }

    /// Runs to idle and returns the elapsed cycles.
    pub fn drain(&mut self) -> u64 {
        let cycles = self.sys.run_until_idle(MAX_CYCLES).unwrap();
        self.sys.check_invariants().unwrap();
        cycles
    }

    /// Runs to idle one cycle at a time, checking invariants after every cycle.
    pub fn drain_checked(&mut self) {
        let start = self.sys.cycle();
        while !self.sys.is_idle() {
            assert!(self.sys.cycle() - start < MAX_CYCLES, "hierarchy did not drain");
            self.sys.step().unwrap();
            if let Err(e) = self.sys.check_invariants() {
                panic!("cycle {}: {e}", self.sys.cycle());
            }
        }
        assert_eq!(self.sys.in_flight(), 0, "accesses stalled");
    }

    /// Runs one access to completion and returns its completion record.
    pub fn run(&mut self, name: &str, kind: AccessKind, addr: u64) -> Completion {
        let access = self.issue(name, kind, addr);
        let _ = self.drain();
        self.completion(access)
    }

    /// Runs one load to completion.
    pub fn load(&mut self, name: &str, addr: u64) -> Completion {
        self.run(name, AccessKind::Load, addr)
    }

    /// Runs one store to completion.
    pub fn store(&mut self, name: &str, addr: u64) -> Completion {
        self.run(name, AccessKind::Store, addr)
    }

    /// The single completion record of `access`.
    pub fn completion(&self, access: AccessId) -> Completion {
        let mut found = self.sys.completions().iter().filter(|c| c.access == access);
        let first = *found.next().unwrap_or_else(|| panic!("{access} did not complete"));
        assert!(found.next().is_none(), "{access} completed twice");
        first
    }

    /// State of the block holding `addr` at `name`.
    pub fn state(&self, name: &str, addr: u64) -> BlockState {
        self.sys.block_state(self.id(name), addr)
    }

    /// Directory entry covering `addr` at `name`, if the block is cached.
    pub fn entry(&self, name: &str, addr: u64) -> Option<DirEntry> {
        self.sys.directory_entry(self.id(name), addr)
    }

    /// Names of the modules recorded as sharers of `addr` at `name`.
    pub fn sharers(&self, name: &str, addr: u64) -> Vec<String> {
        let Some(entry) = self.entry(name, addr) else {
            return Vec::new();
        };
        let high = self.sys.module(self.id(name)).high.unwrap();
        let net = self.sys.network(high.net);
        entry
            .sharers()
            .map(|n| net.node(n).unwrap().name.clone())
            .collect()
    }

    /// Name of the module recorded as owner of `addr` at `name`.
    pub fn owner(&self, name: &str, addr: u64) -> Option<String> {
        let owner = self.entry(name, addr)?.owner()?;
        let high = self.sys.module(self.id(name)).high?;
        self.sys.network(high.net).node(owner).map(|n| n.name.clone())
    }

    /// Counter snapshot of module `name`.
    pub fn stats(&self, name: &str) -> ModuleStats {
        self.sys.module(self.id(name)).stats.clone()
    }

    /// Messages sent on network `net`, oldest first.
    pub fn records(&self, net: &str) -> Vec<MessageRecord> {
        self.sys
            .networks()
            .iter()
            .find(|n| n.name == net)
            .unwrap_or_else(|| panic!("no network named {net}"))
            .records()
            .to_vec()
    }

    /// Messages of `kind` sent by `src` on network `net`.
    pub fn sent(&self, net: &str, src: &str, kind: MessageKind) -> Vec<MessageRecord> {
        let src = self.id(src);
        self.records(net)
            .into_iter()
            .filter(|r| r.src == src && r.kind == kind)
            .collect()
    }
}

//! Configuration system for the memory hierarchy.
//!
//! This module defines the configuration structures used to build a `System`. It provides:
//! 1. **Defaults:** Baseline geometry, latency and network constants.
//! 2. **Structures:** Networks, modules (caches and main memory) and their wiring.
//! 3. **Enums:** Module kind, replacement policy and address range selectors.
//! 4. **Validation:** Topology and geometry checks run once before a system is built.
//!
//! Configuration is supplied as JSON (`Config::from_json` / `Config::from_file`) or
//! built in code; `Config::default()` is a two-core, two-level hierarchy.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::common::ConfigError;

/// Default configuration constants for the memory system.
mod defaults {
    /// Default number of sets per module.
    pub const SETS: usize = 16;

    /// Default associativity.
    pub const ASSOC: usize = 2;

    /// Default block size in bytes.
    pub const BLOCK_SIZE: u64 = 64;

    /// Default lookup latency in cycles (port held for this long).
    pub const LATENCY: u64 = 2;

    /// Default delay before a Load/Store retries after a lock conflict.
    pub const RETRY_LATENCY: u64 = 4;

    /// Default number of lookup ports per module.
    pub const NUM_PORTS: usize = 2;

    /// Default network hop latency in cycles.
    pub const NET_LATENCY: u64 = 2;

    /// Default link bandwidth in bytes per cycle.
    pub const NET_BANDWIDTH: u64 = 64;

    /// Default input buffer per network node in bytes.
    pub const NET_BUFFER_SIZE: u64 = 1024;

    /// Control message size in bytes; data messages add one block.
    pub const CONTROL_MESSAGE_SIZE: u64 = 8;
}

pub use defaults::CONTROL_MESSAGE_SIZE;

/// Kind of a module in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModuleKind {
    /// A cache level; needs at least one low module.
    #[default]
    #[serde(alias = "Cache", alias = "cache")]
    Cache,
    /// The backing store; bottom of the hierarchy.
    ///
    /// Modeled with the same set/way directory as a cache; a directory miss
    /// simply fills the way as Exclusive.
    #[serde(alias = "MainMemory", alias = "memory")]
    MainMemory,
}

/// Cache replacement policy algorithms.
///
/// Parsed from its name so that an unknown name is reported as a
/// `ConfigError::UnknownPolicy` rather than a generic JSON error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum ReplacementPolicy {
    /// Least Recently Used.
    #[default]
    Lru,
    /// Pseudo-LRU (one recently-used bit per way).
    Plru,
    /// First In First Out (by fill order).
    Fifo,
    /// Random selection.
    Random,
}

impl FromStr for ReplacementPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LRU" => Ok(Self::Lru),
            "PLRU" => Ok(Self::Plru),
            "FIFO" => Ok(Self::Fifo),
            "RANDOM" => Ok(Self::Random),
            _ => Err(ConfigError::UnknownPolicy(s.to_owned())),
        }
    }
}

impl TryFrom<String> for ReplacementPolicy {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for ReplacementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lru => "LRU",
            Self::Plru => "PLRU",
            Self::Fifo => "FIFO",
            Self::Random => "RANDOM",
        })
    }
}

/// Address range served by a module, used to pick among several low modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum AddressRange {
    /// Every address.
    #[default]
    All,
    /// Addresses in `[low, high]`.
    Bounds {
        /// First address served
        low: u64,
        /// Last address served (inclusive)
        high: u64,
    },
    /// Addresses with `(addr / div) % modulo == eq`.
    Interleaved {
        /// Number of interleaved banks
        modulo: u64,
        /// Interleaving granularity in bytes
        div: u64,
        /// Bank selector value
        eq: u64,
    },
}

impl AddressRange {
    /// Returns true if `addr` is served by this range.
    pub const fn contains(&self, addr: u64) -> bool {
        match *self {
            Self::All => true,
            Self::Bounds { low, high } => addr >= low && addr <= high,
            Self::Interleaved { modulo, div, eq } => (addr / div) % modulo == eq,
        }
    }
}

/// Root configuration: networks, modules and global switches.
///
/// # Example
///
/// ```
/// use memsys_core::config::{Config, ModuleKind};
///
/// let json = r#"{
///     "networks": [ { "name": "net-l1-mem" } ],
///     "modules": [
///         { "name": "l1", "kind": "CACHE", "sets": 4, "assoc": 2,
///           "low_network": "net-l1-mem", "low_modules": ["mem"] },
///         { "name": "mem", "kind": "MAIN_MEMORY", "sets": 64, "assoc": 8,
///           "high_network": "net-l1-mem", "latency": 20 }
///     ]
/// }"#;
///
/// let config = Config::from_json(json).unwrap();
/// assert_eq!(config.modules[1].kind, ModuleKind::MainMemory);
/// assert_eq!(config.modules[0].block_size, 64);
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Interconnect networks
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
    /// Caches and main memories
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
    /// Keep a per-network log of every message sent
    #[serde(default)]
    pub record_messages: bool,
}

impl Default for Config {
    fn default() -> Self {
        let l1 = |name: &str| ModuleConfig {
            name: name.to_owned(),
            sets: 64,
            assoc: 4,
            low_network: Some("net-l1-l2".to_owned()),
            low_modules: vec!["l2".to_owned()],
            ..ModuleConfig::default()
        };
        Self {
            networks: vec![
                NetworkConfig::named("net-l1-l2"),
                NetworkConfig::named("net-l2-mem"),
            ],
            modules: vec![
                l1("l1-0"),
                l1("l1-1"),
                ModuleConfig {
                    name: "l2".to_owned(),
                    sets: 256,
                    assoc: 8,
                    latency: 10,
                    high_network: Some("net-l1-l2".to_owned()),
                    low_network: Some("net-l2-mem".to_owned()),
                    low_modules: vec!["mem".to_owned()],
                    ..ModuleConfig::default()
                },
                ModuleConfig {
                    name: "mem".to_owned(),
                    kind: ModuleKind::MainMemory,
                    sets: 1024,
                    assoc: 16,
                    latency: 100,
                    high_network: Some("net-l2-mem".to_owned()),
                    ..ModuleConfig::default()
                },
            ],
            record_messages: false,
        }
    }
}

/// Network parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Network name referenced by modules
    pub name: String,
    /// Fixed hop latency in cycles
    #[serde(default = "NetworkConfig::default_latency")]
    pub latency: u64,
    /// Link bandwidth in bytes per cycle
    #[serde(default = "NetworkConfig::default_bandwidth")]
    pub bandwidth: u64,
    /// Input buffer capacity per node in bytes
    #[serde(default = "NetworkConfig::default_buffer_size")]
    pub buffer_size: u64,
}

impl NetworkConfig {
    /// Returns a network with default parameters and the given name.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Self::default()
        }
    }

    fn default_latency() -> u64 {
        defaults::NET_LATENCY
    }

    fn default_bandwidth() -> u64 {
        defaults::NET_BANDWIDTH
    }

    fn default_buffer_size() -> u64 {
        defaults::NET_BUFFER_SIZE
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            latency: defaults::NET_LATENCY,
            bandwidth: defaults::NET_BANDWIDTH,
            buffer_size: defaults::NET_BUFFER_SIZE,
        }
    }
}

/// Module (cache or main memory) parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleConfig {
    /// Module name used by traces and `low_modules` references
    pub name: String,
    /// Cache or main memory
    #[serde(default)]
    pub kind: ModuleKind,
    /// Number of sets (power of two)
    #[serde(default = "ModuleConfig::default_sets")]
    pub sets: usize,
    /// Associativity
    #[serde(default = "ModuleConfig::default_assoc")]
    pub assoc: usize,
    /// Block size in bytes (power of two)
    #[serde(default = "ModuleConfig::default_block_size")]
    pub block_size: u64,
    /// Lookup latency in cycles
    #[serde(default = "ModuleConfig::default_latency")]
    pub latency: u64,
    /// Delay before a Load/Store retries after a lock conflict
    #[serde(default = "ModuleConfig::default_retry_latency")]
    pub retry_latency: u64,
    /// Number of lookup ports
    #[serde(default = "ModuleConfig::default_num_ports")]
    pub num_ports: usize,
    /// Replacement policy name
    #[serde(default)]
    pub policy: ReplacementPolicy,
    /// Network toward upper (requester-side) modules
    #[serde(default)]
    pub high_network: Option<String>,
    /// Network toward lower (memory-side) modules
    #[serde(default)]
    pub low_network: Option<String>,
    /// Modules directly below, selected by their address range
    #[serde(default)]
    pub low_modules: Vec<String>,
    /// Addresses served by this module
    #[serde(default)]
    pub range: AddressRange,
}

impl ModuleConfig {
    fn default_sets() -> usize {
        defaults::SETS
    }

    fn default_assoc() -> usize {
        defaults::ASSOC
    }

    fn default_block_size() -> u64 {
        defaults::BLOCK_SIZE
    }

    fn default_latency() -> u64 {
        defaults::LATENCY
    }

    fn default_retry_latency() -> u64 {
        defaults::RETRY_LATENCY
    }

    fn default_num_ports() -> usize {
        defaults::NUM_PORTS
    }
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: ModuleKind::Cache,
            sets: defaults::SETS,
            assoc: defaults::ASSOC,
            block_size: defaults::BLOCK_SIZE,
            latency: defaults::LATENCY,
            retry_latency: defaults::RETRY_LATENCY,
            num_ports: defaults::NUM_PORTS,
            policy: ReplacementPolicy::Lru,
            high_network: None,
            low_network: None,
            low_modules: Vec::new(),
            range: AddressRange::All,
        }
    }
}

impl Config {
    /// Parses a configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads and parses a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Returns the module configuration with the given name.
    pub fn module(&self, name: &str) -> Option<&ModuleConfig> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Checks geometry, references, block-size growth, network capacity and acyclicity.
    ///
    /// # Returns
    ///
    /// `Ok(())` if a `System` can be built from this configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let networks = unique_names("network", self.networks.iter().map(|n| n.name.as_str()))?;
        let modules = unique_names("module", self.modules.iter().map(|m| m.name.as_str()))?;

        for net in &self.networks {
            if net.bandwidth == 0 {
                return Err(ConfigError::network(&net.name, "bandwidth must be non-zero"));
            }
        }

        for m in &self.modules {
            validate_geometry(m)?;

            for net in [&m.high_network, &m.low_network].into_iter().flatten() {
                if !networks.contains_key(net.as_str()) {
                    return Err(ConfigError::UnknownNetwork {
                        name: net.clone(),
                        referenced_by: m.name.clone(),
                    });
                }
            }

            match m.kind {
                ModuleKind::Cache if m.low_modules.is_empty() || m.low_network.is_none() => {
                    return Err(ConfigError::MissingLowModule {
                        module: m.name.clone(),
                    });
                }
                ModuleKind::MainMemory if !m.low_modules.is_empty() => {
                    return Err(ConfigError::MemoryHasLowModules {
                        module: m.name.clone(),
                    });
                }
                _ => {}
            }

            for low_name in &m.low_modules {
                let Some(&low_idx) = modules.get(low_name.as_str()) else {
                    return Err(ConfigError::UnknownModule {
                        name: low_name.clone(),
                        referenced_by: m.name.clone(),
                    });
                };
                let low = &self.modules[low_idx];
                if low.high_network.is_none() || low.high_network != m.low_network {
                    return Err(ConfigError::NetworkMismatch {
                        upper: m.name.clone(),
                        lower: low.name.clone(),
                        network: m.low_network.clone().unwrap_or_default(),
                    });
                }
                if low.block_size < m.block_size {
                    return Err(ConfigError::NonIncreasingBlockSize {
                        upper: m.name.clone(),
                        upper_size: m.block_size,
                        lower: low.name.clone(),
                        lower_size: low.block_size,
                    });
                }
            }
        }

        self.check_acyclic(&modules)?;
        self.check_buffers()
    }

    fn check_acyclic(&self, index: &HashMap<&str, usize>) -> Result<(), ConfigError> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        fn visit(
            config: &Config,
            index: &HashMap<&str, usize>,
            marks: &mut [Mark],
            node: usize,
        ) -> Result<(), ConfigError> {
            match marks[node] {
                Mark::Done => return Ok(()),
                Mark::Active => {
                    return Err(ConfigError::Cycle {
                        module: config.modules[node].name.clone(),
                    });
                }
                Mark::New => {}
            }
            marks[node] = Mark::Active;
            for low in &config.modules[node].low_modules {
                if let Some(&next) = index.get(low.as_str()) {
                    visit(config, index, marks, next)?;
                }
            }
            marks[node] = Mark::Done;
            Ok(())
        }

        let mut marks = vec![Mark::New; self.modules.len()];
        for node in 0..self.modules.len() {
            visit(self, index, &mut marks, node)?;
        }
        Ok(())
    }

    fn check_buffers(&self) -> Result<(), ConfigError> {
        for net in &self.networks {
            let largest = self
                .modules
                .iter()
                .filter(|m| {
                    m.high_network.as_deref() == Some(net.name.as_str())
                        || m.low_network.as_deref() == Some(net.name.as_str())
                })
                .map(|m| m.block_size + CONTROL_MESSAGE_SIZE)
                .max()
                .unwrap_or(CONTROL_MESSAGE_SIZE);
            if net.buffer_size < largest {
                return Err(ConfigError::network(
                    &net.name,
                    format!(
                        "buffer of {} B cannot hold a {largest} B message",
                        net.buffer_size
                    ),
                ));
            }
        }
        Ok(())
    }
}

fn unique_names<'a>(
    what: &'static str,
    names: impl Iterator<Item = &'a str>,
) -> Result<HashMap<&'a str, usize>, ConfigError> {
    let mut seen = HashMap::new();
    for (i, name) in names.enumerate() {
        if seen.insert(name, i).is_some() {
            return Err(ConfigError::DuplicateName {
                what,
                name: name.to_owned(),
            });
        }
    }
    Ok(seen)
}

fn validate_geometry(m: &ModuleConfig) -> Result<(), ConfigError> {
    if m.name.is_empty() {
        return Err(ConfigError::geometry("<unnamed>", "module name is empty"));
    }
    if m.sets == 0 || !m.sets.is_power_of_two() {
        return Err(ConfigError::geometry(&m.name, "sets must be a non-zero power of two"));
    }
    if m.assoc == 0 {
        return Err(ConfigError::geometry(&m.name, "assoc must be non-zero"));
    }
    if m.block_size < CONTROL_MESSAGE_SIZE || !m.block_size.is_power_of_two() {
        return Err(ConfigError::geometry(
            &m.name,
            "block_size must be a power of two of at least 8 bytes",
        ));
    }
    if m.num_ports == 0 {
        return Err(ConfigError::geometry(&m.name, "num_ports must be non-zero"));
    }
    match m.range {
        AddressRange::Bounds { low, high } if low > high => {
            Err(ConfigError::geometry(&m.name, "range low bound exceeds high bound"))
        }
        AddressRange::Interleaved { modulo, div, eq } if modulo == 0 || div == 0 || eq >= modulo => {
            Err(ConfigError::geometry(
                &m.name,
                "interleaved range needs modulo > 0, div > 0 and eq < modulo",
            ))
        }
        _ => Ok(()),
    }
}

/// Names of modules sharing one network, in the order nodes are attached.
///
/// Used by the system builder so that node indices (and therefore directory
/// sharer indices) are stable for a given configuration.
pub fn network_members<'a>(config: &'a Config, network: &str) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    let mut members = Vec::new();
    for m in &config.modules {
        let attached = m.low_network.as_deref() == Some(network)
            || m.high_network.as_deref() == Some(network);
        if attached && seen.insert(m.name.as_str()) {
            members.push(m.name.as_str());
        }
    }
    members
}

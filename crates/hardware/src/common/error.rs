//! Error types for the memory system.
//!
//! Three failure classes exist:
//! 1. **Configuration:** Rejected once at startup (`ConfigError`).
//! 2. **Lock contention:** A non-blocking directory acquisition found the entry held (`LockBusy`).
//!    Always recoverable; FindAndLock turns it into an error flag and Load/Store retry.
//! 3. **Protocol:** Broken coherence invariants (`ProtocolError`). Fatal; the run stops with
//!    the module, address and stage that observed the violation.

use std::path::PathBuf;
use thiserror::Error;

use crate::sim::arena::StackId;

/// Result type alias for fallible protocol steps.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors detected while validating or loading a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// JSON could not be parsed into a configuration.
    #[error("invalid configuration JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// Configuration file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// File that was opened
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Replacement policy name is not recognised.
    #[error("unknown replacement policy '{0}' (expected LRU, FIFO, RANDOM or PLRU)")]
    UnknownPolicy(String),

    /// Two modules or two networks share a name.
    #[error("duplicate {what} name '{name}'")]
    DuplicateName {
        /// "module" or "network"
        what: &'static str,
        /// Offending name
        name: String,
    },

    /// A module references a module that is not declared.
    #[error("module '{referenced_by}' references unknown module '{name}'")]
    UnknownModule {
        /// Missing module name
        name: String,
        /// Module holding the reference
        referenced_by: String,
    },

    /// A module references a network that is not declared.
    #[error("module '{referenced_by}' references unknown network '{name}'")]
    UnknownNetwork {
        /// Missing network name
        name: String,
        /// Module holding the reference
        referenced_by: String,
    },

    /// A cache was declared without anything below it.
    #[error("cache '{module}' has no low module or no low network")]
    MissingLowModule {
        /// Cache name
        module: String,
    },

    /// Main memory must be the bottom of the hierarchy.
    #[error("main memory '{module}' cannot have low modules")]
    MemoryHasLowModules {
        /// Memory module name
        module: String,
    },

    /// A low module is not attached where its upper module expects it.
    #[error("low module '{lower}' of '{upper}' is not attached to network '{network}' as its high network")]
    NetworkMismatch {
        /// Upper module
        upper: String,
        /// Lower module
        lower: String,
        /// Upper module's low network
        network: String,
    },

    /// Block sizes must not shrink walking toward main memory.
    #[error("block size shrinks from '{upper}' ({upper_size} B) to '{lower}' ({lower_size} B)")]
    NonIncreasingBlockSize {
        /// Upper module
        upper: String,
        /// Block size of the upper module
        upper_size: u64,
        /// Lower module
        lower: String,
        /// Block size of the lower module
        lower_size: u64,
    },

    /// A geometry parameter is zero or not a power of two.
    #[error("module '{module}': {reason}")]
    InvalidGeometry {
        /// Module name
        module: String,
        /// What is wrong
        reason: String,
    },

    /// A network cannot carry its largest message or has no bandwidth.
    #[error("network '{network}': {reason}")]
    InvalidNetwork {
        /// Network name
        network: String,
        /// What is wrong
        reason: String,
    },

    /// Low-module references form a loop.
    #[error("module hierarchy contains a cycle through '{module}'")]
    Cycle {
        /// A module on the cycle
        module: String,
    },
}

impl ConfigError {
    /// Create an invalid geometry error
    pub fn geometry(module: &str, reason: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            module: module.to_owned(),
            reason: reason.into(),
        }
    }

    /// Create an invalid network error
    pub fn network(network: &str, reason: impl Into<String>) -> Self {
        Self::InvalidNetwork {
            network: network.to_owned(),
            reason: reason.into(),
        }
    }
}

/// A non-blocking directory lock request found the entry held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("directory entry (set {set}, way {way}) is locked")]
pub struct LockBusy {
    /// Set of the contended entry
    pub set: usize,
    /// Way of the contended entry
    pub way: usize,
}

/// Fatal protocol failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A coherence invariant does not hold.
    #[error("protocol invariant violated at {module} addr {addr:#x} in {stage}: {detail}")]
    InvariantViolation {
        /// Module that observed the violation
        module: String,
        /// Address or tag involved
        addr: u64,
        /// Stage that was running
        stage: &'static str,
        /// Description of the broken invariant
        detail: String,
    },

    /// No low module serves an address.
    #[error("{module} has no low module serving addr {addr:#x}")]
    NoLowModule {
        /// Module searching below itself
        module: String,
        /// Address that was routed
        addr: u64,
    },

    /// A continuation handle no longer resolves to a live record.
    #[error("stale continuation {stack:?} in {stage}")]
    StaleStack {
        /// Handle that failed to resolve
        stack: StackId,
        /// Stage that was running
        stage: &'static str,
    },
}

impl ProtocolError {
    /// Create an invariant violation error
    pub fn violation(
        module: &str,
        addr: u64,
        stage: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        Self::InvariantViolation {
            module: module.to_owned(),
            addr,
            stage,
            detail: detail.into(),
        }
    }
}

/// Any error that stops a simulation run.
#[derive(Debug, Error)]
pub enum SimError {
    /// Startup configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The protocol engine hit an inconsistent state.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The run did not drain within its cycle limit.
    #[error("simulation still busy after {cycles} cycles ({in_flight} accesses in flight)")]
    Timeout {
        /// Cycle limit that was reached
        cycles: u64,
        /// Top-level accesses still running
        in_flight: usize,
    },
}

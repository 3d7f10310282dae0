//! Directory-based MOESI memory system simulator library.
//!
//! This crate models a multi-level cache hierarchy kept coherent by per-level
//! directories, driven by a cycle-ordered event queue:
//! 1. **Memory:** Cache stores, replacement policies, directories with frame locks, and modules.
//! 2. **Interconnect:** Networks with latency, bandwidth and bounded input buffers.
//! 3. **Protocol:** The Load, Store, FindAndLock, Evict, ReadRequest, WriteRequest,
//!    Invalidate and PeerTransfer state machines.
//! 4. **Simulation:** Continuation arena, event scheduler, and the `System` context.
//! 5. **Configuration and statistics:** JSON hierarchy descriptions and counter reports.

/// Common types (addresses, identifiers, errors).
pub mod common;
/// Hierarchy configuration (networks, modules, defaults, validation).
pub mod config;
/// Messaging between modules.
pub mod interconnect;
/// Caches, directories and modules.
pub mod mem;
/// Coherence protocol state machines.
pub mod protocol;
/// Arena, scheduler and the simulation context.
pub mod sim;
/// Simulation statistics collection and reporting.
pub mod stats;

/// Root configuration type; use `Config::default()` or deserialize from JSON.
pub use crate::config::Config;
/// Simulation context; construct with `System::new`.
pub use crate::sim::System;

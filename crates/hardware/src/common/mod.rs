//! Common types shared by every layer of the memory system.
//!
//! 1. **Addresses:** Tag/set/offset decomposition for a module's geometry.
//! 2. **Identifiers:** Module, network, node and access indices; access kinds.
//! 3. **Errors:** Configuration, lock contention and protocol failures.

/// Block address decomposition.
pub mod addr;

/// Identifiers and access kinds.
pub mod data;

/// Error types.
pub mod error;

pub use addr::Geometry;
pub use data::{AccessId, AccessKind, ModuleId, NetId, NodeId};
pub use error::{ConfigError, LockBusy, ProtocolError, SimError};

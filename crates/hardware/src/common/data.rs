//! Access classification and identifiers.
//!
//! This module defines the small value types passed between every layer of the
//! memory system:
//! 1. **Identifiers:** Indices for modules, networks, network nodes and top-level accesses.
//! 2. **Access kinds:** Whether a top-level access reads or writes its block.

use std::fmt;

/// Index of a module in the system's module table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub usize);

/// Index of a network in the system's network table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetId(pub usize);

/// Index of an end node inside one network.
///
/// Directories record upper-level sharers by the sharer's node index on the
/// directory owner's high network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Identity of one top-level access; shared by every continuation it spawns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccessId(pub u64);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mod{}", self.0)
    }
}

impl fmt::Display for AccessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A-{}", self.0)
    }
}

/// Kind of a top-level memory access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessKind {
    /// Read access; may share the block.
    Load,
    /// Write access; needs exclusive ownership of the block.
    Store,
}

impl AccessKind {
    /// Returns true for stores.
    #[inline]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Store)
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load => f.write_str("load"),
            Self::Store => f.write_str("store"),
        }
    }
}

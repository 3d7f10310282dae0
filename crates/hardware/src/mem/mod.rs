//! Memory hierarchy building blocks.
//!
//! 1. **Cache:** Tag/state arrays and replacement policies.
//! 2. **Directory:** Sharer/owner tracking and frame locks.
//! 3. **Module:** One hierarchy level tying the two together with ports and wiring.

/// Cache store and replacement policies.
pub mod cache;

/// Directory entries and locks.
pub mod directory;

/// Hierarchy level.
pub mod module;

pub use cache::{BlockState, CacheBlock, CacheStore, Probe};
pub use directory::{DirEntry, DirLock, Directory, LockOutcome};
pub use module::{Attachment, Module};

//! Simulation kernel.
//!
//! 1. **Arena:** Generational storage for continuation records.
//! 2. **Scheduler:** The cycle-ordered event queue.
//! 3. **System:** The simulation context that owns modules, networks and in-flight accesses.

/// Continuation arena with generational handles.
pub mod arena;

/// Time-ordered event queue.
pub mod scheduler;

/// Simulation context and run loop.
pub mod system;

pub use arena::{Arena, StackId};
pub use scheduler::EventQueue;
pub use system::{Completion, System};

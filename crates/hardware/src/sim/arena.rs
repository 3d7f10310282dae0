//! Continuation Arena.
//!
//! Free-list slot storage for in-flight continuation records:
//! 1. **O(1) create** pops a recycled slot or grows the backing vector.
//! 2. **O(1) destroy** pushes the slot onto the free list.
//! 3. **Generation checks** make a handle to a recycled slot resolve to nothing
//!    instead of to the new occupant.
//!
//! The arena knows nothing about the protocol; parent/child links are plain
//! `StackId` values stored inside the records themselves.

use std::fmt;

/// Stable handle to an arena slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StackId {
    index: u32,
    generation: u32,
}

impl StackId {
    /// Slot index (reused after destroy).
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation of the slot when the handle was issued.
    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for StackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}.{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Generational free-list arena.
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Stores `value` and returns its handle.
    pub fn create(&mut self, value: T) -> StackId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return StackId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        StackId {
            index,
            generation: 0,
        }
    }

    /// Removes the record behind `id`, returning it.
    ///
    /// Returns `None` for a stale or already destroyed handle.
    pub fn destroy(&mut self, id: StackId) -> Option<T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Some(value)
    }

    /// Returns the record behind `id` if the handle is live.
    #[inline]
    pub fn get(&self, id: StackId) -> Option<&T> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.value.as_ref())
    }

    /// Returns the record behind `id` mutably if the handle is live.
    #[inline]
    pub fn get_mut(&mut self, id: StackId) -> Option<&mut T> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.value.as_mut())
    }

    /// Returns true if `id` resolves to a live record.
    #[inline]
    pub fn contains(&self, id: StackId) -> bool {
        self.get(id).is_some()
    }

    /// Number of live records.
    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no record is live.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots ever allocated (live plus recyclable).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

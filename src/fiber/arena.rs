//! Fiber arena - slot allocation for fiber records.
//!
//! Manages the lifecycle of fiber handles:
//! - Stable `FiberId` handles into a slot vector
//! - Free slot pool for O(1) reuse
//! - Retain-style sweep for generation cleanup
//!
//! Handles are plain integers, so `alternate` back-references between the
//! two live generations carry no ownership: removing a record invalidates
//! its handle and any later lookup reports a dangling handle instead of
//! resurrecting freed state. Identity ids are a separate, never-reused
//! namespace owned by the session; arena slots are recycled freely.

use crate::error::EngineError;
use crate::fiber::Fiber;

// =============================================================================
// Handles
// =============================================================================

/// Stable handle to one fiber record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiberId(u32);

impl FiberId {
    /// Slot index backing this handle.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// =============================================================================
// Arena
// =============================================================================

/// Double-generation store of fiber records.
#[derive(Default)]
pub struct FiberArena {
    slots: Vec<Option<Fiber>>,
    free: Vec<u32>,
}

impl FiberArena {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, reusing a freed slot when available.
    pub fn insert(&mut self, fiber: Fiber) -> FiberId {
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(fiber);
                FiberId(index)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Some(fiber));
                FiberId(index)
            }
        }
    }

    /// Look up a record.
    pub fn get(&self, id: FiberId) -> Option<&Fiber> {
        self.slots.get(id.index())?.as_ref()
    }

    /// Look up a record mutably.
    pub fn get_mut(&mut self, id: FiberId) -> Option<&mut Fiber> {
        self.slots.get_mut(id.index())?.as_mut()
    }

    /// Look up a record, treating a freed slot as a tree-invariant fault.
    pub fn try_get(&self, id: FiberId) -> Result<&Fiber, EngineError> {
        self.get(id).ok_or(EngineError::DanglingHandle(id))
    }

    /// Mutable counterpart of [`FiberArena::try_get`].
    pub fn try_get_mut(&mut self, id: FiberId) -> Result<&mut Fiber, EngineError> {
        self.slots
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(EngineError::DanglingHandle(id))
    }

    /// Remove a record, returning its slot to the pool.
    pub fn remove(&mut self, id: FiberId) -> Option<Fiber> {
        let fiber = self.slots.get_mut(id.index())?.take()?;
        self.free.push(id.index() as u32);
        Some(fiber)
    }

    /// Check whether a handle is live.
    pub fn contains(&self, id: FiberId) -> bool {
        self.get(id).is_some()
    }

    /// Handles of all live records.
    pub fn ids(&self) -> Vec<FiberId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| FiberId(index as u32))
            .collect()
    }

    /// Count of live records.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// True when no records are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every record the predicate rejects.
    pub fn retain(&mut self, mut keep: impl FnMut(FiberId, &Fiber) -> bool) {
        for index in 0..self.slots.len() {
            let id = FiberId(index as u32);
            let drop_it = match &self.slots[index] {
                Some(fiber) => !keep(id, fiber),
                None => false,
            };
            if drop_it {
                self.slots[index] = None;
                self.free.push(index as u32);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

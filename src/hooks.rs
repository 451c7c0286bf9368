//! Hook/state manager - persistent value cells bound to fiber identity.
//!
//! One primitive: a persistent cell with a setter. Cells are addressed by
//! call order: the hook cursor starts at 0 on every component invocation and
//! advances once per cell, so the call order for a fiber position must be
//! stable across generations. Cell *i* of the new generation carries over
//! cell *i* of the alternate fiber when present, else takes the supplied
//! initial value.
//!
//! Cells are `Rc`-shared across generations by reuse rather than copied, so
//! a setter captured in any earlier generation still reaches the live cell.
//! Pending updates fold into the state, in call order, the next time the
//! cell is read.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::types::Value;

// =============================================================================
// Schedule signal
// =============================================================================

/// Shared flag a setter raises to request a fresh top-level render pass.
///
/// The session drains the flag after event dispatch and after each commit;
/// any number of setter calls before the next pass starts coalesce into one
/// request.
#[derive(Default)]
pub struct ScheduleSignal {
    requested: Cell<bool>,
}

impl ScheduleSignal {
    /// Raise the flag.
    pub fn request(&self) {
        self.requested.set(true);
    }

    /// Take the flag, clearing it.
    pub fn take(&self) -> bool {
        self.requested.replace(false)
    }
}

// =============================================================================
// Cells
// =============================================================================

/// A queued state update: either a replacement value or a pure transform of
/// the prior value.
#[derive(Clone)]
pub enum HookUpdate {
    Set(Value),
    Transform(Rc<dyn Fn(&Value) -> Value>),
}

/// One persistent state cell.
pub struct HookCell {
    state: Value,
    pending: Vec<HookUpdate>,
}

impl HookCell {
    fn new(initial: Value) -> Self {
        Self {
            state: initial,
            pending: Vec::new(),
        }
    }

    /// Fold queued updates into the state, in call order, and return the
    /// result.
    fn fold(&mut self) -> Value {
        for update in self.pending.drain(..) {
            self.state = match update {
                HookUpdate::Set(value) => value,
                HookUpdate::Transform(f) => f(&self.state),
            };
        }
        self.state.clone()
    }
}

/// Shared handle to one cell.
pub type HookSlot = Rc<RefCell<HookCell>>;

// =============================================================================
// Setter
// =============================================================================

/// Setter half of a state cell.
///
/// Queues an update and requests a brand-new top-level render pass. It never
/// re-renders the owning component alone.
#[derive(Clone)]
pub struct Setter {
    cell: HookSlot,
    signal: Rc<ScheduleSignal>,
}

impl Setter {
    /// Queue a replacement value.
    pub fn set(&self, value: impl Into<Value>) {
        self.cell
            .borrow_mut()
            .pending
            .push(HookUpdate::Set(value.into()));
        self.signal.request();
    }

    /// Queue a pure transform of the prior value.
    pub fn update(&self, f: impl Fn(&Value) -> Value + 'static) {
        self.cell
            .borrow_mut()
            .pending
            .push(HookUpdate::Transform(Rc::new(f)));
        self.signal.request();
    }
}

impl fmt::Debug for Setter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setter").finish_non_exhaustive()
    }
}

// =============================================================================
// Hook context
// =============================================================================

/// Render context threaded through every component invocation.
///
/// Carries the hook cursor explicitly - there is no ambient state, so any
/// number of sessions can render in one process.
pub struct HookCtx<'a> {
    prior: &'a [HookSlot],
    cells: Vec<HookSlot>,
    cursor: usize,
    signal: Rc<ScheduleSignal>,
    client_params: &'a Value,
}

impl<'a> HookCtx<'a> {
    /// Start a component invocation with the alternate fiber's cells (empty
    /// for a fresh placement).
    pub(crate) fn new(
        prior: &'a [HookSlot],
        signal: Rc<ScheduleSignal>,
        client_params: &'a Value,
    ) -> Self {
        Self {
            prior,
            cells: Vec::with_capacity(prior.len()),
            cursor: 0,
            signal,
            client_params,
        }
    }

    /// Read a persistent state cell, creating it on first render.
    ///
    /// Queued updates fold into the state before it is returned. Call order
    /// must be stable across renders of the same component position.
    pub fn use_state(&mut self, initial: impl Into<Value>) -> (Value, Setter) {
        let cell = match self.prior.get(self.cursor) {
            Some(prior) => Rc::clone(prior),
            None => Rc::new(RefCell::new(HookCell::new(initial.into()))),
        };
        self.cursor += 1;

        let state = cell.borrow_mut().fold();
        self.cells.push(Rc::clone(&cell));

        (
            state,
            Setter {
                cell,
                signal: Rc::clone(&self.signal),
            },
        )
    }

    /// Opaque client parameters from the most recent render request.
    pub fn client_params(&self) -> &Value {
        self.client_params
    }

    /// Finish the invocation, yielding the rebuilt cell list for the fiber.
    pub(crate) fn finish(self) -> Vec<HookSlot> {
        self.cells
    }
}

// =============================================================================
// Tests
// =============================================================================

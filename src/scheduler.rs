//! Work scheduler - cooperative, time-sliced executor of queued units.
//!
//! A unit is a callable returning "more work remains". Units run in FIFO
//! order; the running unit is invoked repeatedly until it reports completion,
//! then the next queued unit begins. One invocation is atomic - preemption
//! happens only between invocations, when the quantum (default 50ms measured
//! from quantum start) is exhausted. `run_turn` is one quantum: the host's
//! macrotask substrate calls it again whenever it returns `true`.
//!
//! The quantum clock is pluggable so tests can drive time by hand, and new
//! units may be enqueued from inside a running unit - they land behind the
//! queue, after the units already waiting.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

// =============================================================================
// Quantum clock
// =============================================================================

/// Time source for quantum accounting.
pub trait QuantumClock {
    fn now(&self) -> Instant;
}

/// Real monotonic clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl QuantumClock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Default time slice a turn may run before yielding back to the host.
pub const DEFAULT_QUANTUM: Duration = Duration::from_millis(50);

// =============================================================================
// Scheduler
// =============================================================================

/// One queued unit of work.
pub type Unit = Box<dyn FnMut() -> bool>;

type Queue = Rc<RefCell<VecDeque<Unit>>>;

/// Cloneable handle for enqueuing units, including from inside a running
/// unit.
#[derive(Clone)]
pub struct ScheduleHandle {
    queue: Queue,
}

impl ScheduleHandle {
    /// Append a unit behind everything already queued.
    pub fn enqueue(&self, unit: impl FnMut() -> bool + 'static) {
        self.queue.borrow_mut().push_back(Box::new(unit));
    }
}

/// Cooperative FIFO executor with a fixed time quantum.
pub struct Scheduler {
    queue: Queue,
    quantum: Duration,
    clock: Rc<dyn QuantumClock>,
}

impl Scheduler {
    /// Scheduler with the default quantum and the real clock.
    pub fn new() -> Self {
        Self::with_clock(DEFAULT_QUANTUM, Rc::new(MonotonicClock))
    }

    /// Scheduler with a custom quantum.
    pub fn with_quantum(quantum: Duration) -> Self {
        Self::with_clock(quantum, Rc::new(MonotonicClock))
    }

    /// Scheduler with a custom quantum and clock.
    pub fn with_clock(quantum: Duration, clock: Rc<dyn QuantumClock>) -> Self {
        Self {
            queue: Rc::new(RefCell::new(VecDeque::new())),
            quantum,
            clock,
        }
    }

    /// Handle for enqueuing units.
    pub fn handle(&self) -> ScheduleHandle {
        ScheduleHandle {
            queue: Rc::clone(&self.queue),
        }
    }

    /// Append a unit to the queue.
    pub fn enqueue(&self, unit: impl FnMut() -> bool + 'static) {
        self.handle().enqueue(unit);
    }

    /// Queued unit count (the running unit counts until it completes).
    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    /// True when no units are queued.
    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    /// Run one quantum.
    ///
    /// Invokes the front unit repeatedly (moving on when it completes) until
    /// the quantum is exhausted or the queue drains. Returns whether work
    /// remains, in which case the host must schedule another turn.
    pub fn run_turn(&mut self) -> bool {
        let start = self.clock.now();

        loop {
            // The unit runs outside the queue borrow so it can enqueue.
            let unit = self.queue.borrow_mut().pop_front();
            let Some(mut unit) = unit else {
                return false;
            };

            let more = unit();
            if more {
                self.queue.borrow_mut().push_front(unit);
            }

            if self.clock.now().duration_since(start) > self.quantum {
                return !self.queue.borrow().is_empty();
            }
        }
    }

    /// Run turns until the queue drains. Test and synchronous-host
    /// convenience; a real host yields between turns instead.
    pub fn run_to_idle(&mut self) {
        while self.run_turn() {}
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    /// Clock driven by hand, advancing a fixed step per reading.
    struct SteppingClock {
        base: Instant,
        elapsed: Cell<Duration>,
        step: Duration,
    }

    impl SteppingClock {
        fn new(step: Duration) -> Self {
            Self {
                base: Instant::now(),
                elapsed: Cell::new(Duration::ZERO),
                step,
            }
        }
    }

    impl QuantumClock for SteppingClock {
        fn now(&self) -> Instant {
            let elapsed = self.elapsed.get();
            self.elapsed.set(elapsed + self.step);
            self.base + elapsed
        }
    }

    #[test]
    fn test_units_run_fifo_to_completion() {
        let mut scheduler = Scheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let log_a = Rc::clone(&log);
        let mut remaining = 3;
        scheduler.enqueue(move || {
            log_a.borrow_mut().push("a");
            remaining -= 1;
            remaining > 0
        });

        let log_b = Rc::clone(&log);
        scheduler.enqueue(move || {
            log_b.borrow_mut().push("b");
            false
        });

        scheduler.run_to_idle();
        assert_eq!(*log.borrow(), ["a", "a", "a", "b"]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_quantum_exhaustion_yields_mid_queue() {
        // Every clock reading advances 30ms; with a 50ms quantum the second
        // invocation overruns it and the turn yields.
        let clock = Rc::new(SteppingClock::new(Duration::from_millis(30)));
        let mut scheduler = Scheduler::with_clock(DEFAULT_QUANTUM, clock);

        let runs = Rc::new(Cell::new(0u32));
        let runs_unit = Rc::clone(&runs);
        let mut remaining = 10;
        scheduler.enqueue(move || {
            runs_unit.set(runs_unit.get() + 1);
            remaining -= 1;
            remaining > 0
        });

        assert!(scheduler.run_turn());
        let after_first_turn = runs.get();
        assert!(after_first_turn < 10, "turn must yield before completion");

        scheduler.run_to_idle();
        assert_eq!(runs.get(), 10);
    }

    #[test]
    fn test_enqueue_while_running_goes_behind() {
        let mut scheduler = Scheduler::new();
        let handle = scheduler.handle();
        let log = Rc::new(RefCell::new(Vec::new()));

        let log_a = Rc::clone(&log);
        let log_spawned = Rc::clone(&log);
        let mut spawned = false;
        scheduler.enqueue(move || {
            log_a.borrow_mut().push("first");
            if !spawned {
                spawned = true;
                let log_inner = Rc::clone(&log_spawned);
                handle.enqueue(move || {
                    log_inner.borrow_mut().push("spawned");
                    false
                });
                return true;
            }
            false
        });

        let log_b = Rc::clone(&log);
        scheduler.enqueue(move || {
            log_b.borrow_mut().push("second");
            false
        });

        scheduler.run_to_idle();
        // The spawned unit runs after the queued ones.
        assert_eq!(*log.borrow(), ["first", "first", "second", "spawned"]);
    }

    #[test]
    fn test_empty_turn_reports_idle() {
        let mut scheduler = Scheduler::new();
        assert!(!scheduler.run_turn());
    }
}

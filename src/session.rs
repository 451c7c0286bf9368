//! Session - one independent engine instance.
//!
//! A session owns the fiber arena, the identity counter, the listener
//! registry and a cooperative scheduler, and exposes the whole engine
//! through three entry points: [`Session::render`] accepts a new root
//! description, [`Session::deliver_event`] feeds a consumer event report
//! back in, and [`Session::run_turn`] / [`Session::run_to_idle`] lend the
//! thread to the scheduler.
//!
//! A render pass runs as a single scheduler unit that performs one unit of
//! work per invocation, so a long diff yields the thread at quantum
//! boundaries without ever exposing a half-built tree: mutation batches
//! only leave through the sink after the commit step. State setters and
//! overlapping render requests coalesce into at most one queued follow-up
//! pass.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use crate::commit;
use crate::error::EngineError;
use crate::events::{EventReport, ListenerMap};
use crate::fiber::{next_fiber, Fiber, FiberArena, FiberId};
use crate::hooks::{HookCtx, ScheduleSignal};
use crate::mutation::{MutationBatch, MutationSink};
use crate::reconcile::reconcile_children;
use crate::scheduler::{ScheduleHandle, Scheduler};
use crate::types::{Child, EffectFlags, Node, NodeKind, Props, Value, ROOT_TYPE};

type SinkHandle = Rc<RefCell<Box<dyn MutationSink>>>;

// =============================================================================
// Session
// =============================================================================

/// One engine instance. Sessions are fully self-contained; any number can
/// coexist on a thread.
pub struct Session {
    inner: Rc<RefCell<Inner>>,
    scheduler: Scheduler,
    sink: SinkHandle,
}

impl Session {
    /// Create a session delivering mutation batches to `sink`.
    pub fn new(sink: impl MutationSink + 'static) -> Self {
        Self::with_scheduler(sink, Scheduler::new())
    }

    /// Create a session on a preconfigured scheduler.
    pub fn with_scheduler(sink: impl MutationSink + 'static, scheduler: Scheduler) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner::new())),
            scheduler,
            sink: Rc::new(RefCell::new(Box::new(sink))),
        }
    }

    /// Request a render of a new root description.
    ///
    /// Only queues the pass; the tree is built and committed as
    /// [`Session::run_turn`] lends the thread. A request arriving while a
    /// pass is in flight queues one follow-up pass over the latest
    /// description.
    pub fn render(&mut self, root: Node, client_params: Value) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.root_node = Some(root);
            inner.client_params = client_params;
            inner.pass_queued = true;
        }
        ensure_pump(&self.inner, &self.scheduler.handle(), &self.sink);
    }

    /// Feed back an event reported by the consumer.
    ///
    /// Dispatch runs as its own scheduler unit. A report whose identity or
    /// event has no retained listener is dropped; `report.sequence` always
    /// advances the acknowledged batch high-water mark.
    pub fn deliver_event(&mut self, report: EventReport) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.acked_sequence = inner.acked_sequence.max(report.sequence);
        }

        let inner = Rc::clone(&self.inner);
        let sink = Rc::clone(&self.sink);
        let handle = self.scheduler.handle();
        let mut report = Some(report);
        self.scheduler.enqueue(move || {
            let Some(report) = report.take() else {
                return false;
            };
            dispatch_event(&inner, &handle, &sink, report);
            false
        });
    }

    /// Run scheduled work for one quantum. Returns true while work remains.
    pub fn run_turn(&mut self) -> bool {
        self.scheduler.run_turn()
    }

    /// Run until no work remains.
    pub fn run_to_idle(&mut self) {
        self.scheduler.run_to_idle();
    }

    /// True when no pass is in flight or queued and the scheduler is empty.
    pub fn is_idle(&self) -> bool {
        let inner = self.inner.borrow();
        self.scheduler.is_empty() && inner.wip_root.is_none() && !inner.pass_queued
    }

    /// Highest mutation batch sequence the consumer has acknowledged
    /// through event reports.
    pub fn acked_sequence(&self) -> u64 {
        self.inner.borrow().acked_sequence
    }
}

/// Spawn the pass-driving unit unless one is already live.
fn ensure_pump(inner: &Rc<RefCell<Inner>>, handle: &ScheduleHandle, sink: &SinkHandle) {
    {
        let mut guard = inner.borrow_mut();
        if guard.pump_active {
            return;
        }
        guard.pump_active = true;
    }
    let inner = Rc::clone(inner);
    let sink = Rc::clone(sink);
    handle.enqueue(move || pump(&inner, &sink));
}

/// One invocation of the pass-driving unit: a single step of the active
/// pass. Returns true while the unit should stay scheduled.
///
/// Panics out of component code are contained here: the unwind never
/// escapes the scheduler unit, so a throwing component costs its own pass
/// and nothing else.
fn pump(inner: &Rc<RefCell<Inner>>, sink: &SinkHandle) -> bool {
    // Unwind safety: any state the step touched before a panic is rolled
    // back by abort_pass.
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| inner.borrow_mut().drive()));
    match outcome {
        Ok(Ok(StepOutcome::More)) => true,
        Ok(Ok(StepOutcome::Committed(batch))) => {
            tracing::debug!(
                sequence = batch.sequence,
                mutations = batch.mutations.len(),
                "committed mutation batch"
            );
            // Submit outside any borrow; the sink may call back into the
            // session.
            sink.borrow_mut().submit(batch);
            let mut guard = inner.borrow_mut();
            if guard.pass_queued {
                true
            } else {
                guard.pump_active = false;
                false
            }
        }
        Ok(Ok(StepOutcome::Idle)) => {
            inner.borrow_mut().pump_active = false;
            false
        }
        Ok(Err(error)) => {
            tracing::error!(%error, "render pass aborted");
            abort_and_continue(inner)
        }
        Err(_) => {
            tracing::error!("component panicked, render pass aborted");
            abort_and_continue(inner)
        }
    }
}

/// Roll back the pass in flight. The unit stays scheduled when a render
/// request arrived mid-pass, so an aborted pass never strands it.
fn abort_and_continue(inner: &Rc<RefCell<Inner>>) -> bool {
    let mut guard = inner.borrow_mut();
    guard.abort_pass();
    if guard.pass_queued {
        true
    } else {
        guard.pump_active = false;
        false
    }
}

/// Resolve and invoke the retained listener for an event report, then turn
/// any raised schedule signal into a queued pass.
fn dispatch_event(
    inner: &Rc<RefCell<Inner>>,
    handle: &ScheduleHandle,
    sink: &SinkHandle,
    report: EventReport,
) {
    let listener = inner.borrow().listeners.get(report.identity_id, &report.event);
    match listener {
        Some(listener) => listener(&report.payload),
        None => tracing::debug!(
            identity_id = report.identity_id,
            event = %report.event,
            "event report without retained listener dropped"
        ),
    }

    let requested = inner.borrow().signal.take();
    if requested {
        inner.borrow_mut().pass_queued = true;
        ensure_pump(inner, handle, sink);
    }
}

// =============================================================================
// Pass driver
// =============================================================================

/// Result of one pass-driver step.
enum StepOutcome {
    /// A pass is in flight and has more work.
    More,
    /// The pass finished; the batch is ready for the sink.
    Committed(MutationBatch),
    /// Nothing to do.
    Idle,
}

struct Inner {
    arena: FiberArena,
    /// Root fiber of the last committed generation.
    current_root: Option<FiberId>,
    /// Root fiber of the pass in flight.
    wip_root: Option<FiberId>,
    /// Pre-order cursor into the work-in-progress tree.
    next_unit: Option<FiberId>,
    generation: u64,
    /// Identity ids are never reused; 0 is the root mount point.
    next_identity: u64,
    sequence: u64,
    acked_sequence: u64,
    listeners: ListenerMap,
    signal: Rc<ScheduleSignal>,
    /// Latest root description; re-rendered verbatim by setter-driven
    /// passes.
    root_node: Option<Node>,
    client_params: Value,
    /// A pass should start (or follow the one in flight).
    pass_queued: bool,
    /// The pass-driving scheduler unit is live.
    pump_active: bool,
}

impl Inner {
    fn new() -> Self {
        Self {
            arena: FiberArena::new(),
            current_root: None,
            wip_root: None,
            next_unit: None,
            generation: 0,
            next_identity: 1,
            sequence: 0,
            acked_sequence: 0,
            listeners: ListenerMap::default(),
            signal: Rc::new(ScheduleSignal::default()),
            root_node: None,
            client_params: Value::Null,
            pass_queued: false,
            pump_active: false,
        }
    }

    /// Advance the engine by one step: start the queued pass, perform one
    /// unit of work, or commit.
    fn drive(&mut self) -> Result<StepOutcome, EngineError> {
        let Some(wip) = self.wip_root else {
            if !self.pass_queued {
                return Ok(StepOutcome::Idle);
            }
            let Some(root) = self.root_node.clone() else {
                self.pass_queued = false;
                return Ok(StepOutcome::Idle);
            };
            self.begin_pass(root);
            return Ok(StepOutcome::More);
        };

        if let Some(unit) = self.next_unit {
            self.next_unit = self.perform_unit(unit)?;
            return Ok(StepOutcome::More);
        }

        Ok(StepOutcome::Committed(self.complete_pass(wip)?))
    }

    /// Open a new generation with a fresh synthetic root fiber.
    fn begin_pass(&mut self, root: Node) {
        self.pass_queued = false;
        // Setter calls made up to this point fold into this pass.
        let _ = self.signal.take();
        self.generation += 1;

        let mut props = Props::default();
        props.children = vec![Child::Node(root)];
        let mut fiber = Fiber::new(
            NodeKind::Host(ROOT_TYPE.to_string()),
            None,
            props,
            self.generation,
        );
        fiber.identity = Some(0);
        fiber.alternate = self.current_root;

        let id = self.arena.insert(fiber);
        self.wip_root = Some(id);
        self.next_unit = Some(id);
    }

    /// Process one fiber: invoke a component or materialize a host node,
    /// reconcile its children, and step the pre-order cursor.
    fn perform_unit(&mut self, id: FiberId) -> Result<Option<FiberId>, EngineError> {
        let kind = self.arena.try_get(id)?.kind.clone();
        match kind {
            NodeKind::Component(render) => {
                let props = self.arena.try_get(id)?.props.clone();
                let prior = match self.arena.try_get(id)?.alternate {
                    Some(alt) => self.arena.try_get(alt)?.hooks.clone(),
                    None => Vec::new(),
                };

                let mut hooks = HookCtx::new(&prior, Rc::clone(&self.signal), &self.client_params);
                let rendered = render(&props, &mut hooks);
                self.arena.try_get_mut(id)?.hooks = hooks.finish();

                reconcile_children(&mut self.arena, id, vec![Child::Node(rendered)], self.generation)?;
            }
            NodeKind::Host(_) => {
                if self.arena.try_get(id)?.identity.is_none() {
                    let identity = self.next_identity;
                    self.next_identity += 1;
                    self.arena.try_get_mut(id)?.identity = Some(identity);
                }
                let children = self.arena.try_get(id)?.props.children.clone();
                reconcile_children(&mut self.arena, id, children, self.generation)?;
            }
        }
        next_fiber(&self.arena, id, self.wip_root)
    }

    /// Commit the finished tree: build the batch, promote the generation
    /// and queue a follow-up pass if any setter fired mid-pass.
    fn complete_pass(&mut self, wip: FiberId) -> Result<MutationBatch, EngineError> {
        let mutations = commit::build_mutations(&mut self.arena, wip, &mut self.listeners)?;
        self.sequence += 1;
        let batch = MutationBatch {
            sequence: self.sequence,
            mutations,
        };

        commit::promote(&mut self.arena, wip, self.generation)?;
        self.current_root = Some(wip);
        self.wip_root = None;

        if self.signal.take() {
            self.pass_queued = true;
        }
        Ok(batch)
    }

    /// Discard the pass in flight, leaving the committed tree untouched.
    ///
    /// Deletion tags placed on previous-generation fibers are cleared and
    /// the generation counter rolls back, so the next pass diffs against
    /// the same committed tree as this one did.
    fn abort_pass(&mut self) {
        let Some(wip) = self.wip_root.take() else {
            return;
        };
        self.next_unit = None;

        let mut records = Vec::new();
        let mut cursor = Some(wip);
        while let Some(id) = cursor {
            records.push(id);
            cursor = match next_fiber(&self.arena, id, Some(wip)) {
                Ok(next) => next,
                // A dangling link mid-abort ends the walk; remaining
                // records are swept by generation at the next commit.
                Err(_) => None,
            };
        }

        for &id in &records {
            let pending = match self.arena.get_mut(id) {
                Some(fiber) => std::mem::take(&mut fiber.pending_deletions),
                None => continue,
            };
            for doomed in pending {
                if let Some(fiber) = self.arena.get_mut(doomed) {
                    fiber.effects.remove(EffectFlags::DELETION);
                }
            }
        }
        for id in records {
            self.arena.remove(id);
        }
        self.generation -= 1;
    }
}

// =============================================================================
// Tests
// =============================================================================

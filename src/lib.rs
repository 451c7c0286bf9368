//! # weft
//!
//! Incremental tree reconciliation engine with cooperative scheduling.
//!
//! weft maintains a retained tree of render records (fibers) for a
//! declarative description, diffs each new description against the last
//! committed generation, and emits ordered mutation batches that a consumer
//! applies to its own output tree. Work is sliced into per-fiber units on a
//! cooperative scheduler, so a large diff shares its thread without ever
//! exposing a half-built tree.
//!
//! ## Architecture
//!
//! ```text
//! Description (Node) → reconcile (fiber diff) → commit → MutationBatch → sink
//!                          ↑                                    |
//!                    hook setters  ←  EventReport  ←  consumer ←┘
//! ```
//!
//! Two fiber generations are live at a time: "current" (last committed) and
//! "work-in-progress". Components hold state in hook cells that carry
//! across generations; a setter queues an update and requests a fresh
//! top-level pass.
//!
//! ## Modules
//!
//! - [`types`] - Descriptions (`Node`, `Props`, `Value`) and effect flags
//! - [`fiber`] - Render records, the fiber arena, tree traversal
//! - [`hooks`] - Persistent state cells and the render context
//! - [`scheduler`] - Cooperative unit queue with quantum yielding
//! - [`mutation`] - Batch format and the sink boundary
//! - [`events`] - Event bridge, reports, retained listeners
//! - [`session`] - One engine instance tying everything together

pub mod error;
pub mod events;
pub mod fiber;
pub mod hooks;
pub mod mutation;
pub mod scheduler;
pub mod session;
pub mod types;

mod commit;
mod reconcile;

// Re-export commonly used items
pub use error::EngineError;
pub use events::{EventBinding, EventReport, Listener};
pub use hooks::{HookCtx, Setter};
pub use mutation::{Mutation, MutationBatch, MutationSink};
pub use scheduler::{QuantumClock, ScheduleHandle, Scheduler, DEFAULT_QUANTUM};
pub use session::Session;
pub use types::{
    Child, ComponentFn, EffectFlags, Key, Node, NodeKind, Props, Value,
};

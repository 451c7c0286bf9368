//! Mutation batch - the engine's only output.
//!
//! A finished pass produces one ordered batch of minimal mutations plus a
//! strictly increasing sequence number. The consumer must apply batches in
//! non-decreasing sequence order; buffering and out-of-order delivery are a
//! transport concern. All types here are plain data so the batch can cross a
//! process or worker boundary.

use serde::{Deserialize, Serialize};

use crate::types::Value;

// =============================================================================
// Mutations
// =============================================================================

/// One mutation instruction for the output surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mutation {
    /// Create a node and insert it under `parent_id`, before `sibling_id`
    /// when present, else appended.
    Placement {
        id: u64,
        parent_id: u64,
        sibling_id: Option<u64>,
        node_type: String,
        props: Vec<(String, Value)>,
        /// Event name to bridge source, for remote handler derivation.
        events: Vec<(String, String)>,
    },
    /// Patch the changed props of a retained node. `props` maps removed
    /// names to `Value::Null`. When `reorder` is set the node also moved
    /// among its siblings; `parent_id`/`sibling_id` say where it belongs.
    Update {
        id: u64,
        props: Vec<(String, Value)>,
        reorder: bool,
        parent_id: Option<u64>,
        sibling_id: Option<u64>,
    },
    /// Remove a subtree. `removed` lists every host identity in the
    /// subtree, root first, so the consumer can release all resources in
    /// one step.
    Deletion { id: u64, removed: Vec<u64> },
}

impl Mutation {
    /// Target identity of this mutation.
    pub fn id(&self) -> u64 {
        match self {
            Mutation::Placement { id, .. }
            | Mutation::Update { id, .. }
            | Mutation::Deletion { id, .. } => *id,
        }
    }
}

/// Ordered mutation batch for one committed generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationBatch {
    /// Strictly increasing across the life of a session.
    pub sequence: u64,
    pub mutations: Vec<Mutation>,
}

// =============================================================================
// Sink
// =============================================================================

/// Transport seam receiving finished batches.
///
/// The engine assumes nothing about delivery: there is no feedback channel
/// for failures while the consumer applies a batch. Closures implement the
/// trait, so tests and embedders can collect batches directly.
pub trait MutationSink {
    fn submit(&mut self, batch: MutationBatch);
}

impl<F: FnMut(MutationBatch)> MutationSink for F {
    fn submit(&mut self, batch: MutationBatch) {
        self(batch);
    }
}

// =============================================================================
// Tests
// =============================================================================

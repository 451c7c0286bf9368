//! Event bridge and retained listeners.
//!
//! An event-binding prop splits into two halves: a serializable bridge
//! descriptor that travels with the placement mutation so the consumer can
//! re-derive a handler remotely, and a listener callback retained on this
//! side of the boundary. The listener registry is keyed by host identity id;
//! a deleted node can never leave a stale listener behind.

use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::types::Value;

// =============================================================================
// Bindings
// =============================================================================

/// Locally retained event callback.
///
/// `Rc<dyn Fn>` so bindings clone into description trees and the registry
/// without ownership issues; listeners typically capture hook setters.
pub type Listener = Rc<dyn Fn(&Value)>;

/// One event-binding prop: transport-safe bridge plus local listener.
#[derive(Clone)]
pub struct EventBinding {
    /// Source of the remote half of the handler, evaluated by the consumer.
    pub bridge: String,
    /// Callback invoked when the consumer reports the event back.
    pub listener: Listener,
}

impl EventBinding {
    /// Create a binding from a bridge source and a listener.
    pub fn new(bridge: impl Into<String>, listener: impl Fn(&Value) + 'static) -> Self {
        Self {
            bridge: bridge.into(),
            listener: Rc::new(listener),
        }
    }
}

impl fmt::Debug for EventBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBinding")
            .field("bridge", &self.bridge)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Event reports
// =============================================================================

/// Event reported back by the consumer.
///
/// `sequence` echoes the last mutation batch the consumer had applied when
/// the event fired; the session records it as the acknowledged high-water
/// mark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventReport {
    pub identity_id: u64,
    pub event: String,
    pub payload: Value,
    pub sequence: u64,
}

// =============================================================================
// Listener registry
// =============================================================================

/// Retained listeners keyed by host identity id.
#[derive(Default)]
pub struct ListenerMap {
    entries: FxHashMap<u64, FxHashMap<String, Listener>>,
}

impl ListenerMap {
    /// Replace the full listener set for a newly placed node.
    pub fn insert(&mut self, identity_id: u64, listeners: Vec<(String, Listener)>) {
        self.entries
            .insert(identity_id, listeners.into_iter().collect());
    }

    /// Merge updated listeners into an existing entry.
    ///
    /// Events not mentioned keep their previous listener; the entry is
    /// created if the node had none.
    pub fn merge(&mut self, identity_id: u64, listeners: Vec<(String, Listener)>) {
        let entry = self.entries.entry(identity_id).or_default();
        for (event, listener) in listeners {
            entry.insert(event, listener);
        }
    }

    /// Drop every listener for a deleted node.
    pub fn remove(&mut self, identity_id: u64) {
        self.entries.remove(&identity_id);
    }

    /// Resolve a listener for dispatch.
    pub fn get(&self, identity_id: u64, event: &str) -> Option<Listener> {
        self.entries.get(&identity_id)?.get(event).cloned()
    }

    /// Number of nodes with retained listeners.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no listeners are retained.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

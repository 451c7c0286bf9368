//! Engine error type.
//!
//! Internal tree-invariant violations have no recovery path: they abort the
//! render pass that hit them and surface through the pass driver. Nothing
//! here covers consumer-side failures - the engine has no feedback channel
//! for batches that fail to apply.

use thiserror::Error;

use crate::fiber::FiberId;

/// Errors raised by reconciliation and commit.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An update-tagged fiber had no previous-generation counterpart.
    #[error("fiber {0:?} is update-tagged but has no alternate")]
    MissingAlternate(FiberId),

    /// A tree link or alternate handle referenced a freed arena slot.
    #[error("fiber handle {0:?} is not allocated")]
    DanglingHandle(FiberId),

    /// A host fiber reached commit without an assigned identity id.
    #[error("fiber {0:?} reached commit without an identity id")]
    MissingIdentity(FiberId),

    /// A fiber had no host-capable ancestor (root invariant violation).
    #[error("fiber {0:?} has no host ancestor")]
    MissingHostParent(FiberId),
}

//! Fiber store - per-position render records and tree traversal.
//!
//! A fiber is one tree position's render record for one generation. Exactly
//! two generations are live at a time: "current" (last committed) and
//! "work-in-progress" (being built); `alternate` links a fiber to its
//! counterpart in the other generation and never points within its own.
//!
//! The tree uses the first-child/next-sibling shape, so the pre-order walk
//! used by both the reconciler driver and the commit builder is the
//! child / sibling / climb loop in [`next_fiber`].

mod arena;

pub use arena::{FiberArena, FiberId};

use crate::error::EngineError;
use crate::events::Listener;
use crate::hooks::HookSlot;
use crate::types::{EffectFlags, Key, NodeKind, Props, Value};

// =============================================================================
// Records
// =============================================================================

/// Commit instructions attached to an effect-tagged fiber.
///
/// For a placement: the initial non-children props, the serializable event
/// bridges, and the listeners to retain. For an update: only the changed
/// props, and listeners when any binding was touched.
#[derive(Default)]
pub struct EffectPayload {
    pub attrs: Vec<(String, Value)>,
    pub events: Vec<(String, String)>,
    pub listeners: Vec<(String, Listener)>,
}

/// One tree position for one render generation.
pub struct Fiber {
    pub kind: NodeKind,
    pub key: Option<Key>,
    pub props: Props,
    /// Host identity id - stable across generations, absent on component
    /// fibers. Id 0 is the root mount point.
    pub identity: Option<u64>,
    pub effects: EffectFlags,
    pub payload: Option<EffectPayload>,
    pub parent: Option<FiberId>,
    pub child: Option<FiberId>,
    pub sibling: Option<FiberId>,
    /// Counterpart in the other generation.
    pub alternate: Option<FiberId>,
    /// State cells, component fibers only, rebuilt every invocation.
    pub hooks: Vec<HookSlot>,
    /// Children detached under this fiber in this generation, in original
    /// sibling order, awaiting the commit phase.
    pub pending_deletions: Vec<FiberId>,
    pub generation: u64,
}

impl Fiber {
    /// Create a bare record; links and effects are filled in by the
    /// reconciler.
    pub fn new(kind: NodeKind, key: Option<Key>, props: Props, generation: u64) -> Self {
        Self {
            kind,
            key,
            props,
            identity: None,
            effects: EffectFlags::NONE,
            payload: None,
            parent: None,
            child: None,
            sibling: None,
            alternate: None,
            hooks: Vec::new(),
            pending_deletions: Vec::new(),
            generation,
        }
    }

    /// True for fibers that map to an output-surface node.
    pub fn is_host(&self) -> bool {
        matches!(self.kind, NodeKind::Host(_))
    }
}

// =============================================================================
// Traversal
// =============================================================================

/// Next fiber in pre-order: first child, else next sibling, else the next
/// sibling of the nearest ancestor below `base`.
///
/// `base` bounds the walk to a subtree; passing the subtree root keeps the
/// climb from escaping it.
pub fn next_fiber(
    arena: &FiberArena,
    id: FiberId,
    base: Option<FiberId>,
) -> Result<Option<FiberId>, EngineError> {
    let fiber = arena.try_get(id)?;
    if let Some(child) = fiber.child {
        return Ok(Some(child));
    }

    let mut cursor = Some(id);
    while let Some(current) = cursor {
        if base == Some(current) {
            break;
        }
        let fiber = arena.try_get(current)?;
        if let Some(sibling) = fiber.sibling {
            return Ok(Some(sibling));
        }
        cursor = fiber.parent;
    }

    Ok(None)
}

/// Identity of the nearest ancestor that maps to a host node.
///
/// Skips component fibers; the synthetic root (identity 0) terminates the
/// walk, so a missing host ancestor is a tree-invariant fault.
pub fn host_parent(arena: &FiberArena, id: FiberId) -> Result<u64, EngineError> {
    let mut cursor = arena.try_get(id)?.parent;
    while let Some(current) = cursor {
        let fiber = arena.try_get(current)?;
        if let Some(identity) = fiber.identity {
            return Ok(identity);
        }
        cursor = fiber.parent;
    }
    Err(EngineError::MissingHostParent(id))
}

/// Identity of the nearest following sibling that resolves to a stable host
/// node, the anchor an insert-before targets.
///
/// Component siblings are searched depth-first for their first host
/// descendant. Fibers pending deletion, newly placed, or reordering in the
/// same batch are skipped: they are not at their final position when the
/// consumer applies this mutation. `None` means the consumer appends
/// instead of inserting before.
pub fn host_sibling(arena: &FiberArena, id: FiberId) -> Result<Option<u64>, EngineError> {
    let mut cursor = arena.try_get(id)?.sibling;
    while let Some(current) = cursor {
        if let Some(identity) = first_host_in(arena, current)? {
            return Ok(Some(identity));
        }
        cursor = arena.try_get(current)?.sibling;
    }
    Ok(None)
}

/// First stable host identity inside a subtree, in sibling order.
fn first_host_in(arena: &FiberArena, id: FiberId) -> Result<Option<u64>, EngineError> {
    let unstable = EffectFlags::DELETION | EffectFlags::PLACEMENT | EffectFlags::REORDER;
    let fiber = arena.try_get(id)?;
    if fiber.effects.intersects(unstable) {
        return Ok(None);
    }
    if fiber.is_host() {
        return Ok(fiber.identity);
    }

    let mut cursor = fiber.child;
    while let Some(current) = cursor {
        if let Some(identity) = first_host_in(arena, current)? {
            return Ok(Some(identity));
        }
        cursor = arena.try_get(current)?.sibling;
    }
    Ok(None)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::types::{ComponentFn, Node};

    fn host(arena: &mut FiberArena, tag: &str, identity: Option<u64>) -> FiberId {
        let mut fiber = Fiber::new(NodeKind::Host(tag.into()), None, Props::default(), 0);
        fiber.identity = identity;
        arena.insert(fiber)
    }

    fn component(arena: &mut FiberArena) -> FiberId {
        let f: ComponentFn = Rc::new(|_, _| Node::host("div"));
        arena.insert(Fiber::new(NodeKind::Component(f), None, Props::default(), 0))
    }

    fn link_child(arena: &mut FiberArena, parent: FiberId, child: FiberId) {
        arena.get_mut(parent).unwrap().child = Some(child);
        arena.get_mut(child).unwrap().parent = Some(parent);
    }

    fn link_sibling(arena: &mut FiberArena, left: FiberId, right: FiberId) {
        let parent = arena.get(left).unwrap().parent;
        arena.get_mut(left).unwrap().sibling = Some(right);
        arena.get_mut(right).unwrap().parent = parent;
    }

    #[test]
    fn test_next_fiber_walks_preorder() {
        let mut arena = FiberArena::new();
        let root = host(&mut arena, "#root", Some(0));
        let a = host(&mut arena, "div", Some(1));
        let b = host(&mut arena, "span", Some(2));
        let c = host(&mut arena, "em", Some(3));

        // root -> a -> (b), a.sibling = c
        link_child(&mut arena, root, a);
        link_child(&mut arena, a, b);
        link_sibling(&mut arena, a, c);

        let order = {
            let mut order = vec![];
            let mut cursor = Some(a);
            while let Some(id) = cursor {
                order.push(id);
                cursor = next_fiber(&arena, id, Some(root)).unwrap();
            }
            order
        };
        assert_eq!(order, vec![a, b, c]);
    }

    #[test]
    fn test_next_fiber_bounded_by_base() {
        let mut arena = FiberArena::new();
        let root = host(&mut arena, "#root", Some(0));
        let a = host(&mut arena, "div", Some(1));
        let b = host(&mut arena, "span", Some(2));
        let after = host(&mut arena, "em", Some(3));

        link_child(&mut arena, root, a);
        link_child(&mut arena, a, b);
        link_sibling(&mut arena, a, after);

        // Bounded at `a`, the walk ends after `b` instead of escaping to
        // `after`.
        assert_eq!(next_fiber(&arena, b, Some(a)).unwrap(), None);
    }

    #[test]
    fn test_host_parent_skips_components() {
        let mut arena = FiberArena::new();
        let root = host(&mut arena, "#root", Some(0));
        let comp = component(&mut arena);
        let inner = host(&mut arena, "div", Some(4));

        link_child(&mut arena, root, comp);
        link_child(&mut arena, comp, inner);

        assert_eq!(host_parent(&arena, inner).unwrap(), 0);
    }

    #[test]
    fn test_host_sibling_direct() {
        let mut arena = FiberArena::new();
        let parent = host(&mut arena, "#root", Some(0));
        let a = host(&mut arena, "div", Some(1));
        let b = host(&mut arena, "span", Some(2));
        link_child(&mut arena, parent, a);
        link_sibling(&mut arena, a, b);

        assert_eq!(host_sibling(&arena, a).unwrap(), Some(2));
    }

    #[test]
    fn test_host_sibling_descends_into_component() {
        let mut arena = FiberArena::new();
        let parent = host(&mut arena, "#root", Some(0));
        let a = host(&mut arena, "div", Some(1));
        let comp = component(&mut arena);
        let inner = host(&mut arena, "span", Some(2));

        link_child(&mut arena, parent, a);
        link_sibling(&mut arena, a, comp);
        link_child(&mut arena, comp, inner);

        assert_eq!(host_sibling(&arena, a).unwrap(), Some(2));
    }

    #[test]
    fn test_host_sibling_skips_empty_component() {
        let mut arena = FiberArena::new();
        let parent = host(&mut arena, "#root", Some(0));
        let a = host(&mut arena, "div", Some(1));
        let comp = component(&mut arena);
        let b = host(&mut arena, "span", Some(2));

        link_child(&mut arena, parent, a);
        link_sibling(&mut arena, a, comp);
        link_sibling(&mut arena, comp, b);

        assert_eq!(host_sibling(&arena, a).unwrap(), Some(2));
    }

    #[test]
    fn test_host_sibling_none() {
        let mut arena = FiberArena::new();
        let parent = host(&mut arena, "#root", Some(0));
        let a = host(&mut arena, "div", Some(1));
        let comp = component(&mut arena);

        link_child(&mut arena, parent, a);
        link_sibling(&mut arena, a, comp);

        assert_eq!(host_sibling(&arena, a).unwrap(), None);
    }

    #[test]
    fn test_host_sibling_skips_unstable_anchors() {
        let mut arena = FiberArena::new();
        let parent = host(&mut arena, "#root", Some(0));
        let a = host(&mut arena, "div", Some(1));
        let moving = host(&mut arena, "span", Some(2));
        let fresh = host(&mut arena, "em", Some(3));
        let stable = host(&mut arena, "p", Some(4));

        link_child(&mut arena, parent, a);
        link_sibling(&mut arena, a, moving);
        link_sibling(&mut arena, moving, fresh);
        link_sibling(&mut arena, fresh, stable);
        arena.get_mut(moving).unwrap().effects = EffectFlags::UPDATE | EffectFlags::REORDER;
        arena.get_mut(fresh).unwrap().effects = EffectFlags::PLACEMENT;

        // Neither a moving nor a freshly placed sibling is a valid
        // insert-before anchor.
        assert_eq!(host_sibling(&arena, a).unwrap(), Some(4));
    }

    #[test]
    fn test_host_sibling_skips_pending_deletion() {
        let mut arena = FiberArena::new();
        let parent = host(&mut arena, "#root", Some(0));
        let a = host(&mut arena, "div", Some(1));
        let doomed = host(&mut arena, "span", Some(2));
        let b = host(&mut arena, "em", Some(3));

        link_child(&mut arena, parent, a);
        link_sibling(&mut arena, a, doomed);
        link_sibling(&mut arena, doomed, b);
        arena.get_mut(doomed).unwrap().effects = EffectFlags::DELETION;

        assert_eq!(host_sibling(&arena, a).unwrap(), Some(3));
    }
}

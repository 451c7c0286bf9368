//! Reconciler - diffs a new child description sequence against the previous
//! generation's child list, producing tagged fibers.
//!
//! Matching runs left-to-right over the new children while tracking a cursor
//! through the previous unkeyed children (in original order) and a map from
//! key to previous keyed fiber. Reused fibers are tagged UPDATE and carry a
//! prop patch; unmatched new children become PLACEMENT fibers; previous
//! children nobody claimed are tagged DELETION and collected on the parent
//! for the commit phase.
//!
//! Reorder detection for keyed updates uses the last-placed rule: a match
//! whose previous position precedes the highest previously matched position
//! did not keep its relative order and is flagged REORDER.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::EngineError;
use crate::fiber::{EffectPayload, Fiber, FiberArena, FiberId};
use crate::types::{Child, EffectFlags, Key, Node, Value, NODE_VALUE, TEXT_TYPE};

// =============================================================================
// Normalization
// =============================================================================

/// Flatten one level of nested sequences and normalize each child.
///
/// Null and boolean children vanish; scalars become implicit text nodes;
/// anything else in child position (lists, maps, deeper nesting) is
/// malformed and normalizes to an inert empty text node rather than failing
/// the pass.
pub(crate) fn normalize_children(children: Vec<Child>) -> Vec<Node> {
    let mut flat = Vec::with_capacity(children.len());
    for child in children {
        match child {
            Child::Many(inner) => flat.extend(inner),
            other => flat.push(other),
        }
    }

    flat.into_iter().filter_map(normalize_child).collect()
}

fn normalize_child(child: Child) -> Option<Node> {
    match child {
        Child::Node(node) => Some(node),
        Child::Value(value) if value.is_void_child() => None,
        // Scalars carry their raw value; the consumer decides how to
        // render it.
        Child::Value(value @ (Value::Int(_) | Value::Float(_) | Value::Str(_))) => {
            Some(Node::host(TEXT_TYPE).attr(NODE_VALUE, value))
        }
        // Lists, maps and sequences nested deeper than fragment flattening
        // allows are malformed in child position.
        Child::Value(_) | Child::Many(_) => {
            Some(Node::host(TEXT_TYPE).attr(NODE_VALUE, Value::Str(String::new())))
        }
    }
}

// =============================================================================
// Child reconciliation
// =============================================================================

/// Diff `children` against the previous generation reached through the wip
/// fiber's alternate, attaching the resulting child fibers to `wip`.
pub(crate) fn reconcile_children(
    arena: &mut FiberArena,
    wip: FiberId,
    children: Vec<Child>,
    generation: u64,
) -> Result<(), EngineError> {
    let elements = normalize_children(children);

    // Previous-generation children in sibling order.
    let mut old_order: Vec<FiberId> = Vec::new();
    if let Some(alt) = arena.try_get(wip)?.alternate {
        let mut cursor = arena.try_get(alt)?.child;
        while let Some(id) = cursor {
            old_order.push(id);
            cursor = arena.try_get(id)?.sibling;
        }
    }

    // Split previous children into the unkeyed cursor sequence and the
    // keyed lookup map. A duplicate previous key keeps its first fiber;
    // later holders fall through to deletion.
    let mut keyed: FxHashMap<Key, usize> = FxHashMap::default();
    let mut unkeyed: Vec<usize> = Vec::new();
    for (ordinal, &id) in old_order.iter().enumerate() {
        match arena.try_get(id)?.key.clone() {
            Some(key) => {
                keyed.entry(key).or_insert(ordinal);
            }
            None => unkeyed.push(ordinal),
        }
    }

    let mut consumed = vec![false; old_order.len()];
    let mut unkeyed_cursor = 0usize;
    let mut seen_keys: FxHashSet<Key> = FxHashSet::default();
    let mut last_placed: Option<usize> = None;

    let mut first_child: Option<FiberId> = None;
    let mut prev_sibling: Option<FiberId> = None;

    for element in elements {
        let new_fiber = match element.key.clone() {
            Some(key) if !seen_keys.contains(&key) => {
                seen_keys.insert(key.clone());
                match keyed.remove(&key) {
                    Some(ordinal) => {
                        let old_id = old_order[ordinal];
                        consumed[ordinal] = true;
                        if arena.try_get(old_id)?.kind.same_type(&element.kind) {
                            let reorder = match last_placed {
                                Some(placed) if ordinal < placed => true,
                                _ => {
                                    last_placed = Some(ordinal);
                                    false
                                }
                            };
                            let id = create_update(arena, element, wip, old_id, generation)?;
                            if reorder {
                                arena.try_get_mut(id)?.effects |= EffectFlags::REORDER;
                            }
                            id
                        } else {
                            mark_deletion(arena, wip, old_id)?;
                            create_placement(arena, element, wip, generation)
                        }
                    }
                    None => create_placement(arena, element, wip, generation),
                }
            }
            // A key repeated among the new children is ambiguous input;
            // later occurrences degrade to unkeyed placement.
            Some(_) => create_placement(arena, element, wip, generation),
            None => {
                if unkeyed_cursor < unkeyed.len() {
                    let ordinal = unkeyed[unkeyed_cursor];
                    unkeyed_cursor += 1;
                    consumed[ordinal] = true;
                    let old_id = old_order[ordinal];
                    if arena.try_get(old_id)?.kind.same_type(&element.kind) {
                        if last_placed.is_none_or(|placed| ordinal > placed) {
                            last_placed = Some(ordinal);
                        }
                        create_update(arena, element, wip, old_id, generation)?
                    } else {
                        mark_deletion(arena, wip, old_id)?;
                        create_placement(arena, element, wip, generation)
                    }
                } else {
                    create_placement(arena, element, wip, generation)
                }
            }
        };

        match prev_sibling {
            None => first_child = Some(new_fiber),
            Some(prev) => arena.try_get_mut(prev)?.sibling = Some(new_fiber),
        }
        prev_sibling = Some(new_fiber);
    }

    // Everything the new children did not claim is detached.
    for (ordinal, &old_id) in old_order.iter().enumerate() {
        if !consumed[ordinal] {
            mark_deletion(arena, wip, old_id)?;
        }
    }

    arena.try_get_mut(wip)?.child = first_child;
    Ok(())
}

// =============================================================================
// Fiber construction
// =============================================================================

/// Fresh fiber for a new tree position, carrying its full placement payload.
fn create_placement(
    arena: &mut FiberArena,
    element: Node,
    parent: FiberId,
    generation: u64,
) -> FiberId {
    let mut payload = EffectPayload {
        attrs: element.props.attrs().to_vec(),
        ..Default::default()
    };
    for (event, binding) in element.props.events() {
        payload.events.push((event.clone(), binding.bridge.clone()));
        payload.listeners.push((event.clone(), binding.listener.clone()));
    }

    let mut fiber = Fiber::new(element.kind, element.key, element.props, generation);
    fiber.parent = Some(parent);
    fiber.effects = EffectFlags::PLACEMENT;
    fiber.payload = Some(payload);
    arena.insert(fiber)
}

/// Reuse a previous fiber: same identity, patch of changed props only.
///
/// The symmetric prop set is compared by value; names present only on the
/// old side patch to `Value::Null` so the consumer clears them. Listeners
/// are included whenever the element carries any event binding - they merge
/// into the retained entry at commit.
fn create_update(
    arena: &mut FiberArena,
    element: Node,
    parent: FiberId,
    old_id: FiberId,
    generation: u64,
) -> Result<FiberId, EngineError> {
    let old = arena.try_get(old_id)?;

    let mut payload = EffectPayload::default();
    for (name, value) in element.props.attrs() {
        if old.props.attr(name) != Some(value) {
            payload.attrs.push((name.clone(), value.clone()));
        }
    }
    for (name, _) in old.props.attrs() {
        if element.props.attr(name).is_none() {
            payload.attrs.push((name.clone(), Value::Null));
        }
    }
    for (event, binding) in element.props.events() {
        payload.listeners.push((event.clone(), binding.listener.clone()));
    }

    let identity = old.identity;
    let kind = old.kind.clone();

    let mut fiber = Fiber::new(kind, element.key, element.props, generation);
    fiber.identity = identity;
    fiber.parent = Some(parent);
    fiber.alternate = Some(old_id);
    fiber.effects = EffectFlags::UPDATE;
    fiber.payload = Some(payload);
    Ok(arena.insert(fiber))
}

/// Tag a previous-generation fiber for deletion and collect it on the wip
/// parent for the commit phase.
fn mark_deletion(
    arena: &mut FiberArena,
    wip: FiberId,
    old_id: FiberId,
) -> Result<(), EngineError> {
    arena.try_get_mut(old_id)?.effects = EffectFlags::DELETION;
    arena.try_get_mut(wip)?.pending_deletions.push(old_id);
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeKind, Props};

    fn wip_root(arena: &mut FiberArena) -> FiberId {
        arena.insert(Fiber::new(
            NodeKind::Host("div".into()),
            None,
            Props::default(),
            1,
        ))
    }

    /// Wire a previous generation under the wip fiber's alternate and return
    /// its child ids in order.
    fn with_previous(arena: &mut FiberArena, wip: FiberId, tags: &[(&str, Option<&str>)]) -> Vec<FiberId> {
        let alt = arena.insert(Fiber::new(
            NodeKind::Host("div".into()),
            None,
            Props::default(),
            0,
        ));
        arena.get_mut(wip).unwrap().alternate = Some(alt);

        let mut ids = Vec::new();
        let mut prev: Option<FiberId> = None;
        for (index, (tag, key)) in tags.iter().enumerate() {
            let mut fiber = Fiber::new(NodeKind::Host((*tag).into()), key.map(Key::from), Props::default(), 0);
            fiber.identity = Some(index as u64 + 1);
            fiber.parent = Some(alt);
            let id = arena.insert(fiber);
            match prev {
                None => arena.get_mut(alt).unwrap().child = Some(id),
                Some(p) => arena.get_mut(p).unwrap().sibling = Some(id),
            }
            prev = Some(id);
            ids.push(id);
        }
        ids
    }

    fn child_ids(arena: &FiberArena, wip: FiberId) -> Vec<FiberId> {
        let mut ids = Vec::new();
        let mut cursor = arena.get(wip).unwrap().child;
        while let Some(id) = cursor {
            ids.push(id);
            cursor = arena.get(id).unwrap().sibling;
        }
        ids
    }

    #[test]
    fn test_placement_children() {
        let mut arena = FiberArena::new();
        let wip = wip_root(&mut arena);

        reconcile_children(
            &mut arena,
            wip,
            vec![Node::host("span").into(), Node::host("em").into()],
            1,
        )
        .unwrap();

        let children = child_ids(&arena, wip);
        assert_eq!(children.len(), 2);
        for &id in &children {
            let fiber = arena.get(id).unwrap();
            assert_eq!(fiber.effects, EffectFlags::PLACEMENT);
            assert!(fiber.alternate.is_none());
            assert_eq!(fiber.parent, Some(wip));
        }
        assert_eq!(arena.get(children[0]).unwrap().kind.host_tag(), Some("span"));
        assert_eq!(arena.get(children[1]).unwrap().kind.host_tag(), Some("em"));
        assert!(arena.get(wip).unwrap().pending_deletions.is_empty());
    }

    #[test]
    fn test_update_same_type_keeps_identity() {
        let mut arena = FiberArena::new();
        let wip = wip_root(&mut arena);
        let old = with_previous(&mut arena, wip, &[("span", None)]);

        reconcile_children(&mut arena, wip, vec![Node::host("span").into()], 1).unwrap();

        let children = child_ids(&arena, wip);
        assert_eq!(children.len(), 1);
        let fiber = arena.get(children[0]).unwrap();
        assert_eq!(fiber.effects, EffectFlags::UPDATE);
        assert_eq!(fiber.alternate, Some(old[0]));
        assert_eq!(fiber.identity, Some(1));
        assert!(fiber.payload.as_ref().unwrap().attrs.is_empty());
    }

    #[test]
    fn test_type_change_deletes_and_places() {
        let mut arena = FiberArena::new();
        let wip = wip_root(&mut arena);
        let old = with_previous(&mut arena, wip, &[("span", None)]);

        reconcile_children(&mut arena, wip, vec![Node::host("em").into()], 1).unwrap();

        let children = child_ids(&arena, wip);
        assert_eq!(children.len(), 1);
        let fiber = arena.get(children[0]).unwrap();
        assert_eq!(fiber.effects, EffectFlags::PLACEMENT);
        assert!(fiber.identity.is_none());

        assert_eq!(arena.get(wip).unwrap().pending_deletions, vec![old[0]]);
        assert_eq!(arena.get(old[0]).unwrap().effects, EffectFlags::DELETION);
    }

    #[test]
    fn test_removed_children_are_deleted() {
        let mut arena = FiberArena::new();
        let wip = wip_root(&mut arena);
        let old = with_previous(&mut arena, wip, &[("span", None), ("em", None)]);

        reconcile_children(&mut arena, wip, vec![], 1).unwrap();

        assert_eq!(arena.get(wip).unwrap().child, None);
        assert_eq!(arena.get(wip).unwrap().pending_deletions, old);
    }

    #[test]
    fn test_prop_diff_is_minimal_and_symmetric() {
        let mut arena = FiberArena::new();
        let wip = wip_root(&mut arena);
        let old = with_previous(&mut arena, wip, &[("span", None)]);
        {
            let props = &mut arena.get_mut(old[0]).unwrap().props;
            props.set_attr("kept", 1);
            props.set_attr("changed", "old");
            props.set_attr("removed", true);
        }

        let element = Node::host("span")
            .attr("kept", 1)
            .attr("changed", "new")
            .attr("added", 2);
        reconcile_children(&mut arena, wip, vec![element.into()], 1).unwrap();

        let children = child_ids(&arena, wip);
        let payload = arena.get(children[0]).unwrap().payload.as_ref().unwrap();
        assert_eq!(
            payload.attrs,
            vec![
                ("changed".to_string(), Value::Str("new".into())),
                ("added".to_string(), Value::Int(2)),
                ("removed".to_string(), Value::Null),
            ]
        );
    }

    #[test]
    fn test_keyed_permutation_reuses_all() {
        let mut arena = FiberArena::new();
        let wip = wip_root(&mut arena);
        let old = with_previous(
            &mut arena,
            wip,
            &[("li", Some("a")), ("li", Some("b")), ("li", Some("c"))],
        );

        let children = vec![
            Node::host("li").key("c").into(),
            Node::host("li").key("a").into(),
            Node::host("li").key("b").into(),
        ];
        reconcile_children(&mut arena, wip, children, 1).unwrap();

        let new = child_ids(&arena, wip);
        assert_eq!(new.len(), 3);
        // c kept its relative position; a and b moved behind it.
        let c = arena.get(new[0]).unwrap();
        assert_eq!(c.alternate, Some(old[2]));
        assert_eq!(c.effects, EffectFlags::UPDATE);

        let a = arena.get(new[1]).unwrap();
        assert_eq!(a.alternate, Some(old[0]));
        assert!(a.effects.contains(EffectFlags::REORDER));

        let b = arena.get(new[2]).unwrap();
        assert_eq!(b.alternate, Some(old[1]));
        assert!(b.effects.contains(EffectFlags::REORDER));

        assert!(arena.get(wip).unwrap().pending_deletions.is_empty());
    }

    #[test]
    fn test_keyed_removal_and_addition() {
        let mut arena = FiberArena::new();
        let wip = wip_root(&mut arena);
        let old = with_previous(&mut arena, wip, &[("li", Some("a")), ("li", Some("b"))]);

        let children = vec![
            Node::host("li").key("b").into(),
            Node::host("li").key("d").into(),
        ];
        reconcile_children(&mut arena, wip, children, 1).unwrap();

        let new = child_ids(&arena, wip);
        let b = arena.get(new[0]).unwrap();
        assert_eq!(b.alternate, Some(old[1]));
        // First match in the pass establishes the order baseline.
        assert!(!b.effects.contains(EffectFlags::REORDER));

        let d = arena.get(new[1]).unwrap();
        assert_eq!(d.effects, EffectFlags::PLACEMENT);

        assert_eq!(arena.get(wip).unwrap().pending_deletions, vec![old[0]]);
    }

    #[test]
    fn test_duplicate_new_key_degrades_to_placement() {
        let mut arena = FiberArena::new();
        let wip = wip_root(&mut arena);
        let old = with_previous(&mut arena, wip, &[("li", Some("a"))]);

        let children = vec![
            Node::host("li").key("a").into(),
            Node::host("li").key("a").into(),
        ];
        reconcile_children(&mut arena, wip, children, 1).unwrap();

        let new = child_ids(&arena, wip);
        assert_eq!(arena.get(new[0]).unwrap().alternate, Some(old[0]));
        assert_eq!(arena.get(new[0]).unwrap().effects, EffectFlags::UPDATE);
        // Second occurrence never matches again.
        assert_eq!(arena.get(new[1]).unwrap().effects, EffectFlags::PLACEMENT);
    }

    #[test]
    fn test_normalization() {
        // Void children vanish, scalars become text nodes, one level of
        // nesting flattens, malformed values become inert text nodes.
        let children = vec![
            Child::Value(Value::Null),
            Child::Value(Value::Bool(true)),
            Child::Value(Value::Str("hello".into())),
            Child::Value(Value::Int(7)),
            Child::Many(vec![Node::host("span").into(), Child::Value(Value::Null)]),
            Child::Value(Value::List(vec![])),
        ];

        let nodes = normalize_children(children);
        assert_eq!(nodes.len(), 4);
        assert_eq!(nodes[0].kind.host_tag(), Some(TEXT_TYPE));
        assert_eq!(nodes[0].props.attr(NODE_VALUE), Some(&Value::Str("hello".into())));
        // Numeric scalars stay raw rather than stringifying.
        assert_eq!(nodes[1].props.attr(NODE_VALUE), Some(&Value::Int(7)));
        assert_eq!(nodes[2].kind.host_tag(), Some("span"));
        // Malformed list child degrades to an inert empty text node.
        assert_eq!(nodes[3].props.attr(NODE_VALUE), Some(&Value::Str(String::new())));
    }

    #[test]
    fn test_mixed_keyed_unkeyed() {
        let mut arena = FiberArena::new();
        let wip = wip_root(&mut arena);
        let old = with_previous(
            &mut arena,
            wip,
            &[("p", None), ("li", Some("k")), ("p", None)],
        );

        let children = vec![
            Node::host("p").into(),
            Node::host("p").into(),
            Node::host("li").key("k").into(),
        ];
        reconcile_children(&mut arena, wip, children, 1).unwrap();

        let new = child_ids(&arena, wip);
        assert_eq!(new.len(), 3);
        // Unkeyed cursor pairs the two <p> positions in order.
        assert_eq!(arena.get(new[0]).unwrap().alternate, Some(old[0]));
        assert_eq!(arena.get(new[1]).unwrap().alternate, Some(old[2]));
        // Keyed child matched through the map despite moving last.
        assert_eq!(arena.get(new[2]).unwrap().alternate, Some(old[1]));
        assert!(arena.get(wip).unwrap().pending_deletions.is_empty());
    }
}

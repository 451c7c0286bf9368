//! Commit builder - turns tagged fibers and pending deletions into an
//! ordered mutation batch.
//!
//! Runs once per pass, after no work remains. Deletions are emitted first,
//! one record per deleted subtree root carrying every host identity removed
//! with it, so the consumer can release the whole subtree in one step. The
//! new tree is then walked in pre-order, emitting placement and update
//! mutations for effect-tagged host fibers. Finally the work-in-progress
//! generation is promoted: retained previous fibers get their `alternate`
//! rewired to their successors and records two generations old are swept
//! from the arena.

use crate::error::EngineError;
use crate::events::ListenerMap;
use crate::fiber::{host_parent, host_sibling, next_fiber, FiberArena, FiberId};
use crate::mutation::Mutation;
use crate::types::EffectFlags;

// =============================================================================
// Batch construction
// =============================================================================

/// Build the mutation list for a finished pass.
///
/// Consumes pending deletions (freeing their subtrees) and the effect
/// payloads of the new tree, and keeps the listener registry in sync:
/// placements install their listener set, updates merge, deletions remove.
pub(crate) fn build_mutations(
    arena: &mut FiberArena,
    wip_root: FiberId,
    listeners: &mut ListenerMap,
) -> Result<Vec<Mutation>, EngineError> {
    let mut mutations = Vec::new();

    // Deletions first, in the order reconciliation collected them.
    for deletion in drain_pending_deletions(arena, wip_root)? {
        commit_deletion(arena, deletion, listeners, &mut mutations)?;
    }

    // Pre-order effect walk over the new tree.
    let mut cursor = arena.try_get(wip_root)?.child;
    while let Some(id) = cursor {
        commit_effect(arena, id, listeners, &mut mutations)?;
        cursor = next_fiber(arena, id, Some(wip_root))?;
    }

    Ok(mutations)
}

/// Gather every `pending_deletions` list in the new tree, pre-order,
/// clearing them as they are consumed.
fn drain_pending_deletions(
    arena: &mut FiberArena,
    wip_root: FiberId,
) -> Result<Vec<FiberId>, EngineError> {
    let mut deletions = Vec::new();
    let mut cursor = Some(wip_root);
    while let Some(id) = cursor {
        deletions.append(&mut arena.try_get_mut(id)?.pending_deletions);
        cursor = next_fiber(arena, id, Some(wip_root))?;
    }
    Ok(deletions)
}

/// Emit one deletion record for a detached subtree, drop its listeners,
/// splice it out of the previous generation's sibling chain and free its
/// records.
fn commit_deletion(
    arena: &mut FiberArena,
    root: FiberId,
    listeners: &mut ListenerMap,
    mutations: &mut Vec<Mutation>,
) -> Result<(), EngineError> {
    let mut removed_ids = Vec::new();
    let mut records = Vec::new();

    let mut cursor = Some(root);
    while let Some(id) = cursor {
        records.push(id);
        if let Some(identity) = arena.try_get(id)?.identity {
            removed_ids.push(identity);
        }
        cursor = next_fiber(arena, id, Some(root))?;
    }

    for &identity in &removed_ids {
        listeners.remove(identity);
    }

    if let Some(&target) = removed_ids.first() {
        mutations.push(Mutation::Deletion {
            id: target,
            removed: removed_ids,
        });
    }

    unlink_from_previous_chain(arena, root)?;
    for id in records {
        arena.remove(id);
    }
    Ok(())
}

/// Remove a deleted fiber from its previous-generation parent's child
/// chain, so the next reconciliation never walks into freed records.
fn unlink_from_previous_chain(arena: &mut FiberArena, id: FiberId) -> Result<(), EngineError> {
    let (parent, next) = {
        let fiber = arena.try_get(id)?;
        (fiber.parent, fiber.sibling)
    };
    let Some(parent) = parent else {
        return Ok(());
    };

    let parent_fiber = arena.try_get_mut(parent)?;
    if parent_fiber.child == Some(id) {
        parent_fiber.child = next;
        return Ok(());
    }

    let mut cursor = parent_fiber.child;
    while let Some(current) = cursor {
        let fiber = arena.try_get_mut(current)?;
        if fiber.sibling == Some(id) {
            fiber.sibling = next;
            return Ok(());
        }
        cursor = fiber.sibling;
    }
    Ok(())
}

/// Emit the mutation (if any) for one effect-tagged fiber of the new tree
/// and clear its effect state.
fn commit_effect(
    arena: &mut FiberArena,
    id: FiberId,
    listeners: &mut ListenerMap,
    mutations: &mut Vec<Mutation>,
) -> Result<(), EngineError> {
    let effects = arena.try_get(id)?.effects;

    if effects.contains(EffectFlags::UPDATE) && arena.try_get(id)?.alternate.is_none() {
        // Tree-invariant fault: an update must have a previous counterpart.
        return Err(EngineError::MissingAlternate(id));
    }

    let payload = arena.try_get_mut(id)?.payload.take();
    let fiber = arena.try_get(id)?;

    if effects.contains(EffectFlags::PLACEMENT) && fiber.is_host() {
        let identity = fiber.identity.ok_or(EngineError::MissingIdentity(id))?;
        let node_type = fiber
            .kind
            .host_tag()
            .map(str::to_string)
            .ok_or(EngineError::MissingIdentity(id))?;
        let parent_id = host_parent(arena, id)?;
        let sibling_id = host_sibling(arena, id)?;

        let payload = payload.unwrap_or_default();
        listeners.insert(identity, payload.listeners);
        mutations.push(Mutation::Placement {
            id: identity,
            parent_id,
            sibling_id,
            node_type,
            props: payload.attrs,
            events: payload.events,
        });
    } else if effects.contains(EffectFlags::UPDATE) && fiber.is_host() {
        let identity = fiber.identity.ok_or(EngineError::MissingIdentity(id))?;
        let payload = payload.unwrap_or_default();
        let reorder = effects.contains(EffectFlags::REORDER);
        let has_listeners = !payload.listeners.is_empty();

        if has_listeners {
            listeners.merge(identity, payload.listeners);
        }

        // An empty patch with no reorder and no listener change emits no
        // mutation; the fiber still participates in traversal.
        if !payload.attrs.is_empty() || has_listeners || reorder {
            let (parent_id, sibling_id) = if reorder {
                (Some(host_parent(arena, id)?), host_sibling(arena, id)?)
            } else {
                (None, None)
            };
            mutations.push(Mutation::Update {
                id: identity,
                props: payload.attrs,
                reorder,
                parent_id,
                sibling_id,
            });
        }
    }

    arena.try_get_mut(id)?.effects = EffectFlags::NONE;
    Ok(())
}

// =============================================================================
// Promotion
// =============================================================================

/// Promote the work-in-progress tree to current.
///
/// Every retained previous fiber's outgoing `alternate` is rewired to its
/// successor, and records two or more generations old are swept from the
/// arena - a fiber is kept exactly one generation beyond its own for
/// diffing, then dropped.
pub(crate) fn promote(
    arena: &mut FiberArena,
    wip_root: FiberId,
    generation: u64,
) -> Result<(), EngineError> {
    let mut cursor = Some(wip_root);
    while let Some(id) = cursor {
        if let Some(alt) = arena.try_get(id)?.alternate {
            arena.try_get_mut(alt)?.alternate = Some(id);
        }
        cursor = next_fiber(arena, id, Some(wip_root))?;
    }

    arena.retain(|_, fiber| generation.saturating_sub(fiber.generation) < 2);
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

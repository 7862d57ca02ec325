//! The reconciler: materializes shared-document changes (remote updates,
//! bootstrap, post-flush finalizes) back into the reactive tree.
//!
//! Identity is preserved for retained containers: the bijection caches hand
//! back the same controller, and only controllers that actually left the
//! document are cleaned up (unsubscribed and evicted from both caches).
//!
//! Remote passes run in two phases. Event targets are first routed to
//! their *boundary* — the nearest materialized ancestor — and the
//! boundaries reconcile structurally, parents before children. Sequences
//! that have a granular delta are marked in the per-pass delta-skip set
//! before phase 1 so the structural pass does not double-apply them; phase
//! 2 then applies each delta with a position cursor. The skip set is
//! cleared when the pass ends, failing or not.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::trace;
use yrs::branch::BranchID;
use yrs::types::{Change, Event, Events, PathSegment};
use yrs::{Array, ArrayRef, Map, MapRef, Out, ReadTxn, TransactionMut};

use crate::bridge::{materialize_container, materialize_value};
use crate::error::{ReconcileError, ReconcileKind, SyncError};
use crate::mirror::MirrorCore;
use crate::reactive::{ListNode, MapNode, NodeId, NodeRef};
use crate::shared::{branch_id, SharedContainer};
use crate::state::DeltaSkipReset;
use crate::value::Value;
use crate::RESERVED_KEY_PREFIX;

/// Structurally reconcile one shared container with its controller,
/// creating the controller if it does not exist yet.
pub(crate) fn reconcile_container<T: ReadTxn>(
    core: &Arc<MirrorCore>,
    txn: &T,
    shared: &SharedContainer,
) -> crate::Result<()> {
    let Some(entry) = core.state.lookup_controller(&shared.id()) else {
        // First visit: materialization builds the full subtree.
        let _ = materialize_container(core, txn, shared.clone())?;
        return Ok(());
    };
    match (shared, &entry.node) {
        (SharedContainer::Map(map), NodeRef::Map(node)) => reconcile_map(core, txn, map, node)
            .map_err(|err| {
                SyncError::from(ReconcileError::with_source(
                    ReconcileKind::Map,
                    "structural map reconcile failed",
                    err,
                ))
            }),
        (SharedContainer::List(list), NodeRef::List(node)) => {
            reconcile_list(core, txn, list, node).map_err(|err| {
                SyncError::from(ReconcileError::with_source(
                    ReconcileKind::Sequence,
                    "structural sequence reconcile failed",
                    err,
                ))
            })
        }
        _ => Err(ReconcileError::new(
            ReconcileKind::Map,
            "controller kind does not match its container",
        )
        .into()),
    }
}

fn reconcile_map<T: ReadTxn>(
    core: &Arc<MirrorCore>,
    txn: &T,
    map: &MapRef,
    node: &MapNode,
) -> crate::Result<()> {
    let _guard = core.state.begin_reconcile();

    let document_keys: Vec<String> = map
        .keys(txn)
        .map(|key| key.to_string())
        .filter(|key| !key.starts_with(RESERVED_KEY_PREFIX))
        .collect();
    let mut union = document_keys.clone();
    for key in node.keys() {
        if !key.starts_with(RESERVED_KEY_PREFIX) && !union.contains(&key) {
            union.push(key);
        }
    }

    for key in union {
        let document_value = map.get(txn, &key);
        let current = node.get(&key);
        match (document_value, current) {
            (Some(out), current) => match &out {
                Out::YMap(_) | Out::YArray(_) => {
                    let child = match &out {
                        Out::YMap(child_map) => SharedContainer::Map(child_map.clone()),
                        Out::YArray(child_list) => SharedContainer::List(child_list.clone()),
                        _ => continue,
                    };
                    let canonical = materialize_container(core, txn, child.clone())?;
                    let canonical_value = canonical.as_value();
                    let retained = current.as_ref() == Some(&canonical_value);
                    if !retained {
                        if let Some(old) = &current {
                            cleanup_removed(core, old);
                        }
                        node.install(key, canonical_value)?;
                    }
                    reconcile_container(core, txn, &child)?;
                }
                _ => {
                    let fresh = materialize_value(core, txn, &out)?;
                    if current.as_ref() != Some(&fresh) {
                        if let Some(old) = &current {
                            cleanup_removed(core, old);
                        }
                        node.install(key, fresh)?;
                    }
                }
            },
            (None, Some(old)) => {
                cleanup_removed(core, &old);
                let _ = node.remove(&key)?;
            }
            (None, None) => {}
        }
    }
    Ok(())
}

/// Structural sequence reconcile. Sequences that received a granular delta
/// this pass are skipped so the delta is not applied twice.
fn reconcile_list<T: ReadTxn>(
    core: &Arc<MirrorCore>,
    txn: &T,
    list: &ArrayRef,
    node: &ListNode,
) -> crate::Result<()> {
    if core.state.has_delta(&branch_id(list)) {
        trace!("skipping structural reconcile: sequence has a granular delta");
        return Ok(());
    }
    list_resync(core, txn, list, node)
}

/// Replace the controller contents with a materialized snapshot of the
/// shared sequence, preserving identity for retained containers and
/// cleaning up the removed ones (multiset difference, so a controller that
/// appears twice and is retained once stays alive).
pub(crate) fn list_resync<T: ReadTxn>(
    core: &Arc<MirrorCore>,
    txn: &T,
    list: &ArrayRef,
    node: &ListNode,
) -> crate::Result<()> {
    let _guard = core.state.begin_reconcile();

    let mut snapshot = Vec::with_capacity(list.len(txn) as usize);
    for index in 0..list.len(txn) {
        if let Some(out) = list.get(txn, index) {
            snapshot.push(materialize_value(core, txn, &out)?);
        }
    }

    let mut counts: HashMap<NodeId, (Value, isize)> = HashMap::new();
    for value in node.items() {
        if let Some(id) = node_id_of(&value) {
            counts.entry(id).or_insert_with(|| (value.clone(), 0)).1 += 1;
        }
    }
    for value in &snapshot {
        if let Some(id) = node_id_of(value) {
            counts.entry(id).or_insert_with(|| (value.clone(), 0)).1 -= 1;
        }
    }

    node.replace_all(snapshot.clone())?;

    for (_, (value, surplus)) in counts {
        if surplus > 0 {
            cleanup_removed(core, &value);
        }
    }

    for value in &snapshot {
        match value {
            Value::Map(child) => {
                if let Some(shared) = core.state.lookup_shared(child.id()) {
                    reconcile_container(core, txn, &shared)?;
                }
            }
            Value::List(child) => {
                if let Some(shared) = core.state.lookup_shared(child.id()) {
                    reconcile_container(core, txn, &shared)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn node_id_of(value: &Value) -> Option<NodeId> {
    match value {
        Value::Map(node) => Some(node.id()),
        Value::List(node) => Some(node.id()),
        _ => None,
    }
}

/// Apply one granular sequence delta with a position cursor. Inserting is
/// idempotent: when the slice at the cursor already references the
/// converted items, the insert is skipped.
pub(crate) fn apply_list_delta<T: ReadTxn>(
    core: &Arc<MirrorCore>,
    txn: &T,
    node: &ListNode,
    changes: &[Change],
) -> crate::Result<()> {
    let _guard = core.state.begin_reconcile();
    let mut cursor = 0_usize;
    for change in changes {
        match change {
            Change::Retain(count) => {
                cursor += *count as usize;
            }
            Change::Removed(count) => {
                let count = *count as usize;
                let removed = node.slice(cursor, count);
                for value in &removed {
                    cleanup_removed(core, value);
                }
                let _ = node.splice_installed(cursor, count, Vec::new())?;
            }
            Change::Added(items) => {
                let mut converted = Vec::with_capacity(items.len());
                for out in items {
                    converted.push(materialize_value(core, txn, out)?);
                }
                let existing = node.slice(cursor, converted.len());
                if existing.len() == converted.len() && existing == converted {
                    cursor += converted.len();
                    continue;
                }
                let count = converted.len();
                let _ = node.splice_installed(cursor, 0, converted)?;
                cursor += count;
            }
        }
    }
    Ok(())
}

/// Release a value removed from the tree: unsubscribe its controller,
/// evict it from both caches, and recurse through its children.
pub(crate) fn cleanup_removed(core: &Arc<MirrorCore>, value: &Value) {
    let node_ref = match value {
        Value::Map(node) => NodeRef::Map(node.clone()),
        Value::List(node) => NodeRef::List(node.clone()),
        _ => return,
    };

    if let Some(shared) = core.state.lookup_shared(node_ref.id()) {
        let id = shared.id();
        let owns_entry = core
            .state
            .lookup_controller(&id)
            .is_some_and(|entry| entry.node.id() == node_ref.id());
        if owns_entry {
            let _ = core.state.evict(&id);
        }
    }
    node_ref.set_bound(false);

    match value {
        Value::Map(node) => {
            for (_, child) in node.entries() {
                cleanup_removed(core, &child);
            }
        }
        Value::List(node) => {
            for child in node.items() {
                cleanup_removed(core, &child);
            }
        }
        _ => {}
    }
}

/// Route one deep-observe batch into the reactive tree. Events from our own
/// flush transactions are ignored entirely.
pub(crate) fn handle_deep_events(
    core: &Arc<MirrorCore>,
    txn: &TransactionMut<'_>,
    events: &Events,
) -> crate::Result<()> {
    if txn.origin() == Some(&core.origin) {
        return Ok(());
    }

    // Collection: boundaries for phase 1 and delta targets for phase 2.
    // Delta targets are marked in the skip set before any reconcile runs.
    let mut boundaries: Vec<(usize, SharedContainer)> = Vec::new();
    let mut seen: HashSet<BranchID> = HashSet::new();
    let mut delta_targets: HashSet<BranchID> = HashSet::new();

    for event in events.iter() {
        let path: Vec<PathSegment> = match event {
            Event::Map(map_event) => map_event.path().into_iter().collect(),
            Event::Array(list_event) => {
                let target = list_event.target();
                let id = branch_id(target);
                if core.state.lookup_controller(&id).is_some() {
                    core.state.mark_delta(id.clone());
                    let _ = delta_targets.insert(id);
                }
                list_event.path().into_iter().collect()
            }
            // Text/XML leaves are outside the mirrored tree.
            _ => continue,
        };
        let (depth, boundary) = find_boundary(core, txn, &path);
        if seen.insert(boundary.id()) {
            boundaries.push((depth, boundary));
        }
    }

    let _reset = DeltaSkipReset::new(Arc::clone(&core.state));

    // Phase 1: structural reconciles, parents before children.
    boundaries.sort_by_key(|(depth, _)| *depth);
    for (_, boundary) in &boundaries {
        reconcile_container(core, txn, boundary)?;
    }

    // Phase 2: granular deltas on their direct targets.
    for event in events.iter() {
        let Event::Array(list_event) = event else {
            continue;
        };
        let id = branch_id(list_event.target());
        if !delta_targets.contains(&id) {
            continue;
        }
        let Some(entry) = core.state.lookup_controller(&id) else {
            continue;
        };
        let NodeRef::List(node) = entry.node else {
            continue;
        };
        apply_list_delta(core, txn, &node, list_event.delta(txn)).map_err(|err| {
            SyncError::from(ReconcileError::with_source(
                ReconcileKind::Sequence,
                "granular delta application failed",
                err,
            ))
        })?;
    }
    Ok(())
}

/// Walk from the root along an event path, returning the deepest
/// materialized container on it (depth in segments, then the container).
/// Controllers materialize top-down, so the walk stops at the first gap;
/// the default boundary is the root itself.
fn find_boundary<T: ReadTxn>(
    core: &Arc<MirrorCore>,
    txn: &T,
    path: &[PathSegment],
) -> (usize, SharedContainer) {
    let mut current = core.root.clone();
    let mut boundary = core.root.clone();
    let mut boundary_depth = 0;

    for (depth, segment) in path.iter().enumerate() {
        let child = match (&current, segment) {
            (SharedContainer::Map(map), PathSegment::Key(key)) => map.get(txn, key.as_ref()),
            (SharedContainer::List(list), PathSegment::Index(index)) => list.get(txn, *index),
            _ => None,
        };
        let next = match child {
            Some(Out::YMap(map)) => SharedContainer::Map(map),
            Some(Out::YArray(list)) => SharedContainer::List(list),
            _ => break,
        };
        current = next;
        if core.state.lookup_controller(&current.id()).is_some() {
            boundary = current.clone();
            boundary_depth = depth + 1;
        } else {
            break;
        }
    }
    (boundary_depth, boundary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::{DocMirror, Root};
    use yrs::{Doc, Transact};

    #[test]
    fn granular_delta_insert_is_idempotent() {
        let doc = Doc::new();
        let mirror = DocMirror::attach(&doc, Root::List("root".into())).expect("attach");
        let core = mirror.core_for_tests();
        let node = mirror.root_list().expect("list root");

        let changes = vec![Change::Added(vec![
            Out::Any(yrs::Any::from("a")),
            Out::Any(yrs::Any::from("b")),
        ])];
        {
            let txn = core.doc.transact();
            apply_list_delta(&core, &txn, &node, &changes).expect("first application");
        }
        assert_eq!(node.items(), vec![Value::from("a"), Value::from("b")]);

        // Re-applying the same delta finds the identical slice in place and
        // skips the insert.
        {
            let txn = core.doc.transact();
            apply_list_delta(&core, &txn, &node, &changes).expect("second application");
        }
        assert_eq!(node.items(), vec![Value::from("a"), Value::from("b")]);
    }

    #[test]
    fn delta_removal_cleans_up_and_splices() {
        let doc = Doc::new();
        let mirror = DocMirror::attach(&doc, Root::List("root".into())).expect("attach");
        let core = mirror.core_for_tests();
        let node = mirror.root_list().expect("list root");

        {
            let txn = core.doc.transact();
            apply_list_delta(
                &core,
                &txn,
                &node,
                &[Change::Added(vec![
                    Out::Any(yrs::Any::from(1.0)),
                    Out::Any(yrs::Any::from(2.0)),
                    Out::Any(yrs::Any::from(3.0)),
                ])],
            )
            .expect("seed");
            apply_list_delta(
                &core,
                &txn,
                &node,
                &[Change::Retain(1), Change::Removed(1)],
            )
            .expect("removal");
        }
        assert_eq!(node.items(), vec![Value::Number(1.0), Value::Number(3.0)]);
    }
}

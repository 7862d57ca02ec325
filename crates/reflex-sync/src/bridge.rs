//! The bridge/router between the reactive tree and the shared document.
//!
//! Downstream (document to tree) it materializes controllers for shared
//! containers, preserving identity through the bijection caches. Upstream
//! (tree to document) it receives each node's raw op batches, filters out
//! nested and reserved-key noise, plans map/sequence ops, validates every
//! outgoing value synchronously (rolling the node back on failure), and
//! enqueues the plan into the write scheduler together with the callbacks
//! that upgrade freshly created child containers after the flush commits.

use std::sync::Arc;

use tracing::trace;
use yrs::{Array, Map, Out, ReadTxn, Transact};

use crate::convert;
use crate::mirror::MirrorCore;
use crate::reactive::{ListNode, MapNode, NodeRef, OpKind, OpRecord};
use crate::scheduler::UpgradeCallback;
use crate::shared::{branch_id, SharedContainer};
use crate::state::{ControllerEntry, NodeSubscription};
use crate::validate::validate_deep;
use crate::value::Value;
use crate::RESERVED_KEY_PREFIX;

/// Create (or fetch) the controller for a shared container, materializing
/// every child: nested containers recursively become controllers,
/// primitives copy, and leaf CRDT values surface as raw references.
pub(crate) fn materialize_container<T: ReadTxn>(
    core: &Arc<MirrorCore>,
    txn: &T,
    shared: SharedContainer,
) -> crate::Result<NodeRef> {
    let id = shared.id();
    if let Some(entry) = core.state.lookup_controller(&id) {
        return Ok(entry.node);
    }

    let node = match &shared {
        SharedContainer::Map(_) => NodeRef::Map(MapNode::new()),
        SharedContainer::List(_) => NodeRef::List(ListNode::new()),
    };
    node.set_bound(true);
    core.state.register_controller(ControllerEntry {
        shared: shared.clone(),
        node: node.clone(),
    });
    subscribe_node(core, &shared, &node);

    let _guard = core.state.begin_reconcile();
    match (&shared, &node) {
        (SharedContainer::Map(map), NodeRef::Map(map_node)) => {
            let keys: Vec<String> = map.keys(txn).map(|key| key.to_string()).collect();
            for key in keys {
                if key.starts_with(RESERVED_KEY_PREFIX) {
                    continue;
                }
                if let Some(out) = map.get(txn, &key) {
                    let value = materialize_value(core, txn, &out)?;
                    map_node.install(key, value)?;
                }
            }
        }
        (SharedContainer::List(list), NodeRef::List(list_node)) => {
            let mut snapshot = Vec::with_capacity(list.len(txn) as usize);
            for index in 0..list.len(txn) {
                if let Some(out) = list.get(txn, index) {
                    snapshot.push(materialize_value(core, txn, &out)?);
                }
            }
            list_node.replace_all(snapshot)?;
        }
        _ => {}
    }
    Ok(node)
}

/// Materialize one shared value: containers become (cached) controllers,
/// scalars copy, text leaves stay raw references.
pub(crate) fn materialize_value<T: ReadTxn>(
    core: &Arc<MirrorCore>,
    txn: &T,
    out: &Out,
) -> crate::Result<Value> {
    match out {
        Out::Any(any) => Ok(Value::from_any(any)),
        Out::YMap(map) => {
            let node = materialize_container(core, txn, SharedContainer::Map(map.clone()))?;
            Ok(node.as_value())
        }
        Out::YArray(list) => {
            let node = materialize_container(core, txn, SharedContainer::List(list.clone()))?;
            Ok(node.as_value())
        }
        Out::YText(text) => Ok(Value::SharedText(text.clone())),
        _ => Ok(Value::Null),
    }
}

/// Wire a controller's reactive subscription: every commit on the node (or
/// below it) routes into the local-op planner. Re-registration releases any
/// prior subscription for the container.
pub(crate) fn subscribe_node(core: &Arc<MirrorCore>, shared: &SharedContainer, node: &NodeRef) {
    let weak_core = Arc::downgrade(core);
    let weak_node = node.downgrade();
    let shared_for_callback = shared.clone();
    let callback = move |ops: &[OpRecord]| -> crate::Result<()> {
        let Some(core) = weak_core.upgrade() else {
            return Ok(());
        };
        let Some(node) = weak_node.upgrade() else {
            return Ok(());
        };
        on_local_ops(&core, &shared_for_callback, &node, ops)
    };
    let subscription = match node {
        NodeRef::Map(map_node) => map_node.subscribe(callback),
        NodeRef::List(list_node) => list_node.subscribe(callback),
    };
    core.state.register_subscription(
        shared.id(),
        NodeSubscription {
            node: node.clone(),
            subscription,
        },
    );
}

/// One planned local op against a map container.
enum PlannedMapOp {
    Set { key: String, value: Value },
    Delete { key: String },
}

/// One planned local op against a sequence container.
enum PlannedListOp {
    Set { index: u32, value: Value },
    Replace { index: u32, value: Value },
    Delete { index: u32 },
}

fn on_local_ops(
    core: &Arc<MirrorCore>,
    shared: &SharedContainer,
    node: &NodeRef,
    ops: &[OpRecord],
) -> crate::Result<()> {
    if core.state.is_reconciling() {
        return Ok(());
    }

    match (shared, node) {
        (SharedContainer::Map(map), NodeRef::Map(map_node)) => {
            // Nested changes are handled by the nested controller's own
            // subscription; reserved keys never reach the document.
            let own: Vec<&OpRecord> = ops
                .iter()
                .filter(|op| {
                    op.key()
                        .is_some_and(|key| !key.starts_with(RESERVED_KEY_PREFIX))
                })
                .collect();
            if own.is_empty() {
                return Ok(());
            }
            trace!(ops = own.len(), "planning local map ops");

            let plan = plan_map_ops(&own);
            for op in &plan {
                if let PlannedMapOp::Set { value, .. } = op {
                    if let Err(err) = validate_deep(value) {
                        rollback_map(core, map_node, &own);
                        return Err(err.into());
                    }
                }
            }
            retire_displaced_controllers(core, &own);
            for op in plan {
                match op {
                    PlannedMapOp::Set { key, value } => {
                        let callback = make_upgrade_callback(core, &value);
                        core.scheduler.enqueue_map_set(map, key, value, callback);
                    }
                    PlannedMapOp::Delete { key } => {
                        core.scheduler.enqueue_map_delete(map, key);
                    }
                }
            }
        }
        (SharedContainer::List(list), NodeRef::List(list_node)) => {
            let own: Vec<&OpRecord> = ops.iter().filter(|op| op.index().is_some()).collect();
            if own.is_empty() {
                return Ok(());
            }
            trace!(ops = own.len(), "planning local sequence ops");

            let baseline = {
                let txn = core.doc.transact();
                list.len(&txn)
            };
            let plan = plan_list_ops(baseline, &own);
            for op in &plan {
                let value = match op {
                    PlannedListOp::Set { value, .. } | PlannedListOp::Replace { value, .. } => value,
                    PlannedListOp::Delete { .. } => continue,
                };
                if let Err(err) = validate_deep(value) {
                    rollback_list(core, list, list_node);
                    return Err(err.into());
                }
            }
            retire_displaced_controllers(core, &own);
            for op in plan {
                match op {
                    PlannedListOp::Set { index, value } => {
                        let callback = make_upgrade_callback(core, &value);
                        core.scheduler.enqueue_list_set(list, index, value, callback);
                    }
                    PlannedListOp::Replace { index, value } => {
                        let callback = make_upgrade_callback(core, &value);
                        core.scheduler
                            .enqueue_list_replace(list, index, value, callback);
                    }
                    PlannedListOp::Delete { index } => {
                        core.scheduler.enqueue_list_delete(list, index);
                    }
                }
            }
        }
        _ => {}
    }
    Ok(())
}

/// Map planner: own-level sets and deletes, with a top-level `Undefined`
/// normalized to null so key presence is preserved.
fn plan_map_ops(ops: &[&OpRecord]) -> Vec<PlannedMapOp> {
    ops.iter()
        .filter_map(|op| {
            let key = op.key()?.to_owned();
            match &op.kind {
                OpKind::Set { value, .. } => Some(PlannedMapOp::Set {
                    key,
                    value: normalize_undefined(value),
                }),
                OpKind::Delete { .. } => Some(PlannedMapOp::Delete { key }),
            }
        })
        .collect()
}

/// Sequence planner. The current shared length is the baseline: a set at an
/// in-bounds index that had a previous value is a replace
/// (delete-then-insert); any other set is a pure insert. Every delete is
/// planned — out-of-bounds deletes are what cancel same-flush sets during
/// the temporal merge.
fn plan_list_ops(baseline: u32, ops: &[&OpRecord]) -> Vec<PlannedListOp> {
    ops.iter()
        .filter_map(|op| {
            let index = op.index()? as u32;
            match &op.kind {
                OpKind::Set { value, prev } => {
                    let value = normalize_undefined(value);
                    if index < baseline && prev.is_some() {
                        Some(PlannedListOp::Replace { index, value })
                    } else {
                        Some(PlannedListOp::Set { index, value })
                    }
                }
                OpKind::Delete { .. } => Some(PlannedListOp::Delete { index }),
            }
        })
        .collect()
}

/// Any live controller sitting in a slot these ops overwrote or deleted is
/// queued for post-flush eviction. Ops that merely shift a node leave its
/// parent link intact, which the post-flush check respects.
fn retire_displaced_controllers(core: &Arc<MirrorCore>, ops: &[&OpRecord]) {
    for op in ops {
        let prev = match &op.kind {
            OpKind::Set { prev: Some(prev), .. } | OpKind::Delete { prev: Some(prev) } => prev,
            _ => continue,
        };
        let displaced = match prev {
            Value::Map(node) => core.state.lookup_shared(node.id()).is_some(),
            Value::List(node) => core.state.lookup_shared(node.id()).is_some(),
            _ => false,
        };
        if displaced {
            core.scheduler.retire(prev.clone());
        }
    }
}

fn normalize_undefined(value: &Value) -> Value {
    match value {
        Value::Undefined => Value::Null,
        other => other.clone(),
    }
}

/// Roll a map node back to its pre-batch state from the raw op records.
fn rollback_map(core: &Arc<MirrorCore>, node: &MapNode, ops: &[&OpRecord]) {
    let _guard = core.state.begin_reconcile();
    for op in ops.iter().rev() {
        let Some(key) = op.key() else { continue };
        let result = match &op.kind {
            OpKind::Set { prev: Some(prev), .. } | OpKind::Delete { prev: Some(prev) } => {
                node.install(key.to_owned(), prev.clone())
            }
            OpKind::Set { prev: None, .. } => node.remove(key).map(|_| ()),
            OpKind::Delete { prev: None } => Ok(()),
        };
        if let Err(err) = result {
            tracing::error!(error = %err, key, "map rollback step failed");
        }
    }
}

/// Roll a list node back by re-synchronizing it from the shared document,
/// the source of truth. Robust under concurrent remote updates, unlike
/// per-op reversal.
fn rollback_list(core: &Arc<MirrorCore>, list: &yrs::ArrayRef, node: &ListNode) {
    let _guard = core.state.begin_reconcile();
    let txn = core.doc.transact();
    let mut snapshot = Vec::with_capacity(list.len(&txn) as usize);
    for index in 0..list.len(&txn) {
        if let Some(out) = list.get(&txn, index) {
            match materialize_value(core, &txn, &out) {
                Ok(value) => snapshot.push(value),
                Err(err) => {
                    tracing::error!(error = %err, index, "list rollback materialization failed");
                    snapshot.push(convert::out_to_plain(&txn, &out));
                }
            }
        }
    }
    if let Err(err) = node.replace_all(snapshot) {
        tracing::error!(error = %err, "list rollback failed");
    }
}

/// Build the post-flush upgrade callback for an assigned value: once the
/// scheduler hands back the final shared value, bind the assigned node
/// subtree to the freshly created containers. Scalar assignments need no
/// upgrade.
fn make_upgrade_callback(core: &Arc<MirrorCore>, value: &Value) -> Option<UpgradeCallback> {
    if !matches!(value, Value::Map(_) | Value::List(_)) {
        return None;
    }
    let weak_core = Arc::downgrade(core);
    let assigned = value.clone();
    Some(Box::new(move |out: &Out| {
        let Some(core) = weak_core.upgrade() else {
            return;
        };
        let txn = core.doc.transact();
        bind_subtree(&core, &txn, &assigned, out);
    }))
}

/// Pair an assigned node subtree with the shared containers created for it
/// during apply, registering bijections and subscriptions top-down. Nodes
/// that are already upgraded (or containers owned by another controller)
/// are skipped.
pub(crate) fn bind_subtree<T: ReadTxn>(core: &Arc<MirrorCore>, txn: &T, value: &Value, out: &Out) {
    match (value, out) {
        (Value::Map(node), Out::YMap(map)) => {
            let id = branch_id(map);
            match core.state.lookup_controller(&id) {
                Some(existing) if existing.node.id() != node.id() => return,
                Some(_) => {}
                None => {
                    let node_ref = NodeRef::Map(node.clone());
                    let shared = SharedContainer::Map(map.clone());
                    node_ref.set_bound(true);
                    core.state.register_controller(ControllerEntry {
                        shared: shared.clone(),
                        node: node_ref.clone(),
                    });
                    subscribe_node(core, &shared, &node_ref);
                }
            }
            let keys: Vec<String> = map.keys(txn).map(|key| key.to_string()).collect();
            for key in keys {
                if let (Some(child_value), Some(child_out)) = (node.get(&key), map.get(txn, &key)) {
                    bind_subtree(core, txn, &child_value, &child_out);
                }
            }
        }
        (Value::List(node), Out::YArray(list)) => {
            let id = branch_id(list);
            match core.state.lookup_controller(&id) {
                Some(existing) if existing.node.id() != node.id() => return,
                Some(_) => {}
                None => {
                    let node_ref = NodeRef::List(node.clone());
                    let shared = SharedContainer::List(list.clone());
                    node_ref.set_bound(true);
                    core.state.register_controller(ControllerEntry {
                        shared: shared.clone(),
                        node: node_ref.clone(),
                    });
                    subscribe_node(core, &shared, &node_ref);
                }
            }
            for index in 0..list.len(txn) {
                if let (Some(child_value), Some(child_out)) =
                    (node.get(index as usize), list.get(txn, index))
                {
                    bind_subtree(core, txn, &child_value, &child_out);
                }
            }
        }
        _ => {}
    }
}

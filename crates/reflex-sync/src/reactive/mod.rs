//! The reactive state tree.
//!
//! Rust has no transparent proxies, so the reactive engine models the state
//! tree as an ownership-managed graph of nodes behind cheap clonable
//! handles. Writes go through explicit methods that apply the change to the
//! node's mirror and deliver an ordered batch of raw [`OpRecord`]s to the
//! node's subscribers and — with prefixed paths — to every ancestor's
//! subscribers, synchronously within the mutating call. That batch is the
//! per-commit operation log the bridge plans from.
//!
//! Adoption rules mirror proxy creation in the original model: plain
//! array/object literals are wrapped into fresh nodes at assignment time; a
//! parentless, unbound node handle is adopted as-is (identity reuse); a node
//! that already sits in a tree or mirrors a live shared container is
//! deep-cloned instead of moved.

mod list;
mod map;
mod ops;

pub use list::ListNode;
pub use map::MapNode;
pub use ops::{OpKind, OpRecord, PathSegment};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::value::Value;

/// Process-unique identity of a reactive node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// The raw numeric id, for diagnostics.
    pub fn raw(self) -> u64 {
        self.0
    }
}

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_node_id() -> NodeId {
    NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
}

/// Identifies one registered subscriber on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub(crate) type SubscriberFn = dyn Fn(&[OpRecord]) -> crate::Result<()> + Send + Sync;

pub(crate) struct SubscriberEntry {
    pub id: SubscriptionId,
    pub callback: Arc<SubscriberFn>,
}

/// Plumbing shared by map and list nodes: identity, parent link, binding
/// mark, and the subscriber list.
pub(crate) struct NodeMeta {
    pub id: NodeId,
    pub parent: RwLock<Option<WeakNodeRef>>,
    /// Set by the bridge while this node mirrors a live shared container.
    /// The engine only consults it for the adoption rule.
    pub bound: AtomicBool,
    pub subscribers: RwLock<Vec<SubscriberEntry>>,
    next_subscription: AtomicU64,
}

impl NodeMeta {
    pub fn new() -> Self {
        Self {
            id: next_node_id(),
            parent: RwLock::new(None),
            bound: AtomicBool::new(false),
            subscribers: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, callback: Arc<SubscriberFn>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push(SubscriberEntry { id, callback });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|entry| entry.id != id);
        subscribers.len() != before
    }
}

/// A handle to either node kind.
#[derive(Clone)]
pub(crate) enum NodeRef {
    Map(MapNode),
    List(ListNode),
}

impl NodeRef {
    pub fn id(&self) -> NodeId {
        self.meta().id
    }

    pub fn meta(&self) -> &NodeMeta {
        match self {
            NodeRef::Map(node) => node.meta(),
            NodeRef::List(node) => node.meta(),
        }
    }

    pub fn downgrade(&self) -> WeakNodeRef {
        match self {
            NodeRef::Map(node) => WeakNodeRef {
                id: node.id(),
                inner: WeakInner::Map(node.downgrade()),
            },
            NodeRef::List(node) => WeakNodeRef {
                id: node.id(),
                inner: WeakInner::List(node.downgrade()),
            },
        }
    }

    pub fn parent(&self) -> Option<NodeRef> {
        self.meta().parent.read().as_ref().and_then(WeakNodeRef::upgrade)
    }

    /// Find the path segment under which `child` currently sits, if any.
    /// List positions shift, so this is resolved at notification time.
    pub fn locate(&self, child: NodeId) -> Option<PathSegment> {
        match self {
            NodeRef::Map(node) => node.locate_child(child).map(PathSegment::Key),
            NodeRef::List(node) => node.locate_child(child).map(PathSegment::Index),
        }
    }

    pub fn as_value(&self) -> Value {
        match self {
            NodeRef::Map(node) => Value::Map(node.clone()),
            NodeRef::List(node) => Value::List(node.clone()),
        }
    }

    pub fn set_bound(&self, bound: bool) {
        self.meta().bound.store(bound, Ordering::Release);
    }
}

#[derive(Clone)]
pub(crate) enum WeakInner {
    Map(Weak<map::MapNodeInner>),
    List(Weak<list::ListNodeInner>),
}

/// A non-owning reference up the tree. Parent links are weak so the tree
/// never forms strong cycles.
#[derive(Clone)]
pub(crate) struct WeakNodeRef {
    pub id: NodeId,
    inner: WeakInner,
}

impl WeakNodeRef {
    pub fn upgrade(&self) -> Option<NodeRef> {
        match &self.inner {
            WeakInner::Map(weak) => weak.upgrade().map(|inner| NodeRef::Map(MapNode::from_inner(inner))),
            WeakInner::List(weak) => {
                weak.upgrade().map(|inner| NodeRef::List(ListNode::from_inner(inner)))
            }
        }
    }
}

/// Deliver an op batch to the originating node's subscribers and, with
/// prefixed paths, to every ancestor's subscribers. The first subscriber
/// error aborts delivery and propagates to the mutating caller.
pub(crate) fn emit_from(origin: NodeRef, ops: Vec<OpRecord>) -> crate::Result<()> {
    if ops.is_empty() {
        return Ok(());
    }
    deliver(&origin, &ops)?;
    let mut prefix: Vec<PathSegment> = Vec::new();
    let mut current = origin;
    while let Some(parent) = current.parent() {
        let Some(segment) = parent.locate(current.id()) else {
            break;
        };
        prefix.insert(0, segment);
        let prefixed: Vec<OpRecord> = ops.iter().map(|op| op.prefixed(&prefix)).collect();
        deliver(&parent, &prefixed)?;
        current = parent;
    }
    Ok(())
}

fn deliver(node: &NodeRef, ops: &[OpRecord]) -> crate::Result<()> {
    // Snapshot callbacks before invoking: a callback may mutate the node
    // (rollback) and re-enter subscription management.
    let callbacks: Vec<Arc<SubscriberFn>> = node
        .meta()
        .subscribers
        .read()
        .iter()
        .map(|entry| entry.callback.clone())
        .collect();
    for callback in callbacks {
        callback(ops)?;
    }
    Ok(())
}

/// Prepare a value for storage in a node slot: wrap plain literals into
/// fresh nodes, reuse adoptable node handles, deep-clone the rest.
pub(crate) fn adopt_value(value: Value) -> Value {
    match value {
        Value::Array(items) => {
            let node = ListNode::new();
            node.fill_adopted(items);
            Value::List(node)
        }
        Value::Object(entries) => {
            let node = MapNode::new();
            node.fill_adopted(entries);
            Value::Map(node)
        }
        Value::Map(node) => {
            if node.is_adoptable() {
                Value::Map(node)
            } else {
                clone_value_deep(&Value::Map(node))
            }
        }
        Value::List(node) => {
            if node.is_adoptable() {
                Value::List(node)
            } else {
                clone_value_deep(&Value::List(node))
            }
        }
        other => other,
    }
}

/// Deep copy of a value into fresh, unbound nodes. Primitives and raw
/// shared references copy as-is.
pub(crate) fn clone_value_deep(value: &Value) -> Value {
    match value {
        Value::Map(node) => {
            let fresh = MapNode::new();
            fresh.fill_adopted(
                node.entries()
                    .into_iter()
                    .map(|(k, v)| (k, clone_value_deep(&v)))
                    .collect(),
            );
            Value::Map(fresh)
        }
        Value::List(node) => {
            let fresh = ListNode::new();
            fresh.fill_adopted(node.items().iter().map(clone_value_deep).collect());
            Value::List(fresh)
        }
        Value::Array(items) => Value::Array(items.iter().map(clone_value_deep).collect()),
        Value::Object(entries) => Value::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), clone_value_deep(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

pub(crate) fn value_meta(value: &Value) -> Option<&NodeMeta> {
    match value {
        Value::Map(node) => Some(node.meta()),
        Value::List(node) => Some(node.meta()),
        _ => None,
    }
}

/// Point `child`'s parent link at `parent`.
pub(crate) fn link_parent(child: &Value, parent: &NodeRef) {
    if let Some(meta) = value_meta(child) {
        *meta.parent.write() = Some(parent.downgrade());
    }
}

/// Clear `child`'s parent link if it still points at `parent`.
pub(crate) fn unlink_parent(child: &Value, parent: &NodeRef) {
    if let Some(meta) = value_meta(child) {
        let mut guard = meta.parent.write();
        if guard.as_ref().is_some_and(|link| link.id == parent.id()) {
            *guard = None;
        }
    }
}

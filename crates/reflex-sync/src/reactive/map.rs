//! Reactive object nodes.

use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::{
    adopt_value, emit_from, link_parent, unlink_parent, NodeId, NodeMeta, NodeRef, OpRecord,
    PathSegment, SubscriberFn, SubscriptionId,
};
use crate::value::Value;

pub(crate) struct MapNodeInner {
    meta: NodeMeta,
    entries: RwLock<IndexMap<String, Value>>,
}

/// A reactive object: string keys in insertion order.
///
/// Handles are cheap clones sharing one node. While the node mirrors a live
/// shared map it doubles as that container's controller; the bridge keeps
/// the two in sync in both directions.
#[derive(Clone)]
pub struct MapNode {
    inner: Arc<MapNodeInner>,
}

impl MapNode {
    /// Create a fresh, unattached node.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MapNodeInner {
                meta: NodeMeta::new(),
                entries: RwLock::new(IndexMap::new()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<MapNodeInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<MapNodeInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn meta(&self) -> &NodeMeta {
        &self.inner.meta
    }

    /// This node's process-unique identity.
    pub fn id(&self) -> NodeId {
        self.inner.meta.id
    }

    fn as_ref(&self) -> NodeRef {
        NodeRef::Map(self.clone())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    /// True when the node holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    /// True when `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.entries.read().contains_key(key)
    }

    /// Snapshot of the keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.inner.entries.read().keys().cloned().collect()
    }

    /// Clone of the value at `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.entries.read().get(key).cloned()
    }

    /// Snapshot of all entries in insertion order.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.inner
            .entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Write `value` under `key`.
    ///
    /// Plain array/object literals are adopted into fresh nodes; the commit
    /// is delivered synchronously to subscribers. A subscriber error (a
    /// validation failure from the bridge) propagates after the bridge has
    /// rolled the node back.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> crate::Result<()> {
        let key = key.into();
        let value = adopt_value(value.into());
        let prev = {
            let mut entries = self.inner.entries.write();
            let prev = entries.insert(key.clone(), value.clone());
            if let Some(old) = &prev {
                unlink_parent(old, &self.as_ref());
            }
            link_parent(&value, &self.as_ref());
            prev
        };
        emit_from(
            self.as_ref(),
            vec![OpRecord::set(vec![PathSegment::Key(key)], value, prev)],
        )
    }

    /// Remove `key`, returning its previous value. Removing an absent key
    /// is a no-op.
    pub fn remove(&self, key: &str) -> crate::Result<Option<Value>> {
        let prev = {
            let mut entries = self.inner.entries.write();
            let prev = entries.shift_remove(key);
            if let Some(old) = &prev {
                unlink_parent(old, &self.as_ref());
            }
            prev
        };
        let Some(prev) = prev else {
            return Ok(None);
        };
        emit_from(
            self.as_ref(),
            vec![OpRecord::delete(
                vec![PathSegment::Key(key.to_owned())],
                Some(prev.clone()),
            )],
        )?;
        Ok(Some(prev))
    }

    /// Deep copy into plain literals.
    pub fn to_plain(&self) -> Value {
        Value::Object(
            self.entries()
                .into_iter()
                .map(|(k, v)| (k, v.to_plain()))
                .collect(),
        )
    }

    /// Register a subscriber receiving the raw op batch of every commit on
    /// this node and (with prefixed paths) on its descendants.
    pub fn subscribe(
        &self,
        callback: impl Fn(&[OpRecord]) -> crate::Result<()> + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.meta.subscribe(Arc::new(callback) as Arc<SubscriberFn>)
    }

    /// Remove a subscriber. Returns false when the id was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.meta.unsubscribe(id)
    }

    /// True when this node may be adopted by identity: not in any tree and
    /// not mirroring a live shared container.
    pub(crate) fn is_adoptable(&self) -> bool {
        self.inner.meta.parent.read().is_none()
            && !self.inner.meta.bound.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Populate a fresh node during adoption. No ops are emitted: the node
    /// is not observable yet.
    pub(crate) fn fill_adopted(&self, entries: IndexMap<String, Value>) {
        let mut guard = self.inner.entries.write();
        for (key, value) in entries {
            let value = adopt_value(value);
            link_parent(&value, &self.as_ref());
            let _ = guard.insert(key, value);
        }
    }

    /// Write a slot without adoption. Used by the reconciler and rollback,
    /// which install already-materialized values; the commit is still
    /// delivered (the bridge ignores it under the reconciling lock).
    pub(crate) fn install(&self, key: impl Into<String>, value: Value) -> crate::Result<()> {
        let key = key.into();
        let prev = {
            let mut entries = self.inner.entries.write();
            let prev = entries.insert(key.clone(), value.clone());
            if let Some(old) = &prev {
                unlink_parent(old, &self.as_ref());
            }
            link_parent(&value, &self.as_ref());
            prev
        };
        emit_from(
            self.as_ref(),
            vec![OpRecord::set(vec![PathSegment::Key(key)], value, prev)],
        )
    }

    pub(crate) fn locate_child(&self, child: NodeId) -> Option<String> {
        self.inner
            .entries
            .read()
            .iter()
            .find(|(_, value)| super::value_meta(value).is_some_and(|meta| meta.id == child))
            .map(|(key, _)| key.clone())
    }
}

impl Default for MapNode {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MapNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapNode")
            .field("id", &self.id().raw())
            .field("len", &self.len())
            .finish()
    }
}

//! Reactive array nodes.
//!
//! List mutations follow splice semantics: inserting or removing in the
//! middle shifts the tail, and the emitted op batch records the shift as
//! per-index `Set` records (with previous values) plus trailing `Delete`
//! records when the list shrinks. A `Set` past the current length appends
//! locally but records the requested index, which the write scheduler's
//! tail cursor resolves against the shared sequence.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::{
    adopt_value, emit_from, link_parent, unlink_parent, NodeId, NodeMeta, NodeRef, OpRecord,
    PathSegment, SubscriberFn, SubscriptionId,
};
use crate::value::Value;

pub(crate) struct ListNodeInner {
    meta: NodeMeta,
    items: RwLock<Vec<Value>>,
}

/// A reactive array.
///
/// Handles are cheap clones sharing one node. While the node mirrors a live
/// shared sequence it doubles as that container's controller.
#[derive(Clone)]
pub struct ListNode {
    inner: Arc<ListNodeInner>,
}

impl ListNode {
    /// Create a fresh, unattached node.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ListNodeInner {
                meta: NodeMeta::new(),
                items: RwLock::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ListNodeInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ListNodeInner> {
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
        NodeRef::List(self.clone())
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.inner.items.read().len()
    }

    /// True when the list holds no items.
    pub fn is_empty(&self) -> bool {
        self.inner.items.read().is_empty()
    }

    /// Clone of the item at `index`.
    pub fn get(&self, index: usize) -> Option<Value> {
        self.inner.items.read().get(index).cloned()
    }

    /// Snapshot of all items.
    pub fn items(&self) -> Vec<Value> {
        self.inner.items.read().clone()
    }

    /// Append one item.
    pub fn push(&self, value: impl Into<Value>) -> crate::Result<()> {
        let len = self.len();
        self.splice(len as i64, 0, vec![value.into()]).map(|_| ())
    }

    /// Remove and return the last item.
    pub fn pop(&self) -> crate::Result<Option<Value>> {
        let len = self.len();
        if len == 0 {
            return Ok(None);
        }
        let removed = self.splice((len - 1) as i64, 1, Vec::new())?;
        Ok(removed.into_iter().next())
    }

    /// Insert one item at `index`, shifting the tail. The index is clamped
    /// to the current length.
    pub fn insert(&self, index: usize, value: impl Into<Value>) -> crate::Result<()> {
        self.splice(index as i64, 0, vec![value.into()]).map(|_| ())
    }

    /// Remove and return the item at `index`, shifting the tail. Removing
    /// past the end is a no-op.
    pub fn remove(&self, index: usize) -> crate::Result<Option<Value>> {
        if index >= self.len() {
            return Ok(None);
        }
        let removed = self.splice(index as i64, 1, Vec::new())?;
        Ok(removed.into_iter().next())
    }

    /// Write the item at `index`.
    ///
    /// An in-bounds write replaces the item. A write past the end fills the
    /// gap with undefined holes, like a sparse array; holes emit no ops and
    /// are never written to the shared sequence, so the next flush lands
    /// gap writes as sequential appends and the post-flush reconcile
    /// collapses the holes.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> crate::Result<()> {
        let value = adopt_value(value.into());
        let op = {
            let mut items = self.inner.items.write();
            if index < items.len() {
                let prev = std::mem::replace(&mut items[index], value.clone());
                unlink_parent(&prev, &self.as_ref());
                link_parent(&value, &self.as_ref());
                OpRecord::set(vec![PathSegment::Index(index)], value, Some(prev))
            } else {
                while items.len() < index {
                    items.push(Value::Undefined);
                }
                items.push(value.clone());
                link_parent(&value, &self.as_ref());
                OpRecord::set(vec![PathSegment::Index(index)], value, None)
            }
        };
        emit_from(self.as_ref(), vec![op])
    }

    /// Splice: remove `delete_count` items starting at `start` and insert
    /// `items` in their place, returning the removed items.
    ///
    /// A negative `start` counts from the end; out-of-range starts are
    /// clamped. There is no way to assign to the length; shrink with
    /// `splice`, `pop` or `remove`.
    pub fn splice(
        &self,
        start: i64,
        delete_count: usize,
        items: Vec<Value>,
    ) -> crate::Result<Vec<Value>> {
        let adopted: Vec<Value> = items.into_iter().map(adopt_value).collect();
        let (ops, removed) = self.splice_locked(start, delete_count, adopted);
        emit_from(self.as_ref(), ops)?;
        Ok(removed)
    }

    fn splice_locked(
        &self,
        start: i64,
        delete_count: usize,
        adopted: Vec<Value>,
    ) -> (Vec<OpRecord>, Vec<Value>) {
        let mut guard = self.inner.items.write();
        let old_len = guard.len();
        let start = normalize_start(start, old_len);
        let delete_count = delete_count.min(old_len - start);

        let old_suffix: Vec<Value> = guard[start..].to_vec();
        let removed: Vec<Value> = guard
            .splice(start..start + delete_count, adopted.clone())
            .collect();
        let new_suffix: Vec<Value> = guard[start..].to_vec();

        for value in &removed {
            unlink_parent(value, &self.as_ref());
        }
        for value in &adopted {
            link_parent(value, &self.as_ref());
        }

        let mut ops = Vec::new();
        let longest = old_suffix.len().max(new_suffix.len());
        for offset in 0..longest {
            let index = start + offset;
            match (new_suffix.get(offset), old_suffix.get(offset)) {
                (Some(new), Some(old)) => {
                    if new != old {
                        ops.push(OpRecord::set(
                            vec![PathSegment::Index(index)],
                            new.clone(),
                            Some(old.clone()),
                        ));
                    }
                }
                (Some(new), None) => {
                    ops.push(OpRecord::set(
                        vec![PathSegment::Index(index)],
                        new.clone(),
                        None,
                    ));
                }
                (None, Some(old)) => {
                    ops.push(OpRecord::delete(
                        vec![PathSegment::Index(index)],
                        Some(old.clone()),
                    ));
                }
                (None, None) => {}
            }
        }
        (ops, removed)
    }

    /// Deep copy into plain literals.
    pub fn to_plain(&self) -> Value {
        Value::Array(self.items().iter().map(Value::to_plain).collect())
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

    pub(crate) fn is_adoptable(&self) -> bool {
        self.inner.meta.parent.read().is_none()
            && !self.inner.meta.bound.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Populate a fresh node during adoption. No ops are emitted.
    pub(crate) fn fill_adopted(&self, items: Vec<Value>) {
        let mut guard = self.inner.items.write();
        for value in items {
            let value = adopt_value(value);
            link_parent(&value, &self.as_ref());
            guard.push(value);
        }
    }

    /// Clone of `count` items starting at `start`, clamped to bounds.
    pub(crate) fn slice(&self, start: usize, count: usize) -> Vec<Value> {
        let items = self.inner.items.read();
        let start = start.min(items.len());
        let end = (start + count).min(items.len());
        items[start..end].to_vec()
    }

    /// Splice without adoption. Used by the reconciler, which installs
    /// already-materialized values; the commit is still delivered (the
    /// bridge ignores it under the reconciling lock).
    pub(crate) fn splice_installed(
        &self,
        start: usize,
        delete_count: usize,
        items: Vec<Value>,
    ) -> crate::Result<Vec<Value>> {
        let (ops, removed) = self.splice_locked(start as i64, delete_count, items);
        emit_from(self.as_ref(), ops)?;
        Ok(removed)
    }

    /// Replace the whole contents with `items`, preserving the identity of
    /// retained values. Used by the reconciler's structural resync.
    pub(crate) fn replace_all(&self, items: Vec<Value>) -> crate::Result<()> {
        let len = self.len();
        self.splice_installed(0, len, items).map(|_| ())
    }

    pub(crate) fn locate_child(&self, child: NodeId) -> Option<usize> {
        self.inner
            .items
            .read()
            .iter()
            .position(|value| super::value_meta(value).is_some_and(|meta| meta.id == child))
    }
}

impl Default for ListNode {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ListNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListNode")
            .field("id", &self.id().raw())
            .field("len", &self.len())
            .finish()
    }
}

fn normalize_start(start: i64, len: usize) -> usize {
    if start < 0 {
        let from_end = len as i64 + start;
        from_end.max(0) as usize
    } else {
        (start as usize).min(len)
    }
}

#[cfg(test)]
mod tests {
    use super::super::OpKind;
    use super::*;
    use parking_lot::Mutex;

    fn collect_ops(node: &ListNode) -> Arc<Mutex<Vec<OpRecord>>> {
        let seen: Arc<Mutex<Vec<OpRecord>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _ = node.subscribe(move |ops| {
            sink.lock().extend(ops.iter().cloned());
            Ok(())
        });
        seen
    }

    #[test]
    fn push_emits_a_set_past_the_end() {
        let node = ListNode::new();
        let seen = collect_ops(&node);
        node.push(1.0).expect("push");

        let ops = seen.lock();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].index(), Some(0));
        assert!(matches!(ops[0].kind, OpKind::Set { prev: None, .. }));
    }

    #[test]
    fn pop_emits_a_delete_at_the_last_index() {
        let node = ListNode::new();
        node.push(1.0).expect("push");
        let seen = collect_ops(&node);
        assert_eq!(node.pop().expect("pop"), Some(Value::Number(1.0)));

        let ops = seen.lock();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].index(), Some(0));
        assert!(matches!(ops[0].kind, OpKind::Delete { .. }));
    }

    #[test]
    fn middle_insert_shifts_the_tail() {
        let node = ListNode::new();
        node.push("a").expect("push");
        node.push("c").expect("push");
        let seen = collect_ops(&node);
        node.insert(1, "b").expect("insert");

        assert_eq!(
            node.items(),
            vec![Value::from("a"), Value::from("b"), Value::from("c")]
        );
        // Index 1 is replaced (prev "c"), index 2 is a fresh append.
        let ops = seen.lock();
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[0].kind, OpKind::Set { prev: Some(p), .. } if *p == Value::from("c")));
        assert!(matches!(&ops[1].kind, OpKind::Set { prev: None, .. }));
    }

    #[test]
    fn splice_replacement_skips_untouched_tail() {
        let node = ListNode::new();
        for item in ["a", "b", "c"] {
            node.push(item).expect("push");
        }
        let seen = collect_ops(&node);
        let removed = node.splice(1, 1, vec![Value::from("x")]).expect("splice");

        assert_eq!(removed, vec![Value::from("b")]);
        let ops = seen.lock();
        // Only index 1 changed; "c" at index 2 is untouched.
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].index(), Some(1));
    }

    #[test]
    fn shrinking_splice_emits_tail_deletes() {
        let node = ListNode::new();
        for item in ["a", "b", "c"] {
            node.push(item).expect("push");
        }
        let seen = collect_ops(&node);
        node.splice(0, 2, vec![Value::from("x")]).expect("splice");

        assert_eq!(node.items(), vec![Value::from("x"), Value::from("c")]);
        let ops = seen.lock();
        let deletes = ops
            .iter()
            .filter(|op| matches!(op.kind, OpKind::Delete { .. }))
            .count();
        assert_eq!(deletes, 1);
    }

    #[test]
    fn negative_splice_start_counts_from_the_end() {
        let node = ListNode::new();
        for item in ["a", "b", "c"] {
            node.push(item).expect("push");
        }
        let removed = node.splice(-1, 1, Vec::new()).expect("splice");
        assert_eq!(removed, vec![Value::from("c")]);
        assert_eq!(node.len(), 2);
    }

    #[test]
    fn gap_set_leaves_holes_and_records_the_requested_index() {
        let node = ListNode::new();
        node.push("a").expect("push");
        let seen = collect_ops(&node);
        node.set(2, "v2").expect("set");
        node.set(3, "v3").expect("set");

        assert_eq!(
            node.items(),
            vec![
                Value::from("a"),
                Value::Undefined,
                Value::from("v2"),
                Value::from("v3"),
            ]
        );
        // Holes emit no ops; only the requested indices are recorded.
        let ops = seen.lock();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].index(), Some(2));
        assert_eq!(ops[1].index(), Some(3));
    }

    #[test]
    fn replace_all_preserves_retained_identity() {
        let node = ListNode::new();
        node.push(Value::object([("x", 1.0)])).expect("push");
        let Some(Value::Map(kept)) = node.get(0) else {
            panic!("expected adopted node");
        };
        node.replace_all(vec![Value::Map(kept.clone()), Value::from("new")])
            .expect("replace");
        assert_eq!(node.get(0), Some(Value::Map(kept)));
        assert_eq!(node.len(), 2);
    }
}

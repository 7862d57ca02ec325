//! Shared synchronization state.
//!
//! One instance per attached mirror. Holds the bijection between shared
//! containers and their controllers, the per-container subscription
//! registry, the recursion-safe reconciling flag, and the per-pass
//! delta-skip set. Caches are keyed by stable identities (branch id on the
//! document side, node id on the reactive side) and evicted explicitly on
//! cleanup and dispose — the handle-arena rendition of weak maps.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;
use yrs::branch::BranchID;

use crate::reactive::{NodeId, NodeRef, SubscriptionId};
use crate::shared::SharedContainer;

/// A controller registration: the shared container and its reactive mirror.
#[derive(Clone)]
pub(crate) struct ControllerEntry {
    pub shared: SharedContainer,
    pub node: NodeRef,
}

/// One registered reactive-side subscription, undone on eviction.
pub(crate) struct NodeSubscription {
    pub node: NodeRef,
    pub subscription: SubscriptionId,
}

impl NodeSubscription {
    fn release(self) {
        let removed = match &self.node {
            NodeRef::Map(node) => node.unsubscribe(self.subscription),
            NodeRef::List(node) => node.unsubscribe(self.subscription),
        };
        if !removed {
            // Teardown is best-effort: a subscription that is already gone
            // must not block releasing the others.
            debug!("subscription was already released");
        }
    }
}

/// Process-local synchronization state for one mirror.
pub(crate) struct SyncState {
    controllers: RwLock<HashMap<BranchID, ControllerEntry>>,
    reverse: RwLock<HashMap<NodeId, SharedContainer>>,
    subscriptions: Mutex<HashMap<BranchID, NodeSubscription>>,
    disposables: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    reconciling: AtomicBool,
    delta_skip: Mutex<HashSet<BranchID>>,
}

impl SyncState {
    pub fn new() -> Self {
        Self {
            controllers: RwLock::new(HashMap::new()),
            reverse: RwLock::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            disposables: Mutex::new(Vec::new()),
            reconciling: AtomicBool::new(false),
            delta_skip: Mutex::new(HashSet::new()),
        }
    }

    /// True while a reconcile pass (or rollback, or post-flush upgrade) is
    /// writing into the reactive tree. Local subscriptions must not reflect
    /// such writes back to the document.
    pub fn is_reconciling(&self) -> bool {
        self.reconciling.load(Ordering::Acquire)
    }

    /// Enter a reconciling section. The guard restores the *previous* flag
    /// value on drop, so nested sections are safe.
    pub fn begin_reconcile(self: &Arc<Self>) -> ReconcileGuard {
        let previous = self.reconciling.swap(true, Ordering::AcqRel);
        ReconcileGuard {
            state: Arc::clone(self),
            previous,
        }
    }

    /// Register the (container, controller) pair in both directions.
    pub fn register_controller(&self, entry: ControllerEntry) {
        let id = entry.shared.id();
        let node_id = entry.node.id();
        let _ = self.reverse.write().insert(node_id, entry.shared.clone());
        let _ = self.controllers.write().insert(id, entry);
    }

    /// Forward lookup: container identity to controller entry.
    pub fn lookup_controller(&self, id: &BranchID) -> Option<ControllerEntry> {
        self.controllers.read().get(id).cloned()
    }

    /// Reverse lookup: node identity to shared container.
    pub fn lookup_shared(&self, node: NodeId) -> Option<SharedContainer> {
        self.reverse.read().get(&node).cloned()
    }

    /// Evict a pair from both caches and release its subscription.
    pub fn evict(&self, id: &BranchID) -> Option<ControllerEntry> {
        if let Some(subscription) = self.subscriptions.lock().remove(id) {
            subscription.release();
        }
        let entry = self.controllers.write().remove(id);
        if let Some(entry) = &entry {
            let _ = self.reverse.write().remove(&entry.node.id());
        }
        entry
    }

    /// Register the reactive-side subscription for a container, releasing
    /// any prior one.
    pub fn register_subscription(&self, id: BranchID, subscription: NodeSubscription) {
        if let Some(prior) = self.subscriptions.lock().insert(id, subscription) {
            prior.release();
        }
    }

    /// Register an arbitrary teardown action run at dispose.
    pub fn register_disposable(&self, disposable: impl FnOnce() + Send + 'static) {
        self.disposables.lock().push(Box::new(disposable));
    }

    /// Release every subscription, run every disposable, and clear all
    /// caches. Teardown is best-effort; individual failures are logged and
    /// swallowed.
    pub fn dispose_all(&self) {
        let subscriptions: Vec<NodeSubscription> =
            self.subscriptions.lock().drain().map(|(_, sub)| sub).collect();
        for subscription in subscriptions {
            subscription.release();
        }

        let disposables: Vec<Box<dyn FnOnce() + Send>> =
            self.disposables.lock().drain(..).collect();
        debug!(count = disposables.len(), "running disposables");
        for disposable in disposables {
            disposable();
        }

        for (_, entry) in self.controllers.write().drain() {
            entry.node.set_bound(false);
        }
        self.reverse.write().clear();
        self.delta_skip.lock().clear();
    }

    /// Mark a sequence as having received a granular delta this pass.
    pub fn mark_delta(&self, id: BranchID) {
        let _ = self.delta_skip.lock().insert(id);
    }

    /// True when the sequence received a granular delta this pass and must
    /// skip structural reconciliation.
    pub fn has_delta(&self, id: &BranchID) -> bool {
        self.delta_skip.lock().contains(id)
    }

    /// Clear the per-pass delta-skip set.
    pub fn clear_delta_skip(&self) {
        self.delta_skip.lock().clear();
    }
}

/// Save-and-restore guard for the reconciling flag.
pub(crate) struct ReconcileGuard {
    state: Arc<SyncState>,
    previous: bool,
}

impl Drop for ReconcileGuard {
    fn drop(&mut self) {
        self.state.reconciling.store(self.previous, Ordering::Release);
    }
}

/// Clears the delta-skip set when dropped, so a failing reconcile pass
/// cannot leak skip marks into the next pass.
pub(crate) struct DeltaSkipReset {
    state: Arc<SyncState>,
}

impl DeltaSkipReset {
    pub fn new(state: Arc<SyncState>) -> Self {
        Self { state }
    }
}

impl Drop for DeltaSkipReset {
    fn drop(&mut self) {
        self.state.clear_delta_skip();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::MapNode;
    use yrs::{Doc, Map, Transact};

    fn map_entry(doc: &Doc, name: &str) -> ControllerEntry {
        let map = doc.get_or_insert_map(name);
        ControllerEntry {
            shared: SharedContainer::Map(map),
            node: NodeRef::Map(MapNode::new()),
        }
    }

    #[test]
    fn bijection_agrees_in_both_directions() {
        let doc = Doc::new();
        let state = SyncState::new();
        let entry = map_entry(&doc, "root");
        let shared_id = entry.shared.id();
        let node_id = entry.node.id();
        state.register_controller(entry);

        let forward = state.lookup_controller(&shared_id).expect("forward");
        assert_eq!(forward.node.id(), node_id);
        let reverse = state.lookup_shared(node_id).expect("reverse");
        assert_eq!(reverse.id(), shared_id);
    }

    #[test]
    fn evict_clears_both_directions() {
        let doc = Doc::new();
        let state = SyncState::new();
        let entry = map_entry(&doc, "root");
        let shared_id = entry.shared.id();
        let node_id = entry.node.id();
        state.register_controller(entry);

        assert!(state.evict(&shared_id).is_some());
        assert!(state.lookup_controller(&shared_id).is_none());
        assert!(state.lookup_shared(node_id).is_none());
    }

    #[test]
    fn reconcile_guard_is_recursion_safe() {
        let state = Arc::new(SyncState::new());
        assert!(!state.is_reconciling());
        {
            let _outer = state.begin_reconcile();
            assert!(state.is_reconciling());
            {
                let _inner = state.begin_reconcile();
                assert!(state.is_reconciling());
            }
            // The inner guard restores the previous value, not `false`.
            assert!(state.is_reconciling());
        }
        assert!(!state.is_reconciling());
    }

    #[test]
    fn delta_skip_set_is_per_pass() {
        let doc = Doc::new();
        let state = Arc::new(SyncState::new());
        let map = doc.get_or_insert_map("root");
        let id = {
            let _txn = doc.transact();
            crate::shared::branch_id(&map)
        };

        {
            let _reset = DeltaSkipReset::new(Arc::clone(&state));
            state.mark_delta(id.clone());
            assert!(state.has_delta(&id));
        }
        assert!(!state.has_delta(&id));
    }

    #[test]
    fn re_registering_a_subscription_releases_the_prior_one() {
        let doc = Doc::new();
        let state = SyncState::new();
        let map = doc.get_or_insert_map("root");
        let id = crate::shared::branch_id(&map);

        let node = MapNode::new();
        let first = node.subscribe(|_| Ok(()));
        state.register_subscription(
            id.clone(),
            NodeSubscription {
                node: NodeRef::Map(node.clone()),
                subscription: first,
            },
        );
        let second = node.subscribe(|_| Ok(()));
        state.register_subscription(
            id,
            NodeSubscription {
                node: NodeRef::Map(node.clone()),
                subscription: second,
            },
        );
        // The first subscription is gone; unsubscribing it again reports
        // false, while the second is still active.
        assert!(!node.unsubscribe(first));
        assert!(node.unsubscribe(second));
    }
}

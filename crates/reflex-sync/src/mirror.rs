//! The mirror façade: attach a reactive tree to a document root, flush
//! local writes, bootstrap initial data, dispose.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;
use yrs::{Array, DeepObservable, Doc, Map, Origin, Subscription, Transact};

use crate::bridge;
use crate::error::{SyncError, ValidationError};
use crate::convert::value_to_prelim;
use crate::reactive::{ListNode, MapNode, NodeRef};
use crate::reconcile;
use crate::scheduler::WriteScheduler;
use crate::shared::SharedContainer;
use crate::state::SyncState;
use crate::validate::validate_deep;
use crate::value::Value;

/// Selects the document root container to mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Root {
    /// A root-level shared map with the given name.
    Map(String),
    /// A root-level shared sequence with the given name.
    List(String),
}

impl Root {
    /// Root-level shared map.
    pub fn map(name: impl Into<String>) -> Self {
        Root::Map(name.into())
    }

    /// Root-level shared sequence.
    pub fn list(name: impl Into<String>) -> Self {
        Root::List(name.into())
    }
}

/// Attachment options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorOptions {
    /// Overrides the transaction origin tag. Defaults to a process-unique
    /// tag, so two mirrors over one document treat each other as remote.
    pub origin_tag: Option<String>,
}

/// Shared internals of one attached mirror.
pub(crate) struct MirrorCore {
    pub doc: Doc,
    pub state: Arc<SyncState>,
    pub scheduler: WriteScheduler,
    pub origin: Origin,
    pub root: SharedContainer,
    root_node: RwLock<Option<NodeRef>>,
    pending_failure: Mutex<Option<SyncError>>,
    disposed: AtomicBool,
}

/// A live bidirectional bridge between a reactive tree and one document
/// root.
///
/// Mutations made through the root node (and its descendants) queue into
/// the write scheduler and commit as one tagged document transaction at
/// [`flush`](Self::flush). Remote document updates reconcile into the tree
/// synchronously inside the document's observer callback.
///
/// Dropping the mirror disposes it.
pub struct DocMirror {
    core: Arc<MirrorCore>,
}

impl DocMirror {
    /// Attach to `doc` at the selected root with default options.
    pub fn attach(doc: &Doc, root: Root) -> crate::Result<Self> {
        Self::attach_with(doc, root, MirrorOptions::default())
    }

    /// Attach to `doc` at the selected root.
    ///
    /// Existing document content is materialized into the tree immediately;
    /// from then on the two sides stay synchronized until
    /// [`dispose`](Self::dispose).
    pub fn attach_with(doc: &Doc, root: Root, options: MirrorOptions) -> crate::Result<Self> {
        let shared = match &root {
            Root::Map(name) => SharedContainer::Map(doc.get_or_insert_map(name.as_str())),
            Root::List(name) => SharedContainer::List(doc.get_or_insert_array(name.as_str())),
        };
        let tag = options
            .origin_tag
            .unwrap_or_else(|| format!("reflex-sync/{}", Uuid::new_v4()));
        let core = Arc::new(MirrorCore {
            doc: doc.clone(),
            state: Arc::new(SyncState::new()),
            scheduler: WriteScheduler::new(),
            origin: Origin::from(tag.as_str()),
            root: shared.clone(),
            root_node: RwLock::new(None),
            pending_failure: Mutex::new(None),
            disposed: AtomicBool::new(false),
        });

        let node = {
            let txn = core.doc.transact();
            bridge::materialize_container(&core, &txn, shared.clone())?
        };
        *core.root_node.write() = Some(node);

        let weak = Arc::downgrade(&core);
        let handler = move |txn: &yrs::TransactionMut<'_>, events: &yrs::types::Events| {
            let Some(core) = weak.upgrade() else {
                return;
            };
            if let Err(err) = reconcile::handle_deep_events(&core, txn, events) {
                // Reconciliation failures indicate corruption; there is no
                // local recovery. Surface the error to the next flush.
                error!(error = %err, "reconciliation failed");
                *core.pending_failure.lock() = Some(err);
            }
        };
        let subscription: Subscription = match &shared {
            SharedContainer::Map(map) => map.observe_deep(handler),
            SharedContainer::List(list) => list.observe_deep(handler),
        };
        // The observer lives in the disposable registry: dropping it there
        // at teardown detaches the mirror from the document.
        core.state.register_disposable(move || drop(subscription));

        debug!(root = ?root, "mirror attached");
        Ok(Self { core })
    }

    /// The mirrored root as a map node. `None` when the root is a sequence.
    pub fn root_map(&self) -> Option<MapNode> {
        match &*self.core.root_node.read() {
            Some(NodeRef::Map(node)) => Some(node.clone()),
            _ => None,
        }
    }

    /// The mirrored root as a list node. `None` when the root is a map.
    pub fn root_list(&self) -> Option<ListNode> {
        match &*self.core.root_node.read() {
            Some(NodeRef::List(node)) => Some(node.clone()),
            _ => None,
        }
    }

    /// The mirrored root as a value.
    pub fn root_value(&self) -> Option<Value> {
        self.core.root_node.read().as_ref().map(NodeRef::as_value)
    }

    /// The underlying document.
    pub fn doc(&self) -> &Doc {
        &self.core.doc
    }

    /// The mirrored root container.
    pub fn root_container(&self) -> &SharedContainer {
        &self.core.root
    }

    /// True when no local writes are waiting for a flush.
    pub fn is_idle(&self) -> bool {
        self.core.scheduler.is_empty()
    }

    /// Commit every queued local write in one tagged document transaction.
    ///
    /// This is the explicit commit point standing in for a microtask: all
    /// mutations made since the previous flush merge into a single batch,
    /// and remote observers see one atomic update. Flushing with an empty
    /// queue is a no-op.
    pub fn flush(&self) -> crate::Result<()> {
        if let Some(err) = self.core.pending_failure.lock().take() {
            return Err(err);
        }
        self.core.scheduler.flush(&self.core)
    }

    /// Seed the document root inside one transaction, then reconcile
    /// locally.
    ///
    /// The emptiness check runs inside the same transaction as the writes,
    /// so a concurrent update cannot slip between check and set. A
    /// non-empty root refuses the write with a warning — refusal is a
    /// diagnostic, not an error. Every entry is validated before anything
    /// is written.
    pub fn bootstrap(&self, data: Option<Value>) -> crate::Result<()> {
        {
            let mut txn = self.core.doc.transact_mut_with(self.core.origin.clone());
            let empty = match &self.core.root {
                SharedContainer::Map(map) => map.len(&txn) == 0,
                SharedContainer::List(list) => list.len(&txn) == 0,
            };
            if !empty {
                warn!("bootstrap refused: the document root is not empty");
            } else if let Some(data) = &data {
                match (&self.core.root, data) {
                    (SharedContainer::Map(map), Value::Object(entries)) => {
                        for value in entries.values() {
                            validate_deep(value)?;
                        }
                        for (key, value) in entries {
                            let prelim = value_to_prelim(value)?;
                            let _ = map.insert(&mut txn, key.as_str(), prelim);
                        }
                    }
                    (SharedContainer::List(list), Value::Array(items)) => {
                        for value in items {
                            validate_deep(value)?;
                        }
                        for (index, value) in items.iter().enumerate() {
                            let prelim = value_to_prelim(value)?;
                            let _ = list.insert(&mut txn, index as u32, prelim);
                        }
                    }
                    (_, other) => {
                        return Err(SyncError::Validation(ValidationError::NotPlain {
                            kind: "bootstrap payload of mismatched shape",
                            value: other.clone(),
                        }));
                    }
                }
            }
        }

        // Our own origin keeps the observer quiet; reconcile locally.
        let txn = self.core.doc.transact();
        reconcile::reconcile_container(&self.core, &txn, &self.core.root)
    }

    /// Tear down: stop observing the document, drop queued writes, release
    /// every subscription and clear the caches. Idempotent; teardown is
    /// best-effort.
    pub fn dispose(&self) {
        if self.core.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("disposing mirror");
        self.core.scheduler.clear();
        self.core.state.dispose_all();
        *self.core.root_node.write() = None;
    }

    #[cfg(test)]
    pub(crate) fn core_for_tests(&self) -> Arc<MirrorCore> {
        Arc::clone(&self.core)
    }
}

impl Drop for DocMirror {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for DocMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocMirror")
            .field("root", &self.core.root)
            .field("disposed", &self.core.disposed.load(Ordering::Acquire))
            .finish()
    }
}

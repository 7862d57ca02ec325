//! # Reflex Sync
//!
//! A bidirectional bridge that keeps a user-facing reactive state tree and
//! a Y-CRDT shared document in continuous, lossless synchronization.
//! Applications mutate state through ordinary nested map/list handles; the
//! bridge translates those mutations into minimal document operations and,
//! in the opposite direction, materializes document updates (local or
//! remote) back into the reactive tree while preserving node identity.
//!
//! # Architecture
//!
//! Five cooperating subsystems around one shared state holder:
//!
//! - **Synchronization state** (`state`): the container/controller
//!   bijection, the subscription registry, the recursion-safe reconciling
//!   flag and the per-pass delta-skip set.
//! - **Validator/converter** (`validate`, `convert`): deep validation of
//!   outgoing values and conversion between plain trees and document
//!   prelims, with strict re-parenting rules.
//! - **Bridge/router** (`bridge`): per-controller subscriptions, local op
//!   planning, rollback, and post-flush child upgrades.
//! - **Write scheduler** (`scheduler`) and **apply layer** (`apply`):
//!   per-commit-point batching, temporal merging by sequence number,
//!   doomed-subtree purging, and execution inside one tagged document
//!   transaction (with bulk head/tail coalescing and the tail-cursor
//!   insertion strategy).
//! - **Reconciler** (`reconcile`): structural and granular-delta
//!   materialization of document events into the tree, boundary routing,
//!   and cleanup of removed subtrees.
//!
//! # Example
//!
//! ```rust,ignore
//! use reflex_sync::{DocMirror, Root, Value};
//! use yrs::Doc;
//!
//! let doc = Doc::new();
//! let mirror = DocMirror::attach(&doc, Root::map("state"))?;
//! let root = mirror.root_map().unwrap();
//!
//! root.insert("todos", Value::array([
//!     Value::object([("title", "write docs".into()), ("done", false.into())]),
//! ]))?;
//! mirror.flush()?; // one document transaction, tagged with our origin
//! # Ok::<(), reflex_sync::SyncError>(())
//! ```
//!
//! # Execution model
//!
//! Single-threaded cooperative. There is no background work: mutations are
//! synchronous, the flush runs at the explicit commit point
//! ([`DocMirror::flush`]), and remote reconciliation runs inside the
//! document's observer callback. A validation failure throws to the
//! mutating caller after rolling the tree back; the scheduler never sees
//! rolled-back ops.

mod apply;
mod bridge;
/// Plain/shared value conversion.
mod convert;
/// Error taxonomy.
mod error;
/// The mirror façade.
mod mirror;
/// Convenience re-exports.
pub mod prelude;
/// The reactive state tree.
mod reactive;
mod reconcile;
mod scheduler;
/// Shared-container handles and identity.
mod shared;
mod state;
/// Deep validation of outgoing values.
mod validate;
/// The user-facing value domain.
mod value;

pub use convert::shared_to_plain;
pub use error::{
    ApplyBucket, ReconcileError, ReconcileKind, Result, SyncError, TransactionError,
    ValidationError,
};
pub use mirror::{DocMirror, MirrorOptions, Root};
pub use reactive::{ListNode, MapNode, NodeId, OpKind, OpRecord, PathSegment, SubscriptionId};
pub use shared::SharedContainer;
pub use validate::validate_deep;
pub use value::Value;

/// Keys starting with this prefix are reserved for internal bookkeeping:
/// the write filter drops them and the reconciler excludes them from the
/// key union. The spelling is a compatibility token shared by writer and
/// reconciler; it carries no other meaning.
pub const RESERVED_KEY_PREFIX: &str = "__reflex_";

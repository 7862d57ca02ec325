//! Error taxonomy for the bridge.
//!
//! Three top-level kinds, each with exhaustive subtypes:
//!
//! - [`ValidationError`] — a value offered to the shared document is outside
//!   the permitted domain. Thrown synchronously on the mutating call path,
//!   after the reactive container has been rolled back.
//! - [`TransactionError`] — an apply bucket failed inside the document
//!   transaction; carries the bucket name and the underlying cause.
//! - [`ReconcileError`] — materializing document state back into the
//!   reactive tree failed. These indicate corruption or library bugs; no
//!   local recovery is attempted.

use crate::value::Value;

/// Crate-wide result alias.
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

/// Any failure surfaced by the bridge.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A value failed deep validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// A flush transaction failed while applying a bucket.
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    /// Reconciling document state into the reactive tree failed.
    #[error(transparent)]
    Reconciliation(#[from] ReconcileError),
}

/// A value rejected before entering the shared document.
///
/// The variants are exhaustive over the representable rejection kinds so
/// that `match` sites are forced to handle new ones.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// `Undefined` offered as a top-level value.
    #[error("undefined cannot be stored in the shared document")]
    Undefined,
    /// `Undefined` nested inside a container value.
    #[error("undefined cannot be stored inside a container (at {path})")]
    UndefinedEntry {
        /// Path from the offered root to the offending entry.
        path: String,
    },
    /// 64-bit integers have no shared-document representation.
    #[error("big integer {value} cannot be stored in the shared document")]
    BigInt {
        /// The offending integer.
        value: i64,
    },
    /// NaN and infinities have no shared-document representation.
    #[error("non-finite number {value} cannot be stored in the shared document")]
    NonFinite {
        /// The offending number.
        value: f64,
    },
    /// A value that is not a plain object/array/primitive.
    #[error("{kind} values cannot be stored in the shared document")]
    NotPlain {
        /// Short description of the offending shape.
        kind: &'static str,
        /// The offending value.
        value: Value,
    },
    /// A shared container that already lives in a document cannot be moved
    /// under a new parent.
    #[error("shared container is already attached and cannot be re-parented")]
    Reparent {
        /// The offending reference.
        value: Value,
    },
}

/// The apply bucket a transaction failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyBucket {
    /// Map key deletions.
    MapDeletes,
    /// Map key insertions/updates.
    MapSets,
    /// Sequence replaces, deletes and inserts.
    SequenceOperations,
}

impl std::fmt::Display for ApplyBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ApplyBucket::MapDeletes => "map-deletes",
            ApplyBucket::MapSets => "map-sets",
            ApplyBucket::SequenceOperations => "sequence-operations",
        };
        f.write_str(name)
    }
}

/// A flush transaction failed while applying one bucket of the merged plan.
///
/// The document unwinds its own transaction state; the reactive side is
/// re-synchronized from the document by the post-flush finalize pass.
#[derive(Debug, thiserror::Error)]
#[error("shared-document transaction failed in {bucket} bucket")]
pub struct TransactionError {
    /// The bucket that failed.
    pub bucket: ApplyBucket,
    /// The underlying failure.
    #[source]
    pub source: Box<SyncError>,
}

impl TransactionError {
    pub(crate) fn wrap(bucket: ApplyBucket, source: SyncError) -> Self {
        Self {
            bucket,
            source: Box::new(source),
        }
    }
}

/// The container kind a reconciliation failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileKind {
    /// Map reconciliation.
    Map,
    /// Sequence reconciliation.
    Sequence,
}

impl std::fmt::Display for ReconcileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileKind::Map => f.write_str("map"),
            ReconcileKind::Sequence => f.write_str("sequence"),
        }
    }
}

/// Reconciling document state into the reactive tree failed.
#[derive(Debug, thiserror::Error)]
#[error("{kind} reconciliation failed: {detail}")]
pub struct ReconcileError {
    /// The container kind being reconciled.
    pub kind: ReconcileKind,
    /// What went wrong.
    pub detail: String,
    /// The underlying failure, when one exists.
    #[source]
    pub source: Option<Box<SyncError>>,
}

impl ReconcileError {
    pub(crate) fn new(kind: ReconcileKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            source: None,
        }
    }

    pub(crate) fn with_source(
        kind: ReconcileKind,
        detail: impl Into<String>,
        source: SyncError,
    ) -> Self {
        Self {
            kind,
            detail: detail.into(),
            source: Some(Box::new(source)),
        }
    }
}

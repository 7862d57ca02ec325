//! Identity and handles for shared-document containers.
//!
//! Container identity is the document branch id, which is stable for the
//! lifetime of the document. All synchronization caches are keyed by it; the
//! strong container references travel alongside so no document walk is
//! needed to reach a cached target.

use yrs::branch::{Branch, BranchID};
use yrs::{ArrayRef, MapRef};

/// Stable identity of a shared container within its document.
pub(crate) fn branch_id<T: AsRef<Branch>>(shared: &T) -> BranchID {
    shared.as_ref().id()
}

/// A mirrored shared container: either a string-keyed map or an
/// integer-indexed sequence.
#[derive(Clone)]
pub enum SharedContainer {
    /// A shared map.
    Map(MapRef),
    /// A shared sequence.
    List(ArrayRef),
}

impl SharedContainer {
    /// The container's stable identity.
    pub(crate) fn id(&self) -> BranchID {
        match self {
            SharedContainer::Map(map) => branch_id(map),
            SharedContainer::List(list) => branch_id(list),
        }
    }

    /// Borrow the map reference, if this is a map.
    pub fn as_map(&self) -> Option<&MapRef> {
        match self {
            SharedContainer::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Borrow the sequence reference, if this is a sequence.
    pub fn as_list(&self) -> Option<&ArrayRef> {
        match self {
            SharedContainer::List(list) => Some(list),
            _ => None,
        }
    }
}

impl std::fmt::Debug for SharedContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SharedContainer::Map(_) => write!(f, "SharedContainer::Map({:?})", self.id()),
            SharedContainer::List(_) => write!(f, "SharedContainer::List({:?})", self.id()),
        }
    }
}

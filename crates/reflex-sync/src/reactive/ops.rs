//! Raw operation records delivered to subscribers per commit.

use crate::value::Value;

/// One step in a path from a subscribed node down to a mutated slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// A map key.
    Key(String),
    /// A list index, as it was at commit time.
    Index(usize),
}

/// The mutation kind of a single record.
#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    /// A slot was written. `prev` is `None` when the slot did not exist
    /// before the commit (new map key, or a list index at or past the old
    /// length).
    Set {
        /// The value now in the slot.
        value: Value,
        /// The value previously in the slot, if any.
        prev: Option<Value>,
    },
    /// A slot was removed.
    Delete {
        /// The value previously in the slot.
        prev: Option<Value>,
    },
}

/// One raw mutation record. A single commit delivers an ordered batch of
/// these; records observed through an ancestor's subscription carry longer
/// paths.
#[derive(Debug, Clone, PartialEq)]
pub struct OpRecord {
    /// Path from the subscribed node to the mutated slot; the final segment
    /// names the slot itself. Length 1 means an own-level change.
    pub path: Vec<PathSegment>,
    /// What happened to the slot.
    pub kind: OpKind,
}

impl OpRecord {
    pub(crate) fn set(path: Vec<PathSegment>, value: Value, prev: Option<Value>) -> Self {
        Self {
            path,
            kind: OpKind::Set { value, prev },
        }
    }

    pub(crate) fn delete(path: Vec<PathSegment>, prev: Option<Value>) -> Self {
        Self {
            path,
            kind: OpKind::Delete { prev },
        }
    }

    /// The map key this record targets, when it is an own-level map change.
    pub fn key(&self) -> Option<&str> {
        match self.path.as_slice() {
            [PathSegment::Key(key)] => Some(key),
            _ => None,
        }
    }

    /// The list index this record targets, when it is an own-level list
    /// change.
    pub fn index(&self) -> Option<usize> {
        match self.path.as_slice() {
            [PathSegment::Index(index)] => Some(*index),
            _ => None,
        }
    }

    pub(crate) fn prefixed(&self, prefix: &[PathSegment]) -> Self {
        let mut path = Vec::with_capacity(prefix.len() + self.path.len());
        path.extend_from_slice(prefix);
        path.extend(self.path.iter().cloned());
        Self {
            path,
            kind: self.kind.clone(),
        }
    }
}

//! User-facing value domain for the reactive tree.
//!
//! `Value` is what applications read from and write into the mirrored state:
//! plain primitives, plain array/object literals (adopted into reactive nodes
//! on write), reactive node handles, and raw shared-document references. The
//! permitted domain for *outgoing* values is enforced by [`crate::validate`];
//! this module only models the shapes and their conversions.

use std::sync::Arc;

use indexmap::IndexMap;
use yrs::{Any, ArrayRef, MapRef, TextRef};

use crate::reactive::{ListNode, MapNode};
use crate::shared::branch_id;

/// A value held in (or assigned into) the reactive tree.
///
/// The `Undefined`, `BigInt` and `Bytes` variants are representable so that
/// assigning them produces the corresponding validation failure instead of a
/// silent coercion; they never survive into the shared document. Raw shared
/// references (`SharedMap`/`SharedList`/`SharedText`) are always attached to
/// a document and are therefore rejected on write with a reparenting error;
/// they appear on *read* only for leaf CRDT types the bridge does not mirror.
#[derive(Clone)]
pub enum Value {
    /// JSON `null`. Also the normalization target for a top-level
    /// `Undefined` assignment, which preserves map key presence.
    Null,
    /// The absent value. Rejected by deep validation.
    Undefined,
    /// Boolean primitive.
    Bool(bool),
    /// Finite double-precision number. Non-finite values are rejected by
    /// deep validation.
    Number(f64),
    /// 64-bit integer. Not representable in the shared document; rejected
    /// by deep validation.
    BigInt(i64),
    /// UTF-8 string primitive.
    String(String),
    /// Binary buffer. Not a plain value; rejected by deep validation.
    Bytes(Vec<u8>),
    /// Plain array literal. Adopted into a [`ListNode`] when written into
    /// the tree.
    Array(Vec<Value>),
    /// Plain object literal. Adopted into a [`MapNode`] when written into
    /// the tree.
    Object(IndexMap<String, Value>),
    /// A reactive object node (possibly a live controller of a shared map).
    Map(MapNode),
    /// A reactive array node (possibly a live controller of a shared
    /// sequence).
    List(ListNode),
    /// A raw shared map reference.
    SharedMap(MapRef),
    /// A raw shared sequence reference.
    SharedList(ArrayRef),
    /// A raw shared text reference. Text is a leaf CRDT value: it is
    /// surfaced read-only and never mirrored by the bridge.
    SharedText(TextRef),
}

impl Value {
    /// Convenience constructor for a plain object literal.
    pub fn object<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Convenience constructor for a plain array literal.
    pub fn array<V, I>(items: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        Value::Array(items.into_iter().map(Into::into).collect())
    }

    /// True for primitives that map 1:1 onto a CRDT `Any` scalar.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_)
        )
    }

    /// True for the container shapes (plain literals and nodes).
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            Value::Array(_) | Value::Object(_) | Value::Map(_) | Value::List(_)
        )
    }

    /// The boolean, if this value is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The number, if this value is one.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The string slice, if this value is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the map node handle, if this value is one.
    pub fn as_map(&self) -> Option<&MapNode> {
        match self {
            Value::Map(node) => Some(node),
            _ => None,
        }
    }

    /// Borrow the list node handle, if this value is one.
    pub fn as_list(&self) -> Option<&ListNode> {
        match self {
            Value::List(node) => Some(node),
            _ => None,
        }
    }

    /// Convert a CRDT scalar into a value.
    pub fn from_any(any: &Any) -> Self {
        match any {
            Any::Null => Value::Null,
            Any::Undefined => Value::Undefined,
            Any::Bool(b) => Value::Bool(*b),
            Any::Number(n) => Value::Number(*n),
            Any::BigInt(n) => Value::BigInt(*n),
            Any::String(s) => Value::String(s.to_string()),
            Any::Buffer(b) => Value::Bytes(b.to_vec()),
            Any::Array(items) => Value::Array(items.iter().map(Value::from_any).collect()),
            Any::Map(entries) => {
                let mut keys: Vec<&String> = entries.keys().collect();
                keys.sort();
                Value::Object(
                    keys.into_iter()
                        .map(|k| (k.clone(), Value::from_any(&entries[k])))
                        .collect(),
                )
            }
        }
    }

    /// Convert into a CRDT scalar. Returns `None` for node handles and raw
    /// shared references; resolve those with
    /// [`to_plain`](Self::to_plain) first.
    pub fn to_any(&self) -> Option<Any> {
        match self {
            Value::Null => Some(Any::Null),
            Value::Undefined => Some(Any::Undefined),
            Value::Bool(b) => Some(Any::Bool(*b)),
            Value::Number(n) => Some(Any::Number(*n)),
            Value::BigInt(n) => Some(Any::BigInt(*n)),
            Value::String(s) => Some(Any::from(s.as_str())),
            Value::Bytes(b) => Some(Any::Buffer(Arc::from(b.as_slice()))),
            Value::Array(items) => {
                let converted: Option<Vec<Any>> = items.iter().map(Value::to_any).collect();
                converted.map(Any::from)
            }
            Value::Object(entries) => {
                let converted: Option<std::collections::HashMap<String, Any>> = entries
                    .iter()
                    .map(|(k, v)| v.to_any().map(|a| (k.clone(), a)))
                    .collect();
                converted.map(Any::from)
            }
            _ => None,
        }
    }

    /// Deep-copy this value into a tree of plain literals, resolving node
    /// handles through their mirrors. Raw shared references are preserved
    /// as-is (they have no plain rendition).
    pub fn to_plain(&self) -> Value {
        match self {
            Value::Array(items) => Value::Array(items.iter().map(Value::to_plain).collect()),
            Value::Object(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_plain()))
                    .collect(),
            ),
            Value::Map(node) => node.to_plain(),
            Value::List(node) => node.to_plain(),
            other => other.clone(),
        }
    }

    /// Build a value from a JSON document.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => Value::Number(f),
                // Numbers outside the f64 range only arise from i64/u64
                // extremes; surface them as the rejected BigInt shape.
                None => Value::BigInt(n.as_i64().unwrap_or(i64::MAX)),
            },
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Render as a JSON document. Returns `None` for values with no JSON
    /// rendition (`Undefined`, bytes, non-finite numbers, raw shared
    /// references); node handles resolve through their mirrors.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            Value::Null => Some(serde_json::Value::Null),
            Value::Bool(b) => Some(serde_json::Value::Bool(*b)),
            Value::Number(n) => serde_json::Number::from_f64(*n).map(serde_json::Value::Number),
            Value::BigInt(n) => Some(serde_json::Value::Number((*n).into())),
            Value::String(s) => Some(serde_json::Value::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Value::to_json)
                .collect::<Option<Vec<_>>>()
                .map(serde_json::Value::Array),
            Value::Object(entries) => entries
                .iter()
                .map(|(k, v)| v.to_json().map(|j| (k.clone(), j)))
                .collect::<Option<serde_json::Map<_, _>>>()
                .map(serde_json::Value::Object),
            Value::Map(node) => node.to_plain().to_json(),
            Value::List(node) => node.to_plain().to_json(),
            Value::Undefined
            | Value::Bytes(_)
            | Value::SharedMap(_)
            | Value::SharedList(_)
            | Value::SharedText(_) => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) | (Value::Undefined, Value::Undefined) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            // Nodes compare by identity, not by contents: the bridge relies
            // on reference equality to preserve controllers across
            // reconciliation.
            (Value::Map(a), Value::Map(b)) => a.id() == b.id(),
            (Value::List(a), Value::List(b)) => a.id() == b.id(),
            (Value::SharedMap(a), Value::SharedMap(b)) => branch_id(a) == branch_id(b),
            (Value::SharedList(a), Value::SharedList(b)) => branch_id(a) == branch_id(b),
            (Value::SharedText(a), Value::SharedText(b)) => branch_id(a) == branch_id(b),
            _ => false,
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Undefined => write!(f, "undefined"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::BigInt(n) => write!(f, "{n}n"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => write!(f, "bytes[{}]", b.len()),
            Value::Array(items) => f.debug_list().entries(items).finish(),
            Value::Object(entries) => f.debug_map().entries(entries.iter()).finish(),
            Value::Map(node) => write!(f, "MapNode#{}", node.id().raw()),
            Value::List(node) => write!(f, "ListNode#{}", node.id().raw()),
            Value::SharedMap(_) => write!(f, "SharedMap"),
            Value::SharedList(_) => write!(f, "SharedList"),
            Value::SharedText(_) => write!(f, "SharedText"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Number(f64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Number(f64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(v: IndexMap<String, Value>) -> Self {
        Value::Object(v)
    }
}

impl From<MapNode> for Value {
    fn from(v: MapNode) -> Self {
        Value::Map(v)
    }
}

impl From<ListNode> for Value {
    fn from(v: ListNode) -> Self {
        Value::List(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_round_trip_for_scalars() {
        for value in [
            Value::Null,
            Value::Bool(true),
            Value::Number(1.5),
            Value::String("hi".into()),
        ] {
            let any = value.to_any().expect("scalar converts");
            assert_eq!(Value::from_any(&any), value);
        }
    }

    #[test]
    fn plain_composites_convert_to_any() {
        let value = Value::object([("a", Value::from(1.0)), ("b", Value::array([2.0, 3.0]))]);
        let any = value.to_any().expect("plain tree converts");
        // Key order is not preserved through Any maps; compare re-imported.
        assert_eq!(Value::from_any(&any), value);
    }

    #[test]
    fn node_handles_do_not_convert_to_any() {
        let node = MapNode::new();
        assert!(Value::Map(node).to_any().is_none());
    }

    #[test]
    fn json_round_trip() {
        let json: serde_json::Value = serde_json::from_str(
            r#"{"title":"list","done":false,"items":[1,2,{"nested":null}]}"#,
        )
        .expect("valid json");
        let value = Value::from_json(&json);
        assert_eq!(value.to_json().expect("plain value"), json);
    }

    #[test]
    fn undefined_has_no_json_rendition() {
        assert!(Value::Undefined.to_json().is_none());
        assert!(Value::Number(f64::NAN).to_json().is_none());
    }

    #[test]
    fn node_equality_is_by_identity() {
        let a = MapNode::new();
        let b = MapNode::new();
        assert_eq!(Value::Map(a.clone()), Value::Map(a.clone()));
        assert_ne!(Value::Map(a), Value::Map(b));
    }
}

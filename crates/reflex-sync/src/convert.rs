//! Conversion between plain values and shared-document form.
//!
//! Outgoing values become `yrs` prelim trees: the document has no detached
//! containers, so a plain object/array (or a node mirror being cloned)
//! converts into a nested prelim that the apply layer inserts in one call.
//! The caller is expected to have run [`crate::validate::validate_deep`];
//! the checks here remain as fail-safes.

use std::collections::HashMap;

use yrs::{Any, Array, ArrayPrelim, ArrayRef, GetString, In, Map, MapPrelim, MapRef, Out, ReadTxn};

use crate::error::ValidationError;
use crate::shared::SharedContainer;
use crate::value::Value;

/// Convert an outgoing value into a prelim for insertion into the shared
/// document.
///
/// Node handles convert through their mirrors — a deep clone, never a move
/// of the underlying container. `Undefined` is defensively normalized to
/// null (validation rejects the structural cases before this point).
pub(crate) fn value_to_prelim(value: &Value) -> Result<In, ValidationError> {
    match value {
        Value::Null | Value::Undefined => Ok(In::Any(Any::Null)),
        Value::Bool(b) => Ok(In::Any(Any::Bool(*b))),
        Value::Number(n) => {
            if n.is_finite() {
                Ok(In::Any(Any::Number(*n)))
            } else {
                Err(ValidationError::NonFinite { value: *n })
            }
        }
        Value::BigInt(n) => Err(ValidationError::BigInt { value: *n }),
        Value::String(s) => Ok(In::Any(Any::from(s.as_str()))),
        Value::Bytes(_) => Err(ValidationError::NotPlain {
            kind: "binary buffer",
            value: value.clone(),
        }),
        Value::Array(items) => items_to_prelim(items.iter()),
        Value::Object(entries) => entries_to_prelim(entries.iter().map(|(k, v)| (k.clone(), v))),
        Value::List(node) => {
            let items = node.items();
            items_to_prelim(items.iter())
        }
        Value::Map(node) => {
            let entries = node.entries();
            entries_to_prelim(entries.iter().map(|(k, v)| (k.clone(), v)))
        }
        Value::SharedMap(_) | Value::SharedList(_) | Value::SharedText(_) => {
            Err(ValidationError::Reparent {
                value: value.clone(),
            })
        }
    }
}

fn items_to_prelim<'a>(
    items: impl Iterator<Item = &'a Value>,
) -> Result<In, ValidationError> {
    let converted: Result<Vec<In>, ValidationError> = items.map(value_to_prelim).collect();
    Ok(In::Array(ArrayPrelim::from(converted?)))
}

fn entries_to_prelim<'a>(
    entries: impl Iterator<Item = (String, &'a Value)>,
) -> Result<In, ValidationError> {
    let converted: Result<HashMap<String, In>, ValidationError> = entries
        .map(|(key, value)| value_to_prelim(value).map(|prelim| (key, prelim)))
        .collect();
    Ok(In::Map(MapPrelim::from_iter(converted?)))
}

/// Read a shared container into a tree of plain literals. The recursive
/// mirror of conversion, for diagnostics and tests.
pub fn shared_to_plain<T: ReadTxn>(txn: &T, container: &SharedContainer) -> Value {
    match container {
        SharedContainer::Map(map) => map_to_plain(txn, map),
        SharedContainer::List(list) => list_to_plain(txn, list),
    }
}

fn map_to_plain<T: ReadTxn>(txn: &T, map: &MapRef) -> Value {
    let mut keys: Vec<String> = map.keys(txn).map(|key| key.to_string()).collect();
    keys.sort();
    Value::Object(
        keys.into_iter()
            .filter_map(|key| {
                map.get(txn, &key)
                    .map(|out| (key, out_to_plain(txn, &out)))
            })
            .collect(),
    )
}

fn list_to_plain<T: ReadTxn>(txn: &T, list: &ArrayRef) -> Value {
    let len = list.len(txn);
    Value::Array(
        (0..len)
            .filter_map(|index| list.get(txn, index))
            .map(|out| out_to_plain(txn, &out))
            .collect(),
    )
}

/// Read one shared value into plain form. Text leaves render as strings;
/// other leaf types have no plain rendition and read as null.
pub(crate) fn out_to_plain<T: ReadTxn>(txn: &T, out: &Out) -> Value {
    match out {
        Out::Any(any) => Value::from_any(any),
        Out::YMap(map) => map_to_plain(txn, map),
        Out::YArray(list) => list_to_plain(txn, list),
        Out::YText(text) => Value::String(text.get_string(txn)),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use yrs::{Doc, Transact};

    #[test]
    fn plain_tree_round_trips_through_the_document() {
        let doc = Doc::new();
        let root = doc.get_or_insert_map("root");

        let tree = Value::object([
            ("title", Value::from("groceries")),
            ("count", Value::from(2.0)),
            (
                "items",
                Value::array([
                    Value::from("milk"),
                    Value::object([("name", Value::from("eggs")), ("qty", Value::from(12.0))]),
                ]),
            ),
        ]);

        {
            let mut txn = doc.transact_mut();
            let prelim = value_to_prelim(&tree).expect("convertible");
            let _ = root.insert(&mut txn, "tree", prelim);
        }

        let txn = doc.transact();
        let read = shared_to_plain(&txn, &SharedContainer::Map(root));
        let Value::Object(entries) = read else {
            panic!("expected object");
        };
        assert_eq!(entries["tree"], tree.to_plain().sorted_for_tests());
    }

    #[test]
    fn undefined_normalizes_to_null() {
        assert_matches!(
            value_to_prelim(&Value::Undefined),
            Ok(In::Any(Any::Null))
        );
    }

    #[test]
    fn defensive_checks_mirror_validation() {
        assert_matches!(
            value_to_prelim(&Value::Number(f64::INFINITY)),
            Err(ValidationError::NonFinite { .. })
        );
        assert_matches!(
            value_to_prelim(&Value::BigInt(1)),
            Err(ValidationError::BigInt { .. })
        );
    }

    impl Value {
        /// Test helper: object key order is not preserved through the
        /// document, so sort recursively before comparing.
        fn sorted_for_tests(&self) -> Value {
            match self {
                Value::Object(entries) => {
                    let mut sorted: Vec<(String, Value)> = entries
                        .iter()
                        .map(|(k, v)| (k.clone(), v.sorted_for_tests()))
                        .collect();
                    sorted.sort_by(|a, b| a.0.cmp(&b.0));
                    Value::Object(sorted.into_iter().collect())
                }
                Value::Array(items) => {
                    Value::Array(items.iter().map(Value::sorted_for_tests).collect())
                }
                other => other.clone(),
            }
        }
    }
}

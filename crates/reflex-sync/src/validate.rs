//! Deep validation of values before they enter the shared document.
//!
//! Validation runs synchronously on the mutating call path (and on
//! bootstrap) so the caller gets the failure, not the flush. The converter
//! keeps defensive re-checks of the same rules as fail-safes.

use crate::error::ValidationError;
use crate::value::Value;

/// Check `value` and everything reachable from it against the permitted
/// domain: null, booleans, finite numbers, strings, and plain
/// objects/arrays (including reactive nodes, whose mirrors are traversed).
///
/// Each rejection kind is a distinct [`ValidationError`] variant;
/// `Undefined` at the top level and nested inside a container are separate
/// kinds. Shared references are rejected as re-parenting: every reachable
/// shared container already lives in a document and cannot be moved under a
/// new parent.
pub fn validate_deep(value: &Value) -> Result<(), ValidationError> {
    validate_at(value, &mut Vec::new())
}

fn validate_at(value: &Value, path: &mut Vec<String>) -> Result<(), ValidationError> {
    match value {
        Value::Null | Value::Bool(_) | Value::String(_) => Ok(()),
        Value::Number(n) => {
            if n.is_finite() {
                Ok(())
            } else {
                Err(ValidationError::NonFinite { value: *n })
            }
        }
        Value::Undefined => {
            if path.is_empty() {
                Err(ValidationError::Undefined)
            } else {
                Err(ValidationError::UndefinedEntry {
                    path: path.join("."),
                })
            }
        }
        Value::BigInt(n) => Err(ValidationError::BigInt { value: *n }),
        Value::Bytes(_) => Err(ValidationError::NotPlain {
            kind: "binary buffer",
            value: value.clone(),
        }),
        Value::SharedMap(_) | Value::SharedList(_) | Value::SharedText(_) => {
            Err(ValidationError::Reparent {
                value: value.clone(),
            })
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                path.push(index.to_string());
                let result = validate_at(item, path);
                let _ = path.pop();
                result?;
            }
            Ok(())
        }
        Value::Object(entries) => {
            for (key, item) in entries {
                path.push(key.clone());
                let result = validate_at(item, path);
                let _ = path.pop();
                result?;
            }
            Ok(())
        }
        Value::Map(node) => {
            for (key, item) in node.entries() {
                path.push(key);
                let result = validate_at(&item, path);
                let _ = path.pop();
                result?;
            }
            Ok(())
        }
        Value::List(node) => {
            for (index, item) in node.items().into_iter().enumerate() {
                path.push(index.to_string());
                let result = validate_at(&item, path);
                let _ = path.pop();
                result?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn scalars_pass() {
        for value in [
            Value::Null,
            Value::Bool(false),
            Value::Number(0.5),
            Value::String("ok".into()),
        ] {
            assert_matches!(validate_deep(&value), Ok(()));
        }
    }

    #[test]
    fn top_level_and_nested_undefined_are_distinct_kinds() {
        assert_matches!(validate_deep(&Value::Undefined), Err(ValidationError::Undefined));
        let nested = Value::object([("a", Value::array([Value::Undefined]))]);
        assert_matches!(
            validate_deep(&nested),
            Err(ValidationError::UndefinedEntry { path }) if path == "a.0"
        );
    }

    #[test]
    fn non_finite_numbers_are_rejected() {
        assert_matches!(
            validate_deep(&Value::Number(f64::NAN)),
            Err(ValidationError::NonFinite { .. })
        );
        assert_matches!(
            validate_deep(&Value::array([f64::INFINITY])),
            Err(ValidationError::NonFinite { .. })
        );
    }

    #[test]
    fn big_integers_are_rejected() {
        assert_matches!(
            validate_deep(&Value::BigInt(7)),
            Err(ValidationError::BigInt { value: 7 })
        );
    }

    #[test]
    fn binary_buffers_are_rejected() {
        assert_matches!(
            validate_deep(&Value::Bytes(vec![1, 2])),
            Err(ValidationError::NotPlain { kind: "binary buffer", .. })
        );
    }

    #[test]
    fn node_mirrors_are_traversed() {
        let node = crate::reactive::MapNode::new();
        node.insert("bad", Value::array([Value::Undefined]))
            .expect("insert");
        assert_matches!(
            validate_deep(&Value::Map(node)),
            Err(ValidationError::UndefinedEntry { .. })
        );
    }

    #[test]
    fn shared_references_are_rejected_as_reparenting() {
        use yrs::Doc;
        let doc = Doc::new();
        let map = doc.get_or_insert_map("root");
        assert_matches!(
            validate_deep(&Value::SharedMap(map)),
            Err(ValidationError::Reparent { .. })
        );
    }
}

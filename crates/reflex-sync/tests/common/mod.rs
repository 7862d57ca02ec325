//! Shared helpers for the integration suites.
// Each suite compiles this module independently and uses a subset of it.
#![allow(dead_code)]

use reflex_sync::{shared_to_plain, DocMirror, Value};
use yrs::updates::decoder::Decode;
use yrs::{Doc, ReadTxn, Transact, Update};

/// Ship everything `to` is missing from `from`, as one update.
pub fn sync_docs(from: &Doc, to: &Doc) {
    let update = {
        let state = {
            let txn = to.transact();
            txn.state_vector()
        };
        let txn = from.transact();
        txn.encode_diff_v1(&state)
    };
    let mut txn = to.transact_mut();
    txn.apply_update(Update::decode_v1(&update).expect("well-formed update"))
        .expect("update applies");
}

/// Exchange updates in both directions.
pub fn sync_both(a: &Doc, b: &Doc) {
    sync_docs(a, b);
    sync_docs(b, a);
}

/// Plain tree of the mirror's reactive root.
pub fn reactive_plain(mirror: &DocMirror) -> Value {
    sorted(
        &mirror
            .root_value()
            .expect("mirror has a root")
            .to_plain(),
    )
}

/// Plain tree of the mirror's document root.
pub fn document_plain(mirror: &DocMirror) -> Value {
    let txn = mirror.doc().transact();
    sorted(&shared_to_plain(&txn, mirror.root_container()))
}

/// Assert the reactive root and the document root agree.
pub fn assert_tree_equal(mirror: &DocMirror) {
    assert_eq!(reactive_plain(mirror), document_plain(mirror));
}

/// Object key order differs between the two sides (the document does not
/// preserve it); sort recursively before comparing.
pub fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(entries) => {
            let mut entries: Vec<(String, Value)> = entries
                .iter()
                .map(|(key, child)| (key.clone(), sorted(child)))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

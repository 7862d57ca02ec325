//! Local edits through the flush pipeline: batching, temporal merging,
//! bulk insertion, subtree purging, and child upgrades.

mod common;

use std::sync::Arc;

use common::{assert_tree_equal, document_plain, sorted};
use parking_lot::Mutex;
use reflex_sync::{DocMirror, Root, SharedContainer, Value};
use yrs::types::Change;
use yrs::{Doc, Observable, Transact};

fn list_mirror() -> (Doc, DocMirror) {
    let doc = Doc::new();
    let mirror = DocMirror::attach(&doc, Root::list("root")).expect("attach");
    (doc, mirror)
}

fn map_mirror() -> (Doc, DocMirror) {
    let doc = Doc::new();
    let mirror = DocMirror::attach(&doc, Root::map("root")).expect("attach");
    (doc, mirror)
}

/// Record every array delta the document emits for the mirrored root list.
fn record_deltas(mirror: &DocMirror) -> (Arc<Mutex<Vec<Change>>>, yrs::Subscription) {
    let SharedContainer::List(list) = mirror.root_container().clone() else {
        panic!("expected a list root");
    };
    let recorded: Arc<Mutex<Vec<Change>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = recorded.clone();
    let subscription = list.observe(move |txn, event| {
        sink.lock().extend(event.delta(txn).iter().cloned());
    });
    (recorded, subscription)
}

#[test]
fn push_then_pop_in_one_flush_touches_nothing() {
    let (_doc, mirror) = list_mirror();
    let list = mirror.root_list().expect("list root");
    let (deltas, _sub) = record_deltas(&mirror);

    list.push(Value::object([("id", 1.0)])).expect("push");
    list.pop().expect("pop");
    mirror.flush().expect("flush");

    assert_eq!(list.len(), 0);
    assert!(
        deltas.lock().is_empty(),
        "a cancelled push+pop must produce zero document operations"
    );
    assert_tree_equal(&mirror);
}

#[test]
fn splice_becomes_a_replace_at_the_index() {
    let (_doc, mirror) = list_mirror();
    let list = mirror.root_list().expect("list root");
    for item in ["a", "b", "c"] {
        list.push(item).expect("push");
    }
    mirror.flush().expect("seed flush");

    let (deltas, _sub) = record_deltas(&mirror);
    list.splice(1, 1, vec![Value::from("x")]).expect("splice");
    mirror.flush().expect("flush");

    assert_eq!(
        list.items(),
        vec![Value::from("a"), Value::from("x"), Value::from("c")]
    );
    assert_tree_equal(&mirror);

    let deltas = deltas.lock();
    let added: usize = deltas
        .iter()
        .filter_map(|change| match change {
            Change::Added(items) => Some(items.len()),
            _ => None,
        })
        .sum();
    let removed: u32 = deltas
        .iter()
        .filter_map(|change| match change {
            Change::Removed(count) => Some(*count),
            _ => None,
        })
        .sum();
    assert_eq!((added, removed), (1, 1), "one delete, one insert");
}

#[test]
fn gap_sets_append_through_the_tail_cursor() {
    let (_doc, mirror) = list_mirror();
    let list = mirror.root_list().expect("list root");
    list.push("a").expect("push");
    mirror.flush().expect("seed flush");

    list.set(2, "v2").expect("set");
    list.set(3, "v3").expect("set");
    mirror.flush().expect("flush");

    assert_eq!(
        document_plain(&mirror),
        Value::array(["a", "v2", "v3"]),
        "gap indices land as sequential appends"
    );
    assert_tree_equal(&mirror);
}

#[test]
fn bulk_push_coalesces_into_one_insert() {
    let (_doc, mirror) = list_mirror();
    let list = mirror.root_list().expect("list root");
    let (deltas, _sub) = record_deltas(&mirror);

    for item in ["a", "b", "c"] {
        list.push(item).expect("push");
    }
    mirror.flush().expect("flush");

    let deltas = deltas.lock();
    let added: Vec<usize> = deltas
        .iter()
        .filter_map(|change| match change {
            Change::Added(items) => Some(items.len()),
            _ => None,
        })
        .collect();
    assert_eq!(added, vec![3], "one delta of the form insert:[a,b,c]");
    assert_tree_equal(&mirror);
}

#[test]
fn doomed_subtree_ops_are_purged() {
    let (doc, mirror) = list_mirror();
    let list = mirror.root_list().expect("list root");
    list.push(Value::object([(
        "nested",
        Value::object([("x", 1.0)]),
    )]))
    .expect("push");
    mirror.flush().expect("seed flush");

    // Observe the *old* nested container: the purged set must never land.
    let old_nested = {
        let SharedContainer::List(root) = mirror.root_container().clone() else {
            panic!("expected list root");
        };
        let txn = doc.transact();
        let yrs::Out::YMap(item) = yrs::Array::get(&root, &txn, 0).expect("item present") else {
            panic!("expected map item");
        };
        let yrs::Out::YMap(nested) = yrs::Map::get(&item, &txn, "nested").expect("nested") else {
            panic!("expected nested map");
        };
        nested
    };
    let touched: Arc<Mutex<usize>> = Arc::new(Mutex::new(0));
    let sink = touched.clone();
    let _sub = old_nested.observe(move |_txn, _event| {
        *sink.lock() += 1;
    });

    // Same flush: a write into the nested subtree and a replacement of the
    // whole item.
    let Some(Value::Map(item_node)) = list.get(0) else {
        panic!("expected bound item node");
    };
    let Some(Value::Map(nested_node)) = item_node.get("nested") else {
        panic!("expected bound nested node");
    };
    nested_node.insert("x", 2.0).expect("nested write");
    list.set(
        0,
        Value::object([("nested", Value::object([("x", 9.0)]))]),
    )
    .expect("replace");
    mirror.flush().expect("flush");

    assert_eq!(*touched.lock(), 0, "no op may target the detached subtree");
    assert_eq!(
        document_plain(&mirror),
        sorted(&Value::array([Value::object([(
            "nested",
            Value::object([("x", 9.0)]),
        )])])),
    );
    assert_tree_equal(&mirror);
}

#[test]
fn assigned_plain_objects_upgrade_in_place() {
    let (_doc, mirror) = map_mirror();
    let root = mirror.root_map().expect("map root");

    root.insert("todo", Value::object([("title", Value::from("write"))]))
        .expect("insert");
    let Some(Value::Map(node)) = root.get("todo") else {
        panic!("plain object adopts into a node");
    };
    let id_before = node.id();

    mirror.flush().expect("flush");

    let Some(Value::Map(node_after)) = root.get("todo") else {
        panic!("node survives the flush");
    };
    assert_eq!(node_after.id(), id_before, "upgrade preserves identity");

    // The upgraded node is live: further writes reach the document.
    node_after.insert("done", true).expect("insert");
    mirror.flush().expect("flush");
    assert_eq!(
        document_plain(&mirror),
        sorted(&Value::object([(
            "todo",
            Value::object([("title", Value::from("write")), ("done", Value::from(true))]),
        )])),
    );
    assert_tree_equal(&mirror);
}

#[test]
fn map_set_then_delete_in_one_flush_nets_out() {
    let (_doc, mirror) = map_mirror();
    let root = mirror.root_map().expect("map root");

    root.insert("a", 1.0).expect("insert");
    root.remove("a").expect("remove");
    root.insert("b", 2.0).expect("insert");
    mirror.flush().expect("flush");

    assert_eq!(
        document_plain(&mirror),
        Value::object([("b", Value::from(2.0))]),
    );
    assert_tree_equal(&mirror);
}

#[test]
fn reserved_keys_never_reach_the_document() {
    let (_doc, mirror) = map_mirror();
    let root = mirror.root_map().expect("map root");

    root.insert(format!("{}marker", reflex_sync::RESERVED_KEY_PREFIX), 1.0)
        .expect("insert");
    root.insert("visible", 2.0).expect("insert");
    mirror.flush().expect("flush");

    assert_eq!(
        document_plain(&mirror),
        Value::object([("visible", Value::from(2.0))]),
    );
}

#[test]
fn flush_with_no_pending_ops_is_a_no_op() {
    let (_doc, mirror) = map_mirror();
    assert!(mirror.is_idle());
    mirror.flush().expect("flush");
    assert_tree_equal(&mirror);
}

#[test]
fn top_level_undefined_normalizes_to_null_and_keeps_the_key() {
    let (_doc, mirror) = map_mirror();
    let root = mirror.root_map().expect("map root");

    root.insert("u", Value::Undefined).expect("insert");
    mirror.flush().expect("flush");

    assert_eq!(
        document_plain(&mirror),
        Value::object([("u", Value::Null)]),
    );
    assert_eq!(root.get("u"), Some(Value::Null));
}

#[test]
fn detached_controllers_can_be_reused_by_identity() {
    let (_doc, mirror) = map_mirror();
    let root = mirror.root_map().expect("map root");
    root.insert("child", Value::object([("x", 1.0)]))
        .expect("insert");
    mirror.flush().expect("flush");
    let Some(Value::Map(child)) = root.get("child") else {
        panic!("expected bound child");
    };
    let id = child.id();

    root.insert("child", 0.0).expect("overwrite");
    mirror.flush().expect("flush");
    // The displaced controller is released but keeps its mirror contents.
    assert_eq!(child.get("x"), Some(Value::Number(1.0)));

    root.insert("again", Value::Map(child.clone()))
        .expect("reinsert");
    let Some(Value::Map(reused)) = root.get("again") else {
        panic!("expected adopted node");
    };
    assert_eq!(reused.id(), id, "orphaned controllers re-insert by identity");
    mirror.flush().expect("flush");
    assert_tree_equal(&mirror);

    // And it is live again.
    reused.insert("x", 5.0).expect("insert");
    mirror.flush().expect("flush");
    assert_eq!(
        document_plain(&mirror),
        sorted(&Value::object([
            ("child", Value::from(0.0)),
            ("again", Value::object([("x", 5.0)])),
        ])),
    );
}

#[test]
fn interleaved_list_edits_converge_to_the_final_state() {
    let (_doc, mirror) = list_mirror();
    let list = mirror.root_list().expect("list root");
    for i in 0..4 {
        list.push(f64::from(i)).expect("push");
    }
    mirror.flush().expect("seed flush");

    // One commit point, many overlapping edits.
    list.set(0, 10.0).expect("set");
    list.remove(2).expect("remove");
    list.push(99.0).expect("push");
    list.insert(1, 50.0).expect("insert");
    mirror.flush().expect("flush");

    assert_tree_equal(&mirror);
    assert_eq!(
        list.items(),
        vec![
            Value::from(10.0),
            Value::from(50.0),
            Value::from(1.0),
            Value::from(3.0),
            Value::from(99.0),
        ]
    );
}

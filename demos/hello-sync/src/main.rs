//! Two peers sharing a todo list through mirrored documents.
//!
//! Run with `RUST_LOG=reflex_sync=debug cargo run -p hello-sync` to watch
//! the flush pipeline and reconciler at work.

use anyhow::Context;
use reflex_sync::{DocMirror, Root, Value};
use yrs::updates::decoder::Decode;
use yrs::{Doc, ReadTxn, Transact, Update};

fn sync(from: &Doc, to: &Doc) -> anyhow::Result<()> {
    let update = {
        let state = {
            let txn = to.transact();
            txn.state_vector()
        };
        let txn = from.transact();
        txn.encode_diff_v1(&state)
    };
    let mut txn = to.transact_mut();
    txn.apply_update(Update::decode_v1(&update).context("decoding update")?)
        .context("applying update")?;
    Ok(())
}

fn print_state(label: &str, mirror: &DocMirror) {
    let json = mirror
        .root_value()
        .and_then(|value| value.to_json())
        .and_then(|json| serde_json_string(&json));
    println!("{label}: {}", json.unwrap_or_else(|| "<empty>".to_owned()));
}

fn serde_json_string(json: &serde_json::Value) -> Option<String> {
    serde_json::to_string_pretty(json).ok()
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Alice seeds her document.
    let alice_doc = Doc::new();
    let alice = DocMirror::attach(&alice_doc, Root::map("todos")).context("attaching alice")?;
    alice.bootstrap(Some(Value::object([(
        "items",
        Value::array([Value::object([
            ("title", Value::from("buy milk")),
            ("done", Value::from(false)),
        ])]),
    )])))?;

    // Bob joins and receives her state.
    let bob_doc = Doc::new();
    let bob = DocMirror::attach(&bob_doc, Root::map("todos")).context("attaching bob")?;
    sync(&alice_doc, &bob_doc)?;
    print_state("bob after join", &bob);

    // Bob works through his handle; one flush, one document transaction.
    let bob_root = bob.root_map().context("bob has a map root")?;
    let Some(Value::List(items)) = bob_root.get("items") else {
        anyhow::bail!("items did not materialize");
    };
    items.push(Value::object([
        ("title", Value::from("write demo")),
        ("done", Value::from(true)),
    ]))?;
    let Some(Value::Map(first)) = items.get(0) else {
        anyhow::bail!("first item did not materialize");
    };
    first.insert("done", true)?;
    bob.flush()?;

    // Alice picks the changes up through the reconciler.
    sync(&bob_doc, &alice_doc)?;
    print_state("alice after bob's edits", &alice);

    Ok(())
}

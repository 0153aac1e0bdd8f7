use livenode::{Channel, Node, NodeError, Source, node::Interception};
use serde_json::json;

use crate::helpers::Recorder;

#[test]
fn revert_emits_tagged_changes() {
    let root = Node::create(json!({"title": "a", "tags": ["x", "y"]})).unwrap();
    let snapshot = root.take_snapshot();
    root.set("title", "b").unwrap();
    root.get("tags").unwrap().as_node().unwrap().push("z").unwrap();
    let events = Recorder::attach(&root, Channel::Event);

    snapshot.revert().unwrap();

    assert_eq!(root.to_json(), json!({"title": "a", "tags": ["x", "y"]}));
    assert_eq!(events.summary(), vec!["change 'title'", "change 'tags'"]);
    assert!(events.events().iter().all(|event| event.src == Some(Source::Revert)));
}

#[test]
fn array_reverts_move_children_back() {
    let list = Node::create(json!([{"n": 1}, {"n": 2}, 3])).unwrap();
    let first = list.get("0").unwrap().as_node().cloned().unwrap();
    let snapshot = list.take_snapshot();
    list.move_item(0usize, 1usize).unwrap();
    let events = Recorder::attach(&list, Channel::Event);

    snapshot.revert().unwrap();

    assert_eq!(list.to_json(), json!([{"n": 1}, {"n": 2}, 3]));
    assert_eq!(events.summary(), vec!["move '0' 0 -> 1"]);
    assert_eq!(events.events()[0].src, Some(Source::Revert));
    assert!(list.get("0").unwrap().as_node().unwrap().ptr_eq(&first));
}

#[test]
fn nested_failures_are_collected() {
    let root = Node::create(json!({
        "ok": {"n": 1},
        "outer": {"inner": {"z": 1}},
        "locked": {"x": 1},
    }))
    .unwrap();
    let snapshot = root.take_snapshot();
    root.set("ok.n", 2).unwrap();
    root.set("outer.inner.z", 2).unwrap();
    root.set("locked.x", 2).unwrap();

    let inner = root.get("outer.inner").unwrap().as_node().cloned().unwrap();
    let locked = root.get("locked").unwrap().as_node().cloned().unwrap();
    for node in [&inner, &locked] {
        node.intercept_commit(|_, _| Err(Interception::reject("frozen")));
    }

    let err = snapshot.revert().unwrap_err();
    assert_eq!(err.code(), "EMULTI");
    let Some(NodeError::RevertFailed { failures }) = err.as_node_error() else {
        panic!("expected aggregated failures, got {err}");
    };
    let paths: Vec<&str> = failures.iter().map(|(path, _)| path.as_str()).collect();
    assert_eq!(paths, vec!["outer.inner", "locked"]);
    assert!(failures.iter().all(|(_, err)| err.is_intercepted()));

    // everything that could be reverted was
    assert_eq!(root.get("ok.n"), Some(1.into()));
    assert_eq!(root.get("locked.x"), Some(2.into()));
}

#[test]
fn snapshot_value_is_frozen() {
    let root = Node::create(json!({"list": [1, {"a": 1}]})).unwrap();
    let snapshot = root.take_snapshot();
    root.set("list.1.a", 2).unwrap();
    root.delete("list").unwrap();
    assert_eq!(snapshot.value().to_json(), json!({"list": [1, {"a": 1}]}));
    assert!(snapshot.node().ptr_eq(&root));
}

//! The mutation pipeline as seen by listeners and interceptors.

use std::sync::{Arc, Mutex};

use livenode::{
    Channel, EventKind, KeyPath, Node, NodeOptions, Value,
    node::{EventType, Interception, SetOptions},
};
use serde_json::json;

use crate::helpers::{Recorder, with_meta};

#[test]
fn setting_the_current_value_emits_nothing() {
    let node = Node::create(json!({"a": {"b": [1, 2]}, "n": 1})).unwrap();
    let events = Recorder::attach(&node, Channel::Event);

    assert_eq!(node.set("n", 1).unwrap(), Some(Value::Int(1)));
    assert_eq!(node.set("n", 1.0).unwrap(), Some(Value::Int(1)));
    node.set("a", json!({"b": [1, 2]})).unwrap();
    node.set("a.b.1", 2).unwrap();
    assert_eq!(events.len(), 0);
    assert_eq!(node.version(), 0);
}

#[test]
fn coerces_to_meta_type() {
    let node = Node::object(with_meta(json!({"count": {"type": "number", "default": 0}}))).unwrap();
    let events = Recorder::attach(&node, Channel::Event);

    assert_eq!(node.set("count", "3").unwrap(), Some(Value::Int(0)));
    assert_eq!(node.get("count"), Some(Value::Int(3)));
    assert_eq!(node.set("count", "3").unwrap(), Some(Value::Int(3)));
    assert_eq!(events.summary(), vec!["change 'count'"]);
}

#[test]
fn events_reach_kind_and_key_channels() {
    let node = Node::object(Default::default()).unwrap();
    let all = Recorder::attach(&node, Channel::Event);
    let deletes = Recorder::attach(&node, EventKind::Delete);
    let on_a = Recorder::attach(&node, Channel::key("a"));

    node.set("a", 1).unwrap();
    node.set("b", 2).unwrap();
    node.set("a", 3).unwrap();
    node.delete("b").unwrap();

    assert_eq!(
        all.summary(),
        vec!["new 'a'", "new 'b'", "change 'a'", "delete 'b'"]
    );
    assert_eq!(deletes.summary(), vec!["delete 'b'"]);
    assert_eq!(on_a.len(), 2);
    let change = &on_a.events()[1];
    assert_eq!(change.old, Some(Value::Int(1)));
    assert_eq!(change.value, Some(Value::Int(3)));
}

#[test]
fn listeners_run_by_priority_and_once() {
    let node = Node::object(Default::default()).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));
    for (name, priority) in [("late", 10), ("early", -10), ("default", 0)] {
        let order = order.clone();
        node.on_with_priority(Channel::Event, priority, move |_| {
            order.lock().unwrap().push(name);
            Ok(())
        });
    }
    let once = order.clone();
    node.once(Channel::Event, move |_| {
        once.lock().unwrap().push("once");
        Ok(())
    });

    node.set("a", 1).unwrap();
    node.set("a", 2).unwrap();
    assert_eq!(
        *order.lock().unwrap(),
        vec!["early", "default", "once", "late", "early", "default", "late"]
    );
}

#[test]
fn listeners_added_during_a_mutation_miss_it() {
    let node = Node::object(Default::default()).unwrap();
    let late = Arc::new(Mutex::new(Vec::new()));
    let added = Arc::new(Mutex::new(false));
    {
        let late = late.clone();
        let added = added.clone();
        node.intercept_commit(move |node, _| {
            let mut added = added.lock().unwrap();
            if !*added {
                *added = true;
                let late = late.clone();
                node.on(Channel::Event, move |event| {
                    late.lock().unwrap().push(event.to_string());
                    Ok(())
                });
            }
            Ok(())
        });
    }

    node.set("a", 1).unwrap();
    assert!(late.lock().unwrap().is_empty());
    node.set("a", 2).unwrap();
    assert_eq!(*late.lock().unwrap(), vec!["change 'a'"]);
}

#[test]
fn parent_listeners_added_during_a_nested_mutation_miss_it() {
    let root = Node::create(json!({"c": {"x": 1}})).unwrap();
    let child = root.get("c").unwrap().as_node().cloned().unwrap();
    let late = Arc::new(Mutex::new(Vec::new()));
    let added = Arc::new(Mutex::new(false));
    {
        let root = root.clone();
        let late = late.clone();
        let added = added.clone();
        child.intercept_commit(move |_, _| {
            let mut added = added.lock().unwrap();
            if !*added {
                *added = true;
                let late = late.clone();
                root.on(Channel::Event, move |event| {
                    late.lock().unwrap().push(event.to_string());
                    Ok(())
                });
            }
            Ok(())
        });
    }

    root.set("c.x", 2).unwrap();
    assert!(late.lock().unwrap().is_empty());
    root.set("c.x", 3).unwrap();
    assert_eq!(*late.lock().unwrap(), vec!["change 'c'"]);
}

#[test]
fn nested_changes_bubble_in_the_parents_shape() {
    let local = Node::create(json!({"a": {"b": {"c": 1}}})).unwrap();
    let nested = Node::from_value(
        json!({"a": {"b": {"c": 1}}}),
        NodeOptions::default().with_event_type(EventType::Nested),
    )
    .unwrap();
    let local_events = Recorder::attach(&local, Channel::Event);
    let nested_events = Recorder::attach(&nested, Channel::Event);

    local.set("a.b.c", 2).unwrap();
    nested.set("a.b.c", 2).unwrap();

    assert_eq!(local_events.summary(), vec!["change 'a'"]);
    assert_eq!(nested_events.summary(), vec!["change 'a.b.c'"]);
    let bubbled = &nested_events.events()[0];
    assert_eq!(bubbled.old, Some(Value::Int(1)));
    assert_eq!(bubbled.value, Some(Value::Int(2)));
    assert!(local_events.events()[0].value.as_ref().unwrap().is_node());
}

#[test]
fn emit_rejection_reverts_and_raises_intercept() {
    let node = Node::create(json!({"a": 1, "list": [1, 2]})).unwrap();
    let before = node.to_json();
    let events = Recorder::attach(&node, Channel::Event);
    let intercepts = Recorder::attach(&node, Channel::Intercept);
    node.intercept_emit(|_, event| {
        if event.key.to_string() == "a" || event.key.to_string() == "fresh" {
            Err(Interception::reject("read only"))
        } else {
            Ok(())
        }
    });

    let err = node.set("a", 2).unwrap_err();
    assert_eq!(err.code(), "EINTERCEPT");
    assert_eq!(node.set("fresh", true).unwrap_err().code(), "EINTERCEPT");
    assert_eq!(node.to_json(), before);
    assert_eq!(events.len(), 0);
    assert_eq!(intercepts.summary(), vec!["change 'a'", "new 'fresh'"]);
    assert_eq!(node.version(), 0);
}

#[test]
fn cancelled_mutations_are_quiet() {
    let node = Node::create(json!({"a": 1})).unwrap();
    let events = Recorder::attach(&node, Channel::Event);
    let intercepts = Recorder::attach(&node, Channel::Intercept);
    node.intercept_commit(|_, _| Err(Interception::Cancel));

    assert_eq!(node.set("a", 2).unwrap(), Some(Value::Int(1)));
    assert_eq!(node.delete("a").unwrap(), Some(Value::Int(1)));
    assert_eq!(node.get("a"), Some(Value::Int(1)));
    assert_eq!(events.len(), 0);
    assert_eq!(intercepts.summary(), vec!["change 'a'", "delete 'a'"]);

    node.clear_interceptors();
    node.set("a", 2).unwrap();
    assert_eq!(events.len(), 1);
}

#[test]
fn prepare_can_rewrite_the_mutation() {
    let node = Node::create(json!({"user": {}})).unwrap();
    node.intercept_prepare(|_, mut proposal| {
        if proposal.key.to_string() == "name" {
            proposal.key = KeyPath::parse("user.name", '.');
            proposal.value = proposal
                .value
                .map(|value| Value::from(value.as_text().unwrap_or_default().to_uppercase()));
        }
        Ok(proposal)
    });
    let events = Recorder::attach(&node, Channel::Event);

    node.set("name", "ada").unwrap();
    assert_eq!(node.get("user.name"), Some(Value::from("ADA")));
    assert!(!node.has("name"));
    assert_eq!(events.summary(), vec!["change 'user'"]);
}

#[test]
fn no_emit_applies_silently() {
    let node = Node::object(Default::default()).unwrap();
    let events = Recorder::attach(&node, Channel::Event);
    node.set_with(
        "a",
        1,
        SetOptions {
            no_emit: true,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(node.get("a"), Some(Value::Int(1)));
    assert_eq!(events.len(), 0);
    assert_eq!(node.version(), 0);
}

#[test]
fn listeners_see_the_whole_structure() {
    let node = Node::object(Default::default()).unwrap();
    let seen = Arc::new(Mutex::new(None));
    let log = seen.clone();
    let observed = node.clone();
    node.on(Channel::Event, move |_| {
        *log.lock().unwrap() = Some(observed.to_json());
        Ok(())
    });
    node.assign(json!({"a": 1, "b": {"c": [1, 2]}})).unwrap();
    assert_eq!(
        seen.lock().unwrap().clone(),
        Some(json!({"a": 1, "b": {"c": [1, 2]}}))
    );
}

#[test]
fn required_keys_reset_instead_of_deleting() {
    let node = Node::object(with_meta(json!({
        "id": {"required": true, "default": "x"},
        "tag": {"required": true},
    })))
    .unwrap();
    node.set("id", "abc").unwrap();
    node.delete("id").unwrap();
    assert_eq!(node.get("id"), Some(Value::from("x")));

    node.set("tag", "t").unwrap();
    assert_eq!(node.delete("tag").unwrap_err().code(), "EILLEGAL");
    assert_eq!(node.get("tag"), Some(Value::from("t")));
}

#[test]
fn constant_keys_are_fixed_once_set() {
    let node = Node::object(with_meta(json!({"id": {"constant": true}}))).unwrap();
    node.set("id", 1).unwrap();
    let err = node.set("id", 2).unwrap_err();
    assert_eq!(err.code(), "EALREADY");
    assert_eq!(node.get("id"), Some(Value::Int(1)));
}

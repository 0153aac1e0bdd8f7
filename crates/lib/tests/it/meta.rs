//! Validation rules and defaults.

use std::sync::Arc;

use indexmap::IndexMap;
use livenode::{
    BoxError, Node, NodeOptions, Segment, Value,
    meta::{Cleaner, MetaRule, MetaSpec},
};
use serde_json::json;

use crate::helpers::{meta, with_meta};

#[test]
fn accepted_prepend_and_block() {
    let node = Node::object(with_meta(json!({
        "mode": {"accepted": ["fast", "slow"]},
        "id": {"prepend": "user-"},
        "secret": {"block": true},
    })))
    .unwrap();

    assert_eq!(node.set("mode", "medium").unwrap_err().code(), "EINVAL");
    node.set("mode", "slow").unwrap();

    node.set("id", "7").unwrap();
    assert_eq!(node.get("id"), Some(Value::from("user-7")));
    node.set("id", "user-8").unwrap();
    assert_eq!(node.get("id"), Some(Value::from("user-8")));
    // numbers become text first
    node.set("id", 9).unwrap();
    assert_eq!(node.get("id"), Some(Value::from("user-9")));

    assert_eq!(node.set("secret", 1).unwrap_err().code(), "EILLEGAL");
    assert!(!node.has("secret"));
}

#[test]
fn prepend_conflicts_with_other_types() {
    let err = Node::object(with_meta(json!({"id": {"prepend": "x", "type": "number"}})))
        .err()
        .unwrap();
    assert_eq!(err.code(), "EMISMATCH");
}

#[test]
fn constant_type_locks_the_category() {
    let node = Node::object(with_meta(json!({"v": {"constantType": true, "nullable": true}}))).unwrap();
    node.set("v", 1).unwrap();
    node.set("v", 2.5).unwrap();
    let err = node.set("v", "x").unwrap_err();
    assert!(err.is_type_error());
    node.set("v", Value::Null).unwrap();
    assert_eq!(node.get("v"), Some(Value::Null));
}

#[test]
fn cleaner_runs_last() {
    let trim: Cleaner = Arc::new(|value: Value, _key: &Segment| -> Result<Option<Value>, BoxError> {
        Ok(value.as_text().map(|text| Value::from(text.trim())))
    });
    let mut spec = MetaSpec::new();
    spec.insert(
        "name".into(),
        MetaRule {
            clean: Some(trim),
            ..Default::default()
        },
    );
    let node = Node::object(NodeOptions::default().with_meta(spec)).unwrap();
    node.set("name", "  ada ").unwrap();
    assert_eq!(node.get("name"), Some(Value::from("ada")));
    // the cleaner returns nothing for non-text values
    assert_eq!(node.set("name", 3).unwrap_err().code(), "EINVAL");
}

#[test]
fn fallback_rule_covers_unnamed_keys() {
    let node = Node::object(with_meta(json!({
        "*": {"type": "number"},
        "label": {"type": "string"},
    })))
    .unwrap();
    node.set("a", "4").unwrap();
    node.set("label", 4).unwrap();
    assert_eq!(node.to_json(), json!({"a": 4, "label": "4"}));
    assert!(node.set("b", "four").unwrap_err().is_type_error());
}

#[test]
fn child_meta_applies_to_promoted_children() {
    let node = Node::object(with_meta(json!({
        "user": {"meta": {"age": {"type": "number"}}},
        "**": {"nullable": true},
    })))
    .unwrap();
    node.set("user", json!({"age": "42", "tags": {"x": null}})).unwrap();

    assert_eq!(node.get("user.age"), Some(Value::Int(42)));
    assert!(node.set("user.age", "old").unwrap_err().is_type_error());
    let tags = node.get("user.tags").unwrap().as_node().cloned().unwrap();
    assert!(tags.get_meta("anything").unwrap().nullable);
}

#[test]
fn changing_meta_drops_rejected_values() {
    let node = Node::create(json!({"a": "x", "b": "2", "c": true})).unwrap();
    let deleted = node
        .change_meta(meta(json!({"a": {"type": "number"}, "b": {"type": "number"}})), false)
        .unwrap();

    assert_eq!(deleted, vec![(Segment::from("a"), Value::from("x"))]);
    assert_eq!(node.to_json(), json!({"b": 2, "c": true}));

    node.delete_meta(&["b"]).unwrap();
    node.set("b", "two").unwrap();
    assert!(node.set("a", "x").unwrap_err().is_type_error());
    node.delete_meta(&[]).unwrap();
    assert!(!node.has_meta());
    node.set("a", "x").unwrap();
}

#[test]
fn defaults_and_reset() {
    let mut options = with_meta(json!({
        "a": {"default": 1},
        "b": {"nullable": true},
        "fixed": {"constant": true},
    }));
    options.default_values = Some(IndexMap::from([("d".to_string(), Value::from("dv"))]));
    let node = Node::object(options).unwrap();

    assert_eq!(node.to_json(), json!({"a": 1, "d": "dv"}));
    assert_eq!(node.get_default("b"), Some(Value::Null));
    assert_eq!(node.get_default("a"), Some(Value::Int(1)));

    node.assign(json!({"a": 5, "b": 2, "c": 3, "d": "other", "fixed": "f"})).unwrap();
    assert_eq!(node.get_default("fixed"), Some(Value::from("f")));
    let old = node.reset().unwrap();

    assert_eq!(node.to_json(), json!({"a": 1, "d": "dv", "fixed": "f"}));
    assert_eq!(old.len(), 4);
    assert!(node.reset().unwrap().is_empty());
}

#[test]
fn emptying_resets_protected_keys() {
    let node = Node::object(with_meta(json!({"id": {"required": true, "default": 0}}))).unwrap();
    node.assign(json!({"id": 7, "x": 1})).unwrap();
    let err = node.empty().unwrap_err();
    assert_eq!(err.code(), "ENOTEMPTY");
    assert_eq!(node.to_json(), json!({"id": 0}));
}

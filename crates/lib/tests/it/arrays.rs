//! Array nodes: dense indices, moves, reconciled replacement.

use livenode::{
    Channel, LengthSignal, Node, NodeOptions, Segment, Value,
    reconcile::{self, Op},
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde_json::json;

use crate::helpers::Recorder;

fn assert_dense(node: &Node) {
    let expected: Vec<Segment> = (0..node.len()).map(Segment::from).collect();
    assert_eq!(node.keys(), expected);
}

fn list(items: &[i64]) -> Value {
    Value::List(items.iter().copied().map(Value::from).collect())
}

/// A random sequence of up to seven small integers, with repeats.
fn sequence(rng: &mut StdRng) -> Vec<i64> {
    let len: usize = rng.gen_range(0..8);
    (0..len).map(|_| rng.gen_range(0..6)).collect()
}

#[test]
fn indices_stay_dense() {
    let node = Node::array(NodeOptions::default()).unwrap();
    node.push(1).unwrap();
    node.push(2).unwrap();
    node.unshift(0).unwrap();
    node.insert(2, 9).unwrap();
    assert_eq!(node.copy(), list(&[0, 1, 9, 2]));
    assert_dense(&node);

    node.delete(1usize).unwrap();
    assert_eq!(node.copy(), list(&[0, 9, 2]));
    assert_dense(&node);

    node.move_item(0usize, 2usize).unwrap();
    assert_eq!(node.copy(), list(&[9, 2, 0]));
    assert_eq!(node.shift().unwrap(), Some(Value::Int(9)));
    assert_eq!(node.pop().unwrap(), Some(Value::Int(0)));
    assert_eq!(node.copy(), list(&[2]));
    assert_dense(&node);

    assert!(node.set(3usize, 1).unwrap_err().is_out_of_range());
}

#[test]
fn children_follow_their_items() {
    let root = Node::create(json!({"rows": [{"id": 1}, {"id": 2}, {"id": 3}]})).unwrap();
    let rows = root.get("rows").unwrap().as_node().cloned().unwrap();
    let events = Recorder::attach(&root, Channel::Event);

    rows.move_item(0usize, 2usize).unwrap();
    root.set("rows.2.id", 10).unwrap();

    assert_eq!(root.to_json(), json!({"rows": [{"id": 2}, {"id": 3}, {"id": 10}]}));
    assert_eq!(events.summary(), vec!["change 'rows'", "change 'rows'"]);
    assert_dense(&rows);
}

#[test]
fn move_destinations() {
    let node = Node::create(json!(["a", "b", "c", "d"])).unwrap();
    let moves = Recorder::attach(&node, livenode::EventKind::Move);

    assert!(node.move_item(0usize, "last".parse::<livenode::node::Destination>().unwrap()).unwrap());
    assert_eq!(node.to_json(), json!(["b", "c", "d", "a"]));
    assert!(node.move_item(3usize, livenode::node::Destination::Offset(-2)).unwrap());
    assert_eq!(node.to_json(), json!(["b", "a", "c", "d"]));
    assert!(!node.move_item(0usize, livenode::node::Destination::First).unwrap());
    assert!(node.move_item(0usize, 9usize).unwrap_err().is_out_of_range());

    assert_eq!(moves.summary(), vec!["move '0' 0 -> 3", "move '3' 3 -> 1"]);
}

#[test]
fn swapping_neighbours_is_one_move() {
    let node = Node::create(json!(["a", "b", "c"])).unwrap();
    let events = Recorder::attach(&node, Channel::Event);

    node.replace(json!(["a", "c", "b"])).unwrap();

    assert_eq!(node.to_json(), json!(["a", "c", "b"]));
    assert_eq!(events.summary(), vec!["move '1' 1 -> 2"]);
}

#[test]
fn replace_reaches_any_target() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..200 {
        let (from, to) = (sequence(&mut rng), sequence(&mut rng));
        let node = Node::array(NodeOptions::default()).unwrap();
        node.concat(from.iter().copied().map(Value::from)).unwrap();

        node.replace(list(&to)).unwrap();

        assert_eq!(node.copy(), list(&to), "replacing {from:?} with {to:?}");
        assert_dense(&node);
    }
}

#[test]
fn converged_plans_apply_cleanly() {
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..200 {
        let current: Vec<Value> = sequence(&mut rng).into_iter().map(Value::from).collect();
        let target: Vec<Value> = sequence(&mut rng).into_iter().map(Value::from).collect();
        let plan = reconcile::plan(&current, &target);
        if !plan.converged {
            continue;
        }
        let mut work = current.clone();
        for op in &plan.ops {
            op.apply(&mut work);
        }
        assert_eq!(work, target, "plan {:?} for {current:?} -> {target:?}", plan.ops);
    }
}

#[test]
fn appending_plans_inserts_only() {
    let current: Vec<Value> = vec![1.into(), 2.into()];
    let target: Vec<Value> = vec![1.into(), 2.into(), 3.into(), 4.into()];
    let plan = reconcile::plan(&current, &target);
    assert!(plan.converged);
    assert!(plan.ops.iter().all(|op| matches!(op, Op::Insert { .. })));
    assert_eq!(plan.ops.len(), 2);
    assert!(reconcile::plan(&target, &target).is_noop());
}

#[test]
fn length_signals() {
    let node = Node::array(NodeOptions::default()).unwrap();
    let empty = Recorder::attach(&node, LengthSignal::Empty);
    let single = Recorder::attach(&node, LengthSignal::Single);
    let multiple = Recorder::attach(&node, LengthSignal::Multiple);

    node.push("a").unwrap();
    node.push("b").unwrap();
    node.push("c").unwrap();
    node.pop().unwrap();
    node.pop().unwrap();
    node.pop().unwrap();

    assert_eq!(single.summary(), vec!["new '0'", "delete '1'"]);
    assert_eq!(multiple.summary(), vec!["new '1'"]);
    assert_eq!(empty.summary(), vec!["delete '0'"]);
}

#[test]
fn add_unique_skips_equal_items() {
    let node = Node::create(json!([{"a": 1}])).unwrap();
    assert!(!node.add_unique(json!({"a": 1})).unwrap());
    assert!(node.add_unique(json!({"a": 2})).unwrap());
    assert_eq!(node.len(), 2);
    assert_eq!(node.index_of(&Value::from(json!({"a": 2}))), Some(1));
}

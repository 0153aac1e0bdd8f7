//! Input and output buffers. Runs on paused tokio time.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use livenode::{
    Channel, InputMode, Node, NodeOptions, Value, Written,
    node::EventType,
    replication::{LinkRequest, MemoryTransport},
};
use serde_json::json;
use tokio::time::sleep;

use crate::helpers::{Recorder, settle};

#[tokio::test(start_paused = true)]
async fn debounced_writes_apply_the_last_value() {
    let node = Node::object(NodeOptions {
        debounce_ms: 50,
        ..Default::default()
    })
    .unwrap();
    let events = Recorder::attach(&node, Channel::Event);

    for value in 1..=3 {
        assert_eq!(node.write("a", value).unwrap(), Written::Buffered);
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(node.get("a"), None);

    sleep(Duration::from_millis(60)).await;
    assert_eq!(node.get("a"), Some(Value::Int(3)));
    assert_eq!(events.summary(), vec!["new 'a'"]);
}

#[tokio::test(start_paused = true)]
async fn throttled_writes_apply_first_and_last() {
    let node = Node::object(NodeOptions::default()).unwrap();
    node.buffer_input(50, InputMode::Throttle).unwrap();
    assert_eq!(node.input_mode(), Some(InputMode::Throttle));
    let events = Recorder::attach(&node, Channel::Event);

    assert_eq!(node.write("a", 1).unwrap(), Written::Applied(None));
    assert_eq!(node.write("a", 2).unwrap(), Written::Buffered);
    assert_eq!(node.write("a", 3).unwrap(), Written::Buffered);
    assert_eq!(node.get("a"), Some(Value::Int(1)));

    sleep(Duration::from_millis(60)).await;
    assert_eq!(node.get("a"), Some(Value::Int(3)));
    assert_eq!(events.summary(), vec!["new 'a'", "change 'a'"]);

    node.remove_input_buffer();
    assert_eq!(node.write("a", 4).unwrap(), Written::Applied(Some(Value::Int(3))));
}

#[tokio::test(start_paused = true)]
async fn output_buffer_batches_a_window() {
    let node = Node::object(NodeOptions::default()).unwrap();
    node.buffer_events(30).unwrap();
    let batches = Arc::new(Mutex::new(Vec::new()));
    let log = batches.clone();
    node.on_buffer(move |keys, events| {
        log.lock().unwrap().push((keys.to_vec(), events.len()));
        Ok(())
    });
    let direct = Recorder::attach(&node, Channel::Event);

    node.set("a", 1).unwrap();
    node.set("b", 1).unwrap();
    node.set("a", 2).unwrap();
    assert_eq!(direct.len(), 3);
    assert!(batches.lock().unwrap().is_empty());

    sleep(Duration::from_millis(40)).await;
    node.set("c", 1).unwrap();
    sleep(Duration::from_millis(40)).await;

    assert_eq!(
        *batches.lock().unwrap(),
        vec![
            (vec!["a".to_string(), "b".to_string()], 3),
            (vec!["c".to_string()], 1),
        ]
    );
    assert_eq!(node.event_buffer_delay(), Some(Duration::from_millis(30)));
    node.remove_event_buffer();
    assert_eq!(node.event_buffer_delay(), None);
}

#[tokio::test(start_paused = true)]
async fn bubbles_coalesce_per_key() {
    let node = Node::create(json!({"a": {"x": 1}, "b": {"y": 1}})).unwrap();
    node.buffer_bubbles(20).unwrap();
    let events = Recorder::attach(&node, Channel::Event);

    node.set("a.x", 2).unwrap();
    node.set("a.x", 3).unwrap();
    node.set("a.z", 1).unwrap();
    sleep(Duration::from_millis(5)).await;
    node.set("b.y", 2).unwrap();
    // local slots are not buffered
    node.set("c", 1).unwrap();
    assert_eq!(events.summary(), vec!["new 'c'"]);

    sleep(Duration::from_millis(30)).await;
    assert_eq!(
        events.summary(),
        vec!["new 'c'", "change 'a'", "change 'b'"]
    );
}

#[tokio::test(start_paused = true)]
async fn coalesced_bubbles_still_reach_the_peer() {
    let left = Node::create(json!({"c": {"x": 0}})).unwrap();
    left.buffer_bubbles(50).unwrap();
    let (here, there) = MemoryTransport::pair();
    let there = Arc::new(there);
    left.send_and_link(Arc::new(here), "doc", LinkRequest::default())
        .await
        .unwrap();
    let envelope = there.recv().await.unwrap();
    let (right, _link) = Node::from_shared(there, envelope).unwrap();
    right.set_event_type(EventType::Nested, None).unwrap();

    // the remote change opens the window, the local one is folded into it
    right.set("c.y", 1).unwrap();
    settle().await;
    left.set("c.z", 2).unwrap();
    sleep(Duration::from_millis(200)).await;
    settle().await;

    assert_eq!(left.to_json(), json!({"c": {"x": 0, "y": 1, "z": 2}}));
    assert_eq!(right.to_json(), left.to_json());
}

#[tokio::test(start_paused = true)]
async fn switching_to_nested_stops_coalescing() {
    let node = Node::create(json!({"a": {"x": 1}})).unwrap();
    node.set_event_type(EventType::Local, Some(20)).unwrap();
    assert!(node.is_buffering_bubbles());
    let events = Recorder::attach(&node, Channel::Event);

    node.set_event_type(EventType::Nested, None).unwrap();
    node.set("a.x", 2).unwrap();
    assert_eq!(events.summary(), vec!["change 'a.x'"]);

    node.remove_bubble_buffer();
    assert!(!node.is_buffering_bubbles());
}

#[test]
fn buffers_need_a_runtime_and_a_delay() {
    let node = Node::object(NodeOptions::default()).unwrap();
    assert_eq!(node.buffer_events(10).unwrap_err().code(), "EINVAL");
    assert_eq!(node.buffer_input(10, InputMode::Debounce).unwrap_err().code(), "EINVAL");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    let _guard = runtime.enter();
    assert_eq!(node.buffer_bubbles(0).unwrap_err().code(), "EINVAL");
    assert!(node.buffer_bubbles(5).is_ok());
}

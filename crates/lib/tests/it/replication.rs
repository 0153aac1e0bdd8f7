//! Two nodes kept in sync over an in-memory transport.

use std::sync::Arc;

use async_trait::async_trait;
use livenode::{
    Channel, Node, NodeOptions, Source,
    node::EventType,
    replication::{Envelope, InboundHandler, LinkRequest, MemoryTransport, Transport},
};
use serde_json::json;

use crate::helpers::{Recorder, settle, with_meta};

/// Shares `origin` over a fresh pair and returns the linked copy.
async fn shared_copy(origin: &Node) -> (Node, Arc<MemoryTransport>, Arc<MemoryTransport>) {
    let (here, there) = MemoryTransport::pair();
    let (here, there) = (Arc::new(here), Arc::new(there));
    origin
        .send_and_link(here.clone(), "doc", LinkRequest::default())
        .await
        .unwrap();
    let envelope = there.recv().await.unwrap();
    assert_eq!(envelope.subject, "doc");
    let (copy, _link) = Node::from_shared(there.clone(), envelope).unwrap();
    (copy, here, there)
}

#[tokio::test]
async fn shared_nodes_stay_in_sync() {
    let origin = Node::create(json!({"title": "draft", "items": [1, 2], "meta": {"rev": 1}})).unwrap();
    let (copy, _here, _there) = shared_copy(&origin).await;
    assert_eq!(copy.to_json(), origin.to_json());

    origin.set("title", "final").unwrap();
    origin.set("items.2", 3).unwrap();
    origin.delete("meta").unwrap();
    settle().await;
    assert_eq!(copy.to_json(), json!({"title": "final", "items": [1, 2, 3]}));

    copy.set("author", "ada").unwrap();
    settle().await;
    assert_eq!(origin.get("author"), Some("ada".into()));
}

#[tokio::test]
async fn remote_changes_are_not_echoed() {
    let origin = Node::create(json!({"n": 0})).unwrap();
    let (copy, _here, _there) = shared_copy(&origin).await;
    let on_copy = Recorder::attach(&copy, Channel::Event);
    let version = origin.version();

    origin.set("n", 1).unwrap();
    settle().await;

    assert_eq!(on_copy.summary(), vec!["change 'n'"]);
    assert_eq!(on_copy.events()[0].src, Some(Source::Remote));
    assert_eq!(origin.version(), version + 1);
}

#[tokio::test]
async fn nested_events_replicate_in_place() {
    let origin = Node::from_value(
        json!({"a": {"b": {"c": 1}}}),
        NodeOptions::default().with_event_type(EventType::Nested),
    )
    .unwrap();
    let (copy, _here, _there) = shared_copy(&origin).await;
    let inner = copy.get("a.b").unwrap().as_node().cloned().unwrap();

    origin.set("a.b.c", 2).unwrap();
    settle().await;

    assert_eq!(copy.get("a.b.c"), Some(2.into()));
    // the nested node was updated, not replaced
    assert!(copy.get("a.b").unwrap().as_node().unwrap().ptr_eq(&inner));
}

#[tokio::test]
async fn meta_travels_with_the_share() {
    let origin = Node::object(with_meta(json!({"count": {"type": "number", "default": 0}}))).unwrap();
    let (copy, _here, _there) = shared_copy(&origin).await;
    assert_eq!(copy.get("count"), Some(0.into()));
    copy.set("count", "5").unwrap();
    assert_eq!(copy.get("count"), Some(5.into()));
}

#[tokio::test]
async fn killed_links_stop_syncing() {
    let origin = Node::create(json!({"n": 0})).unwrap();
    let (copy, here, there) = shared_copy(&origin).await;
    assert_eq!(origin.links().len(), 1);

    origin.kill_links();
    settle().await;
    assert!(origin.links().is_empty());
    assert!(copy.links().is_empty());
    assert_eq!(here.channel_count(), 0);
    assert_eq!(there.channel_count(), 0);

    origin.set("n", 1).unwrap();
    copy.set("n", 2).unwrap();
    settle().await;
    assert_eq!(origin.get("n"), Some(1.into()));
    assert_eq!(copy.get("n"), Some(2.into()));
}

#[tokio::test]
async fn receiving_into_an_existing_node() {
    let (here, there) = MemoryTransport::pair();
    let (here, there) = (Arc::new(here), Arc::new(there));
    let origin = Node::create(json!({"a": 1})).unwrap();
    origin
        .send_and_link(here, "doc", LinkRequest::default())
        .await
        .unwrap();

    let target = Node::create(json!({"stale": true})).unwrap();
    let envelope = there.recv().await.unwrap();
    let link = target.receive_and_link(there, envelope, true).unwrap();
    assert_eq!(target.to_json(), json!({"a": 1}));
    assert!(link.is_receiving() && link.is_transmitting());

    origin.set("a", 2).unwrap();
    settle().await;
    assert_eq!(target.get("a"), Some(2.into()));
}

#[tokio::test]
async fn one_way_links() {
    let (here, there) = MemoryTransport::pair();
    let (here, there) = (Arc::new(here), Arc::new(there));
    let origin = Node::create(json!({"n": 0})).unwrap();
    let link = origin
        .send_and_link(
            here,
            "doc",
            LinkRequest {
                rx: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(link.is_transmitting());
    assert!(!link.is_receiving());

    let envelope = there.recv().await.unwrap();
    let (copy, peer) = Node::from_shared(there, envelope).unwrap();
    assert!(peer.is_receiving());
    assert!(!peer.is_transmitting());

    copy.set("n", 5).unwrap();
    origin.set("m", 1).unwrap();
    settle().await;
    assert_eq!(origin.get("n"), Some(0.into()));
    assert_eq!(copy.get("m"), Some(1.into()));
}

struct Offline;

#[async_trait]
impl Transport for Offline {
    async fn send(&self, _envelope: Envelope) -> livenode::Result<bool> {
        Ok(false)
    }

    fn subscribe(&self, _channel: &str, _handler: InboundHandler) {}

    fn unsubscribe(&self, _channel: &str) {}
}

#[tokio::test]
async fn failed_shares_leave_no_link() {
    let origin = Node::create(json!({"n": 0})).unwrap();
    let err = origin
        .send_and_link(Arc::new(Offline), "doc", LinkRequest::default())
        .await
        .unwrap_err();
    assert!(err.is_link_error());
    assert!(origin.links().is_empty());
    assert_eq!(origin.listener_count(&Channel::Event), 0);
}

#[test]
fn local_replicas_follow_their_source() {
    let source = Node::create(json!({"x": 1, "list": [1]})).unwrap();
    let replica = Node::create(json!({"x": 1, "list": [1]})).unwrap();
    assert!(source.replicate_to(&replica).unwrap());
    assert!(!replica.replicate_from(&source).unwrap());

    source.set("x", 2).unwrap();
    source.set("list.1", 2).unwrap();
    assert_eq!(replica.to_json(), json!({"x": 2, "list": [1, 2]}));

    assert!(source.stop_replicating_to(&replica));
    source.set("x", 3).unwrap();
    assert_eq!(replica.get("x"), Some(2.into()));
}

use std::sync::{Arc, Mutex};

use livenode::{Channel, Event, Node, NodeOptions, meta::MetaSpec};

/// Collects the events a node emits on one channel.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    pub fn attach(node: &Node, channel: impl Into<Channel>) -> Self {
        let recorder = Recorder::default();
        let events = recorder.events.clone();
        node.on(channel, move |event| {
            events.lock().unwrap().push(event.clone());
            Ok(())
        });
        recorder
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Events rendered as `"<evt> '<key>'"`.
    pub fn summary(&self) -> Vec<String> {
        self.events().iter().map(ToString::to_string).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

/// Builds a meta spec from `(key, rule)` pairs given as JSON.
pub fn meta(rules: serde_json::Value) -> MetaSpec {
    serde_json::from_value(rules).expect("valid meta spec")
}

pub fn with_meta(rules: serde_json::Value) -> NodeOptions {
    NodeOptions::default().with_meta(meta(rules))
}

/// Lets spawned tasks (link pumps, timers at zero delay) run to completion.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

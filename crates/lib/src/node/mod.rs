//! Live object and array nodes.
//!
//! A [`Node`] is a cheaply clonable handle to shared state. All mutation goes through the
//! pipeline in [`pipeline`](self) (`set`, `delete`, `move_item` and the bulk operations built
//! on them), which resolves the owning node, validates against meta, commits to the store and
//! emits exactly one event per logical change.
//!
//! ```rust
//! use livenode::{Channel, EventKind, Node, Value};
//! use std::sync::{Arc, Mutex};
//!
//! let node = Node::object(Default::default())?;
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let log = seen.clone();
//! node.on(Channel::Event, move |event| {
//!     log.lock().unwrap().push(event.key.to_string());
//!     Ok(())
//! });
//!
//! node.set("user.name", "alice")?;
//! assert_eq!(node.get("user.name"), Some(Value::from("alice")));
//! assert!(node.get("user").unwrap().is_node());
//! assert_eq!(*seen.lock().unwrap(), vec!["user"]);
//! # Ok::<(), livenode::Error>(())
//! ```

mod array;
mod bulk;
mod children;
mod errors;
mod intercept;
mod options;
mod pipeline;
mod read;
mod replicate;
mod resolve;
mod snapshot;

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

pub use array::Destination;
pub use bulk::{AssignFlags, EmptyFlags, OldValues};
pub use errors::{NodeError, Stage};
pub use intercept::{EventInterceptor, Interception, PrepareInterceptor, Proposal};
pub use options::{EventType, NodeOptions};
pub use pipeline::{SetOptions, Settled};
pub use snapshot::Snapshot;

pub(crate) use intercept::Interceptors;

use crate::{
    Result,
    bus::{self, Buffers, Bus, Channel, DEFAULT_PRIORITY, InputMode, Listener, ListenerId},
    event::Event,
    lock,
    meta::{self, CompiledMeta},
    path::{KeyPath, Segment},
    replication::Link,
    value::Value,
};

static NEXT_NODE: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The shape of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// String keys, insertion ordered
    Object,
    /// Dense integer keys `0..len`
    Array,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Object => f.write_str("object"),
            NodeKind::Array => f.write_str("array"),
        }
    }
}

/// The canonical data of a node.
#[derive(Debug, Clone)]
pub(crate) enum Store {
    Object(IndexMap<String, Value>),
    Array(Vec<Value>),
}

impl Store {
    fn new(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Object => Store::Object(IndexMap::new()),
            NodeKind::Array => Store::Array(Vec::new()),
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Store::Object(map) => map.len(),
            Store::Array(list) => list.len(),
        }
    }

    /// Expects a resolved local key.
    pub(crate) fn get(&self, key: &Segment) -> Option<&Value> {
        match (self, key) {
            (Store::Object(map), key) => map.get(&key.to_key()),
            (Store::Array(list), key) => key.as_index().and_then(|i| list.get(i)),
        }
    }

    pub(crate) fn get_mut(&mut self, key: &Segment) -> Option<&mut Value> {
        match (self, key) {
            (Store::Object(map), key) => map.get_mut(&key.to_key()),
            (Store::Array(list), key) => key.as_index().and_then(|i| list.get_mut(i)),
        }
    }

    /// Stores a value. Array indices must already be bounds checked.
    pub(crate) fn put(&mut self, key: &Segment, value: Value, insert: bool) {
        match self {
            Store::Object(map) => {
                map.insert(key.to_key(), value);
            }
            Store::Array(list) => {
                let index = key.as_index().unwrap_or(list.len()).min(list.len());
                if insert || index == list.len() {
                    list.insert(index, value);
                } else {
                    list[index] = value;
                }
            }
        }
    }

    pub(crate) fn remove(&mut self, key: &Segment) -> Option<Value> {
        match self {
            Store::Object(map) => map.shift_remove(&key.to_key()),
            Store::Array(list) => match key.as_index() {
                Some(index) if index < list.len() => Some(list.remove(index)),
                _ => None,
            },
        }
    }

    pub(crate) fn keys(&self) -> Vec<Segment> {
        match self {
            Store::Object(map) => map.keys().map(|k| Segment::Key(k.clone())).collect(),
            Store::Array(list) => (0..list.len()).map(Segment::Index).collect(),
        }
    }

    pub(crate) fn entries(&self) -> Vec<(Segment, Value)> {
        match self {
            Store::Object(map) => map
                .iter()
                .map(|(k, v)| (Segment::Key(k.clone()), v.clone()))
                .collect(),
            Store::Array(list) => list
                .iter()
                .enumerate()
                .map(|(i, v)| (Segment::Index(i), v.clone()))
                .collect(),
        }
    }

    /// The slot currently holding the child with this id.
    pub(crate) fn slot_of(&self, child: NodeId) -> Option<Segment> {
        let holds = |value: &Value| value.as_node().is_some_and(|node| node.id() == child);
        match self {
            Store::Object(map) => map
                .iter()
                .find(|(_, v)| holds(v))
                .map(|(k, _)| Segment::Key(k.clone())),
            Store::Array(list) => list.iter().position(holds).map(Segment::Index),
        }
    }

    /// Shallow value: plain containers hold live children.
    pub(crate) fn to_value(&self) -> Value {
        match self {
            Store::Object(map) => Value::Map(map.clone()),
            Store::Array(list) => Value::List(list.clone()),
        }
    }
}

/// Everything about a node that changes over time.
pub(crate) struct NodeState {
    pub(crate) store: Store,
    pub(crate) options: NodeOptions,
    pub(crate) meta: Arc<CompiledMeta>,
    /// Incremented once per emitted change
    pub(crate) version: u64,
    /// Listener this node keeps on each owned child
    pub(crate) child_listeners: HashMap<NodeId, ListenerId>,
    pub(crate) owner: Option<WeakNode>,
    pub(crate) links: Vec<Link>,
    /// Listeners forwarding this node's events to local replicas
    pub(crate) replicas: HashMap<NodeId, ListenerId>,
    pub(crate) storage_attached: bool,
}

pub(crate) struct NodeInner {
    id: NodeId,
    kind: NodeKind,
    pub(crate) state: Mutex<NodeState>,
    pub(crate) bus: Bus,
    pub(crate) interceptors: Mutex<Interceptors>,
    pub(crate) buffers: Buffers,
}

impl Drop for NodeInner {
    fn drop(&mut self) {
        self.buffers.cancel_all();
        trace!(node = %self.id, "Dropped node");
    }
}

/// A live object or array node.
///
/// Cloning gives another handle to the same node. Equality of handles is identity, see
/// [`Node::ptr_eq`].
#[derive(Clone)]
pub struct Node {
    pub(crate) inner: Arc<NodeInner>,
}

/// A non-owning handle to a node.
#[derive(Clone, Default)]
pub struct WeakNode {
    inner: Weak<NodeInner>,
}

impl WeakNode {
    pub fn upgrade(&self) -> Option<Node> {
        self.inner.upgrade().map(|inner| Node { inner })
    }
}

impl fmt::Debug for WeakNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(node) => write!(f, "WeakNode({})", node.id()),
            None => f.write_str("WeakNode(dropped)"),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // does not lock, so it is safe to use while the state is held
        f.debug_struct("Node")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Creates an empty object node.
    pub fn object(options: NodeOptions) -> Result<Node> {
        Node::new(NodeKind::Object, options)
    }

    /// Creates an empty array node.
    pub fn array(options: NodeOptions) -> Result<Node> {
        Node::new(NodeKind::Array, options)
    }

    /// Creates an empty node, applies the buffering options and sets the meta defaults.
    pub fn new(kind: NodeKind, options: NodeOptions) -> Result<Node> {
        let spec = meta::with_default_values(options.meta.as_ref(), options.default_values.as_ref());
        let compiled = CompiledMeta::compile(spec.as_ref())?;
        let id = NodeId(NEXT_NODE.fetch_add(1, Ordering::Relaxed));
        trace!(node = %id, %kind, name = ?options.name, "Creating node");

        let node = Node {
            inner: Arc::new(NodeInner {
                id,
                kind,
                state: Mutex::new(NodeState {
                    store: Store::new(kind),
                    options: options.clone(),
                    meta: Arc::new(compiled),
                    version: 0,
                    child_listeners: HashMap::new(),
                    owner: None,
                    links: Vec::new(),
                    replicas: HashMap::new(),
                    storage_attached: false,
                }),
                bus: Bus::default(),
                interceptors: Mutex::new(Interceptors::default()),
                buffers: Buffers::default(),
            }),
        };

        if options.buffer_event_ms > 0 {
            node.buffer_events(options.buffer_event_ms)?;
        }
        if options.debounce_ms > 0 {
            if options.throttle_ms > 0 {
                warn!(node = %id, "Both debounce and throttle are set, using debounce");
            }
            node.buffer_input(options.debounce_ms, InputMode::Debounce)?;
        } else if options.throttle_ms > 0 {
            node.buffer_input(options.throttle_ms, InputMode::Throttle)?;
        }
        if options.buffer_bubbles_ms > 0 {
            node.buffer_bubbles(options.buffer_bubbles_ms)?;
        }

        let defaults = node.state().meta.defaults();
        if !defaults.is_empty() {
            let _turn = bus::turn::enter();
            let quiet = SetOptions {
                no_emit: true,
                ..Default::default()
            };
            for (key, value) in defaults {
                node.set_with(Segment::Key(key), value, quiet.clone())?;
            }
        }
        Ok(node)
    }

    /// Creates a node shaped like `value` (a map or list, or another node whose contents are
    /// copied) and fills it without emitting.
    pub fn from_value(value: impl Into<Value>, options: NodeOptions) -> Result<Node> {
        let value = match value.into() {
            Value::Node(node) => node.copy(),
            other => other,
        };
        let kind = match &value {
            Value::Map(_) => NodeKind::Object,
            Value::List(_) => NodeKind::Array,
            other => {
                return Err(NodeError::InvalidType {
                    expected: "list or map".to_string(),
                    actual: other.type_name().to_string(),
                }
                .into());
            }
        };
        let node = Node::new(kind, options)?;
        node.assign_with(
            value,
            AssignFlags {
                no_emit: true,
                ..Default::default()
            },
        )?;
        Ok(node)
    }

    /// [`Node::from_value`] with default options.
    pub fn create(value: impl Into<Value>) -> Result<Node> {
        Node::from_value(value, NodeOptions::default())
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn kind(&self) -> NodeKind {
        self.inner.kind
    }

    pub fn is_array(&self) -> bool {
        self.inner.kind == NodeKind::Array
    }

    /// The configured name, if any.
    pub fn name(&self) -> Option<String> {
        self.state().options.name.clone()
    }

    /// A copy of the current options.
    pub fn options(&self) -> NodeOptions {
        self.state().options.clone()
    }

    pub(crate) fn update_options(&self, f: impl FnOnce(&mut NodeOptions)) {
        f(&mut self.state().options);
    }

    /// Whether both handles refer to the same node.
    pub fn ptr_eq(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn downgrade(&self) -> WeakNode {
        WeakNode {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// The node owning this one, if it is a child.
    pub fn parent(&self) -> Option<Node> {
        self.state().owner.as_ref().and_then(WeakNode::upgrade)
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, NodeState> {
        lock(&self.inner.state)
    }

    /// Subscribes to a channel with the default priority.
    pub fn on<F>(&self, channel: impl Into<Channel>, f: F) -> ListenerId
    where
        F: Fn(&Event) -> Result<()> + Send + Sync + 'static,
    {
        self.inner
            .bus
            .on(channel.into(), DEFAULT_PRIORITY, false, false, Arc::new(f))
    }

    /// Subscribes with an explicit priority. Lower priorities run first.
    pub fn on_with_priority<F>(&self, channel: impl Into<Channel>, priority: i32, f: F) -> ListenerId
    where
        F: Fn(&Event) -> Result<()> + Send + Sync + 'static,
    {
        self.inner
            .bus
            .on(channel.into(), priority, false, false, Arc::new(f))
    }

    /// Subscribes for a single emission.
    pub fn once<F>(&self, channel: impl Into<Channel>, f: F) -> ListenerId
    where
        F: Fn(&Event) -> Result<()> + Send + Sync + 'static,
    {
        self.inner
            .bus
            .on(channel.into(), DEFAULT_PRIORITY, true, false, Arc::new(f))
    }

    /// Unsubscribes a listener, returning false if it was unknown.
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.bus.off(id)
    }

    /// Subscribes to output buffer flushes, see [`Node::buffer_events`].
    pub fn on_buffer<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&[String], &[Event]) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.bus.on_buffer(Arc::new(f))
    }

    /// Number of listeners on a channel.
    pub fn listener_count(&self, channel: &Channel) -> usize {
        self.inner.bus.count_on(channel)
    }

    /// Registers an internal listener. It receives events of the turn it was added in.
    pub(crate) fn on_system(&self, channel: Channel, priority: i32, f: Listener) -> ListenerId {
        self.inner.bus.on(channel, priority, false, true, f)
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

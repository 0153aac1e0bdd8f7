//! Listener registry and dispatch for node events.
//!
//! Each node owns a [`Bus`]. Listeners subscribe to a [`Channel`]: the generic event channel,
//! one of the per-kind channels, a per-key channel, the `intercept` channel or one of the
//! array length signals. Emission is deferred until the current synchronous turn ends (see
//! [`turn`]) and only reaches listeners that were registered before the turn began.
//!
//! Listeners run in ascending priority order, ties broken by registration order.

mod buffer;
pub(crate) mod turn;

use std::{
    fmt,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use tracing::{debug, warn};

pub(crate) use buffer::Buffers;
pub use buffer::{InputMode, Written};

use crate::{
    Result,
    event::{Event, EventKind},
    lock,
};

/// Callback invoked with an emitted event.
pub type Listener = Arc<dyn Fn(&Event) -> Result<()> + Send + Sync>;

/// Callback invoked when an output buffer flushes, with the affected keys and the events.
pub type BufferListener = Arc<dyn Fn(&[String], &[Event]) -> Result<()> + Send + Sync>;

/// Default priority of listeners registered through [`crate::Node::on`].
pub const DEFAULT_PRIORITY: i32 = 0;

/// Priority of the listener a parent keeps on each of its children. Runs after user listeners
/// on the child so the child's own observers see a change before its ancestors do.
pub(crate) const BUBBLE_PRIORITY: i32 = 1000;

static NEXT_LISTENER: AtomicU64 = AtomicU64::new(1);

pub(crate) fn listener_mark() -> u64 {
    NEXT_LISTENER.load(Ordering::SeqCst)
}

/// Handle for removing a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        Self(NEXT_LISTENER.fetch_add(1, Ordering::SeqCst))
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Length transitions reported by array nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LengthSignal {
    /// The array became empty
    Empty,
    /// The array now holds exactly one item
    Single,
    /// The array grew from one to two items
    Multiple,
}

/// What a listener subscribes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Every emitted event
    Event,
    /// Events of one kind
    Kind(EventKind),
    /// Events whose key, joined with `.`, equals this string
    Key(String),
    /// Mutations stopped or reverted by an interceptor
    Intercept,
    /// Array length transitions
    Length(LengthSignal),
}

impl Channel {
    /// Per-key channel for a key or path.
    pub fn key(key: impl fmt::Display) -> Self {
        Channel::Key(key.to_string())
    }
}

impl From<EventKind> for Channel {
    fn from(kind: EventKind) -> Self {
        Channel::Kind(kind)
    }
}

impl From<LengthSignal> for Channel {
    fn from(signal: LengthSignal) -> Self {
        Channel::Length(signal)
    }
}

struct Entry {
    id: ListenerId,
    channel: Channel,
    priority: i32,
    once: bool,
    /// Internal listeners (bubbling, replication, storage) are exempt from the turn mark
    system: bool,
    f: Listener,
}

/// A listener captured for one emission.
#[derive(Clone)]
pub(crate) struct Target {
    id: ListenerId,
    once: bool,
    f: Listener,
}

#[derive(Default)]
pub(crate) struct Bus {
    entries: Mutex<Vec<Entry>>,
    buffer_listeners: Mutex<Vec<(ListenerId, BufferListener)>>,
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl Bus {
    pub(crate) fn on(
        &self,
        channel: Channel,
        priority: i32,
        once: bool,
        system: bool,
        f: Listener,
    ) -> ListenerId {
        let id = ListenerId::next();
        let mut entries = lock(&self.entries);
        let at = entries.partition_point(|e| (e.priority, e.id) <= (priority, id));
        entries.insert(
            at,
            Entry {
                id,
                channel,
                priority,
                once,
                system,
                f,
            },
        );
        id
    }

    /// Removes a listener. Returns false if it was not registered.
    pub(crate) fn off(&self, id: ListenerId) -> bool {
        let removed = {
            let mut entries = lock(&self.entries);
            let before = entries.len();
            entries.retain(|e| e.id != id);
            before != entries.len()
        };
        if removed {
            return true;
        }
        let mut buffers = lock(&self.buffer_listeners);
        let before = buffers.len();
        buffers.retain(|(existing, _)| *existing != id);
        before != buffers.len()
    }

    /// Captures the listeners of `channel` that existed before the current turn began.
    pub(crate) fn snapshot(&self, channel: &Channel) -> Vec<Target> {
        let mark = turn::mark();
        let entries = lock(&self.entries);
        entries
            .iter()
            .filter(|e| e.channel == *channel && (e.system || e.id.0 < mark))
            .map(|e| Target {
                id: e.id,
                once: e.once,
                f: e.f.clone(),
            })
            .collect()
    }

    /// Calls captured listeners. Errors have no caller to go to, so they are logged.
    pub(crate) fn fire(&self, channel: &Channel, targets: &[Target], event: &Event) {
        for target in targets {
            // a once-listener only fires if it was still registered
            if target.once && !self.off(target.id) {
                continue;
            }
            if let Err(err) = (target.f)(event) {
                warn!(listener = %target.id, ?channel, %event, error = %err, "Listener failed");
            }
        }
    }

    pub(crate) fn on_buffer(&self, f: BufferListener) -> ListenerId {
        let id = ListenerId::next();
        lock(&self.buffer_listeners).push((id, f));
        id
    }

    pub(crate) fn fire_buffer(&self, keys: &[String], events: &[Event]) {
        let listeners: Vec<BufferListener> = lock(&self.buffer_listeners)
            .iter()
            .map(|(_, f)| f.clone())
            .collect();
        debug!(keys = keys.len(), events = events.len(), "Flushing output buffer");
        for f in listeners {
            if let Err(err) = f(keys, events) {
                warn!(error = %err, "Buffer listener failed");
            }
        }
    }

    pub(crate) fn listener_count(&self) -> usize {
        lock(&self.entries).len()
    }

    pub(crate) fn count_on(&self, channel: &Channel) -> usize {
        lock(&self.entries)
            .iter()
            .filter(|e| e.channel == *channel)
            .count()
    }
}

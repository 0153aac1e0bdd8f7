//! The canonical change record emitted by nodes.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    path::{KeyPath, Segment},
    value::Value,
};

/// What kind of change an [`Event`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    New,
    Change,
    Delete,
    Move,
    /// Nothing observable changed; never emitted.
    None,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::New => "new",
            EventKind::Change => "change",
            EventKind::Delete => "delete",
            EventKind::Move => "move",
            EventKind::None => "none",
        };
        f.write_str(name)
    }
}

/// Why a mutation happened, when it was not a plain local call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// A delete that was turned into a reset by required/constant meta
    Delete,
    /// Part of a move expressed as delete + insert
    Move,
    /// Applied from a local replication source
    Replicate,
    /// Applied from a peer over a replication link
    Remote,
    /// Applied while reverting to a snapshot
    Revert,
    /// Applied while resetting to defaults
    Reset,
}

/// The local view of a nested change: what happened to the slot that holds the nested value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalEvent {
    pub key: Segment,
    pub evt: EventKind,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "some_value"
    )]
    pub old: Option<Value>,
}

/// One mutation of one node.
///
/// `key` is relative to the node that emitted the event: a child's event arrives at its
/// parent with the child's key prepended (nested event shape) or collapsed into a single
/// `change` of the child's slot (local event shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub key: KeyPath,
    pub evt: EventKind,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "some_value"
    )]
    pub old: Option<Value>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "some_value"
    )]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<Source>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalEvent>,
    /// Receive channel of the link this event arrived through
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rx: Option<String>,
}

/// Present-but-null fields deserialize to `Some(Value::Null)`, absent ones to `None`.
fn some_value<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(d).map(Some)
}

impl Event {
    /// Creates an event skeleton for `key`.
    pub fn new(key: KeyPath, evt: EventKind) -> Self {
        Self {
            key,
            evt,
            old: None,
            value: None,
            from: None,
            to: None,
            src: None,
            local: None,
            rx: None,
        }
    }

    /// Sets the old value, builder style.
    pub fn with_old(mut self, old: Option<Value>) -> Self {
        self.old = old;
        self
    }

    /// Sets the new value, builder style.
    pub fn with_value(mut self, value: Option<Value>) -> Self {
        self.value = value;
        self
    }

    /// The first segment of the key, ie. the slot on the emitting node.
    pub fn local_key(&self) -> Option<&Segment> {
        self.key.first()
    }

    /// Whether the change happened below the emitting node's own slots.
    pub fn is_nested(&self) -> bool {
        self.key.is_nested()
    }

    /// A copy with every live node in `old`/`value` replaced by plain data.
    pub fn detached(&self) -> Event {
        let mut event = self.clone();
        event.old = event.old.as_ref().map(Value::to_plain);
        event.value = event.value.as_ref().map(Value::to_plain);
        if let Some(local) = event.local.as_mut() {
            local.old = local.old.as_ref().map(Value::to_plain);
        }
        event
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.evt, self.key)?;
        if let (Some(from), Some(to)) = (self.from, self.to) {
            write!(f, " {from} -> {to}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_values_survive_json() {
        let event = Event::new(KeyPath::single("a"), EventKind::Change)
            .with_old(Some(Value::Int(1)))
            .with_value(Some(Value::Null));
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.value, Some(Value::Null));
        assert_eq!(back.old, Some(Value::Int(1)));
        assert_eq!(back.src, None);
    }

    #[test]
    fn kinds_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&EventKind::Move).unwrap(), "\"move\"");
        assert_eq!(serde_json::to_string(&Source::Remote).unwrap(), "\"remote\"");
    }
}

//! Node configuration.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{meta::MetaSpec, value::Value};

/// How a parent reports changes that happened inside one of its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// Collapse into a `change` of the child's slot, carrying the whole child
    #[default]
    Local,
    /// Prefix the child's key and keep the child's event kind
    Nested,
}

/// Options controlling validation, event shape and buffering of a node.
///
/// Children created by promotion inherit their parent's options, except for `meta` (they get
/// the rules for their key), `default_values` and the event and input buffers.
///
/// Delays are in milliseconds, 0 disables the feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeOptions {
    /// Used in logs and as prefix for children's names
    pub name: Option<String>,
    pub meta: Option<MetaSpec>,
    /// Shorthand for `meta: {key: {default: value}}`
    pub default_values: Option<IndexMap<String, Value>>,
    /// Promote plain lists and maps to child nodes when they are set
    pub smartify_children: bool,
    pub buffer_event_ms: u64,
    pub debounce_ms: u64,
    /// Ignored if `debounce_ms` is set
    pub throttle_ms: u64,
    pub event_type: EventType,
    /// Only has an effect with [`EventType::Local`]
    pub buffer_bubbles_ms: u64,
    /// Splits string keys into nested paths
    pub key_delim: char,
    /// Array moves emit a single `move` event instead of `delete` + `new`
    pub move_event: bool,
    /// Array replace computes a minimal diff instead of rebuilding
    pub smart_replace: bool,
    /// Default transmit setting for replication links
    pub tx: Option<bool>,
    /// Default receive setting for replication links
    pub rx: Option<bool>,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            name: None,
            meta: None,
            default_values: None,
            smartify_children: true,
            buffer_event_ms: 0,
            debounce_ms: 0,
            throttle_ms: 0,
            event_type: EventType::Local,
            buffer_bubbles_ms: 0,
            key_delim: '.',
            move_event: true,
            smart_replace: true,
            tx: None,
            rx: None,
        }
    }
}

impl NodeOptions {
    /// Options with a name, everything else default.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Sets the meta, builder style.
    pub fn with_meta(mut self, meta: MetaSpec) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Sets the event type, builder style.
    pub fn with_event_type(mut self, event_type: EventType) -> Self {
        self.event_type = event_type;
        self
    }

    /// Options for a child promoted under `key`.
    pub(crate) fn for_child(&self, key: &str, meta: Option<MetaSpec>) -> Self {
        let mut options = self.clone();
        options.meta = meta;
        options.default_values = None;
        options.buffer_event_ms = 0;
        options.debounce_ms = 0;
        options.throttle_ms = 0;
        options.name = self.name.as_ref().map(|name| format!("{name}.{key}"));
        options
    }
}

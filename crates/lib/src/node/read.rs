//! Read accessors.
//!
//! Reads never emit and never hold the node's lock while descending into children.

use indexmap::IndexMap;

use super::Node;
use crate::{
    Result,
    path::{KeyPath, PathArg, Segment},
    value::Value,
};

impl Node {
    /// The value at `key`, or `None` if it does not exist or the key is invalid.
    ///
    /// Children are returned as live [`Value::Node`] handles.
    pub fn get(&self, key: impl Into<PathArg>) -> Option<Value> {
        self.try_get(key).ok().flatten()
    }

    /// Like [`Node::get`] but reports invalid keys.
    pub fn try_get(&self, key: impl Into<PathArg>) -> Result<Option<Value>> {
        let (owner, rest) = self.deepest_owner(key)?;
        Ok(owner.get_path(&rest))
    }

    /// Reads along an already parsed path, descending into children and plain containers.
    pub fn get_path(&self, path: &KeyPath) -> Option<Value> {
        let Some((first, rest)) = path.split_first() else {
            return Some(Value::Node(self.clone()));
        };
        let first = self.local_key(first).ok()?;
        let value = self.state().store.get(&first)?.clone();
        value.get_path(rest)
    }

    /// A shallow value: a map or list whose children are live node handles.
    pub fn value(&self) -> Value {
        self.state().store.to_value()
    }

    /// A fully plain deep copy.
    pub fn copy(&self) -> Value {
        self.value().to_plain()
    }

    /// The plain contents as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        self.copy().to_json()
    }

    pub fn has(&self, key: impl Into<PathArg>) -> bool {
        self.get(key).is_some()
    }

    /// Local keys. Array nodes always yield `0..len`.
    pub fn keys(&self) -> Vec<Segment> {
        self.state().store.keys()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries().into_iter().map(|(_, v)| v).collect()
    }

    pub fn entries(&self) -> Vec<(Segment, Value)> {
        self.state().store.entries()
    }

    pub fn len(&self) -> usize {
        self.state().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of changes emitted so far.
    pub fn version(&self) -> u64 {
        self.state().version
    }

    /// `(path, leaf)` pairs down to `depth` levels.
    pub fn flat_entries(&self, depth: usize) -> Vec<(KeyPath, Value)> {
        self.copy().flatten_entries(depth)
    }

    /// [`Node::flat_entries`] keyed by paths joined with the node's delimiter.
    pub fn flat_object(&self, depth: usize) -> IndexMap<String, Value> {
        let delim = self.state().options.key_delim;
        self.flat_entries(depth)
            .into_iter()
            .map(|(path, value)| (path.join(delim), value))
            .collect()
    }

    /// A plain container of the same shape holding only `keys`. Missing keys are skipped.
    pub fn sub_obj<K>(&self, keys: impl IntoIterator<Item = K>) -> Value
    where
        K: Into<PathArg>,
    {
        let picked = keys
            .into_iter()
            .map(Into::into)
            .filter_map(|key| {
                let name = match &key {
                    PathArg::Text(text) => text.clone(),
                    PathArg::Index(i) => i.to_string(),
                    PathArg::Path(path) => path.join(self.state().options.key_delim),
                };
                self.get(key).map(|value| (name, value.to_plain()))
            });
        if self.is_array() {
            Value::List(picked.map(|(_, value)| value).collect())
        } else {
            Value::Map(picked.collect())
        }
    }

    /// The first local key whose value matches.
    pub fn find_index<P>(&self, predicate: P) -> Option<Segment>
    where
        P: Fn(&Value) -> bool,
    {
        self.entries()
            .into_iter()
            .find(|(_, value)| predicate(value))
            .map(|(key, _)| key)
    }

    /// Every local key whose value matches.
    pub fn find_index_all<P>(&self, predicate: P) -> Vec<Segment>
    where
        P: Fn(&Value) -> bool,
    {
        self.entries()
            .into_iter()
            .filter(|(_, value)| predicate(value))
            .map(|(key, _)| key)
            .collect()
    }

    /// Every local entry whose value matches.
    pub fn find_all<P>(&self, predicate: P) -> Vec<(Segment, Value)>
    where
        P: Fn(&Value) -> bool,
    {
        self.entries()
            .into_iter()
            .filter(|(_, value)| predicate(value))
            .collect()
    }

    /// The first local value that matches.
    pub fn find<P>(&self, predicate: P) -> Option<Value>
    where
        P: Fn(&Value) -> bool,
    {
        self.values().into_iter().find(|value| predicate(value))
    }

    /// Index of the first item equal to `value` (array nodes).
    pub fn index_of(&self, value: &Value) -> Option<usize> {
        self.values().iter().position(|item| item == value)
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.find_index(|item| item == value).is_some()
    }

    /// The first item of an array node, or first value of an object node.
    pub fn first(&self) -> Option<Value> {
        self.values().into_iter().next()
    }

    pub fn last(&self) -> Option<Value> {
        self.values().pop()
    }
}

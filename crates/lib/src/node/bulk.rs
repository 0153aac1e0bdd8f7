//! Operations touching many keys at once, and meta management.
//!
//! All of them are built on `set`/`delete`, so each changed key still produces its own event.
//! They run inside one turn: listeners see the events only once the whole operation is done.

use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use super::{Node, NodeError, NodeKind, SetOptions};
use crate::{
    Result,
    bus::turn,
    event::Source,
    meta::{self, CompiledMeta, MetaRule, MetaSpec},
    path::{KeyPath, PathArg, Segment},
    reconcile::{self, Op},
    value::Value,
};

/// Previous values of the keys a bulk operation changed. `None` marks a key that did not exist.
pub type OldValues = Vec<(KeyPath, Option<Value>)>;

/// Flags for [`Node::assign_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssignFlags {
    /// Apply without emitting
    pub no_emit: bool,
    /// Keep going after a failing entry and report all failures at the end
    pub try_all: bool,
}

/// Flags for [`Node::empty_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmptyFlags {
    /// Delete without emitting
    pub no_emit: bool,
    /// Log failing keys and keep going
    pub finish: bool,
}

impl Node {
    /// Checks that bulk data has this node's shape. Empty data yields `None`.
    fn check_multi_set(&self, data: Value) -> Result<Option<Value>> {
        let data = data.to_plain();
        let empty = match (self.kind(), &data) {
            (NodeKind::Object, Value::Map(map)) => map.is_empty(),
            (NodeKind::Array, Value::List(list)) => list.is_empty(),
            (kind, other) => {
                return Err(NodeError::InvalidType {
                    expected: format!("data matching an {kind} node"),
                    actual: other.type_name().to_string(),
                }
                .into());
            }
        };
        Ok(if empty { None } else { Some(data) })
    }

    /// Sets every entry of a map (object nodes) or list (array nodes), local keys only.
    ///
    /// Returns the old values of the keys that changed, or `None` if nothing changed.
    pub fn assign(&self, data: impl Into<Value>) -> Result<Option<OldValues>> {
        self.assign_with(data, AssignFlags::default())
    }

    pub fn assign_with(&self, data: impl Into<Value>, flags: AssignFlags) -> Result<Option<OldValues>> {
        let Some(data) = self.check_multi_set(data.into())? else {
            trace!(node = %self.id(), "Nothing to assign");
            return Ok(None);
        };
        let entries = match data {
            Value::Map(map) => map
                .into_iter()
                .map(|(key, value)| (KeyPath::single(key), Some(value)))
                .collect(),
            Value::List(list) => list
                .into_iter()
                .enumerate()
                .map(|(index, value)| (KeyPath::single(index), Some(value)))
                .collect(),
            _ => Vec::new(),
        };
        self.assign_entries(entries, flags, None)
    }

    /// Sets (or with `None`, deletes) each path in order.
    pub(crate) fn assign_entries(
        &self,
        entries: Vec<(KeyPath, Option<Value>)>,
        flags: AssignFlags,
        src: Option<Source>,
    ) -> Result<Option<OldValues>> {
        let _turn = turn::enter();
        let total = entries.len();
        trace!(node = %self.id(), total, "Assigning entries");
        let options = SetOptions {
            no_emit: flags.no_emit,
            src,
            ..Default::default()
        };
        let mut old_values = OldValues::new();
        let mut failures = Vec::new();
        for (key, value) in entries {
            let result = match &value {
                Some(value) => self.set_with(key.clone(), value.clone(), options.clone()),
                None => self.delete_with(key.clone(), options.clone()),
            };
            match result {
                Ok(old) => {
                    if old != value {
                        old_values.push((key, old));
                    }
                }
                Err(err) if flags.try_all => {
                    warn!(node = %self.id(), %key, error = %err, "Failed to assign entry");
                    failures.push((key.to_string(), err));
                }
                Err(err) => return Err(err),
            }
        }
        if !failures.is_empty() {
            return Err(NodeError::Partial { failures, total }.into());
        }
        if old_values.is_empty() {
            debug!(node = %self.id(), "All values were the same as before");
            return Ok(None);
        }
        Ok(Some(old_values))
    }

    /// Assigns nested data path by path down to `depth`, leaving sibling data in place.
    ///
    /// Where `assign({"list": [c]})` replaces the whole list, `combine` only changes index 0.
    pub fn combine(&self, data: impl Into<Value>, depth: usize) -> Result<Option<OldValues>> {
        let Some(data) = self.check_multi_set(data.into())? else {
            return Ok(None);
        };
        let entries = data
            .flatten_entries(depth)
            .into_iter()
            .map(|(path, value)| (path, Some(value)))
            .collect();
        self.assign_entries(entries, AssignFlags::default(), None)
    }

    /// Makes the node hold exactly `data`, changing only what differs.
    ///
    /// Object nodes delete the keys missing from `data` and set the rest. Array nodes are
    /// reconciled with a minimal diff when `smart_replace` is on, and rebuilt otherwise or when
    /// the diff does not reach the target. Returns the previous plain contents, or `None` if
    /// nothing changed.
    pub fn replace(&self, data: impl Into<Value>) -> Result<Option<Value>> {
        let _turn = turn::enter();
        let Some(data) = self.check_multi_set(data.into())? else {
            trace!(node = %self.id(), "Replacing with no data, emptying");
            return self.empty();
        };
        let before = self.copy();
        if before == data {
            debug!(node = %self.id(), "Replacement equals current contents");
            return Ok(None);
        }
        self.replace_values(data, None)?;
        Ok(Some(before))
    }

    /// Replaces the contents with `data`, whose top level may hold live child nodes. Those
    /// are matched by identity, so they end up back in the node rather than copied.
    pub(crate) fn replace_values(&self, data: Value, src: Option<Source>) -> Result<()> {
        let _turn = turn::enter();
        match data {
            Value::List(target) => self.replace_items(target, src),
            Value::Map(map) => {
                let mut entries: Vec<(KeyPath, Option<Value>)> = self
                    .keys()
                    .into_iter()
                    .filter(|key| !map.contains_key(&key.to_key()))
                    .map(|key| (KeyPath::single(key), None))
                    .collect();
                entries.extend(
                    map.into_iter()
                        .map(|(key, value)| (KeyPath::single(key), Some(value))),
                );
                self.assign_entries(entries, AssignFlags::default(), src).map(drop)
            }
            other => Err(NodeError::bug(format!("replace with {}", other.type_name())).into()),
        }
    }

    fn replace_items(&self, target: Vec<Value>, src: Option<Source>) -> Result<()> {
        if self.state().options.smart_replace {
            let live = target.iter().any(|item| item.as_node().is_some());
            let current: Vec<Value> = if live {
                self.values()
            } else {
                self.values().iter().map(Value::to_plain).collect()
            };
            let plan = reconcile::plan(&current, &target);
            if plan.converged {
                match self.apply_plan(&plan.ops, src) {
                    Ok(()) if self.values().iter().map(Value::to_plain).eq(target.iter().cloned()) => {
                        return Ok(());
                    }
                    Ok(()) => warn!(node = %self.id(), "Reconciled array differs from target, rebuilding"),
                    Err(err) => warn!(node = %self.id(), error = %err, "Reconciling failed, rebuilding"),
                }
            } else {
                debug!(node = %self.id(), "Reconciler did not converge, rebuilding");
            }
        }

        let mut entries: Vec<(KeyPath, Option<Value>)> = (0..self.len())
            .rev()
            .map(|index| (KeyPath::single(index), None))
            .collect();
        entries.extend(
            target
                .iter()
                .cloned()
                .enumerate()
                .map(|(index, value)| (KeyPath::single(index), Some(value))),
        );
        self.assign_entries(entries, AssignFlags::default(), src)?;
        if self.copy() != Value::List(target) {
            return Err(NodeError::bug("array still differs from target after rebuilding").into());
        }
        Ok(())
    }

    fn apply_plan(&self, ops: &[Op], src: Option<Source>) -> Result<()> {
        let options = SetOptions {
            src,
            ..Default::default()
        };
        for op in ops {
            match op {
                Op::Insert { index, value } => {
                    let insert = SetOptions {
                        insert: true,
                        ..options.clone()
                    };
                    self.set_with(*index, value.clone(), insert)?;
                }
                Op::Delete { index } => {
                    self.delete_with(*index, options.clone())?;
                }
                Op::Move { from, to } => {
                    self.move_with(*from, *to, options.clone())?;
                }
            }
        }
        Ok(())
    }

    /// Sets only the keys that do not exist yet. Returns what was filled in.
    pub fn fill_out(&self, data: impl Into<Value>) -> Result<Option<Value>> {
        let Some(data) = self.check_multi_set(data.into())? else {
            return Ok(None);
        };
        let filler = match data {
            Value::Map(map) => Value::Map(
                map.into_iter()
                    .filter(|(key, _)| !self.has(PathArg::Path(KeyPath::single(key.as_str()))))
                    .collect(),
            ),
            Value::List(list) => {
                let len = self.len();
                Value::List(list.into_iter().skip(len).collect())
            }
            other => other,
        };
        if filler.as_map().is_some_and(|m| m.is_empty()) || filler.as_list().is_some_and(|l| l.is_empty()) {
            trace!(node = %self.id(), "All keys already exist");
            return Ok(None);
        }
        match &filler {
            Value::List(list) => self.concat(list.clone())?,
            _ => {
                self.assign(filler.clone())?;
            }
        }
        Ok(Some(filler))
    }

    /// Sets `value` on each of `keys` that does not exist yet. Returns the keys that were set.
    pub fn fill_with<K>(&self, keys: impl IntoIterator<Item = K>, value: impl Into<Value>) -> Result<Vec<Segment>>
    where
        K: Into<Segment>,
    {
        let _turn = turn::enter();
        let value = value.into();
        let mut filled = Vec::new();
        for key in keys {
            let key = self.local_key(&key.into())?;
            if self.has(KeyPath::single(key.clone())) {
                continue;
            }
            self.set(KeyPath::single(key.clone()), value.clone())?;
            filled.push(key);
        }
        Ok(filled)
    }

    /// Deletes every key, last first. Returns the previous plain contents.
    pub fn empty(&self) -> Result<Option<Value>> {
        self.empty_with(EmptyFlags::default())
    }

    /// Fails with `ENOTEMPTY` if keys survive, eg. required keys that were reset to a default.
    pub fn empty_with(&self, flags: EmptyFlags) -> Result<Option<Value>> {
        if self.is_empty() {
            return Ok(None);
        }
        let _turn = turn::enter();
        let before = self.copy();
        let options = SetOptions {
            no_emit: flags.no_emit,
            ..Default::default()
        };
        for key in self.keys().into_iter().rev() {
            if let Err(err) = self.delete_with(KeyPath::single(key.clone()), options.clone()) {
                if !flags.finish {
                    return Err(err);
                }
                error!(node = %self.id(), %key, error = %err, "Failed to delete while emptying");
            }
        }
        if !self.is_empty() {
            return Err(NodeError::NotEmpty {
                remaining: self.keys().iter().map(Segment::to_key).collect(),
            }
            .into());
        }
        Ok(Some(before))
    }

    /// Deletes the first item matching `predicate`.
    pub fn find_delete<P>(&self, predicate: P) -> Result<Option<Value>>
    where
        P: Fn(&Value) -> bool,
    {
        match self.find_index(predicate) {
            Some(key) => self.delete(KeyPath::single(key)),
            None => Ok(None),
        }
    }

    /// Deletes every item matching `predicate`, returning what was removed.
    pub fn find_all_delete<P>(&self, predicate: P) -> Result<Vec<(Segment, Value)>>
    where
        P: Fn(&Value) -> bool,
    {
        let _turn = turn::enter();
        let mut deleted = Vec::new();
        for key in self.find_index_all(predicate).into_iter().rev() {
            if let Some(old) = self.delete(KeyPath::single(key.clone()))? {
                deleted.push((key, old));
            }
        }
        deleted.reverse();
        Ok(deleted)
    }

    /// Resets every key to its default. Keys without a default are deleted, constant keys are
    /// left alone. Without any defaults this is [`Node::empty`].
    pub fn reset(&self) -> Result<OldValues> {
        let _turn = turn::enter();
        let defaults = self.get_defaults();
        if defaults.is_empty() {
            debug!(node = %self.id(), "No defaults, emptying");
            let before = self.entries();
            self.empty()?;
            return Ok(before
                .into_iter()
                .map(|(key, value)| (KeyPath::single(key), Some(value)))
                .collect());
        }
        let mut keys = self.keys();
        for key in defaults.keys() {
            let key = self.local_key(&Segment::from(key.as_str()))?;
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        // sets first in key order, then deletes from the back so array indices hold
        let (resets, deletes): (Vec<_>, Vec<_>) = keys
            .into_iter()
            .partition(|key| self.get_default(key.clone()).is_some());
        let mut old_values = OldValues::new();
        for key in resets.into_iter().chain(deletes.into_iter().rev()) {
            if let Some(old) = self.reset_key(key.clone())? {
                old_values.push((KeyPath::single(key), Some(old)));
            }
        }
        Ok(old_values)
    }

    /// Resets one key to its default, or deletes it if it has none. Returns the old value if
    /// anything changed.
    pub fn reset_key(&self, key: impl Into<Segment>) -> Result<Option<Value>> {
        let key = self.local_key(&key.into())?;
        let rule = self.state().meta.rule(&key).cloned();
        let path = KeyPath::single(key.clone());
        let options = SetOptions {
            src: Some(Source::Reset),
            ..Default::default()
        };
        if rule.as_ref().is_some_and(|rule| rule.constant) {
            trace!(node = %self.id(), %key, "Not resetting constant key");
            return Ok(None);
        }
        match rule.and_then(|rule| rule.default) {
            Some(default) => {
                let current = self.get_path(&path);
                if current.as_ref() == Some(&default) {
                    trace!(node = %self.id(), %key, "Key already has its default");
                    return Ok(None);
                }
                self.set_with(path, default, options)
            }
            None => self.delete_with(path, options),
        }
    }

    /// Replaces (or with `replace` false, extends) the meta and re-validates the stored data.
    ///
    /// Entries that no longer pass are deleted and returned.
    pub fn change_meta(&self, meta: MetaSpec, replace: bool) -> Result<Vec<(Segment, Value)>> {
        let _turn = turn::enter();
        let merged = if replace {
            meta
        } else {
            let mut merged = self.state().options.meta.clone().unwrap_or_default();
            merged.extend(meta);
            merged
        };
        self.install_meta(Some(merged))?;

        let mut deleted = Vec::new();
        if self.state().meta.is_empty() {
            return Ok(deleted);
        }
        for (key, value) in self.entries().into_iter().rev() {
            let path = KeyPath::single(key.clone());
            let Err(err) = self.set(path.clone(), value) else {
                continue;
            };
            match self.delete(path) {
                Ok(Some(old)) => {
                    warn!(node = %self.id(), %key, error = %err, "Deleted value rejected by new meta");
                    deleted.push((key, old));
                }
                Ok(None) => {}
                Err(delete_err) => {
                    error!(node = %self.id(), %key, error = %err, %delete_err, "Value rejected by new meta cannot be deleted");
                }
            }
        }
        deleted.reverse();
        Ok(deleted)
    }

    /// Removes the meta of some keys. An empty list removes all meta.
    pub fn delete_meta(&self, keys: &[&str]) -> Result<()> {
        let remaining = if keys.is_empty() {
            None
        } else {
            let mut spec = self.state().options.meta.clone().unwrap_or_default();
            for key in keys {
                spec.shift_remove(*key);
            }
            (!spec.is_empty()).then_some(spec)
        };
        self.install_meta(remaining)
    }

    fn install_meta(&self, spec: Option<MetaSpec>) -> Result<()> {
        let default_values = self.state().options.default_values.clone();
        let combined = meta::with_default_values(spec.as_ref(), default_values.as_ref());
        let compiled = CompiledMeta::compile(combined.as_ref())?;
        let mut state = self.state();
        state.options.meta = spec;
        state.meta = Arc::new(compiled);
        Ok(())
    }

    /// The compiled rule for a local key (the fallback rule if it has none of its own).
    pub fn get_meta(&self, key: impl Into<Segment>) -> Option<MetaRule> {
        let key = key.into();
        self.state().meta.rule(&key).cloned()
    }

    pub fn has_meta(&self) -> bool {
        !self.state().meta.is_empty()
    }

    /// The value `key` resets to: the current value of a set constant key, else the default,
    /// else null for nullable keys.
    pub fn get_default(&self, key: impl Into<Segment>) -> Option<Value> {
        let key = key.into();
        let rule = self.get_meta(key.clone())?;
        if rule.constant {
            if let Some(current) = self.get(KeyPath::single(key)) {
                return Some(current);
            }
        }
        rule.default
            .clone()
            .or_else(|| rule.nullable.then_some(Value::Null))
    }

    /// Defaults of every key that has one, not counting the fallback.
    pub fn get_defaults(&self) -> indexmap::IndexMap<String, Value> {
        self.state().meta.defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assign_returns_changed_old_values() {
        let node = Node::create(json!({"a": 1, "b": 2})).unwrap();
        let old = node.assign(json!({"a": 1, "b": 3, "c": 4})).unwrap().unwrap();
        assert_eq!(
            old,
            vec![
                (KeyPath::single("b"), Some(Value::Int(2))),
                (KeyPath::single("c"), None),
            ]
        );
        assert!(node.assign(json!({"a": 1})).unwrap().is_none());
        assert!(node.assign(json!([1])).unwrap_err().is_type_error());
    }

    #[test]
    fn try_all_collects_failures() {
        let mut meta = MetaSpec::new();
        meta.insert("n".into(), MetaRule {
            data_type: Some(crate::DataType::Number),
            ..Default::default()
        });
        let node = Node::object(crate::NodeOptions::default().with_meta(meta)).unwrap();
        let err = node
            .assign_with(json!({"n": "x", "ok": true}), AssignFlags {
                try_all: true,
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.code(), "EMULTI");
        assert_eq!(node.get("ok"), Some(Value::Bool(true)));
    }

    #[test]
    fn combine_keeps_siblings() {
        let node = Node::create(json!({"foo": "bar", "list": ["a", "b"]})).unwrap();
        node.combine(json!({"list": ["c"]}), 30).unwrap();
        assert_eq!(node.to_json(), json!({"foo": "bar", "list": ["c", "b"]}));
        node.assign(json!({"list": ["c"]})).unwrap();
        assert_eq!(node.to_json(), json!({"foo": "bar", "list": ["c"]}));
    }

    #[test]
    fn replace_object_deletes_missing() {
        let node = Node::create(json!({"a": 1, "b": 2})).unwrap();
        let before = node.replace(json!({"b": 3, "c": 4})).unwrap();
        assert_eq!(before, Some(Value::from(json!({"a": 1, "b": 2}))));
        assert_eq!(node.to_json(), json!({"b": 3, "c": 4}));
        assert_eq!(node.replace(json!({"b": 3, "c": 4})).unwrap(), None);
    }

    #[test]
    fn replace_array_without_smart_replace() {
        let options = crate::NodeOptions {
            smart_replace: false,
            ..Default::default()
        };
        let node = Node::from_value(json!([1, 2, 3]), options).unwrap();
        node.replace(json!([3, 2])).unwrap();
        assert_eq!(node.to_json(), json!([3, 2]));
    }

    #[test]
    fn fill_out_and_with() {
        let node = Node::create(json!({"a": 1})).unwrap();
        let filled = node.fill_out(json!({"a": 5, "b": 2})).unwrap();
        assert_eq!(filled, Some(Value::from(json!({"b": 2}))));
        assert_eq!(node.fill_with(["a", "c", "d"], 0).unwrap(), vec![Segment::from("c"), Segment::from("d")]);
        assert_eq!(node.to_json(), json!({"a": 1, "b": 2, "c": 0, "d": 0}));
    }

    #[test]
    fn empty_reports_surviving_keys() {
        let mut meta = MetaSpec::new();
        meta.insert("id".into(), MetaRule {
            required: true,
            default: Some(Value::from("x")),
            ..Default::default()
        });
        let node = Node::object(crate::NodeOptions::default().with_meta(meta)).unwrap();
        node.set("other", 1).unwrap();
        let err = node.empty().unwrap_err();
        assert_eq!(err.code(), "ENOTEMPTY");
        assert_eq!(node.to_json(), json!({"id": "x"}));
    }

    #[test]
    fn reset_to_defaults() {
        let options = crate::NodeOptions {
            default_values: Some(indexmap::IndexMap::from([("a".to_string(), Value::Int(1))])),
            ..Default::default()
        };
        let node = Node::object(options).unwrap();
        node.set("a", 5).unwrap();
        node.set("b", 2).unwrap();
        node.reset().unwrap();
        assert_eq!(node.to_json(), json!({"a": 1}));
    }

    #[test]
    fn change_meta_drops_invalid_data() {
        let node = Node::create(json!({"n": "12", "s": "word"})).unwrap();
        let mut meta = MetaSpec::new();
        meta.insert("*".into(), MetaRule {
            data_type: Some(crate::DataType::Number),
            ..Default::default()
        });
        let deleted = node.change_meta(meta, true).unwrap();
        assert_eq!(deleted, vec![(Segment::from("s"), Value::from("word"))]);
        assert_eq!(node.to_json(), json!({"n": 12}));
        node.delete_meta(&[]).unwrap();
        assert!(!node.has_meta());
    }

    #[test]
    fn find_all_delete_keeps_order() {
        let list = Node::create(json!([1, 2, 3, 4])).unwrap();
        let deleted = list.find_all_delete(|v| v.as_int().is_some_and(|n| n % 2 == 0)).unwrap();
        assert_eq!(deleted, vec![(Segment::Index(1), Value::Int(2)), (Segment::Index(3), Value::Int(4))]);
        assert_eq!(list.to_json(), json!([1, 3]));
    }
}

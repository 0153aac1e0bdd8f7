//! Value types stored in live nodes.
//!
//! This module provides the [`Value`] enum that represents everything a node can hold:
//! primitives, plain containers (lists and maps that are not themselves nodes), and owned
//! child [`Node`]s. Plain containers use `IndexMap` so key order is preserved.

use std::fmt;

use indexmap::IndexMap;
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{MapAccess, SeqAccess, Visitor},
};

use crate::{
    Result,
    node::{Node, NodeError, NodeKind},
    path::{KeyPath, Segment},
};

/// Values that can be stored in a node.
///
/// # Value Types
///
/// ## Primitives
/// - [`Value::Null`], [`Value::Bool`], [`Value::Int`], [`Value::Float`], [`Value::Text`]
///
/// ## Plain containers
/// - [`Value::List`] - A plain ordered sequence
/// - [`Value::Map`] - A plain ordered map of string keys
///
/// ## Live children
/// - [`Value::Node`] - An owned child node; reading it gives the live handle, not a copy
///
/// # Equality
///
/// Plain data compares structurally and `Int`/`Float` compare numerically. Two nodes are
/// equal only if they are the same node. A node compared with plain data is equal when its
/// flattened contents are.
///
/// ```
/// # use livenode::Value;
/// assert!(Value::Int(3) == Value::Float(3.0));
/// assert!(Value::from("hello") == "hello");
/// assert!(42 == Value::Int(42));
/// assert!(!(Value::from("3") == 3));
/// ```
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Null value
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f64),
    /// Text string value
    Text(String),
    /// Plain ordered sequence
    List(Vec<Value>),
    /// Plain ordered map
    Map(IndexMap<String, Value>),
    /// Live child node
    Node(Node),
}

/// The data-type category of a value, used by meta `type` and `constantType` rules.
///
/// Nodes map to the category of their shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Null,
    Boolean,
    Number,
    String,
    Array,
    Object,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Null => "null",
            DataType::Boolean => "boolean",
            DataType::Number => "number",
            DataType::String => "string",
            DataType::Array => "array",
            DataType::Object => "object",
        };
        f.write_str(name)
    }
}

impl Value {
    /// Returns true if this is a null value
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true if this is a live child node
    pub fn is_node(&self) -> bool {
        matches!(self, Value::Node(_))
    }

    /// Returns true if this is a plain (non-node) list or map
    pub fn is_plain_container(&self) -> bool {
        matches!(self, Value::List(_) | Value::Map(_))
    }

    /// Returns true for anything that can hold nested values, nodes included
    pub fn is_container(&self) -> bool {
        self.is_plain_container() || self.is_node()
    }

    /// Returns the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Node(node) => match node.kind() {
                NodeKind::Object => "object node",
                NodeKind::Array => "array node",
            },
        }
    }

    /// The data-type category of this value.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Null,
            Value::Bool(_) => DataType::Boolean,
            Value::Int(_) | Value::Float(_) => DataType::Number,
            Value::Text(_) => DataType::String,
            Value::List(_) => DataType::Array,
            Value::Map(_) => DataType::Object,
            Value::Node(node) => match node.kind() {
                NodeKind::Object => DataType::Object,
                NodeKind::Array => DataType::Array,
            },
        }
    }

    /// Attempts to convert to a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Attempts to convert to an integer (integral floats included)
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// Attempts to convert to a float
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Attempts to convert to a string slice
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Attempts to borrow a plain list
    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    /// Attempts to borrow a plain map
    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Attempts to borrow a live child node
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Value::Node(node) => Some(node),
            _ => None,
        }
    }

    /// A fully plain copy: every nested node is replaced by a copy of its contents.
    pub fn to_plain(&self) -> Value {
        match self {
            Value::Node(node) => node.copy(),
            Value::List(list) => Value::List(list.iter().map(Value::to_plain).collect()),
            Value::Map(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_plain()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Converts into a `serde_json::Value`, flattening nodes.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(n) => serde_json::Value::from(*n),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::List(list) => serde_json::Value::Array(list.iter().map(Value::to_json).collect()),
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Node(node) => node.copy().to_json(),
        }
    }

    /// An empty plain container shaped for the segment that will address into it.
    pub(crate) fn container_for(segment: &Segment) -> Value {
        if segment.is_numeric() {
            Value::List(Vec::new())
        } else {
            Value::Map(IndexMap::new())
        }
    }

    /// Reads a nested value. Descends into nodes, returning live children.
    pub fn get_path(&self, path: &[Segment]) -> Option<Value> {
        let Some((first, rest)) = path.split_first() else {
            return Some(self.clone());
        };
        match self {
            Value::Map(map) => map.get(&first.to_key())?.get_path(rest),
            Value::List(list) => list.get(first.as_index()?)?.get_path(rest),
            Value::Node(node) => node.get_path(&KeyPath::from(path)),
            _ => None,
        }
    }

    /// Writes a nested value inside plain containers, creating intermediate containers.
    ///
    /// With `insert` the final list slot is spliced in instead of overwritten.
    pub(crate) fn set_path(&mut self, path: &[Segment], value: Value, insert: bool) -> Result<()> {
        let Some((first, rest)) = path.split_first() else {
            return Err(NodeError::bug("set_path called with an empty path").into());
        };
        match self {
            Value::Map(map) => {
                let key = first.to_key();
                if rest.is_empty() {
                    map.insert(key, value);
                    return Ok(());
                }
                let child = map
                    .entry(key)
                    .or_insert_with(|| Value::container_for(&rest[0]));
                if child.is_null() {
                    *child = Value::container_for(&rest[0]);
                }
                child.set_path(rest, value, insert)
            }
            Value::List(list) => {
                let index = first.as_index().ok_or_else(|| NodeError::InvalidKey {
                    key: first.to_key(),
                    reason: "lists are addressed by non-negative integers".to_string(),
                })?;
                if index > list.len() {
                    return Err(NodeError::OutOfRange {
                        index: index as i64,
                        len: list.len(),
                    }
                    .into());
                }
                if rest.is_empty() {
                    if insert || index == list.len() {
                        list.insert(index, value);
                    } else {
                        list[index] = value;
                    }
                    return Ok(());
                }
                if index == list.len() {
                    list.push(Value::container_for(&rest[0]));
                }
                if list[index].is_null() {
                    list[index] = Value::container_for(&rest[0]);
                }
                list[index].set_path(rest, value, insert)
            }
            other => Err(NodeError::PathMismatch {
                path: KeyPath::from(path).to_string(),
                at: other.type_name().to_string(),
            }
            .into()),
        }
    }

    /// Removes a nested value from plain containers, returning it.
    pub(crate) fn delete_path(&mut self, path: &[Segment]) -> Option<Value> {
        let (first, rest) = path.split_first()?;
        match self {
            Value::Map(map) if rest.is_empty() => map.shift_remove(&first.to_key()),
            Value::Map(map) => map.get_mut(&first.to_key())?.delete_path(rest),
            Value::List(list) => {
                let index = first.as_index()?;
                if index >= list.len() {
                    None
                } else if rest.is_empty() {
                    Some(list.remove(index))
                } else {
                    list[index].delete_path(rest)
                }
            }
            _ => None,
        }
    }

    /// Flattens nested containers into `(path, leaf)` entries down to `depth` levels.
    ///
    /// Depth 1 yields only the top-level entries. Empty containers are kept as leaves.
    pub fn flatten_entries(&self, depth: usize) -> Vec<(KeyPath, Value)> {
        let mut out = Vec::new();
        flatten_into(&self.to_plain(), &KeyPath::new(), depth.max(1), &mut out);
        out
    }
}

fn flatten_into(value: &Value, prefix: &KeyPath, depth: usize, out: &mut Vec<(KeyPath, Value)>) {
    let children: Vec<(Segment, &Value)> = match value {
        Value::Map(map) => map
            .iter()
            .map(|(k, v)| (Segment::Key(k.clone()), v))
            .collect(),
        Value::List(list) => list
            .iter()
            .enumerate()
            .map(|(i, v)| (Segment::Index(i), v))
            .collect(),
        _ => return,
    };
    for (segment, child) in children {
        let path = prefix.clone().push(segment);
        let descend = depth > 1
            && match child {
                Value::Map(map) => !map.is_empty(),
                Value::List(list) => !list.is_empty(),
                _ => false,
            };
        if descend {
            flatten_into(child, &path, depth - 1, out);
        } else {
            out.push((path, child.clone()));
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Node(a), Value::Node(b)) => a.ptr_eq(b),
            (Value::Node(node), plain) | (plain, Value::Node(node)) => node.copy() == *plain,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "{s}"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(n) => serializer.serialize_i64(*n),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Text(s) => serializer.serialize_str(s),
            Value::List(list) => list.serialize(serializer),
            Value::Map(map) => map.serialize(serializer),
            Value::Node(node) => node.copy().serialize(serializer),
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any JSON-compatible value")
    }

    fn visit_unit<E>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> std::result::Result<Value, D::Error> {
        Value::deserialize(d)
    }

    fn visit_bool<E>(self, v: bool) -> std::result::Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E>(self, v: i64) -> std::result::Result<Value, E> {
        Ok(Value::Int(v))
    }

    fn visit_u64<E>(self, v: u64) -> std::result::Result<Value, E> {
        Ok(Value::from(v))
    }

    fn visit_f64<E>(self, v: f64) -> std::result::Result<Value, E> {
        Ok(Value::Float(v))
    }

    fn visit_str<E>(self, v: &str) -> std::result::Result<Value, E> {
        Ok(Value::Text(v.to_string()))
    }

    fn visit_string<E>(self, v: String) -> std::result::Result<Value, E> {
        Ok(Value::Text(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Value, A::Error> {
        let mut list = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element::<Value>()? {
            list.push(item);
        }
        Ok(Value::List(list))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Value, A::Error> {
        let mut map = IndexMap::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((key, value)) = access.next_entry::<String, Value>()? {
            map.insert(key, value);
        }
        Ok(Value::Map(map))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

// Convenient From implementations for common types
impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        i64::try_from(value)
            .map(Value::Int)
            .unwrap_or(Value::Float(value as f64))
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::from(value as u64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(f64::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<Node> for Value {
    fn from(value: Node) -> Self {
        Value::Node(value)
    }
}

impl From<&Node> for Value {
    fn from(value: &Node) -> Self {
        Value::Node(value.clone())
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(value: IndexMap<String, Value>) -> Self {
        Value::Map(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::List(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(list) => Value::List(list.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

// PartialEq implementations for comparing Value with other types
impl PartialEq<str> for Value {
    fn eq(&self, other: &str) -> bool {
        matches!(self, Value::Text(s) if s == other)
    }
}

impl PartialEq<&str> for Value {
    fn eq(&self, other: &&str) -> bool {
        self == *other
    }
}

impl PartialEq<String> for Value {
    fn eq(&self, other: &String) -> bool {
        self == other.as_str()
    }
}

impl PartialEq<i64> for Value {
    fn eq(&self, other: &i64) -> bool {
        *self == Value::Int(*other)
    }
}

impl PartialEq<i32> for Value {
    fn eq(&self, other: &i32) -> bool {
        *self == Value::Int(i64::from(*other))
    }
}

impl PartialEq<f64> for Value {
    fn eq(&self, other: &f64) -> bool {
        *self == Value::Float(*other)
    }
}

impl PartialEq<bool> for Value {
    fn eq(&self, other: &bool) -> bool {
        matches!(self, Value::Bool(b) if b == other)
    }
}

// Reverse implementations for symmetry
impl PartialEq<Value> for &str {
    fn eq(&self, other: &Value) -> bool {
        other == self
    }
}

impl PartialEq<Value> for i64 {
    fn eq(&self, other: &Value) -> bool {
        other == self
    }
}

impl PartialEq<Value> for i32 {
    fn eq(&self, other: &Value) -> bool {
        other == self
    }
}

impl PartialEq<Value> for bool {
    fn eq(&self, other: &Value) -> bool {
        other == self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_cross_equality() {
        assert_eq!(Value::Int(2), Value::Float(2.0));
        assert_ne!(Value::Int(2), Value::Float(2.5));
        assert_ne!(Value::Int(1), Value::Bool(true));
    }

    #[test]
    fn map_equality_ignores_order() {
        let a = Value::from(json!({"x": 1, "y": 2}));
        let b = Value::from(json!({"y": 2, "x": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn set_path_creates_shaped_containers() {
        let mut root = Value::Map(IndexMap::new());
        root.set_path(&KeyPath::parse("a.0.b", '.'), Value::from(5), false)
            .unwrap();
        assert_eq!(root, Value::from(json!({"a": [{"b": 5}]})));
    }

    #[test]
    fn set_path_through_primitive_is_mismatch() {
        let mut root = Value::from(json!({"a": 1}));
        let err = root
            .set_path(&KeyPath::parse("a.b", '.'), Value::from(2), false)
            .unwrap_err();
        assert_eq!(err.code(), "EMISMATCH");
    }

    #[test]
    fn set_path_list_bounds() {
        let mut root = Value::from(json!([1, 2]));
        assert!(
            root.set_path(&[Segment::Index(4)], Value::from(3), false)
                .unwrap_err()
                .is_out_of_range()
        );
        root.set_path(&[Segment::Index(1)], Value::from(9), true)
            .unwrap();
        assert_eq!(root, Value::from(json!([1, 9, 2])));
    }

    #[test]
    fn delete_path_removes_nested() {
        let mut root = Value::from(json!({"a": {"b": 1, "c": 2}}));
        assert_eq!(root.delete_path(&KeyPath::parse("a.b", '.')), Some(Value::Int(1)));
        assert_eq!(root, Value::from(json!({"a": {"c": 2}})));
        assert_eq!(root.delete_path(&KeyPath::parse("a.zz", '.')), None);
    }

    #[test]
    fn flatten_entries_respects_depth() {
        let value = Value::from(json!({"a": {"b": {"c": 1}}, "d": [], "e": 2}));
        let shallow: Vec<String> = value
            .flatten_entries(1)
            .into_iter()
            .map(|(k, _)| k.to_string())
            .collect();
        assert_eq!(shallow, vec!["a", "d", "e"]);

        let deep: Vec<String> = value
            .flatten_entries(30)
            .into_iter()
            .map(|(k, _)| k.to_string())
            .collect();
        assert_eq!(deep, vec!["a.b.c", "d", "e"]);
    }

    #[test]
    fn serde_preserves_key_order() {
        let value: Value = serde_json::from_str(r#"{"z":1,"a":[true,null,1.5]}"#).unwrap();
        let keys: Vec<&String> = value.as_map().unwrap().keys().collect();
        assert_eq!(keys, vec!["z", "a"]);
        assert_eq!(
            serde_json::to_string(&value).unwrap(),
            r#"{"z":1,"a":[true,null,1.5]}"#
        );
    }
}

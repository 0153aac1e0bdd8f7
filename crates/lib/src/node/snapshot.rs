//! Snapshots a node can be reverted to.
//!
//! A snapshot keeps the node's local values and, separately, a snapshot of each child node.
//! Reverting replaces the local values first (putting the original children back in their
//! slots, array items through the reconciler) and then reverts each child, collecting child
//! failures instead of stopping at the first one.

use tracing::{debug, error};

use super::{Node, NodeError};
use crate::{Result, bus::turn, event::Source, path::Segment, value::Value};

/// The state of a node (and its children) at one point in time.
#[derive(Debug, Clone)]
pub struct Snapshot {
    node: Node,
    /// Local values, children as live handles
    entries: Vec<(Segment, Value)>,
    children: Vec<(Segment, Snapshot)>,
}

impl Node {
    /// Captures the current state, see [`Snapshot::revert`].
    pub fn take_snapshot(&self) -> Snapshot {
        let entries = self.entries();
        let children = entries
            .iter()
            .filter_map(|(key, value)| {
                value
                    .as_node()
                    .map(|child| (key.clone(), child.take_snapshot()))
            })
            .collect();
        Snapshot {
            node: self.clone(),
            entries,
            children,
        }
    }
}

impl Snapshot {
    /// The node this snapshot was taken of.
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Plain contents at the time of the snapshot.
    pub fn value(&self) -> Value {
        let plain = self
            .entries
            .iter()
            .map(|(key, value)| (key.clone(), self.plain_at(key, value)));
        if self.node.is_array() {
            Value::List(plain.map(|(_, value)| value).collect())
        } else {
            Value::Map(plain.map(|(key, value)| (key.to_key(), value)).collect())
        }
    }

    fn plain_at(&self, key: &Segment, value: &Value) -> Value {
        self.children
            .iter()
            .find(|(child_key, _)| child_key == key)
            .map_or_else(|| value.to_plain(), |(_, snapshot)| snapshot.value())
    }

    /// Restores the node and its children to this snapshot.
    ///
    /// Changes are emitted like any other, tagged with [`Source::Revert`]. Failing to restore
    /// the node's own values fails immediately; failures of nested nodes are aggregated into
    /// `NodeError::RevertFailed`.
    pub fn revert(&self) -> Result<()> {
        let _turn = turn::enter();
        debug!(node = %self.node.id(), "Reverting to snapshot");
        self.node.replace_values(self.local_value(), Some(Source::Revert))?;

        let mut failures = Vec::new();
        for (key, snapshot) in &self.children {
            match snapshot.revert() {
                Ok(()) => {}
                Err(crate::Error::Node(NodeError::RevertFailed { failures: nested })) => {
                    failures.extend(
                        nested
                            .into_iter()
                            .map(|(path, err)| (format!("{key}.{path}"), err)),
                    );
                }
                Err(err) => {
                    error!(node = %snapshot.node.id(), error = %err, "Failed to revert nested node");
                    failures.push((key.to_string(), err));
                }
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(NodeError::RevertFailed { failures }.into())
        }
    }

    /// Local values with the captured children as live handles.
    fn local_value(&self) -> Value {
        let entries = self.entries.iter().cloned();
        if self.node.is_array() {
            Value::List(entries.map(|(_, value)| value).collect())
        } else {
            Value::Map(entries.map(|(key, value)| (key.to_key(), value)).collect())
        }
    }
}

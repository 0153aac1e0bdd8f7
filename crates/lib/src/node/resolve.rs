//! Key normalization and owner lookup.

use super::{Node, NodeError, NodeKind};
use crate::{
    Result,
    path::{KeyPath, PathArg, RESERVED_KEYS, Segment},
    value::Value,
};

impl Node {
    /// Normalizes one local key for this node's kind.
    ///
    /// Object nodes turn indices into string keys and reject reserved names. Array nodes
    /// only accept indices and numeric strings.
    pub(crate) fn local_key(&self, key: &Segment) -> Result<Segment> {
        match (self.kind(), key) {
            (NodeKind::Object, Segment::Index(i)) => Ok(Segment::Key(i.to_string())),
            (NodeKind::Object, Segment::Key(k)) => {
                if RESERVED_KEYS.contains(&k.as_str()) {
                    Err(NodeError::InvalidKey {
                        key: k.clone(),
                        reason: "reserved name".to_string(),
                    }
                    .into())
                } else {
                    Ok(Segment::Key(k.clone()))
                }
            }
            (NodeKind::Array, key) => key.as_index().map(Segment::Index).ok_or_else(|| {
                NodeError::InvalidKey {
                    key: key.to_key(),
                    reason: "array nodes take non-negative integer keys".to_string(),
                }
                .into()
            }),
        }
    }

    /// Turns any accepted key form into a non-empty path.
    pub(crate) fn parse_path(&self, key: PathArg) -> Result<KeyPath> {
        let path = match key {
            PathArg::Text(text) => {
                let delim = self.state().options.key_delim;
                KeyPath::parse(&text, delim)
            }
            PathArg::Index(i) => {
                let index = usize::try_from(i).map_err(|_| NodeError::InvalidKey {
                    key: i.to_string(),
                    reason: "negative index".to_string(),
                })?;
                KeyPath::single(index)
            }
            PathArg::Path(path) => path,
        };
        if path.is_empty() {
            return Err(NodeError::InvalidKey {
                key: String::new(),
                reason: "empty key".to_string(),
            }
            .into());
        }
        Ok(path)
    }

    /// Walks down through child nodes while more than one segment remains.
    ///
    /// Consumes the segments it walks through, leaving the path relative to the returned
    /// node with its first segment normalized.
    pub(crate) fn resolve_owner(&self, path: &mut KeyPath) -> Result<Node> {
        let mut node = self.clone();
        loop {
            let Some(first) = path.first() else {
                return Err(NodeError::bug("resolving an empty path").into());
            };
            let first = node.local_key(first)?;
            path.set_first(first.clone());
            if path.len() < 2 {
                return Ok(node);
            }
            let child = node.state().store.get(&first).and_then(Value::as_node).cloned();
            match child {
                Some(child) => {
                    path.pop_front();
                    node = child;
                }
                None => return Ok(node),
            }
        }
    }

    /// The deepest node owning `key`, and the key relative to it.
    pub fn deepest_owner(&self, key: impl Into<PathArg>) -> Result<(Node, KeyPath)> {
        let mut path = self.parse_path(key.into())?;
        let owner = self.resolve_owner(&mut path)?;
        Ok((owner, path))
    }
}

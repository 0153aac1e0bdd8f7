//! Array node operations.
//!
//! Indices stay dense at all times: inserts splice, deletes shift the tail down, and a move
//! takes an item out and splices it back in as one `move` event.

use std::{fmt, ops::RangeBounds, str::FromStr};

use tracing::{debug, trace};

use super::{
    Node, NodeError, SetOptions, Store,
    pipeline::{Checks, Origin},
};
use crate::{
    Result,
    bus::turn,
    event::{Event, EventKind, Source},
    path::{KeyPath, PathArg},
    value::Value,
};

/// Where [`Node::move_item`] puts an item.
///
/// Relative and symbolic destinations are clamped to the array bounds; an explicit index
/// outside them is a `RangeError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Index(usize),
    /// Positions up (negative) or down (positive) from the current one
    Offset(i64),
    First,
    Last,
}

impl Destination {
    fn resolve(self, from: usize, len: usize) -> Result<usize> {
        let last = len.saturating_sub(1);
        let to = match self {
            Destination::Index(index) => {
                if index >= len {
                    return Err(NodeError::OutOfRange {
                        index: i64::try_from(index).unwrap_or(i64::MAX),
                        len,
                    }
                    .into());
                }
                index
            }
            Destination::Offset(offset) => {
                let from = i64::try_from(from).unwrap_or(i64::MAX);
                let to = from.saturating_add(offset).max(0);
                usize::try_from(to).unwrap_or(usize::MAX).min(last)
            }
            Destination::First => 0,
            Destination::Last => last,
        };
        Ok(to)
    }
}

impl From<usize> for Destination {
    fn from(index: usize) -> Self {
        Destination::Index(index)
    }
}

impl FromStr for Destination {
    type Err = crate::Error;

    /// Parses `first`, `last`, an index, or `+`/`-` runs like `++` and `-3`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || -> crate::Error {
            NodeError::InvalidArgument {
                reason: format!("invalid move destination '{s}'"),
            }
            .into()
        };
        match s {
            "first" => return Ok(Destination::First),
            "last" => return Ok(Destination::Last),
            _ => {}
        }
        if let Ok(index) = s.parse::<usize>() {
            return Ok(Destination::Index(index));
        }
        let sign = match s.chars().next() {
            Some('+') => 1,
            Some('-') => -1,
            _ => return Err(invalid()),
        };
        let marker = if sign > 0 { '+' } else { '-' };
        let run = s.chars().take_while(|c| *c == marker).count();
        let rest = &s[run..];
        let steps = if rest.is_empty() {
            i64::try_from(run).map_err(|_| invalid())?
        } else if run == 1 {
            rest.parse::<i64>().map_err(|_| invalid())?
        } else {
            return Err(invalid());
        };
        Ok(Destination::Offset(sign * steps))
    }
}

impl TryFrom<&str> for Destination {
    type Error = crate::Error;

    fn try_from(s: &str) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Index(index) => write!(f, "{index}"),
            Destination::Offset(offset) if *offset >= 0 => write!(f, "+{offset}"),
            Destination::Offset(offset) => write!(f, "{offset}"),
            Destination::First => f.write_str("first"),
            Destination::Last => f.write_str("last"),
        }
    }
}

impl Node {
    fn require_array(&self, operation: &str) -> Result<()> {
        if self.is_array() {
            Ok(())
        } else {
            Err(NodeError::InvalidType {
                expected: format!("array node for {operation}"),
                actual: "object node".to_string(),
            }
            .into())
        }
    }

    /// Splices a value in at `index`, shifting the tail up.
    pub fn insert(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        self.require_array("insert")?;
        self.set_with(
            index,
            value,
            SetOptions {
                insert: true,
                ..Default::default()
            },
        )
        .map(drop)
    }

    /// Appends to the end, or prepends with `first`.
    pub fn add(&self, value: impl Into<Value>, first: bool) -> Result<()> {
        let index = if first { 0 } else { self.len() };
        self.insert(index, value)
    }

    pub fn push(&self, value: impl Into<Value>) -> Result<()> {
        self.add(value, false)
    }

    pub fn unshift(&self, value: impl Into<Value>) -> Result<()> {
        self.add(value, true)
    }

    /// Appends unless an equal item exists. Returns whether it was added.
    pub fn add_unique(&self, value: impl Into<Value>) -> Result<bool> {
        let value = value.into();
        if self.contains(&value) {
            return Ok(false);
        }
        self.push(value)?;
        Ok(true)
    }

    /// Removes and returns the last item.
    pub fn pop(&self) -> Result<Option<Value>> {
        self.require_array("pop")?;
        match self.len() {
            0 => Ok(None),
            len => self.delete(len - 1),
        }
    }

    /// Removes and returns the first item.
    pub fn shift(&self) -> Result<Option<Value>> {
        self.require_array("shift")?;
        if self.is_empty() {
            return Ok(None);
        }
        self.delete(0usize)
    }

    /// Inserts `values` starting at `index`, keeping their order. Nothing is removed.
    pub fn splice(&self, index: usize, values: impl IntoIterator<Item = Value>) -> Result<()> {
        let _turn = turn::enter();
        for (offset, value) in values.into_iter().enumerate() {
            self.insert(index + offset, value)?;
        }
        Ok(())
    }

    /// Appends every value.
    pub fn concat(&self, values: impl IntoIterator<Item = Value>) -> Result<()> {
        let _turn = turn::enter();
        let mut count = 0usize;
        for value in values {
            self.push(value)?;
            count += 1;
        }
        trace!(node = %self.id(), count, "Concatenated items");
        Ok(())
    }

    /// Plain copies of a range of items.
    pub fn slice(&self, range: impl RangeBounds<usize>) -> Vec<Value> {
        let values = self.values();
        let start = match range.start_bound() {
            std::ops::Bound::Included(s) => *s,
            std::ops::Bound::Excluded(s) => s + 1,
            std::ops::Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            std::ops::Bound::Included(e) => e + 1,
            std::ops::Bound::Excluded(e) => *e,
            std::ops::Bound::Unbounded => values.len(),
        }
        .min(values.len());
        if start >= end {
            return Vec::new();
        }
        values[start..end].iter().map(Value::to_plain).collect()
    }

    /// Moves an item to another position. `from` may be a nested path ending in an index of a
    /// child array node.
    ///
    /// Returns false if the item is already at the destination.
    pub fn move_item(&self, from: impl Into<PathArg>, to: impl Into<Destination>) -> Result<bool> {
        self.move_with(from, to, SetOptions::default())
    }

    pub fn move_with(
        &self,
        from: impl Into<PathArg>,
        to: impl Into<Destination>,
        options: SetOptions,
    ) -> Result<bool> {
        let _turn = turn::enter();
        let mut path = self.parse_path(from.into())?;
        let owner = self.resolve_owner(&mut path)?;
        if path.is_nested() || !owner.is_array() {
            let at = owner
                .get_path(&KeyPath::single(path[0].clone()))
                .map_or("nothing", |value| value.type_name());
            return Err(NodeError::PathMismatch {
                path: path.to_string(),
                at: at.to_string(),
            }
            .into());
        }
        let from = path[0].as_index().ok_or_else(|| NodeError::bug("unresolved array index"))?;
        owner.move_here(from, to.into(), options)
    }

    fn move_here(&self, from: usize, to: Destination, options: SetOptions) -> Result<bool> {
        let (len, move_event) = {
            let state = self.state();
            (state.store.len(), state.options.move_event)
        };
        if from >= len {
            return Err(NodeError::OutOfRange {
                index: i64::try_from(from).unwrap_or(i64::MAX),
                len,
            }
            .into());
        }
        let to = to.resolve(from, len)?;
        if from == to {
            debug!(node = %self.id(), from, "Nowhere to move");
            return Ok(false);
        }

        if !move_event {
            let moved = SetOptions {
                src: options.src.or(Some(Source::Move)),
                ..options
            };
            let value = self
                .delete_with(from, moved.clone())?
                .unwrap_or_default();
            self.set_with(
                to,
                value,
                SetOptions {
                    insert: true,
                    ..moved
                },
            )?;
            return Ok(true);
        }

        let value = self.state().store.get(&from.into()).cloned();
        let mut event = Event::new(KeyPath::single(from), EventKind::Move).with_value(value);
        event.from = Some(from);
        event.to = Some(to);
        event.src = options.src;
        event.rx = options.rx.clone();
        if !self.commit_gate(&mut event, Checks::FULL)? {
            return Ok(false);
        }
        self.move_raw(from, to)?;
        trace!(node = %self.id(), from, to, "Moved item");
        self.emit_step(event, &options, Origin::Local)?;
        Ok(true)
    }

    /// Moves without checks or events.
    pub(crate) fn move_raw(&self, from: usize, to: usize) -> Result<()> {
        let mut state = self.state();
        let Store::Array(list) = &mut state.store else {
            return Err(NodeError::bug("moving inside an object node").into());
        };
        if from >= list.len() || to >= list.len() {
            return Err(NodeError::bug(format!("move {from}->{to} outside length {}", list.len())).into());
        }
        let item = list.remove(from);
        list.insert(to, item);
        Ok(())
    }
}

//! Minimal-diff planning for array replacement.
//!
//! [`plan`] turns a current sequence into a target sequence using single-element inserts,
//! deletes and adjacent moves, so that observers of an array node see a small diff instead of
//! a full rebuild. It is a greedy single pass: it catches items added or removed at either end,
//! single insertions and deletions, and adjacent swaps. Anything more complex degrades into
//! more operations, and [`Plan::converged`] reports whether the walk reached the target at all.
//!
//! ```rust
//! use livenode::reconcile::{self, Op};
//! use livenode::Value;
//!
//! let current: Vec<Value> = vec!["a".into(), "b".into(), "c".into()];
//! let target: Vec<Value> = vec!["a".into(), "c".into(), "b".into()];
//! let plan = reconcile::plan(&current, &target);
//! assert!(plan.converged);
//! assert_eq!(plan.ops, vec![Op::Move { from: 1, to: 2 }]);
//! ```

use tracing::trace;

use crate::value::Value;

/// One structural change to a sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Splice `value` in at `index`
    Insert { index: usize, value: Value },
    /// Remove the item at `index`
    Delete { index: usize },
    /// Take the item at `from` out and put it back at `to`
    Move { from: usize, to: usize },
}

impl Op {
    /// Applies the operation to a plain list. Out of range operations are ignored.
    pub fn apply(&self, list: &mut Vec<Value>) {
        match self {
            Op::Insert { index, value } if *index <= list.len() => list.insert(*index, value.clone()),
            Op::Delete { index } if *index < list.len() => {
                list.remove(*index);
            }
            Op::Move { from, to } if *from < list.len() && *to < list.len() => {
                let item = list.remove(*from);
                list.insert(*to, item);
            }
            _ => {}
        }
    }
}

/// The operations turning one sequence into another.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub ops: Vec<Op>,
    /// Whether applying `ops` yields the target exactly
    pub converged: bool,
}

impl Plan {
    /// True if nothing has to change.
    pub fn is_noop(&self) -> bool {
        self.converged && self.ops.is_empty()
    }
}

/// Plans the change from `current` to `target`. Nodes match other nodes by identity and
/// plain values by content.
pub fn plan(current: &[Value], target: &[Value]) -> Plan {
    if let Some(ops) = end_change(current, target) {
        trace!(ops = ops.len(), "Reconciled with a single change at one end");
        return Plan {
            ops,
            converged: true,
        };
    }

    let mut work = current.to_vec();
    let mut ops = Vec::new();
    let mut record = |op: Op, work: &mut Vec<Value>| {
        op.apply(work);
        ops.push(op);
    };

    let bound = 2 * current.len().max(target.len());
    let (mut c, mut a, mut steps) = (0, 0, 0);
    while (c < work.len() || a < target.len()) && steps < bound {
        if c >= work.len() {
            for value in &target[a..] {
                let index = work.len();
                record(
                    Op::Insert {
                        index,
                        value: value.clone(),
                    },
                    &mut work,
                );
            }
            break;
        }
        if a >= target.len() {
            while work.len() > c {
                record(Op::Delete { index: c }, &mut work);
            }
            break;
        }
        if work[c] == target[a] {
            c += 1;
            a += 1;
        } else if target.get(a + 1) == Some(&work[c]) {
            if work.get(c + 1) == Some(&target[a]) {
                record(Op::Move { from: c, to: c + 1 }, &mut work);
                c += 2;
                a += 2;
            } else {
                record(
                    Op::Insert {
                        index: c,
                        value: target[a].clone(),
                    },
                    &mut work,
                );
                c += 1;
                a += 1;
            }
        } else {
            record(Op::Delete { index: c }, &mut work);
        }
        steps += 1;
    }

    let converged = work == target;
    trace!(ops = ops.len(), steps, converged, "Reconciled by walking");
    Plan { ops, converged }
}

/// Detects a single item added or removed at the start or end.
fn end_change(current: &[Value], target: &[Value]) -> Option<Vec<Op>> {
    if current.len().abs_diff(target.len()) != 1 {
        return None;
    }
    let min = current.len().min(target.len());
    let growing = target.len() > current.len();

    if current.first().is_some() && current.first() == target.first() {
        if current[..min] == target[..min] {
            return Some(vec![if growing {
                Op::Insert {
                    index: current.len(),
                    value: target[min].clone(),
                }
            } else {
                Op::Delete { index: min }
            }]);
        }
    } else if current.last().is_some()
        && current.last() == target.last()
        && current[current.len() - min..] == target[target.len() - min..]
    {
        return Some(vec![if growing {
            Op::Insert {
                index: 0,
                value: target[0].clone(),
            }
        } else {
            Op::Delete { index: 0 }
        }]);
    }
    None
}

//! Ownership of child nodes.
//!
//! A parent keeps one system listener on each child it owns. Events the child emits reach the
//! parent through it with the child's slot prepended to the key, and are then reshaped by the
//! parent's own event type.

use std::sync::Arc;

use tracing::{trace, warn};

use super::{Node, NodeError, NodeId, SetOptions, pipeline::Origin};
use crate::{
    Result,
    bus::{BUBBLE_PRIORITY, Channel, turn},
    event::{Event, EventKind, LocalEvent},
    path::Segment,
    value::Value,
};

impl Node {
    /// Promotes a plain container into a child node configured for `key`.
    pub(crate) fn create_child(&self, key: &Segment, plain: Value) -> Result<Node> {
        let options = {
            let state = self.state();
            state
                .options
                .for_child(&key.to_key(), state.meta.child_spec(key))
        };
        Node::from_value(plain, options)
    }

    /// A node may not contain itself, one of its ancestors, or another parent's child.
    pub(crate) fn check_adoptable(&self, child: &Node) -> Result<()> {
        let illegal = |reason: &str| -> crate::Error {
            NodeError::Illegal {
                key: child.id().to_string(),
                reason: reason.to_string(),
            }
            .into()
        };
        if child.ptr_eq(self) {
            return Err(illegal("a node cannot contain itself"));
        }
        let mut ancestor = self.parent();
        while let Some(node) = ancestor {
            if node.ptr_eq(child) {
                return Err(illegal("a node cannot contain its own ancestor"));
            }
            ancestor = node.parent();
        }
        if child.parent().is_some() {
            return Err(illegal("node is already owned"));
        }
        Ok(())
    }

    pub(crate) fn adopt_child(&self, key: &Segment, child: &Node) {
        child.state().owner = Some(self.downgrade());
        let parent = self.downgrade();
        let child_id = child.id();
        let origin = key.clone();
        let listener = child.on_system(
            Channel::Event,
            BUBBLE_PRIORITY,
            Arc::new(move |event: &Event| {
                if let Some(parent) = parent.upgrade() {
                    parent.receive_bubble(child_id, &origin, event);
                }
                Ok(())
            }),
        );
        let previous = self.state().child_listeners.insert(child_id, listener);
        if let Some(previous) = previous {
            child.off(previous);
        }
        trace!(parent = %self.id(), child = %child_id, %key, "Adopted child");
    }

    pub(crate) fn release_child(&self, child: &Node) {
        let listener = self.state().child_listeners.remove(&child.id());
        if let Some(listener) = listener {
            child.off(listener);
        }
        let mut state = child.state();
        let owned_here = state
            .owner
            .as_ref()
            .and_then(|owner| owner.upgrade())
            .is_some_and(|owner| owner.ptr_eq(self));
        if owned_here {
            state.owner = None;
        }
        drop(state);
        trace!(parent = %self.id(), child = %child.id(), "Released child");
    }

    /// Re-emits a child's event as a change of the slot holding it.
    fn receive_bubble(&self, child_id: NodeId, origin: &Segment, event: &Event) {
        let _turn = turn::enter();
        let slot = {
            let state = self.state();
            let still_there = state
                .store
                .get(origin)
                .and_then(Value::as_node)
                .is_some_and(|node| node.id() == child_id);
            if still_there {
                Some(origin.clone())
            } else {
                // array items shift, find where the child went
                state.store.slot_of(child_id)
            }
        };
        let Some(slot) = slot else {
            trace!(parent = %self.id(), child = %child_id, "Dropping bubble from detached child");
            return;
        };
        let mut bubbled = event.clone();
        bubbled.key = event.key.prefixed(slot.clone());
        bubbled.local = Some(LocalEvent {
            key: slot,
            evt: EventKind::Change,
            old: None,
        });
        if let Err(err) = self.emit_step(bubbled, &SetOptions::default(), Origin::Bubbled) {
            warn!(parent = %self.id(), child = %child_id, error = %err, "Failed to bubble child event");
        }
    }
}

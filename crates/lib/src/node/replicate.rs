//! Applying events from other nodes, and forwarding events between local nodes.

use tracing::{debug, trace};

use super::{Destination, Node, NodeError, SetOptions};
use crate::{
    Result,
    bus::Channel,
    event::{Event, EventKind, Source},
};

impl Node {
    /// Applies an event emitted by another node: `new` and `change` set, `delete` deletes and
    /// `move` moves. The change is tagged [`Source::Replicate`] and keeps the event's `rx`.
    pub fn replicate(&self, event: &Event) -> Result<()> {
        self.replicate_as(event, Source::Replicate)
    }

    pub(crate) fn replicate_as(&self, event: &Event, src: Source) -> Result<()> {
        let options = SetOptions {
            src: Some(src),
            rx: event.rx.clone(),
            ..Default::default()
        };
        trace!(node = %self.id(), %event, ?src, "Replicating event");
        match event.evt {
            EventKind::New | EventKind::Change => {
                let value = event.value.as_ref().map(|v| v.to_plain()).unwrap_or_default();
                self.set_with(
                    event.key.clone(),
                    value,
                    SetOptions {
                        insert: event.evt == EventKind::New,
                        ..options
                    },
                )?;
            }
            EventKind::Delete => {
                self.delete_with(event.key.clone(), options)?;
            }
            EventKind::Move => {
                let to = event.to.ok_or_else(|| NodeError::InvalidArgument {
                    reason: format!("move event for '{}' without a destination", event.key),
                })?;
                let mut from = event.key.clone();
                if let Some(index) = event.from {
                    // the key may name the moved item's new slot
                    from.pop();
                    from = from.push(index);
                }
                self.move_with(from, Destination::Index(to), options)?;
            }
            EventKind::None => {}
        }
        Ok(())
    }

    /// Forwards every change of this node to `target`.
    ///
    /// Returns false if this node already replicates to `target`.
    pub fn replicate_to(&self, target: &Node) -> Result<bool> {
        if target.ptr_eq(self) {
            return Err(NodeError::InvalidArgument {
                reason: "a node cannot replicate to itself".to_string(),
            }
            .into());
        }
        if self.state().replicas.contains_key(&target.id()) {
            return Ok(false);
        }
        let weak = target.downgrade();
        let listener = self.on(Channel::Event, move |event| match weak.upgrade() {
            Some(target) => target.replicate(event),
            None => Ok(()),
        });
        self.state().replicas.insert(target.id(), listener);
        debug!(source = %self.id(), target = %target.id(), "Replicating");
        Ok(true)
    }

    /// Applies every change of `source` to this node.
    pub fn replicate_from(&self, source: &Node) -> Result<bool> {
        source.replicate_to(self)
    }

    /// Stops forwarding to `target`. Returns false if there was nothing to stop.
    pub fn stop_replicating_to(&self, target: &Node) -> bool {
        let listener = self.state().replicas.remove(&target.id());
        match listener {
            Some(listener) => {
                debug!(source = %self.id(), target = %target.id(), "Stopped replicating");
                self.off(listener)
            }
            None => false,
        }
    }

    pub fn stop_replicating_from(&self, source: &Node) -> bool {
        source.stop_replicating_to(self)
    }
}

//! Links between a node and its counterpart on a peer.
//!
//! A link goes through `unlinked -> linked -> killed`. The side that shares a node prepares a
//! [`LinkDescriptor`] naming one channel per direction; the receiving side sets up its link
//! from the same descriptor with the directions flipped, so one side's transmit channel is
//! the other side's receive channel.
//!
//! Control messages travel on the same channels as events: `killedTx` on the transmit
//! channel, `killedRx` on the receive channel. Each side therefore listens on both of its
//! channels while the corresponding direction is alive.

use std::{
    fmt,
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};
use tokio::{runtime::Handle, sync::mpsc};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::{Envelope, LinkError, Payload, Transport};
use crate::{
    Result,
    bus::{Channel, ListenerId},
    event::{Event, Source},
    lock,
    meta::{self, MetaSpec},
    node::{EventType, Node, NodeId, NodeKind, NodeOptions, WeakNode},
};

/// What a peer needs to build a node compatible with the shared one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LinkMeta {
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<MetaSpec>,
    pub smartify_children: bool,
    pub event_type: EventType,
}

impl Default for LinkMeta {
    fn default() -> Self {
        Self {
            kind: NodeKind::Object,
            meta: None,
            smartify_children: true,
            event_type: EventType::Local,
        }
    }
}

/// Channel ids of a link, as seen by the side that prepared it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LinkDescriptor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rx: Option<String>,
    /// Set once a link was set up from this descriptor
    pub linked: bool,
    pub meta: LinkMeta,
}

/// Which directions [`Node::prepare_link`] enables.
///
/// Unset directions fall back to the node's `tx`/`rx` options, then to enabled. Channel ids
/// are random unless given.
#[derive(Debug, Clone, Default)]
pub struct LinkRequest {
    pub tx: Option<bool>,
    pub rx: Option<bool>,
    pub tx_id: Option<String>,
    pub rx_id: Option<String>,
}

/// The directions a new link runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirection {
    Sending,
    Receiving,
    Both,
}

impl fmt::Display for LinkDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkDirection::Sending => f.write_str("sending"),
            LinkDirection::Receiving => f.write_str("receiving"),
            LinkDirection::Both => f.write_str("both"),
        }
    }
}

/// Edits or drops outbound events. Returning `None` suppresses the event.
pub type TxFilter = Arc<dyn Fn(&Event) -> Option<Event> + Send + Sync>;

/// Called once a link is up.
pub type LinkedCallback = Arc<dyn Fn(LinkDirection) + Send + Sync>;

/// Options for [`Node::init_link`].
#[derive(Clone, Default)]
pub struct LinkOptions {
    /// Swap the descriptor's directions, as the receiving side must
    pub flip: bool,
    pub tx_filter: Option<TxFilter>,
    pub on_linked: Option<LinkedCallback>,
}

impl fmt::Debug for LinkOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkOptions")
            .field("flip", &self.flip)
            .field("tx_filter", &self.tx_filter.is_some())
            .field("on_linked", &self.on_linked.is_some())
            .finish()
    }
}

#[derive(Default)]
struct LinkState {
    tx_listener: Option<ListenerId>,
    receiving: bool,
    /// Dropped once both directions are gone, which ends the pump
    outbox: Option<mpsc::UnboundedSender<Envelope>>,
}

struct LinkInner {
    node: WeakNode,
    node_id: NodeId,
    transport: Arc<dyn Transport>,
    tx: Option<String>,
    rx: Option<String>,
    tx_filter: Option<TxFilter>,
    state: Mutex<LinkState>,
}

/// A live replication link. Cloning gives another handle to the same link.
#[derive(Clone)]
pub struct Link {
    inner: Arc<LinkInner>,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("node", &self.inner.node_id)
            .field("tx", &self.inner.tx)
            .field("rx", &self.inner.rx)
            .finish_non_exhaustive()
    }
}

impl Link {
    pub fn tx_id(&self) -> Option<&str> {
        self.inner.tx.as_deref()
    }

    pub fn rx_id(&self) -> Option<&str> {
        self.inner.rx.as_deref()
    }

    pub fn is_transmitting(&self) -> bool {
        lock(&self.inner.state).tx_listener.is_some()
    }

    pub fn is_receiving(&self) -> bool {
        lock(&self.inner.state).receiving
    }

    /// True once both directions are gone.
    pub fn is_killed(&self) -> bool {
        lock(&self.inner.state).outbox.is_none()
    }

    /// Stops transmitting and tells the peer to stop receiving. Idempotent.
    pub fn kill_tx(&self) {
        self.stop_tx(true);
    }

    /// Stops receiving and tells the peer to stop transmitting. Idempotent.
    pub fn kill_rx(&self) {
        self.stop_rx(true);
    }

    /// Kills both directions.
    pub fn kill(&self) {
        self.stop_tx(true);
        self.stop_rx(true);
    }

    /// Tears down without telling the peer.
    fn abandon(&self) {
        self.stop_tx(false);
        self.stop_rx(false);
    }

    fn start(&self, node: &Node) {
        let weak = Arc::downgrade(&self.inner);
        let inbound = Arc::new(move |envelope: Envelope| {
            if let Some(inner) = weak.upgrade() {
                Link { inner }.inbound(envelope);
            }
        });
        if let Some(rx) = &self.inner.rx {
            self.inner.transport.subscribe(rx, inbound.clone());
            lock(&self.inner.state).receiving = true;
        }
        if let Some(tx) = &self.inner.tx {
            self.inner.transport.subscribe(tx, inbound);
            let weak = Arc::downgrade(&self.inner);
            let listener = node.on(Channel::Event, move |event| {
                if let Some(inner) = weak.upgrade() {
                    Link { inner }.transmit(event);
                }
                Ok(())
            });
            lock(&self.inner.state).tx_listener = Some(listener);
        }
    }

    fn transmit(&self, event: &Event) {
        let Some(tx) = &self.inner.tx else {
            return;
        };
        if event.rx.is_some() && event.rx == self.inner.rx {
            trace!(node = %self.inner.node_id, %event, "Not echoing event received on this link");
            return;
        }
        let mut outbound = event.detached();
        outbound.local = None;
        outbound.rx = None;
        if let Some(filter) = &self.inner.tx_filter {
            match filter(&outbound) {
                Some(filtered) => outbound = filtered,
                None => {
                    trace!(node = %self.inner.node_id, %event, "Event filtered out");
                    return;
                }
            }
        }
        self.post(Envelope::new(tx.clone(), Payload::Event { event: outbound }));
    }

    fn inbound(&self, envelope: Envelope) {
        let on_rx = self.inner.rx.as_deref() == Some(envelope.subject.as_str());
        match envelope.data {
            Payload::Event { mut event } if on_rx && self.is_receiving() => {
                let Some(node) = self.inner.node.upgrade() else {
                    return;
                };
                event.rx = self.inner.rx.clone();
                if let Err(err) = node.replicate_as(&event, Source::Remote) {
                    warn!(node = %self.inner.node_id, %event, error = %err, "Failed to apply remote event");
                }
            }
            Payload::KilledTx if on_rx => {
                debug!(node = %self.inner.node_id, "Peer stopped transmitting");
                self.stop_rx(false);
            }
            Payload::KilledRx if !on_rx => {
                debug!(node = %self.inner.node_id, "Peer stopped receiving");
                self.stop_tx(false);
            }
            data => {
                debug!(node = %self.inner.node_id, subject = %envelope.subject, kind = data.kind(), "Ignoring message");
            }
        }
    }

    fn post(&self, envelope: Envelope) {
        let state = lock(&self.inner.state);
        let Some(outbox) = state.outbox.as_ref() else {
            trace!(node = %self.inner.node_id, %envelope, "Link is killed, dropping message");
            return;
        };
        if outbox.send(envelope).is_err() {
            warn!(node = %self.inner.node_id, "Link pump is gone");
        }
    }

    fn stop_tx(&self, notify: bool) {
        let listener = lock(&self.inner.state).tx_listener.take();
        let Some(listener) = listener else {
            return;
        };
        if let Some(node) = self.inner.node.upgrade() {
            node.off(listener);
        }
        if let Some(tx) = &self.inner.tx {
            self.inner.transport.unsubscribe(tx);
            if notify {
                self.post(Envelope::new(tx.clone(), Payload::KilledTx));
            }
        }
        debug!(node = %self.inner.node_id, tx = ?self.inner.tx, "Stopped transmitting");
        self.finish_if_dead();
    }

    fn stop_rx(&self, notify: bool) {
        let was_receiving = std::mem::take(&mut lock(&self.inner.state).receiving);
        if !was_receiving {
            return;
        }
        if let Some(rx) = &self.inner.rx {
            self.inner.transport.unsubscribe(rx);
            if notify {
                self.post(Envelope::new(rx.clone(), Payload::KilledRx));
            }
        }
        debug!(node = %self.inner.node_id, rx = ?self.inner.rx, "Stopped receiving");
        self.finish_if_dead();
    }

    fn finish_if_dead(&self) {
        let finished = {
            let mut state = lock(&self.inner.state);
            state.tx_listener.is_none() && !state.receiving && state.outbox.take().is_some()
        };
        if !finished {
            return;
        }
        if let Some(node) = self.inner.node.upgrade() {
            node.state()
                .links
                .retain(|link| !Arc::ptr_eq(&link.inner, &self.inner));
        }
        info!(node = %self.inner.node_id, tx = ?self.inner.tx, rx = ?self.inner.rx, "Link killed");
    }
}

/// Sends queued envelopes in order. Ends when the link drops its outbox.
async fn pump(transport: Arc<dyn Transport>, mut queue: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(envelope) = queue.recv().await {
        let described = envelope.to_string();
        match transport.send(envelope).await {
            Ok(true) => trace!(envelope = %described, "Sent"),
            Ok(false) => debug!(envelope = %described, "Peer did not accept message"),
            Err(err) => warn!(envelope = %described, error = %err, "Failed to send message"),
        }
    }
}

impl Node {
    /// Picks the channels of a new link and describes this node for the peer.
    pub fn prepare_link(&self, request: LinkRequest) -> LinkDescriptor {
        let options = self.options();
        let channel = |enabled: bool, id: Option<String>| {
            enabled.then(|| id.unwrap_or_else(|| Uuid::new_v4().to_string()))
        };
        LinkDescriptor {
            tx: channel(request.tx.or(options.tx).unwrap_or(true), request.tx_id),
            rx: channel(request.rx.or(options.rx).unwrap_or(true), request.rx_id),
            linked: false,
            meta: LinkMeta {
                kind: self.kind(),
                meta: meta::with_default_values(options.meta.as_ref(), options.default_values.as_ref()),
                smartify_children: options.smartify_children,
                event_type: options.event_type,
            },
        }
    }

    /// Sets up a link from a descriptor and marks the descriptor as used.
    ///
    /// Fails with `EALREADY` if the descriptor was used before.
    pub fn init_link(
        &self,
        transport: Arc<dyn Transport>,
        descriptor: &mut LinkDescriptor,
        options: LinkOptions,
    ) -> Result<Link> {
        if descriptor.linked {
            return Err(LinkError::AlreadyLinked {
                tx: descriptor.tx.clone(),
                rx: descriptor.rx.clone(),
            }
            .into());
        }
        let (tx, rx) = if options.flip {
            (descriptor.rx.clone(), descriptor.tx.clone())
        } else {
            (descriptor.tx.clone(), descriptor.rx.clone())
        };
        let direction = match (&tx, &rx) {
            (Some(_), Some(_)) => LinkDirection::Both,
            (Some(_), None) => LinkDirection::Sending,
            (None, Some(_)) => LinkDirection::Receiving,
            (None, None) => return Err(LinkError::NothingToLink.into()),
        };
        let handle = Handle::try_current().map_err(|_| LinkError::NoRuntime)?;

        let (outbox, queue) = mpsc::unbounded_channel();
        handle.spawn(pump(transport.clone(), queue));
        let link = Link {
            inner: Arc::new(LinkInner {
                node: self.downgrade(),
                node_id: self.id(),
                transport,
                tx,
                rx,
                tx_filter: options.tx_filter,
                state: Mutex::new(LinkState {
                    outbox: Some(outbox),
                    ..Default::default()
                }),
            }),
        };
        link.start(self);
        descriptor.linked = true;
        self.state().links.push(link.clone());
        info!(node = %self.id(), %direction, tx = ?link.tx_id(), rx = ?link.rx_id(), "Linked");
        if let Some(on_linked) = options.on_linked {
            on_linked(direction);
        }
        Ok(link)
    }

    /// Links this node, then shares its contents and the link under `subject`.
    ///
    /// A failed send tears the link down again and is returned as `LinkError::SendFailed`.
    pub async fn send_and_link(
        &self,
        transport: Arc<dyn Transport>,
        subject: impl Into<String>,
        request: LinkRequest,
    ) -> Result<Link> {
        let mut descriptor = self.prepare_link(request);
        let shared = descriptor.clone();
        let link = self.init_link(transport.clone(), &mut descriptor, LinkOptions::default())?;
        let envelope = Envelope::new(
            subject,
            Payload::Share {
                value: self.copy(),
                link: shared,
            },
        );
        let subject = envelope.subject.clone();
        let failure = match transport.send(envelope).await {
            Ok(true) => None,
            Ok(false) => Some("peer did not accept the message".to_string()),
            Err(err) => Some(err.to_string()),
        };
        if let Some(reason) = failure {
            link.abandon();
            return Err(LinkError::SendFailed { subject, reason }.into());
        }
        Ok(link)
    }

    /// Takes the contents of a shared node, replacing or assigning over this node's, and
    /// links to it.
    pub fn receive_and_link(
        &self,
        transport: Arc<dyn Transport>,
        envelope: Envelope,
        replace: bool,
    ) -> Result<Link> {
        let Payload::Share {
            value,
            link: mut descriptor,
        } = envelope.data
        else {
            return Err(LinkError::UnexpectedPayload {
                expected: "share",
                actual: envelope.data.kind().to_string(),
            }
            .into());
        };
        if replace {
            self.replace(value)?;
        } else {
            self.assign(value)?;
        }
        self.init_link(
            transport,
            &mut descriptor,
            LinkOptions {
                flip: true,
                ..Default::default()
            },
        )
    }

    /// Builds a node from a shared one and links to it.
    pub fn from_shared(transport: Arc<dyn Transport>, envelope: Envelope) -> Result<(Node, Link)> {
        let Payload::Share {
            value,
            link: mut descriptor,
        } = envelope.data
        else {
            return Err(LinkError::UnexpectedPayload {
                expected: "share",
                actual: envelope.data.kind().to_string(),
            }
            .into());
        };
        let options = NodeOptions {
            meta: descriptor.meta.meta.clone(),
            smartify_children: descriptor.meta.smartify_children,
            event_type: descriptor.meta.event_type,
            ..Default::default()
        };
        let node = match descriptor.meta.kind {
            NodeKind::Object if value.is_null() => Node::object(options)?,
            NodeKind::Array if value.is_null() => Node::array(options)?,
            _ => Node::from_value(value, options)?,
        };
        let link = node.init_link(
            transport,
            &mut descriptor,
            LinkOptions {
                flip: true,
                ..Default::default()
            },
        )?;
        Ok((node, link))
    }

    /// The live links of this node.
    pub fn links(&self) -> Vec<Link> {
        self.state().links.clone()
    }

    /// Kills every link of this node.
    pub fn kill_links(&self) {
        for link in self.links() {
            link.kill();
        }
    }
}

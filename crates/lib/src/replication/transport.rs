//! The transport seam links send and receive through.
//!
//! A transport moves [`Envelope`]s between two peers. Links address each direction by a
//! channel id, which travels as the envelope's subject; everything else (sharing a node,
//! request/response plumbing) is up to the application.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::LinkDescriptor;
use crate::{Result, event::Event, value::Value};

/// What an envelope carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Payload {
    /// A change to apply on the receiving side
    Event { event: Event },
    /// The sender stopped transmitting on this channel
    KilledTx,
    /// The sender stopped receiving on this channel
    KilledRx,
    /// A node's contents and the link to set up for it
    Share { value: Value, link: LinkDescriptor },
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Event { .. } => "event",
            Payload::KilledTx => "killedTx",
            Payload::KilledRx => "killedRx",
            Payload::Share { .. } => "share",
        }
    }
}

/// One message between peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Channel id for link traffic, any application subject otherwise
    pub subject: String,
    pub data: Payload,
}

impl Envelope {
    pub fn new(subject: impl Into<String>, data: Payload) -> Self {
        Self {
            subject: subject.into(),
            data,
        }
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on '{}'", self.data.kind(), self.subject)
    }
}

/// Callback receiving the envelopes of one channel.
pub type InboundHandler = Arc<dyn Fn(Envelope) + Send + Sync>;

/// Trait for moving link traffic between peers.
///
/// Implementations must deliver envelopes of one channel in the order they were sent. Sends
/// are never retried by the caller.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends an envelope to the peer.
    ///
    /// # Returns
    /// Whether the peer accepted the envelope, or an error if it could not be sent at all.
    async fn send(&self, envelope: Envelope) -> Result<bool>;

    /// Routes inbound envelopes whose subject is `channel` to `handler`, replacing any previous
    /// handler for that channel.
    fn subscribe(&self, channel: &str, handler: InboundHandler);

    /// Stops routing a channel. Unknown channels are ignored.
    fn unsubscribe(&self, channel: &str);
}

//! In-process duplex transport.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use super::{Envelope, InboundHandler, Payload, Transport};
use crate::{Result, lock};

struct Side {
    handlers: Mutex<HashMap<String, InboundHandler>>,
    unrouted: mpsc::UnboundedSender<Envelope>,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>,
}

impl Side {
    fn new() -> Arc<Self> {
        let (unrouted, inbox) = mpsc::unbounded_channel();
        Arc::new(Self {
            handlers: Mutex::new(HashMap::new()),
            unrouted,
            inbox: tokio::sync::Mutex::new(inbox),
        })
    }
}

/// One end of an in-memory connection, see [`MemoryTransport::pair`].
///
/// Envelopes on a subscribed channel are handed to the peer's handler during `send`. Shared
/// nodes ([`Payload::Share`]) on unsubscribed subjects queue up for [`MemoryTransport::recv`];
/// other unrouted traffic is refused.
#[derive(Clone)]
pub struct MemoryTransport {
    local: Arc<Side>,
    peer: Arc<Side>,
}

impl MemoryTransport {
    /// Two connected ends.
    pub fn pair() -> (MemoryTransport, MemoryTransport) {
        let (a, b) = (Side::new(), Side::new());
        (
            MemoryTransport {
                local: a.clone(),
                peer: b.clone(),
            },
            MemoryTransport { local: b, peer: a },
        )
    }

    /// The next shared node sent to this end that no channel handler claimed.
    pub async fn recv(&self) -> Option<Envelope> {
        self.local.inbox.lock().await.recv().await
    }

    /// Number of channels this end routes.
    pub fn channel_count(&self) -> usize {
        lock(&self.local.handlers).len()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, envelope: Envelope) -> Result<bool> {
        let handler = lock(&self.peer.handlers).get(&envelope.subject).cloned();
        match handler {
            Some(handler) => {
                handler(envelope);
                Ok(true)
            }
            None if matches!(envelope.data, Payload::Share { .. }) => {
                Ok(self.peer.unrouted.send(envelope).is_ok())
            }
            None => {
                trace!(%envelope, "No handler on the peer, refusing");
                Ok(false)
            }
        }
    }

    fn subscribe(&self, channel: &str, handler: InboundHandler) {
        lock(&self.local.handlers).insert(channel.to_string(), handler);
    }

    fn unsubscribe(&self, channel: &str) {
        lock(&self.local.handlers).remove(channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[tokio::test]
    async fn routes_by_subject() {
        let (a, b) = MemoryTransport::pair();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        b.subscribe(
            "chan",
            Arc::new(move |envelope| log.lock().unwrap().push(envelope.data.kind())),
        );
        assert!(a.send(Envelope::new("chan", Payload::KilledTx)).await.unwrap());
        assert!(!a.send(Envelope::new("other", Payload::KilledRx)).await.unwrap());
        assert_eq!(*seen.lock().unwrap(), vec!["killedTx"]);

        let share = Payload::Share {
            value: Value::Int(1),
            link: Default::default(),
        };
        assert!(b.send(Envelope::new("node", share)).await.unwrap());
        let received = a.recv().await.unwrap();
        assert_eq!(received.subject, "node");

        b.unsubscribe("chan");
        assert_eq!(b.channel_count(), 0);
        assert!(!a.send(Envelope::new("chan", Payload::KilledTx)).await.unwrap());
    }
}

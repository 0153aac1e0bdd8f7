//! Replication of nodes between peers.
//!
//! A [`Link`] connects a local node with its counterpart on a peer through a [`Transport`].
//! Each direction is optional: a transmitting side forwards the node's events, a receiving
//! side applies the peer's events with [`crate::Source::Remote`]. Events that arrived through
//! a link are never sent back through the same link.
//!
//! ```rust
//! use std::sync::Arc;
//! use livenode::{Node, replication::{LinkRequest, MemoryTransport, Transport}};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> livenode::Result<()> {
//! let (here, there) = MemoryTransport::pair();
//! let origin = Node::create(serde_json::json!({"title": "draft"}))?;
//! origin.send_and_link(Arc::new(here), "doc", LinkRequest::default()).await?;
//!
//! let envelope = there.recv().await.expect("shared node");
//! let (copy, _link) = Node::from_shared(Arc::new(there), envelope)?;
//! assert_eq!(copy.to_json(), origin.to_json());
//! # Ok(())
//! # }
//! ```

mod error;
mod link;
mod memory;
mod transport;

pub use error::LinkError;
pub use link::{
    Link, LinkDescriptor, LinkDirection, LinkMeta, LinkOptions, LinkRequest, LinkedCallback,
    TxFilter,
};
pub use memory::MemoryTransport;
pub use transport::{Envelope, InboundHandler, Payload, Transport};

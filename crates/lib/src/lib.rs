//!
//! Livenode: live object and array nodes that keep an application's state observable.
//!
//! A [`Node`] wraps plain data (a map or a dense sequence) and routes every mutation through a
//! validated pipeline. Each logical change produces exactly one [`Event`], which listeners can
//! observe, interceptors can veto, parents receive through bubbling, and replication links can
//! forward to a peer node over an abstract [`replication::Transport`].
//!
//! ## Core Concepts
//!
//! * **Nodes (`node::Node`)**: Object- or array-shaped containers. Nested plain containers are
//!   promoted into owned child nodes whose events bubble up to their parent.
//! * **Meta (`meta::MetaRule`)**: Per-key validation policy (type coercion, accepted values,
//!   required/constant keys, cleaners, defaults) compiled once per node.
//! * **Events (`event::Event`)**: The canonical record of one mutation, emitted on a generic
//!   channel, a per-kind channel and a per-key channel (`bus::Channel`).
//! * **Reconciliation (`reconcile`)**: A greedy minimal-diff planner used when replacing the
//!   contents of an array node.
//! * **Replication (`replication`)**: Duplex links between nodes on different peers, with echo
//!   suppression and coordinated teardown.
//! * **Storage (`storage`)**: A persistence seam that fills a node from stored data and writes
//!   it back on a buffered delay.

pub mod bus;
pub mod event;
pub mod meta;
pub mod node;
pub mod path;
pub mod reconcile;
pub mod replication;
pub mod storage;
pub mod value;

pub use bus::{Channel, InputMode, LengthSignal, ListenerId, Written};
pub use event::{Event, EventKind, Source};
pub use node::{Node, NodeError, NodeKind, NodeOptions};
pub use path::{KeyPath, PathArg, Segment};
pub use replication::LinkError;
pub use value::{DataType, Value};

/// Locks a mutex, recovering the data if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Result type used throughout the Livenode library.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error returned by user supplied callbacks (cleaners, interceptors).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Common error type for the Livenode library.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Structured node errors from the node, meta and reconcile modules
    #[error(transparent)]
    Node(node::NodeError),

    /// Structured replication errors from the replication module
    #[error(transparent)]
    Link(replication::LinkError),
}

impl Error {
    /// Get the originating module for this error.
    pub fn module(&self) -> &'static str {
        match self {
            Error::Node(_) => "node",
            Error::Link(_) => "replication",
            Error::Io(_) => "io",
            Error::Serialize(_) => "serialize",
        }
    }

    /// The error code from the shared taxonomy (`TypeError`, `EINVAL`, `EALREADY`, ...).
    pub fn code(&self) -> &'static str {
        match self {
            Error::Node(err) => err.code(),
            Error::Link(err) => err.code(),
            Error::Io(_) => "EIO",
            Error::Serialize(_) => "EINVAL",
        }
    }

    /// Access the wrapped node error, if any.
    pub fn as_node_error(&self) -> Option<&node::NodeError> {
        match self {
            Error::Node(err) => Some(err),
            _ => None,
        }
    }

    /// Check if this error is a key or value shape mismatch.
    pub fn is_type_error(&self) -> bool {
        match self {
            Error::Node(err) => err.is_type_error(),
            _ => false,
        }
    }

    /// Check if this error was raised by validation policy.
    pub fn is_validation_error(&self) -> bool {
        match self {
            Error::Node(err) => err.is_validation_error(),
            _ => false,
        }
    }

    /// Check if this error indicates something already exists or is already set.
    pub fn is_already(&self) -> bool {
        match self {
            Error::Node(err) => err.is_already(),
            Error::Link(err) => err.is_already_linked(),
            _ => false,
        }
    }

    /// Check if this error came from an interceptor.
    pub fn is_intercepted(&self) -> bool {
        match self {
            Error::Node(err) => err.is_intercepted(),
            _ => false,
        }
    }

    /// Check if this error is an index outside sequential bounds.
    pub fn is_out_of_range(&self) -> bool {
        match self {
            Error::Node(err) => err.is_out_of_range(),
            _ => false,
        }
    }

    /// Check if this error signals a broken internal invariant.
    pub fn is_bug(&self) -> bool {
        match self {
            Error::Node(err) => err.is_bug(),
            _ => false,
        }
    }

    /// Check if this error is replication-related.
    pub fn is_link_error(&self) -> bool {
        matches!(self, Error::Link(_))
    }

    /// Check if this error is I/O related.
    pub fn is_io_error(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}

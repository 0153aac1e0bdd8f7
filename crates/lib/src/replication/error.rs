//! Error types for the replication module.

use thiserror::Error;

/// Errors that can occur while setting up or running a replication link.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LinkError {
    /// The descriptor was already used to set up a link.
    #[error("Link already set up (tx: {tx:?}, rx: {rx:?})")]
    AlreadyLinked {
        tx: Option<String>,
        rx: Option<String>,
    },

    /// Neither direction is enabled after flipping.
    #[error("Link descriptor enables neither transmission nor reception")]
    NothingToLink,

    /// Links pump outbound messages on a tokio runtime.
    #[error("Linking requires a running tokio runtime")]
    NoRuntime,

    /// The transport did not deliver a message.
    #[error("Failed to send '{subject}': {reason}")]
    SendFailed { subject: String, reason: String },

    /// A message did not carry what the operation needs.
    #[error("Unexpected payload: expected {expected}, got {actual}")]
    UnexpectedPayload {
        expected: &'static str,
        actual: String,
    },
}

impl LinkError {
    /// The error code from the shared taxonomy.
    pub fn code(&self) -> &'static str {
        match self {
            LinkError::AlreadyLinked { .. } => "EALREADY",
            LinkError::NothingToLink
            | LinkError::NoRuntime
            | LinkError::UnexpectedPayload { .. } => "EINVAL",
            LinkError::SendFailed { .. } => "EIO",
        }
    }

    /// Check if the descriptor was used twice.
    pub fn is_already_linked(&self) -> bool {
        matches!(self, LinkError::AlreadyLinked { .. })
    }

    /// Check if a send failed.
    pub fn is_send_error(&self) -> bool {
        matches!(self, LinkError::SendFailed { .. })
    }
}

impl From<LinkError> for crate::Error {
    fn from(err: LinkError) -> Self {
        crate::Error::Link(err)
    }
}

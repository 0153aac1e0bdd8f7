//! Error types for node operations.
//!
//! Every variant maps onto one code of the shared taxonomy via [`NodeError::code`], so callers
//! can branch on `TypeError`, `EINVAL`, `EILLEGAL`, `EALREADY`, `EMISMATCH`, `RangeError`,
//! `ENOENT`, `ENOTEMPTY` or `BUGBUG` regardless of which variant carried the details.

use std::fmt;

use thiserror::Error;
use tracing::error;

use crate::event::EventKind;

/// The pipeline stage an interceptor ran at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Prepare,
    Commit,
    Emit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Prepare => f.write_str("prepare"),
            Stage::Commit => f.write_str("commit"),
            Stage::Emit => f.write_str("emit"),
        }
    }
}

/// Structured error types for node operations.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum NodeError {
    /// Key does not fit the node kind or is reserved
    #[error("Invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// Value could not be coerced to the expected type
    #[error("Expected {expected}, got {actual}")]
    InvalidType { expected: String, actual: String },

    /// Key has a constant type and the new value belongs to another category
    #[error("Key '{key}' has a constant type, cannot change ({from} => {to})")]
    TypeLocked { key: String, from: String, to: String },

    /// Malformed call arguments
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// Value is not among the accepted values of the key
    #[error("Value {value} is not accepted for key '{key}'")]
    NotAccepted { key: String, value: String },

    /// Validation policy forbids the operation
    #[error("Illegal operation on key '{key}': {reason}")]
    Illegal { key: String, reason: String },

    /// Key is constant and already holds a non-default value
    #[error("Key '{key}' is constant, it remains set as {current}")]
    Constant { key: String, current: String },

    /// Storage was already attached to the node
    #[error("Storage is already attached to this node")]
    AlreadyAttached,

    /// A nested path runs through something that is not a container
    #[error("Path '{path}' traverses a non-container ({at})")]
    PathMismatch { path: String, at: String },

    /// Meta rules contradict each other
    #[error("Conflicting meta for key '{key}': {reason}")]
    MetaConflict { key: String, reason: String },

    /// Array index outside sequential bounds
    #[error("Index {index} is outside the valid range for length {len}")]
    OutOfRange { index: i64, len: usize },

    /// A bulk operation referenced something that does not exist
    #[error("Key '{key}' not found")]
    NotFound { key: String },

    /// Emptying left keys behind
    #[error("Unable to empty node, remaining keys: {remaining:?}")]
    NotEmpty { remaining: Vec<String> },

    /// A meta cleaner refused the value
    #[error("Cleaner rejected value for key '{key}': {reason}")]
    Cleaner { key: String, reason: String },

    /// An interceptor rejected the mutation
    #[error("Prevented {evt} on '{key}' at {stage}-stage: {reason}")]
    Intercepted {
        stage: Stage,
        key: String,
        evt: EventKind,
        reason: String,
    },

    /// Some entries of a bulk assignment failed
    #[error("Failed to assign {} of {total} entries", .failures.len())]
    Partial {
        failures: Vec<(String, crate::Error)>,
        total: usize,
    },

    /// Reverting to a snapshot failed for one or more nested nodes
    #[error("Failed to revert {} nested node(s)", .failures.len())]
    RevertFailed { failures: Vec<(String, crate::Error)> },

    /// An internal invariant is broken
    #[error("BUGBUG: {reason}")]
    Bug { reason: String },
}

impl NodeError {
    /// Builds a [`NodeError::Bug`], logging it at error level.
    pub(crate) fn bug(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        error!(%reason, "Internal invariant broken");
        NodeError::Bug { reason }
    }

    /// The taxonomy code of this error.
    pub fn code(&self) -> &'static str {
        match self {
            NodeError::InvalidKey { .. }
            | NodeError::InvalidType { .. }
            | NodeError::TypeLocked { .. } => "TypeError",
            NodeError::InvalidArgument { .. }
            | NodeError::NotAccepted { .. }
            | NodeError::Cleaner { .. } => "EINVAL",
            NodeError::Illegal { .. } => "EILLEGAL",
            NodeError::Constant { .. } | NodeError::AlreadyAttached => "EALREADY",
            NodeError::PathMismatch { .. } | NodeError::MetaConflict { .. } => "EMISMATCH",
            NodeError::OutOfRange { .. } => "RangeError",
            NodeError::NotFound { .. } => "ENOENT",
            NodeError::NotEmpty { .. } => "ENOTEMPTY",
            NodeError::Intercepted { .. } => "EINTERCEPT",
            NodeError::Partial { .. } | NodeError::RevertFailed { .. } => "EMULTI",
            NodeError::Bug { .. } => "BUGBUG",
        }
    }

    /// Check if this error is a key or value shape mismatch
    pub fn is_type_error(&self) -> bool {
        self.code() == "TypeError"
    }

    /// Check if this error was raised by meta validation
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            NodeError::InvalidType { .. }
                | NodeError::TypeLocked { .. }
                | NodeError::NotAccepted { .. }
                | NodeError::Illegal { .. }
                | NodeError::Constant { .. }
                | NodeError::Cleaner { .. }
        )
    }

    /// Check if this error indicates something is already set
    pub fn is_already(&self) -> bool {
        self.code() == "EALREADY"
    }

    /// Check if this error is a constant-key violation
    pub fn is_constant_violation(&self) -> bool {
        matches!(self, NodeError::Constant { .. })
    }

    /// Check if this error came from an interceptor
    pub fn is_intercepted(&self) -> bool {
        matches!(self, NodeError::Intercepted { .. })
    }

    /// Check if this error is an index outside sequential bounds
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, NodeError::OutOfRange { .. })
    }

    /// Check if this error signals a broken invariant
    pub fn is_bug(&self) -> bool {
        matches!(self, NodeError::Bug { .. })
    }

    /// The interceptor stage, if this is an interception
    pub fn stage(&self) -> Option<Stage> {
        match self {
            NodeError::Intercepted { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The key the error refers to, if any
    pub fn key(&self) -> Option<&str> {
        match self {
            NodeError::InvalidKey { key, .. }
            | NodeError::TypeLocked { key, .. }
            | NodeError::NotAccepted { key, .. }
            | NodeError::Illegal { key, .. }
            | NodeError::Constant { key, .. }
            | NodeError::MetaConflict { key, .. }
            | NodeError::NotFound { key }
            | NodeError::Cleaner { key, .. }
            | NodeError::Intercepted { key, .. } => Some(key),
            _ => None,
        }
    }
}

// Conversion from NodeError to the main Error type
impl From<NodeError> for crate::Error {
    fn from(err: NodeError) -> Self {
        crate::Error::Node(err)
    }
}

//! Interception points of the mutation pipeline.
//!
//! - **prepare** runs before anything is resolved or validated and may rewrite the key, the
//!   value and the call options.
//! - **commit** runs after validation, before child nodes are created or anything is stored.
//! - **emit** runs after the value is stored, before listeners are notified. If it fails the
//!   mutation is inverted.
//!
//! Returning [`Interception::Cancel`] stops the mutation quietly: the call returns the current
//! value and an event is raised on [`crate::Channel::Intercept`]. Returning
//! [`Interception::Reject`] makes the call fail with [`super::NodeError::Intercepted`].

use std::{fmt, sync::Arc};

use super::{Node, SetOptions};
use crate::{BoxError, event::Event, lock, path::KeyPath, value::Value};

/// Why an interceptor stopped a mutation.
#[derive(Debug)]
pub enum Interception {
    /// Deliberate, silent suppression
    Cancel,
    /// Failure reported to the caller
    Reject(BoxError),
}

impl Interception {
    /// Rejects with a message.
    pub fn reject(reason: impl Into<String>) -> Self {
        Interception::Reject(reason.into().into())
    }
}

impl fmt::Display for Interception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interception::Cancel => f.write_str("cancelled"),
            Interception::Reject(err) => write!(f, "{err}"),
        }
    }
}

/// A mutation as seen by the prepare interceptor. `value` is `None` for deletes.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub key: KeyPath,
    pub value: Option<Value>,
    pub options: SetOptions,
}

pub type PrepareInterceptor =
    Arc<dyn Fn(&Node, Proposal) -> Result<Proposal, Interception> + Send + Sync>;

/// Commit and emit interceptors may edit the event in place.
pub type EventInterceptor = Arc<dyn Fn(&Node, &mut Event) -> Result<(), Interception> + Send + Sync>;

#[derive(Default, Clone)]
pub(crate) struct Interceptors {
    pub(crate) prepare: Option<PrepareInterceptor>,
    pub(crate) commit: Option<EventInterceptor>,
    pub(crate) emit: Option<EventInterceptor>,
}

impl Node {
    /// Installs the prepare interceptor, replacing any previous one.
    pub fn intercept_prepare<F>(&self, f: F)
    where
        F: Fn(&Node, Proposal) -> Result<Proposal, Interception> + Send + Sync + 'static,
    {
        lock(&self.inner.interceptors).prepare = Some(Arc::new(f));
    }

    /// Installs the commit interceptor, replacing any previous one.
    pub fn intercept_commit<F>(&self, f: F)
    where
        F: Fn(&Node, &mut Event) -> Result<(), Interception> + Send + Sync + 'static,
    {
        lock(&self.inner.interceptors).commit = Some(Arc::new(f));
    }

    /// Installs the emit interceptor, replacing any previous one.
    pub fn intercept_emit<F>(&self, f: F)
    where
        F: Fn(&Node, &mut Event) -> Result<(), Interception> + Send + Sync + 'static,
    {
        lock(&self.inner.interceptors).emit = Some(Arc::new(f));
    }

    /// Removes all interceptors.
    pub fn clear_interceptors(&self) {
        *lock(&self.inner.interceptors) = Interceptors::default();
    }

    pub(crate) fn interceptors(&self) -> Interceptors {
        lock(&self.inner.interceptors).clone()
    }
}

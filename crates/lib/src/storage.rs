//! Persistence hooks.
//!
//! A [`Storage`] holds the plain contents of one node. [`Node::attach_storage`] fills the node
//! from it once and then writes the node back a fixed delay after the first change of each
//! burst, so a storm of changes results in one write.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{runtime::Handle, task::JoinHandle, time::sleep};
use tracing::{debug, info, warn};

use crate::{
    Result,
    bus::{Channel, ListenerId},
    lock,
    node::{Node, NodeError, WeakNode},
    value::Value,
};

/// Where a node's contents are persisted.
#[async_trait]
pub trait Storage: Send + Sync {
    /// The stored contents, `None` if nothing was stored yet.
    async fn read(&self) -> Result<Option<Value>>;

    /// Replaces the stored contents.
    async fn write(&self, value: &Value) -> Result<()>;

    /// Removes the stored contents.
    async fn unlink(&self) -> Result<()>;
}

/// Stores a node as a JSON document.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Storage for JsonFileStorage {
    async fn read(&self) -> Result<Option<Value>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, value: &Value) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }

    async fn unlink(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Options for [`Node::attach_storage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachOptions {
    /// Fill keys missing from the node with the stored contents when attaching
    pub read: bool,
    /// Delay between the first change of a burst and the write
    pub buffer_ms: u64,
}

impl Default for AttachOptions {
    fn default() -> Self {
        Self {
            read: true,
            buffer_ms: 100,
        }
    }
}

type Timer = Arc<Mutex<Option<JoinHandle<()>>>>;

/// A node's connection to its storage, see [`Node::attach_storage`].
///
/// Dropping the attachment keeps the write-behind running; call [`Attachment::detach`] to stop
/// it.
pub struct Attachment {
    node: WeakNode,
    storage: Arc<dyn Storage>,
    listener: ListenerId,
    timer: Timer,
}

impl Node {
    /// Connects the node to a storage. Fails with `EALREADY` if the node is already attached.
    ///
    /// Requires a running tokio runtime for the write-behind.
    pub async fn attach_storage(&self, storage: Arc<dyn Storage>, options: AttachOptions) -> Result<Attachment> {
        let handle = Handle::try_current().map_err(|_| NodeError::InvalidArgument {
            reason: "storage requires a running tokio runtime".to_string(),
        })?;
        {
            let mut state = self.state();
            if state.storage_attached {
                return Err(NodeError::AlreadyAttached.into());
            }
            state.storage_attached = true;
        }

        if options.read {
            if let Err(err) = fill_from(self, storage.as_ref()).await {
                self.state().storage_attached = false;
                return Err(err);
            }
        }

        let timer: Timer = Arc::default();
        let delay = Duration::from_millis(options.buffer_ms);
        let listener = {
            let weak = self.downgrade();
            let storage = storage.clone();
            let timer = timer.clone();
            self.on(Channel::Event, move |_event| {
                let mut pending = lock(&timer);
                if pending.is_some() {
                    return Ok(());
                }
                let weak = weak.clone();
                let storage = storage.clone();
                let slot = timer.clone();
                *pending = Some(handle.spawn(async move {
                    sleep(delay).await;
                    // changes from here on start the next window
                    lock(&slot).take();
                    if let Some(node) = weak.upgrade() {
                        write_out(&node, storage.as_ref()).await;
                    }
                }));
                Ok(())
            })
        };
        info!(node = %self.id(), ?delay, "Attached storage");
        Ok(Attachment {
            node: self.downgrade(),
            storage,
            listener,
            timer,
        })
    }
}

impl Attachment {
    /// Writes the node immediately, cancelling a pending write.
    pub async fn write_now(&self) -> Result<()> {
        if let Some(task) = lock(&self.timer).take() {
            task.abort();
        }
        let Some(node) = self.node.upgrade() else {
            return Ok(());
        };
        let value = node.copy();
        self.storage.write(&value).await
    }

    /// Fills keys missing from the node with the stored contents. Returns what was stored.
    pub async fn read_now(&self) -> Result<Option<Value>> {
        match self.node.upgrade() {
            Some(node) => fill_from(&node, self.storage.as_ref()).await,
            None => self.storage.read().await,
        }
    }

    /// Stops writing, discarding a pending write.
    pub fn detach(self) {
        if let Some(task) = lock(&self.timer).take() {
            task.abort();
        }
        if let Some(node) = self.node.upgrade() {
            node.off(self.listener);
            node.state().storage_attached = false;
            debug!(node = %node.id(), "Detached storage");
        }
    }

    /// Detaches and removes the stored contents.
    pub async fn unlink(self) -> Result<()> {
        let storage = self.storage.clone();
        self.detach();
        storage.unlink().await
    }
}

async fn fill_from(node: &Node, storage: &dyn Storage) -> Result<Option<Value>> {
    let stored = storage.read().await?;
    if let Some(value) = &stored {
        node.fill_out(value.clone())?;
        debug!(node = %node.id(), "Filled node from storage");
    }
    Ok(stored)
}

async fn write_out(node: &Node, storage: &dyn Storage) {
    let value = node.copy();
    match storage.write(&value).await {
        Ok(()) => debug!(node = %node.id(), "Wrote node to storage"),
        Err(err) => warn!(node = %node.id(), error = %err, "Failed to write node to storage"),
    }
}

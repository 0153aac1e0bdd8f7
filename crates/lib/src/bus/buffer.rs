//! Time based buffering of node input and output.
//!
//! - The output buffer collects every event emitted within a window and hands them, with the
//!   unique affected keys, to the node's buffer listeners.
//! - The bubble buffer coalesces bursts of nested changes into one local `change` per key.
//!   It only has an effect when the node's event type is local.
//! - The input buffer debounces or throttles [`Node::write`].
//!
//! All timers run on the tokio runtime that was current when the buffer was configured.

use std::{
    collections::{HashMap, HashSet},
    mem,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{runtime::Handle, task::JoinHandle, time::sleep};
use tracing::{debug, trace, warn};

use super::{BUBBLE_PRIORITY, Channel, ListenerId};
use crate::{
    Result, lock,
    event::Event,
    node::{EventType, Node, NodeError, WeakNode},
    path::PathArg,
    value::Value,
};

/// How [`Node::write`] buffers its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    /// Apply only the last write, `delay` after the most recent call
    Debounce,
    /// Apply the first write immediately, then the last one at the end of the window
    Throttle,
}

/// Outcome of [`Node::write`].
#[derive(Debug, Clone, PartialEq)]
pub enum Written {
    /// Applied synchronously; holds what `set` returned
    Applied(Option<Value>),
    /// Queued by the input buffer
    Buffered,
}

#[derive(Default)]
pub(crate) struct Buffers {
    output: Mutex<Option<OutputBuffer>>,
    bubble: Mutex<Option<BubbleBuffer>>,
    input: Mutex<Option<InputBuffer>>,
}

struct OutputBuffer {
    delay: Arc<Mutex<Duration>>,
    listener: ListenerId,
    pending: Arc<Mutex<Pending>>,
}

#[derive(Default)]
struct Pending {
    events: Vec<Event>,
    timer: Option<JoinHandle<()>>,
}

struct BubbleBuffer {
    delay: Duration,
    handle: Handle,
    pending: Arc<Mutex<HashMap<String, PendingBubble>>>,
}

struct PendingBubble {
    event: Event,
    timer: JoinHandle<()>,
}

impl PendingBubble {
    /// Folds a later bubble of the same key in. Tags the two events disagree on are cleared,
    /// so a local change coalesced with a remote one is still transmitted.
    fn fold(&mut self, later: &Event) {
        if self.event.rx != later.rx {
            self.event.rx = None;
        }
        if self.event.src != later.src {
            self.event.src = None;
        }
    }
}

struct InputBuffer {
    mode: InputMode,
    delay: Duration,
    handle: Handle,
    state: Arc<Mutex<InputState>>,
}

#[derive(Default)]
struct InputState {
    pending: Option<(PathArg, Value)>,
    timer: Option<JoinHandle<()>>,
}

fn runtime() -> Result<Handle> {
    Handle::try_current().map_err(|_| {
        NodeError::InvalidArgument {
            reason: "buffering requires a running tokio runtime".to_string(),
        }
        .into()
    })
}

fn delay_of(ms: u64) -> Result<Duration> {
    if ms == 0 {
        return Err(NodeError::InvalidArgument {
            reason: "buffer delay must be greater than zero".to_string(),
        }
        .into());
    }
    Ok(Duration::from_millis(ms))
}

/// Unique keys of the events, in order of first appearance.
fn unique_keys(events: &[Event]) -> Vec<String> {
    let mut seen = HashSet::new();
    events
        .iter()
        .map(|event| event.key.to_string())
        .filter(|key| seen.insert(key.clone()))
        .collect()
}

impl BubbleBuffer {
    fn cancel(&self) {
        for (_, queued) in lock(&self.pending).drain() {
            queued.timer.abort();
        }
    }
}

impl Buffers {
    /// Stops every timer. Pending output and input is discarded.
    pub(crate) fn cancel_all(&self) {
        if let Some(output) = lock(&self.output).take() {
            if let Some(timer) = lock(&output.pending).timer.take() {
                timer.abort();
            }
        }
        if let Some(bubble) = lock(&self.bubble).take() {
            bubble.cancel();
        }
        if let Some(input) = lock(&self.input).take() {
            if let Some(timer) = lock(&input.state).timer.take() {
                timer.abort();
            }
        }
    }
}

impl Node {
    /// Starts buffering emitted events. After `delay_ms` from the first event of a window,
    /// buffer listeners ([`Node::on_buffer`]) receive the unique keys and all events.
    ///
    /// Calling this again only changes the delay.
    pub fn buffer_events(&self, delay_ms: u64) -> Result<()> {
        let delay = delay_of(delay_ms)?;
        let mut output = lock(&self.inner.buffers.output);
        if let Some(existing) = output.as_ref() {
            debug!(node = %self.id(), ?delay, "Changing output buffer delay");
            *lock(&existing.delay) = delay;
            return Ok(());
        }

        let handle = runtime()?;
        let delay = Arc::new(Mutex::new(delay));
        let pending = Arc::new(Mutex::new(Pending::default()));
        let weak = self.downgrade();
        let listener = {
            let delay = delay.clone();
            let pending = pending.clone();
            self.on_system(
                Channel::Event,
                BUBBLE_PRIORITY,
                Arc::new(move |event: &Event| {
                    let mut state = lock(&pending);
                    state.events.push(event.clone());
                    if state.timer.is_none() {
                        let wait = *lock(&delay);
                        let pending = pending.clone();
                        let weak = weak.clone();
                        state.timer = Some(handle.spawn(async move {
                            sleep(wait).await;
                            flush_output(&weak, &pending);
                        }));
                    }
                    Ok(())
                }),
            )
        };
        *output = Some(OutputBuffer {
            delay,
            listener,
            pending,
        });
        Ok(())
    }

    /// The output buffer delay, if events are being buffered.
    pub fn event_buffer_delay(&self) -> Option<Duration> {
        lock(&self.inner.buffers.output)
            .as_ref()
            .map(|output| *lock(&output.delay))
    }

    /// Stops buffering emitted events, discarding anything pending.
    pub fn remove_event_buffer(&self) {
        let Some(output) = lock(&self.inner.buffers.output).take() else {
            return;
        };
        self.off(output.listener);
        if let Some(timer) = lock(&output.pending).timer.take() {
            timer.abort();
        }
    }

    /// Starts coalescing bubbled changes: the first nested change of a key is emitted
    /// `delay_ms` later as a single local `change`, later ones within the window are folded in.
    pub fn buffer_bubbles(&self, delay_ms: u64) -> Result<()> {
        let delay = delay_of(delay_ms)?;
        let handle = runtime()?;
        let mut bubble = lock(&self.inner.buffers.bubble);
        match bubble.as_mut() {
            Some(existing) => existing.delay = delay,
            None => {
                *bubble = Some(BubbleBuffer {
                    delay,
                    handle,
                    pending: Arc::default(),
                })
            }
        }
        if self.options().event_type == EventType::Nested {
            debug!(node = %self.id(), "Buffering bubbles has no effect until the event type is local");
        }
        Ok(())
    }

    /// Whether bubbled changes are being coalesced.
    pub fn is_buffering_bubbles(&self) -> bool {
        lock(&self.inner.buffers.bubble).is_some()
    }

    /// Stops coalescing bubbled changes. Pending emissions are cancelled.
    pub fn remove_bubble_buffer(&self) {
        if let Some(bubble) = lock(&self.inner.buffers.bubble).take() {
            bubble.cancel();
        }
    }

    /// Changes how nested changes are reported. Switching to local with a `bubble_delay_ms`
    /// also starts buffering bubbles if that is not already the case.
    pub fn set_event_type(&self, event_type: EventType, bubble_delay_ms: Option<u64>) -> Result<()> {
        self.update_options(|options| options.event_type = event_type);
        if event_type == EventType::Local && !self.is_buffering_bubbles() {
            if let Some(delay) = bubble_delay_ms {
                self.buffer_bubbles(delay)?;
            }
        }
        Ok(())
    }

    /// Schedules a collapsed bubbled event. Returns false if bubbles are not buffered.
    pub(crate) fn schedule_bubble(&self, event: Event) -> bool {
        let guard = lock(&self.inner.buffers.bubble);
        let Some(bubble) = guard.as_ref() else {
            return false;
        };
        let key = event.key.to_string();
        let mut pending = lock(&bubble.pending);
        if let Some(queued) = pending.get_mut(&key) {
            trace!(node = %self.id(), %key, "Bubble already pending");
            queued.fold(&event);
            return true;
        }
        let weak = self.downgrade();
        let delay = bubble.delay;
        let shared = bubble.pending.clone();
        let slot = key.clone();
        let timer = bubble.handle.spawn(async move {
            sleep(delay).await;
            let queued = lock(&shared).remove(&slot);
            if let (Some(queued), Some(node)) = (queued, weak.upgrade()) {
                node.flush_bubble(queued.event);
            }
        });
        pending.insert(key, PendingBubble { event, timer });
        true
    }

    /// Debounces or throttles [`Node::write`]. Replaces any previous input buffer.
    pub fn buffer_input(&self, delay_ms: u64, mode: InputMode) -> Result<()> {
        let delay = delay_of(delay_ms)?;
        let handle = runtime()?;
        let previous = lock(&self.inner.buffers.input).replace(InputBuffer {
            mode,
            delay,
            handle,
            state: Arc::default(),
        });
        if let Some(previous) = previous {
            if let Some(timer) = lock(&previous.state).timer.take() {
                timer.abort();
            }
        }
        Ok(())
    }

    /// Whether writes are being debounced or throttled.
    pub fn input_mode(&self) -> Option<InputMode> {
        lock(&self.inner.buffers.input)
            .as_ref()
            .map(|input| input.mode)
    }

    /// Stops buffering writes. A pending buffered write is dropped.
    pub fn remove_input_buffer(&self) {
        if let Some(input) = lock(&self.inner.buffers.input).take() {
            if let Some(timer) = lock(&input.state).timer.take() {
                timer.abort();
            }
        }
    }

    /// Sets a value through the input buffer, or directly if there is none.
    pub fn write(&self, key: impl Into<PathArg>, value: impl Into<Value>) -> Result<Written> {
        let (key, value) = (key.into(), value.into());
        let buffered = {
            let input = lock(&self.inner.buffers.input);
            input
                .as_ref()
                .map(|input| (input.mode, input.delay, input.handle.clone(), input.state.clone()))
        };
        let Some((mode, delay, handle, state)) = buffered else {
            return self.set(key, value).map(Written::Applied);
        };

        let weak = self.downgrade();
        let mut input = lock(&state);
        match mode {
            InputMode::Debounce => {
                input.pending = Some((key, value));
                if let Some(timer) = input.timer.take() {
                    timer.abort();
                }
                let state = state.clone();
                input.timer = Some(handle.spawn(async move {
                    sleep(delay).await;
                    let pending = {
                        let mut input = lock(&state);
                        input.timer = None;
                        input.pending.take()
                    };
                    apply_buffered(&weak, pending);
                }));
                Ok(Written::Buffered)
            }
            InputMode::Throttle => {
                if input.timer.is_some() {
                    input.pending = Some((key, value));
                    return Ok(Written::Buffered);
                }
                let window = state.clone();
                input.timer = Some(handle.spawn(async move {
                    sleep(delay).await;
                    let pending = {
                        let mut input = lock(&window);
                        input.timer = None;
                        input.pending.take()
                    };
                    apply_buffered(&weak, pending);
                }));
                drop(input);
                self.set(key, value).map(Written::Applied)
            }
        }
    }
}

fn flush_output(weak: &WeakNode, pending: &Mutex<Pending>) {
    let events = {
        let mut state = lock(pending);
        state.timer = None;
        mem::take(&mut state.events)
    };
    let Some(node) = weak.upgrade() else {
        return;
    };
    if events.is_empty() {
        return;
    }
    let keys = unique_keys(&events);
    node.inner.bus.fire_buffer(&keys, &events);
}

fn apply_buffered(weak: &WeakNode, pending: Option<(PathArg, Value)>) {
    let (Some(node), Some((key, value))) = (weak.upgrade(), pending) else {
        return;
    };
    if let Err(err) = node.set(key, value) {
        warn!(node = %node.id(), error = %err, "Buffered write failed");
    }
}

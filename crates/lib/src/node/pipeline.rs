//! The mutation pipeline: prepare, validate, commit, emit.
//!
//! Every mutation resolves its owning node first and is then handled there entirely; a
//! delegated call emits nothing on the delegating node except what bubbles up from the owner.
//! Validation happens before the store is touched, so a failing call leaves no partial state.
//! Emission is deferred until the outermost call of the current turn returns.

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn};

use super::{EventType, Interception, Node, NodeError, Proposal, Stage};
use crate::{
    Result,
    bus::{Channel, LengthSignal, turn},
    lock,
    event::{Event, EventKind, LocalEvent, Source},
    meta::{apply_transition, apply_value},
    path::{KeyPath, PathArg},
    value::Value,
};

/// Per-call options for [`Node::set_with`] and [`Node::delete_with`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetOptions {
    /// Splice into an array instead of overwriting the index
    pub insert: bool,
    /// Apply without emitting (and without bumping the version)
    pub no_emit: bool,
    /// Recorded on the emitted event
    pub src: Option<Source>,
    /// Receive channel the change arrived through, recorded on the emitted event
    pub rx: Option<String>,
}

/// How a [`Node::set_and_wait`] call ended.
#[derive(Debug, Clone)]
pub enum Settled {
    /// The change was emitted
    Emitted(Event),
    /// An interceptor cancelled the change
    Prevented(Event),
    /// Nothing changed, so nothing was emitted
    Unchanged,
}

/// Which safeguards a commit runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Checks {
    pub(crate) intercept: bool,
    pub(crate) meta: bool,
}

impl Checks {
    pub(crate) const FULL: Checks = Checks {
        intercept: true,
        meta: true,
    };
    /// Prepare already ran on the node that delegated
    pub(crate) const DELEGATED: Checks = Checks {
        intercept: false,
        meta: true,
    };
    /// Inversions and reverts
    pub(crate) const RAW: Checks = Checks {
        intercept: false,
        meta: false,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    /// The change happened on this node
    Local,
    /// The change happened in a child and bubbled up
    Bubbled,
}

impl Node {
    /// Sets a value, returning the previous one.
    ///
    /// Plain lists and maps are promoted to child nodes unless `smartify_children` is off.
    /// Setting a key to an equal value is a no-op that emits nothing.
    pub fn set(&self, key: impl Into<PathArg>, value: impl Into<Value>) -> Result<Option<Value>> {
        self.set_with(key, value, SetOptions::default())
    }

    pub fn set_with(
        &self,
        key: impl Into<PathArg>,
        value: impl Into<Value>,
        options: SetOptions,
    ) -> Result<Option<Value>> {
        self.mutate(key.into(), Some(value.into()), options)
    }

    /// Sets a value and returns what was actually stored, ie. after cleaning.
    pub fn set_and_get(
        &self,
        key: impl Into<PathArg>,
        value: impl Into<Value>,
    ) -> Result<Option<Value>> {
        let key = key.into();
        self.set(key.clone(), value)?;
        self.try_get(key)
    }

    /// Sets a value and waits for the outcome on the node owning the key: the emitted event,
    /// or the `intercept` event if an interceptor cancelled it. Rejections fail as with `set`.
    ///
    /// Must not be awaited while a mutation of the same thread is still in progress, ie. from
    /// inside a listener or interceptor.
    pub async fn set_and_wait(&self, key: impl Into<PathArg>, value: impl Into<Value>) -> Result<Settled> {
        let mut path = self.parse_path(key.into())?;
        let owner = self.resolve_owner(&mut path)?;
        let slot = path.first().cloned();
        let (sender, mut receiver) = oneshot::channel();
        let sender = Arc::new(Mutex::new(Some(sender)));
        let watch = |prevented: bool| {
            let sender = sender.clone();
            let slot = slot.clone();
            move |event: &Event| {
                if event.key.first() != slot.as_ref() {
                    return Ok(());
                }
                if let Some(sender) = lock(&sender).take() {
                    let settled = if prevented {
                        Settled::Prevented(event.clone())
                    } else {
                        Settled::Emitted(event.clone())
                    };
                    // the caller may have stopped waiting
                    let _ = sender.send(settled);
                }
                Ok(())
            }
        };
        let on_event = owner.on(Channel::Event, watch(false));
        let on_intercept = owner.on(Channel::Intercept, watch(true));
        let version = owner.version();

        let settled = match owner.set(path, value) {
            Err(err) => Err(err),
            Ok(_) => match receiver.try_recv() {
                Ok(settled) => Ok(settled),
                Err(_) if owner.version() == version => Ok(Settled::Unchanged),
                Err(_) => (&mut receiver)
                    .await
                    .map_err(|_| NodeError::bug("stopped listening before the change settled").into()),
            },
        };
        owner.off(on_event);
        owner.off(on_intercept);
        settled
    }

    /// Deletes a key, returning the removed value.
    ///
    /// Keys with `required`, `constant` or `constantType` meta are reset to null (if nullable)
    /// or their default instead, and fail with `EILLEGAL` if they have neither.
    pub fn delete(&self, key: impl Into<PathArg>) -> Result<Option<Value>> {
        self.delete_with(key, SetOptions::default())
    }

    pub fn delete_with(&self, key: impl Into<PathArg>, options: SetOptions) -> Result<Option<Value>> {
        self.mutate(key.into(), None, options)
    }

    fn mutate(&self, key: PathArg, value: Option<Value>, options: SetOptions) -> Result<Option<Value>> {
        let _turn = turn::enter();
        let mut path = self.parse_path(key)?;
        let owner = self.resolve_owner(&mut path)?;
        owner.mutate_here(path, value, options, Checks::FULL)
    }

    /// Runs the pipeline on this node for a path it owns.
    pub(crate) fn mutate_here(
        &self,
        path: KeyPath,
        value: Option<Value>,
        options: SetOptions,
        checks: Checks,
    ) -> Result<Option<Value>> {
        let (mut path, mut value, mut options) = (path, value, options);
        let prepare = if checks.intercept {
            self.interceptors().prepare
        } else {
            None
        };
        if let Some(prepare) = prepare {
            let proposal = Proposal {
                key: path.clone(),
                value: value.clone(),
                options: options.clone(),
            };
            match prepare(self, proposal) {
                Ok(proposal) => {
                    path = proposal.key;
                    value = proposal.value;
                    options = proposal.options;
                    if path.is_empty() {
                        return Err(NodeError::InvalidKey {
                            key: String::new(),
                            reason: "prepare interceptor returned an empty key".to_string(),
                        }
                        .into());
                    }
                    let owner = self.resolve_owner(&mut path)?;
                    if !owner.ptr_eq(self) {
                        return owner.mutate_here(path, value, options, Checks::DELEGATED);
                    }
                }
                Err(interception) => {
                    let current = self.get_path(&path);
                    let evt = match (&value, &current) {
                        (None, _) => EventKind::Delete,
                        (Some(_), Some(_)) if !options.insert => EventKind::Change,
                        _ => EventKind::New,
                    };
                    let event = Event::new(path, evt)
                        .with_old(current.clone())
                        .with_value(value);
                    return self.stop(Stage::Prepare, event, interception).map(|()| current);
                }
            }
        }
        match value {
            Some(value) => self.commit_set(path, value, options, checks),
            None => self.commit_delete(path, options, checks),
        }
    }

    pub(crate) fn commit_set(
        &self,
        path: KeyPath,
        value: Value,
        options: SetOptions,
        checks: Checks,
    ) -> Result<Option<Value>> {
        let Some(local) = path.first().cloned() else {
            return Err(NodeError::bug("commit without a key").into());
        };
        let is_array = self.is_array();
        let (old_local, rule, smartify, len) = {
            let state = self.state();
            (
                state.store.get(&local).cloned(),
                state.meta.rule(&local).cloned(),
                state.options.smartify_children,
                state.store.len(),
            )
        };
        let rule = rule.filter(|_| checks.meta);
        let insert = options.insert && is_array && !path.is_nested();

        if is_array {
            let index = local.as_index().unwrap_or(usize::MAX);
            if index > len {
                return Err(NodeError::OutOfRange {
                    index: i64::try_from(index).unwrap_or(i64::MAX),
                    len,
                }
                .into());
            }
        }

        // Build the event and the new value of the local slot
        let (mut event, returned, mut new_local) = if path.is_nested() {
            let rest = &path[1..];
            let mut container = match &old_local {
                None | Some(Value::Null) => Value::container_for(&rest[0]),
                Some(plain) if plain.is_plain_container() => plain.clone(),
                Some(other) => {
                    return Err(NodeError::PathMismatch {
                        path: path.to_string(),
                        at: other.type_name().to_string(),
                    }
                    .into());
                }
            };
            let old_nested = container.get_path(rest);
            if !options.insert && old_nested.as_ref() == Some(&value) {
                trace!(node = %self.id(), key = %path, "Value unchanged");
                return Ok(old_nested);
            }
            container.set_path(rest, value.clone(), options.insert)?;
            let evt = if old_nested.is_none() || options.insert {
                EventKind::New
            } else {
                EventKind::Change
            };
            let mut event = Event::new(path.clone(), evt)
                .with_old(old_nested.clone())
                .with_value(Some(value));
            event.local = Some(LocalEvent {
                key: local.clone(),
                evt: if old_local.is_none() {
                    EventKind::New
                } else {
                    EventKind::Change
                },
                old: old_local.clone(),
            });
            (event, old_nested, container)
        } else {
            let evt = if old_local.is_none() || insert {
                EventKind::New
            } else {
                EventKind::Change
            };
            let event = Event::new(path.clone(), evt).with_old(old_local.clone());
            (event, old_local.clone(), value)
        };

        // Validate
        let local_evt = event.local.as_ref().map_or(event.evt, |l| l.evt);
        if let Some(rule) = &rule {
            // meta applies to the local slot as a whole, which is not replaced by a nested change
            if !(path.is_nested() && local_evt == EventKind::Change) {
                new_local = apply_value(rule, &local, new_local)?;
            }
        }
        if !path.is_nested() {
            if event.evt == EventKind::Change && old_local.as_ref() == Some(&new_local) {
                trace!(node = %self.id(), key = %path, "Value unchanged");
                return Ok(old_local);
            }
            event.value = Some(new_local.clone());
        }
        if let Some(rule) = &rule {
            if local_evt == EventKind::Change {
                let old = old_local.clone().unwrap_or_default();
                apply_transition(rule, &local, &old, &new_local)?;
            }
        }

        // Promote or adopt
        let stored = match new_local {
            Value::Node(child) => {
                self.check_adoptable(&child)?;
                Value::Node(child)
            }
            plain if smartify && plain.is_plain_container() => {
                Value::Node(self.create_child(&local, plain)?)
            }
            other => other,
        };
        if path.is_nested() && stored.is_node() {
            // the whole slot is new, report it as such
            event = Event::new(KeyPath::single(local.clone()), local_evt).with_old(old_local);
        }
        event.src = options.src;
        event.rx = options.rx.clone();

        if !self.commit_gate(&mut event, checks)? {
            return Ok(returned);
        }

        // Commit
        let replaced = {
            let mut state = self.state();
            let replaced = if insert {
                None
            } else {
                state.store.get(&local).cloned()
            };
            state.store.put(&local, stored.clone(), insert);
            replaced
        };
        let same_child = match (&replaced, &stored) {
            (Some(Value::Node(a)), Value::Node(b)) => a.ptr_eq(b),
            _ => false,
        };
        if !same_child {
            if let Some(Value::Node(old_child)) = &replaced {
                self.release_child(old_child);
            }
            if let Value::Node(child) = &stored {
                self.adopt_child(&local, child);
            }
        }
        trace!(node = %self.id(), key = %path, evt = %event.evt, "Committed");

        self.emit_step(event, &options, Origin::Local)?;
        Ok(returned)
    }

    pub(crate) fn commit_delete(
        &self,
        path: KeyPath,
        options: SetOptions,
        checks: Checks,
    ) -> Result<Option<Value>> {
        let Some(local) = path.first().cloned() else {
            return Err(NodeError::bug("commit without a key").into());
        };
        let (old_local, rule) = {
            let state = self.state();
            (
                state.store.get(&local).cloned(),
                state.meta.rule(&local).cloned(),
            )
        };
        let rule = rule.filter(|_| checks.meta);
        let Some(old_local) = old_local else {
            return Ok(None);
        };

        if path.is_nested() {
            if !old_local.is_plain_container() {
                return Ok(None);
            }
            let mut container = old_local.clone();
            let Some(removed) = container.delete_path(&path[1..]) else {
                return Ok(None);
            };
            if let Some(rule) = &rule {
                apply_transition(rule, &local, &old_local, &container)?;
            }
            let mut event = Event::new(path.clone(), EventKind::Delete).with_old(Some(removed.clone()));
            event.local = Some(LocalEvent {
                key: local.clone(),
                evt: EventKind::Change,
                old: Some(old_local),
            });
            event.src = options.src;
            event.rx = options.rx.clone();
            if !self.commit_gate(&mut event, checks)? {
                return Ok(Some(removed));
            }
            self.state().store.put(&local, container, false);
            self.emit_step(event, &options, Origin::Local)?;
            return Ok(Some(removed));
        }

        if let Some(rule) = rule.filter(|rule| rule.protects_delete()) {
            let replacement = if rule.nullable {
                Value::Null
            } else if let Some(default) = rule.default.clone() {
                default
            } else {
                return Err(NodeError::Illegal {
                    key: local.to_key(),
                    reason: "meta prevents the key from being deleted".to_string(),
                }
                .into());
            };
            debug!(node = %self.id(), key = %local, "Resetting protected key instead of deleting");
            let options = SetOptions {
                insert: false,
                src: options.src.or(Some(Source::Delete)),
                ..options
            };
            return self.commit_set(path, replacement, options, checks);
        }

        let mut event = Event::new(path.clone(), EventKind::Delete).with_old(Some(old_local.clone()));
        event.src = options.src;
        event.rx = options.rx.clone();
        if !self.commit_gate(&mut event, checks)? {
            return Ok(Some(old_local));
        }
        let removed = self.state().store.remove(&local);
        if let Some(Value::Node(child)) = &removed {
            self.release_child(child);
        }
        trace!(node = %self.id(), key = %local, "Deleted");
        self.emit_step(event, &options, Origin::Local)?;
        Ok(removed)
    }

    /// Runs the commit interceptor. `Ok(false)` means the mutation was cancelled.
    pub(crate) fn commit_gate(&self, event: &mut Event, checks: Checks) -> Result<bool> {
        if !checks.intercept {
            return Ok(true);
        }
        let Some(commit) = self.interceptors().commit else {
            return Ok(true);
        };
        match commit(self, event) {
            Ok(()) => Ok(true),
            Err(interception) => self
                .stop(Stage::Commit, event.clone(), interception)
                .map(|()| false),
        }
    }

    /// Handles an interception: a cancel raises an `intercept` event, a rejection fails.
    fn stop(&self, stage: Stage, event: Event, interception: Interception) -> Result<()> {
        match interception {
            Interception::Cancel => {
                debug!(node = %self.id(), %stage, %event, "Prevented mutation");
                self.raise_intercept(event);
                Ok(())
            }
            Interception::Reject(err) => Err(NodeError::Intercepted {
                stage,
                key: event.key.to_string(),
                evt: event.evt,
                reason: err.to_string(),
            }
            .into()),
        }
    }

    /// Reshapes, intercepts, counts and dispatches an event.
    pub(crate) fn emit_step(&self, mut event: Event, options: &SetOptions, origin: Origin) -> Result<()> {
        if options.no_emit {
            return Ok(());
        }
        let event_type = self.state().options.event_type;
        if let Some(local) = event.local.take() {
            if event_type == EventType::Local {
                event = Event {
                    key: KeyPath::single(local.key),
                    evt: local.evt,
                    old: local.old,
                    value: None,
                    from: None,
                    to: None,
                    src: event.src,
                    local: None,
                    rx: event.rx,
                };
                if origin == Origin::Bubbled && self.schedule_bubble(event.clone()) {
                    return Ok(());
                }
            }
        }
        match event.evt {
            EventKind::New | EventKind::Change => event.value = self.get_path(&event.key),
            EventKind::Delete => event.value = None,
            EventKind::Move | EventKind::None => {}
        }

        if let Some(emit) = self.interceptors().emit {
            if let Err(interception) = emit(self, &mut event) {
                if origin == Origin::Local {
                    if let Err(err) = self.invert(&event) {
                        error!(node = %self.id(), %event, error = %err, "Failed to revert intercepted change");
                    }
                    debug!(node = %self.id(), %event, "Reverted intercepted change");
                }
                if matches!(interception, Interception::Reject(_)) {
                    self.raise_intercept(event.clone());
                }
                return self.stop(Stage::Emit, event, interception);
            }
        }

        self.state().version += 1;
        self.dispatch(event);
        Ok(())
    }

    /// Emits a coalesced bubble once its buffer window ends.
    pub(crate) fn flush_bubble(&self, event: Event) {
        let _turn = turn::enter();
        // deleted in the meantime, which has been emitted already
        if self.get_path(&event.key).is_none() {
            return;
        }
        if let Err(err) = self.emit_step(event, &SetOptions::default(), Origin::Bubbled) {
            warn!(node = %self.id(), error = %err, "Failed to emit buffered bubble");
        }
    }

    fn dispatch(&self, event: Event) {
        let bus = &self.inner.bus;
        let mut channels = vec![
            Channel::Event,
            Channel::Kind(event.evt),
            Channel::key(&event.key),
        ];
        if let Some(signal) = self.length_signal(&event) {
            channels.push(Channel::Length(signal));
        }
        let batches: Vec<_> = channels
            .into_iter()
            .map(|channel| {
                let targets = bus.snapshot(&channel);
                (channel, targets)
            })
            .filter(|(_, targets)| !targets.is_empty())
            .collect();
        trace!(node = %self.id(), %event, channels = batches.len(), "Emitting");
        if batches.is_empty() {
            return;
        }
        let node = self.clone();
        turn::defer(move || {
            for (channel, targets) in &batches {
                node.inner.bus.fire(channel, targets, &event);
            }
        });
    }

    fn length_signal(&self, event: &Event) -> Option<LengthSignal> {
        if !self.is_array() || event.is_nested() {
            return None;
        }
        match (event.evt, self.len()) {
            (EventKind::Delete, 0) => Some(LengthSignal::Empty),
            (EventKind::New | EventKind::Delete, 1) => Some(LengthSignal::Single),
            (EventKind::New, 2) => Some(LengthSignal::Multiple),
            _ => None,
        }
    }

    pub(crate) fn raise_intercept(&self, event: Event) {
        let targets = self.inner.bus.snapshot(&Channel::Intercept);
        if targets.is_empty() {
            return;
        }
        let node = self.clone();
        turn::defer(move || node.inner.bus.fire(&Channel::Intercept, &targets, &event));
    }

    /// Undoes a committed local change without emitting.
    fn invert(&self, event: &Event) -> Result<()> {
        let quiet = SetOptions {
            no_emit: true,
            src: Some(Source::Revert),
            ..Default::default()
        };
        let key = event.key.clone();
        match event.evt {
            EventKind::New => self.mutate_here(key, None, quiet, Checks::RAW).map(drop),
            EventKind::Delete => {
                let old = event.old.clone().unwrap_or_default();
                let quiet = SetOptions {
                    insert: true,
                    ..quiet
                };
                self.mutate_here(key, Some(old), quiet, Checks::RAW).map(drop)
            }
            EventKind::Change => match event.old.clone() {
                Some(old) => self.mutate_here(key, Some(old), quiet, Checks::RAW).map(drop),
                None => self.mutate_here(key, None, quiet, Checks::RAW).map(drop),
            },
            EventKind::Move => match (event.from, event.to) {
                (Some(from), Some(to)) => self.move_raw(to, from),
                _ => Err(NodeError::bug("move event without positions").into()),
            },
            EventKind::None => Ok(()),
        }
    }
}

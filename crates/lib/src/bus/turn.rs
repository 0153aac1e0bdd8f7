//! Deferred dispatch within a synchronous turn.
//!
//! Every public mutating entry point enters a [`Turn`]. Listener invocations queued while a
//! turn is active run only after the outermost turn on this thread ends, so observers never
//! see a partially applied structure. Jobs queued while the queue is draining (eg. a listener
//! that mutates another node) are appended and run in order by the same drain loop.
//!
//! Each job carries the listener mark of the turn that queued it. Turns entered while a job
//! runs keep that mark, so events bubbled or cascaded from a call skip the listeners added
//! during that call.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    marker::PhantomData,
};

use tracing::trace;

type Job = (u64, Box<dyn FnOnce()>);

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
    static DRAINING: Cell<bool> = const { Cell::new(false) };
    static MARK: Cell<u64> = const { Cell::new(0) };
    static QUEUE: RefCell<VecDeque<Job>> = RefCell::new(VecDeque::new());
}

/// Guard for one (possibly nested) synchronous turn.
#[must_use]
pub(crate) struct Turn {
    // turns are tied to the thread that entered them
    _local: PhantomData<*const ()>,
}

/// Enters a turn. The outermost turn outside a drain records the listener mark.
pub(crate) fn enter() -> Turn {
    DEPTH.with(|depth| {
        if depth.get() == 0 && !DRAINING.with(Cell::get) {
            MARK.with(|mark| mark.set(super::listener_mark()));
        }
        depth.set(depth.get() + 1);
    });
    Turn {
        _local: PhantomData,
    }
}

/// Listeners registered at or after this mark were added during the current turn.
pub(crate) fn mark() -> u64 {
    if DEPTH.with(Cell::get) == 0 && !DRAINING.with(Cell::get) {
        super::listener_mark()
    } else {
        MARK.with(Cell::get)
    }
}

/// Queues a job to run once the outermost turn ends.
pub(crate) fn defer(job: impl FnOnce() + 'static) {
    let _turn = enter();
    let mark = MARK.with(Cell::get);
    QUEUE.with(|queue| queue.borrow_mut().push_back((mark, Box::new(job))));
}

impl Drop for Turn {
    fn drop(&mut self) {
        let outermost = DEPTH.with(|depth| {
            depth.set(depth.get().saturating_sub(1));
            depth.get() == 0
        });
        if outermost && !DRAINING.with(Cell::get) {
            drain();
        }
    }
}

struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        DRAINING.with(|draining| draining.set(false));
    }
}

fn drain() {
    DRAINING.with(|draining| draining.set(true));
    let _reset = DrainGuard;
    let mut ran = 0usize;
    loop {
        let Some((mark, job)) = QUEUE.with(|queue| queue.borrow_mut().pop_front()) else {
            break;
        };
        MARK.with(|current| current.set(mark));
        job();
        ran += 1;
    }
    if ran > 0 {
        trace!(jobs = ran, "Drained deferred dispatch queue");
    }
}

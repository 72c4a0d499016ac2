// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-thread suppression scopes.
//!
//! Internal operations such as reload and deep copy need to bypass
//! read-only checks or keep intermediate change events from reaching
//! listeners. Both are nesting counters in thread-local storage, so other
//! threads keep observing normal behavior. Guards are `!Send` and restore
//! the counter when dropped, including on early return.

use core::cell::Cell;
use core::marker::PhantomData;
use std::thread::LocalKey;

thread_local! {
    static READ_ONLY_SUSPEND: Cell<usize> = const { Cell::new(0) };
    static EVENT_SUPPRESSION: Cell<usize> = const { Cell::new(0) };
}

fn enter(counter: &'static LocalKey<Cell<usize>>) {
    counter.with(|c| c.set(c.get() + 1));
}

fn leave(counter: &'static LocalKey<Cell<usize>>) {
    counter.with(|c| c.set(c.get().saturating_sub(1)));
}

fn active(counter: &'static LocalKey<Cell<usize>>) -> bool {
    counter.with(|c| c.get() > 0)
}

/// While alive, read-only checks on this thread are skipped.
#[derive(Debug)]
#[must_use = "the scope ends when the guard is dropped"]
pub(crate) struct ReadOnlySuspendScope {
    _not_send: PhantomData<*const ()>,
}

impl ReadOnlySuspendScope {
    pub(crate) fn enter() -> Self {
        enter(&READ_ONLY_SUSPEND);
        Self {
            _not_send: PhantomData,
        }
    }

    pub(crate) fn is_active() -> bool {
        active(&READ_ONLY_SUSPEND)
    }
}

impl Drop for ReadOnlySuspendScope {
    fn drop(&mut self) {
        leave(&READ_ONLY_SUSPEND);
    }
}

/// While alive, change listeners are not invoked for events raised on this thread.
#[derive(Debug)]
#[must_use = "the scope ends when the guard is dropped"]
pub(crate) struct EventSuppressionScope {
    _not_send: PhantomData<*const ()>,
}

impl EventSuppressionScope {
    pub(crate) fn enter() -> Self {
        enter(&EVENT_SUPPRESSION);
        Self {
            _not_send: PhantomData,
        }
    }

    pub(crate) fn is_active() -> bool {
        active(&EVENT_SUPPRESSION)
    }
}

impl Drop for EventSuppressionScope {
    fn drop(&mut self) {
        leave(&EVENT_SUPPRESSION);
    }
}

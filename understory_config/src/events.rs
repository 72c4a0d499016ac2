// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Change notification.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::BoxError;
use crate::node::ConfigValue;
use crate::scope::EventSuppressionScope;

/// Identifies a listener registered on a configuration node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// What a change listener returns. Failures are collected, not propagated
/// immediately, so later listeners still run.
pub type ListenerResult = Result<(), BoxError>;

/// A property (or a collection's `Count`/`Item[]` pseudo-property) changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyChanged {
    property: String,
}

impl PropertyChanged {
    pub(crate) fn new(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
        }
    }

    /// Name of the changed property.
    #[must_use]
    pub fn property(&self) -> &str {
        &self.property
    }
}

/// A structural change to a collection or dictionary.
///
/// Bulk operations report one event per kind of change: a reload that drops
/// two entries and adds three raises a single [`CollectionChange::Removed`]
/// and a single [`CollectionChange::Added`].
#[derive(Clone, Debug)]
pub enum CollectionChange<K> {
    /// Entries were added.
    Added(Vec<(K, Option<ConfigValue>)>),
    /// Entries were removed. Keys are the keys the entries had when removed.
    Removed(Vec<(K, Option<ConfigValue>)>),
    /// The entry at `key` was replaced.
    Replaced {
        /// Key of the replaced entry.
        key: K,
        /// Previous value.
        old: Option<ConfigValue>,
        /// New value.
        new: Option<ConfigValue>,
    },
    /// Entries changed key, as `(from, to)` pairs, when a collection re-indexed.
    Moved(Vec<(K, K)>),
}

type Listener<E> = Arc<dyn Fn(&E) -> ListenerResult + Send + Sync>;

/// Listener list with snapshot dispatch.
pub(crate) struct Listeners<E> {
    next: AtomicU64,
    entries: Mutex<Vec<(SubscriptionId, Listener<E>)>>,
}

impl<E> Listeners<E> {
    pub(crate) fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(
        &self,
        listener: impl Fn(&E) -> ListenerResult + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next.fetch_add(1, Ordering::Relaxed));
        let listener: Listener<E> = Arc::new(listener);
        self.entries.lock().push((id, listener));
        id
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(i, _)| *i != id);
        entries.len() != before
    }

    /// Invokes every listener with `event`, appending failures to `failures`.
    ///
    /// Listeners run outside the list lock, so they may subscribe or
    /// unsubscribe. Nothing runs while an [`EventSuppressionScope`] is active.
    pub(crate) fn dispatch(&self, event: &E, failures: &mut Vec<BoxError>) {
        if EventSuppressionScope::is_active() {
            return;
        }
        let snapshot: Vec<Listener<E>> = self
            .entries
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in snapshot {
            if let Err(err) = listener(event) {
                failures.push(err);
            }
        }
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl<E> core::fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &self.entries.lock().len())
            .finish_non_exhaustive()
    }
}

// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Configuration sources.
//!
//! A [`ConfigurationSource`] is the flat, `:`-path addressed key-value store a
//! materialized tree reads from and writes to. [`MemorySource`] is an
//! in-process implementation, useful on its own and as a test double.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashSet;
use parking_lot::{Mutex, RwLock};

use crate::error::BoxError;
use crate::path::{KEY_DELIMITER, combine};

/// One-shot callback invoked when a source reloads.
pub type ReloadCallback = Box<dyn FnOnce() + Send + 'static>;

/// Identifies a registered [`ReloadCallback`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ReloadToken(u64);

impl ReloadToken {
    /// Creates a token from a source-specific identifier.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the source-specific identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// A key-value configuration backend addressed by `:`-delimited paths.
pub trait ConfigurationSource: Send + Sync {
    /// Returns the value stored at `path`.
    fn get(&self, path: &str) -> Option<String>;

    /// Stores `value` at `path`, or removes the value when `value` is `None`.
    fn set(&self, path: &str, value: Option<&str>) -> Result<(), BoxError>;

    /// Returns the distinct child section keys directly below `path`.
    ///
    /// The empty path addresses the top level.
    fn child_keys(&self, path: &str) -> Vec<String>;

    /// Registers a callback to run once, on the next reload.
    fn register_reload_callback(&self, callback: ReloadCallback) -> ReloadToken;

    /// Drops a callback that has not run yet.
    ///
    /// Returns `true` if the callback was still registered.
    fn unregister_reload_callback(&self, _token: ReloadToken) -> bool {
        false
    }
}

/// Removes the value at `path` and every value below it.
pub fn clear_section(source: &dyn ConfigurationSource, path: &str) -> Result<(), BoxError> {
    for key in source.child_keys(path) {
        clear_section(source, &combine([path, key.as_str()]))?;
    }
    source.set(path, None)
}

/// An in-memory [`ConfigurationSource`].
///
/// Keys are compared case-sensitively. Reload callbacks run when
/// [`MemorySource::reload`] is called.
///
/// ```rust
/// use understory_config::{ConfigurationSource, MemorySource};
///
/// let source = MemorySource::from_entries([
///     ("Server:Port", "8080"),
///     ("Server:Hosts:0", "a"),
///     ("Server:Hosts:1", "b"),
/// ]);
/// assert_eq!(source.get("Server:Port").as_deref(), Some("8080"));
/// assert_eq!(source.child_keys("Server"), ["Hosts", "Port"]);
/// assert_eq!(source.child_keys("Server:Hosts"), ["0", "1"]);
/// ```
#[derive(Default)]
pub struct MemorySource {
    values: RwLock<BTreeMap<String, String>>,
    callbacks: Mutex<Vec<(ReloadToken, ReloadCallback)>>,
    next_token: AtomicU64,
}

impl MemorySource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a source holding `entries`.
    pub fn from_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let source = Self::new();
        source.replace_all(entries);
        source
    }

    /// Stores `value` at `path`.
    pub fn insert(&self, path: impl Into<String>, value: impl Into<String>) {
        self.values.write().insert(path.into(), value.into());
    }

    /// Removes the value at `path`, returning it.
    pub fn remove(&self, path: &str) -> Option<String> {
        self.values.write().remove(path)
    }

    /// Replaces every stored value with `entries`.
    ///
    /// Does not run reload callbacks; call [`MemorySource::reload`] for that.
    pub fn replace_all<K, V>(&self, entries: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        let values = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        *self.values.write() = values;
    }

    /// Returns a copy of every stored value in key order.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.values.read().clone()
    }

    /// Returns the number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Returns `true` if no values are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Runs and drops every registered reload callback.
    ///
    /// Callbacks run outside the source's locks and may register again.
    pub fn reload(&self) {
        let callbacks = core::mem::take(&mut *self.callbacks.lock());
        log::trace!("memory source reload, {} callback(s)", callbacks.len());
        for (_, callback) in callbacks {
            callback();
        }
    }
}

impl ConfigurationSource for MemorySource {
    fn get(&self, path: &str) -> Option<String> {
        self.values.read().get(path).cloned()
    }

    fn set(&self, path: &str, value: Option<&str>) -> Result<(), BoxError> {
        let mut values = self.values.write();
        match value {
            Some(value) => {
                values.insert(path.to_owned(), value.to_owned());
            }
            None => {
                values.remove(path);
            }
        }
        Ok(())
    }

    fn child_keys(&self, path: &str) -> Vec<String> {
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}{KEY_DELIMITER}")
        };
        let values = self.values.read();
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for key in values.range(prefix.clone()..) {
            let Some(rest) = key.0.strip_prefix(prefix.as_str()) else {
                break;
            };
            let child = rest.split(KEY_DELIMITER).next().unwrap_or(rest);
            if !child.is_empty() && seen.insert(child) {
                keys.push(child.to_owned());
            }
        }
        keys
    }

    fn register_reload_callback(&self, callback: ReloadCallback) -> ReloadToken {
        let token = ReloadToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.callbacks.lock().push((token, callback));
        token
    }

    fn unregister_reload_callback(&self, token: ReloadToken) -> bool {
        let mut callbacks = self.callbacks.lock();
        let before = callbacks.len();
        callbacks.retain(|(t, _)| *t != token);
        callbacks.len() != before
    }
}

impl core::fmt::Debug for MemorySource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemorySource")
            .field("values", &*self.values.read())
            .field("callbacks", &self.callbacks.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn child_keys_are_distinct_and_scoped() {
        let source = MemorySource::from_entries([
            ("A", "root"),
            ("A:x", "1"),
            ("A:x:deep", "2"),
            ("A0", "sibling"),
            ("A:y", "3"),
            ("B:z", "4"),
        ]);
        assert_eq!(source.child_keys("A"), ["x", "y"]);
        assert_eq!(source.child_keys(""), ["A", "A0", "B"]);
        assert!(source.child_keys("A:y").is_empty());
        assert!(source.child_keys("a").is_empty());
    }

    #[test]
    fn set_none_removes() {
        let source = MemorySource::new();
        source.set("A:B", Some("1")).unwrap();
        assert_eq!(source.get("A:B").as_deref(), Some("1"));
        source.set("A:B", None).unwrap();
        assert!(source.is_empty());
    }

    #[test]
    fn clear_section_removes_subtree() {
        let source = MemorySource::from_entries([
            ("A", "v"),
            ("A:0:Name", "n"),
            ("A:0:Tags:k", "t"),
            ("A:1", "x"),
            ("AB", "keep"),
        ]);
        clear_section(&source, "A").unwrap();
        assert_eq!(source.len(), 1);
        assert_eq!(source.get("AB").as_deref(), Some("keep"));
    }

    #[test]
    fn reload_callbacks_fire_once() {
        let source = MemorySource::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        source.register_reload_callback(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        let h = hits.clone();
        let token = source.register_reload_callback(Box::new(move || {
            h.fetch_add(10, Ordering::SeqCst);
        }));
        assert!(source.unregister_reload_callback(token));
        assert!(!source.unregister_reload_callback(token));

        source.reload();
        source.reload();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}

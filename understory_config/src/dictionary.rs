// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! String-keyed dictionaries.

use std::sync::{Arc, Weak};

use crate::error::{ConfigurationError, Result, SchemaError};
use crate::events::{CollectionChange, ListenerResult, PropertyChanged, SubscriptionId};
use crate::keyed::{Element, KeyedNode};
use crate::node::{ConfigValue, ParentNode};
use crate::path::KEY_DELIMITER;
use crate::schema::PropertySchema;
use crate::source::ConfigurationSource;
use crate::value::Scalar;

/// Dictionaries keep insertion order and never re-key.
fn keep_order(_: &mut Vec<Arc<Element<String>>>) -> bool {
    false
}

/// A dictionary of configuration values keyed by section name.
///
/// Each entry is stored under `path:key`. Keys are case-sensitive and must
/// be non-blank without a `:`. Iteration follows insertion order, with
/// entries loaded from the source in the order the source lists them.
///
/// A handle: clones share the same dictionary.
#[derive(Clone)]
pub struct ConfigurationDictionary {
    pub(crate) node: Arc<KeyedNode<String>>,
}

impl ConfigurationDictionary {
    pub(crate) fn attached(
        element: Arc<PropertySchema>,
        read_only: bool,
        parent: Weak<dyn ParentNode>,
        source: Arc<dyn ConfigurationSource>,
    ) -> Self {
        Self {
            node: KeyedNode::new(element, read_only, parent, source),
        }
    }

    fn check_key(key: &str) -> Result<()> {
        if key.trim().is_empty() || key.contains(KEY_DELIMITER) {
            return Err(SchemaError::InvalidPath {
                fragment: key.to_owned(),
            }
            .into());
        }
        Ok(())
    }

    fn element(&self, key: &str) -> Result<Option<Arc<Element<String>>>> {
        self.node.ensure_live()?;
        Ok(self.node.items.read().by_key.get(key).cloned())
    }

    fn not_found(&self, key: &str) -> ConfigurationError {
        ConfigurationError::KeyNotFound {
            path: self.node.path(),
            key: key.to_owned(),
        }
    }

    /// Returns the number of entries.
    pub fn len(&self) -> Result<usize> {
        self.node.count()
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Returns `true` if structural mutation is rejected.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.node.is_read_only()
    }

    /// Returns the configuration path of the dictionary.
    #[must_use]
    pub fn path(&self) -> String {
        self.node.path()
    }

    /// Returns the schema shared by every entry.
    #[must_use]
    pub fn element_schema(&self) -> &Arc<PropertySchema> {
        &self.node.element_schema
    }

    /// Returns the value under `key`.
    pub fn get(&self, key: &str) -> Result<Option<ConfigValue>> {
        self.element(key)?
            .ok_or_else(|| self.not_found(key))?
            .value
            .get()
    }

    /// Returns the value under `key`, or `None` if the key is absent or the
    /// entry holds no value.
    pub fn try_get(&self, key: &str) -> Result<Option<ConfigValue>> {
        match self.element(key)? {
            Some(element) => element.value.get(),
            None => Ok(None),
        }
    }

    /// Returns the scalar under `key` as `T`.
    pub fn get_as<T: Scalar>(&self, key: &str) -> Result<Option<T>> {
        let element = self.element(key)?.ok_or_else(|| self.not_found(key))?;
        match element.value.get()? {
            None => Ok(None),
            Some(value) => value
                .get::<T>()
                .map(Some)
                .ok_or_else(|| ConfigurationError::TypeMismatch {
                    path: element.value.path(),
                    expected: T::TYPE.to_string(),
                    actual: value.describe(),
                }),
        }
    }

    /// Stores `value` under `key`, replacing any existing entry.
    pub fn insert(&self, key: &str, value: impl Into<ConfigValue>) -> Result<()> {
        Self::check_key(key)?;
        self.node.ensure_writable()?;
        let element = self.node.attach(key.to_owned(), Some(value.into()))?;
        self.node.replace_element(element, |_| Ok(()))
    }

    /// Adds `value` under `key`, failing if the key is already present.
    pub fn add(&self, key: &str, value: impl Into<ConfigValue>) -> Result<()> {
        Self::check_key(key)?;
        self.node.ensure_writable()?;
        let element = self.node.attach(key.to_owned(), Some(value.into()))?;
        self.node.add_element(element)
    }

    /// Adds an entry holding the element type's empty value and returns it.
    pub fn add_new(&self, key: &str) -> Result<Option<ConfigValue>> {
        Self::check_key(key)?;
        self.node.ensure_writable()?;
        let element = self.node.attach_default(key.to_owned())?;
        self.node.add_element(element.clone())?;
        element.value.get()
    }

    /// Adds a deep copy of `value` under `key` and returns the copy.
    pub fn add_copy(&self, key: &str, value: &ConfigValue) -> Result<Option<ConfigValue>> {
        Self::check_key(key)?;
        self.node.ensure_writable()?;
        let element = self.node.attach(key.to_owned(), Some(value.clone()))?;
        self.node.add_element(element.clone())?;
        element.value.get()
    }

    /// Removes the entry under `key`. Returns `false` if there was none.
    pub fn remove(&self, key: &str) -> Result<bool> {
        self.node.remove_key(&key.to_owned())
    }

    /// Removes the first entry whose value equals `value`.
    ///
    /// Returns `false` if no entry matched.
    pub fn remove_value(&self, value: &ConfigValue) -> Result<bool> {
        self.node.ensure_writable()?;
        match self.node.position_of(value)? {
            Some(element) => self.node.remove_exact(&element),
            None => Ok(false),
        }
    }

    /// Removes every entry.
    pub fn clear(&self) -> Result<()> {
        self.node.clear()
    }

    /// Returns `true` if `key` is present.
    pub fn contains_key(&self, key: &str) -> Result<bool> {
        Ok(self.element(key)?.is_some())
    }

    /// Returns `true` if an entry's value equals `value`.
    pub fn contains_value(&self, value: &ConfigValue) -> Result<bool> {
        Ok(self.node.position_of(value)?.is_some())
    }

    /// Returns the key of the first entry whose value equals `value`.
    pub fn key_of(&self, value: &ConfigValue) -> Result<Option<String>> {
        Ok(self.node.position_of(value)?.map(|e| e.key()))
    }

    /// Returns the keys in iteration order.
    pub fn keys(&self) -> Result<Vec<String>> {
        Ok(self.node.snapshot()?.iter().map(|e| e.key()).collect())
    }

    /// Returns the values in iteration order.
    pub fn values(&self) -> Result<Vec<Option<ConfigValue>>> {
        Ok(self.node.entries()?.into_iter().map(|(_, v)| v).collect())
    }

    /// Returns the entries in iteration order.
    pub fn entries(&self) -> Result<Vec<(String, Option<ConfigValue>)>> {
        self.node.entries()
    }

    /// Returns `true` if the dictionary differs from what was last loaded or
    /// saved.
    pub fn is_dirty(&self) -> Result<bool> {
        self.node.is_dirty()
    }

    /// Reloads the entries from the source.
    pub fn load(&self) -> Result<()> {
        self.load_with(false)
    }

    pub(crate) fn load_with(&self, initializing: bool) -> Result<()> {
        self.node.load_with(initializing, keep_order)
    }

    /// Writes the entries to the source, removing sections of dropped keys.
    pub fn save(&self) -> Result<()> {
        self.node.save()
    }

    /// Removes the dictionary's section from the source.
    pub fn delete(&self) -> Result<()> {
        self.node.delete()
    }

    /// Releases every entry.
    pub(crate) fn dispose(&self) {
        self.node.dispose();
    }

    /// Returns `true` once the owning object has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.node.is_disposed()
    }

    /// Registers a listener for structural changes.
    pub fn subscribe_collection_changed(
        &self,
        listener: impl Fn(&CollectionChange<String>) -> ListenerResult + Send + Sync + 'static,
    ) -> Result<SubscriptionId> {
        self.node.ensure_live()?;
        Ok(self.node.collection_changed.subscribe(listener))
    }

    /// Removes a structural change listener.
    pub fn unsubscribe_collection_changed(&self, id: SubscriptionId) -> bool {
        self.node.collection_changed.unsubscribe(id)
    }

    /// Registers a listener for the `Count` and `Item[]` pseudo-properties.
    pub fn subscribe_property_changed(
        &self,
        listener: impl Fn(&PropertyChanged) -> ListenerResult + Send + Sync + 'static,
    ) -> Result<SubscriptionId> {
        self.node.ensure_live()?;
        Ok(self.node.property_changed.subscribe(listener))
    }

    /// Removes a property change listener.
    pub fn unsubscribe_property_changed(&self, id: SubscriptionId) -> bool {
        self.node.property_changed.unsubscribe(id)
    }

    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }
}

impl core::fmt::Debug for ConfigurationDictionary {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConfigurationDictionary")
            .field("path", &self.node.path())
            .field("node", &self.node)
            .finish_non_exhaustive()
    }
}

// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Shared machinery for collections and dictionaries.
//!
//! A [`KeyedNode`] owns its elements twice over: once in a key map for
//! lookup and once in a vector for iteration order. Both live behind one
//! `RwLock` and are only ever replaced together.
//!
//! Lock order is parent before child. The items lock is never held while an
//! element loads, saves, or raises events.

use core::fmt;
use core::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use hashbrown::{HashMap, HashSet};
use parking_lot::RwLock;

use crate::container::ValueContainer;
use crate::error::{AggregateNotificationError, BoxError, ConfigurationError, Result};
use crate::events::{CollectionChange, Listeners, PropertyChanged};
use crate::node::{ConfigValue, ParentNode};
use crate::path::combine;
use crate::schema::{ElementImplementation, PropertySchema};
use crate::scope::{EventSuppressionScope, ReadOnlySuspendScope};
use crate::source::{ConfigurationSource, clear_section};

/// Pseudo-property raised when the number of elements changes.
pub(crate) const COUNT_PROPERTY: &str = "Count";
/// Pseudo-property raised on any element change.
pub(crate) const ITEMS_PROPERTY: &str = "Item[]";

/// Key type of a keyed container.
pub(crate) trait ElementKey:
    Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// Parses a child section name, or `None` if it is not a valid key.
    fn from_section(section: &str) -> Option<Self>;
}

impl ElementKey for usize {
    fn from_section(section: &str) -> Option<Self> {
        // Only the canonical spelling addresses an element: "01" does not.
        let index: Self = section.parse().ok()?;
        (index.to_string() == section).then_some(index)
    }
}

impl ElementKey for String {
    fn from_section(section: &str) -> Option<Self> {
        Some(section.to_owned())
    }
}

/// One element: its current key and the container holding its value.
pub(crate) struct Element<K> {
    key: RwLock<K>,
    owner: Weak<KeyedNode<K>>,
    pub(crate) value: Arc<ValueContainer>,
}

impl<K: ElementKey> Element<K> {
    fn new(key: K, owner: &KeyedNode<K>) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| {
            let parent: Weak<dyn ParentNode> = this.clone();
            Self {
                key: RwLock::new(key),
                owner: owner.this.clone(),
                value: ValueContainer::new(
                    owner.element_schema.clone(),
                    parent,
                    owner.source.clone(),
                ),
            }
        })
    }

    pub(crate) fn key(&self) -> K {
        self.key.read().clone()
    }

    pub(crate) fn set_key(&self, key: K) {
        *self.key.write() = key;
    }

    pub(crate) fn entry(&self) -> (K, Option<ConfigValue>) {
        (self.key(), self.value.peek())
    }
}

impl<K: ElementKey> ParentNode for Element<K> {
    fn path(&self) -> String {
        let owner = self
            .owner
            .upgrade()
            .map(|owner| owner.path())
            .unwrap_or_default();
        let key = self.key().to_string();
        combine([owner.as_str(), key.as_str()])
    }

    fn is_read_only(&self) -> bool {
        self.owner.upgrade().is_some_and(|owner| owner.is_read_only())
    }

    fn child_changed(&self, _property: &str, failures: &mut Vec<BoxError>) {
        if let Some(owner) = self.owner.upgrade() {
            owner.element_changed(failures);
        }
    }
}

impl<K: ElementKey> fmt::Debug for Element<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("key", &*self.key.read())
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

/// Key index and iteration order of a keyed container.
pub(crate) struct Items<K> {
    pub(crate) by_key: HashMap<K, Arc<Element<K>>>,
    pub(crate) ordered: Vec<Arc<Element<K>>>,
}

impl<K: ElementKey> Items<K> {
    /// Rebuilds the key index from `ordered`.
    pub(crate) fn reindex(&mut self) {
        self.by_key = self
            .ordered
            .iter()
            .map(|e| (e.key(), e.clone()))
            .collect();
    }
}

/// Rewrites the key order of freshly loaded elements. Returns `true` if any
/// key changed, which leaves the container dirty.
pub(crate) type Normalize<K> = fn(&mut Vec<Arc<Element<K>>>) -> bool;

pub(crate) struct KeyedNode<K> {
    pub(crate) element_schema: Arc<PropertySchema>,
    pub(crate) read_only: bool,
    parent: Weak<dyn ParentNode>,
    this: Weak<Self>,
    source: Arc<dyn ConfigurationSource>,
    pub(crate) items: RwLock<Items<K>>,
    structure_dirty: AtomicBool,
    disposed: AtomicBool,
    pub(crate) property_changed: Listeners<PropertyChanged>,
    pub(crate) collection_changed: Listeners<CollectionChange<K>>,
}

impl<K: ElementKey> KeyedNode<K> {
    pub(crate) fn new(
        element_schema: Arc<PropertySchema>,
        read_only: bool,
        parent: Weak<dyn ParentNode>,
        source: Arc<dyn ConfigurationSource>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            element_schema,
            read_only,
            parent,
            this: this.clone(),
            source,
            items: RwLock::new(Items {
                by_key: HashMap::new(),
                ordered: Vec::new(),
            }),
            structure_dirty: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            property_changed: Listeners::new(),
            collection_changed: Listeners::new(),
        })
    }

    pub(crate) fn path(&self) -> String {
        self.parent.upgrade().map(|p| p.path()).unwrap_or_default()
    }

    /// Read-only by declaration or because an ancestor is.
    pub(crate) fn is_read_only(&self) -> bool {
        self.read_only || self.parent.upgrade().is_some_and(|p| p.is_read_only())
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            Err(ConfigurationError::Disposed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        self.ensure_live()?;
        if !ReadOnlySuspendScope::is_active() && self.is_read_only() {
            return Err(ConfigurationError::ReadOnly { path: self.path() });
        }
        Ok(())
    }

    pub(crate) fn mark_structure_dirty(&self) {
        self.structure_dirty.store(true, Ordering::Release);
    }

    pub(crate) fn count(&self) -> Result<usize> {
        self.ensure_live()?;
        Ok(self.items.read().ordered.len())
    }

    pub(crate) fn snapshot(&self) -> Result<Vec<Arc<Element<K>>>> {
        self.ensure_live()?;
        Ok(self.items.read().ordered.clone())
    }

    /// Keys and values in iteration order, materializing empty composites.
    pub(crate) fn entries(&self) -> Result<Vec<(K, Option<ConfigValue>)>> {
        let elements = self.snapshot()?;
        let mut entries = Vec::with_capacity(elements.len());
        for element in elements {
            entries.push((element.key(), element.value.get()?));
        }
        Ok(entries)
    }

    pub(crate) fn find(&self, key: &K) -> Result<Option<Arc<Element<K>>>> {
        self.ensure_live()?;
        Ok(self.items.read().by_key.get(key).cloned())
    }

    /// Creates a detached element holding a copy of `value`.
    pub(crate) fn attach(&self, key: K, value: Option<ConfigValue>) -> Result<Arc<Element<K>>> {
        let element = Element::new(key, self);
        element.value.seed(value)?;
        Ok(element)
    }

    /// Creates a detached element holding the element type's empty value.
    pub(crate) fn attach_default(&self, key: K) -> Result<Arc<Element<K>>> {
        let element = Element::new(key, self);
        match self.element_schema.implementation() {
            ElementImplementation::Naive(ty) if !self.element_schema.is_nullable() => {
                element
                    .value
                    .seed(Some(ConfigValue::Scalar(ty.default_value())))?;
            }
            ElementImplementation::Naive(_) => element.value.seed(None)?,
            _ => {
                element.value.get()?;
            }
        }
        Ok(element)
    }

    /// Converts a scalar search value to the element type so lookups match
    /// regardless of the numeric type the caller used.
    pub(crate) fn coerce_needle(&self, value: ConfigValue) -> ConfigValue {
        if let (ElementImplementation::Naive(ty), ConfigValue::Scalar(v)) =
            (self.element_schema.implementation(), &value)
        {
            if let Some(converted) = v.convert(*ty) {
                return ConfigValue::Scalar(converted);
            }
        }
        value
    }

    /// First element whose value equals `needle`.
    pub(crate) fn position_of(&self, needle: &ConfigValue) -> Result<Option<Arc<Element<K>>>> {
        let needle = Some(self.coerce_needle(needle.clone()));
        for element in self.snapshot()? {
            if element.value.get()? == needle {
                return Ok(Some(element));
            }
        }
        Ok(None)
    }

    /// Adds `element` under its key, failing if the key is taken.
    pub(crate) fn add_element(&self, element: Arc<Element<K>>) -> Result<()> {
        self.ensure_writable()?;
        let key = element.key();
        {
            let mut items = self.items.write();
            self.ensure_live()?;
            if items.by_key.contains_key(&key) {
                return Err(ConfigurationError::DuplicateKey {
                    path: self.path(),
                    key: key.to_string(),
                });
            }
            items.by_key.insert(key.clone(), element.clone());
            items.ordered.push(element.clone());
        }
        self.mark_structure_dirty();
        self.publish(
            vec![CollectionChange::Added(vec![(key, element.value.peek())])],
            true,
        )
    }

    /// Stores `element` under its key, replacing any element already there.
    ///
    /// `guard` runs under the write lock and may veto the change.
    pub(crate) fn replace_element(
        &self,
        element: Arc<Element<K>>,
        guard: impl FnOnce(&Items<K>) -> Result<()>,
    ) -> Result<()> {
        self.ensure_writable()?;
        let key = element.key();
        let replaced = {
            let mut items = self.items.write();
            self.ensure_live()?;
            guard(&*items)?;
            let replaced = items.by_key.insert(key.clone(), element.clone());
            match &replaced {
                Some(old) => {
                    if let Some(slot) = items.ordered.iter_mut().find(|e| Arc::ptr_eq(e, old)) {
                        *slot = element.clone();
                    }
                }
                None => items.ordered.push(element.clone()),
            }
            replaced
        };
        self.mark_structure_dirty();
        let change = match &replaced {
            Some(old) => CollectionChange::Replaced {
                key: key.clone(),
                old: old.value.peek(),
                new: element.value.peek(),
            },
            None => CollectionChange::Added(vec![(key, element.value.peek())]),
        };
        let result = self.publish(vec![change], replaced.is_none());
        if let Some(old) = replaced {
            old.value.dispose();
        }
        result
    }

    /// Removes the element under `key`. Returns `false` if there is none.
    pub(crate) fn remove_key(&self, key: &K) -> Result<bool> {
        self.remove_where(key, |_| true)
    }

    /// Removes `target` if it is still the element under its key.
    pub(crate) fn remove_exact(&self, target: &Arc<Element<K>>) -> Result<bool> {
        self.remove_where(&target.key(), |e| Arc::ptr_eq(e, target))
    }

    fn remove_where(
        &self,
        key: &K,
        matches: impl FnOnce(&Arc<Element<K>>) -> bool,
    ) -> Result<bool> {
        self.ensure_writable()?;
        let removed = {
            let mut items = self.items.write();
            self.ensure_live()?;
            if !items.by_key.get(key).is_some_and(matches) {
                return Ok(false);
            }
            let Some(removed) = items.by_key.remove(key) else {
                return Ok(false);
            };
            items.ordered.retain(|e| !Arc::ptr_eq(e, &removed));
            removed
        };
        self.mark_structure_dirty();
        let result = self.publish(vec![CollectionChange::Removed(vec![removed.entry()])], true);
        removed.value.dispose();
        result.map(|()| true)
    }

    /// Removes every element, raising a single `Removed` event.
    pub(crate) fn clear(&self) -> Result<()> {
        self.ensure_writable()?;
        let removed = {
            let mut items = self.items.write();
            self.ensure_live()?;
            items.by_key.clear();
            core::mem::take(&mut items.ordered)
        };
        if removed.is_empty() {
            return Ok(());
        }
        self.mark_structure_dirty();
        let entries = removed.iter().map(|e| e.entry()).collect();
        let result = self.publish(vec![CollectionChange::Removed(entries)], true);
        for element in &removed {
            element.value.dispose();
        }
        result
    }

    /// Fills this empty container with copies of `other`'s elements.
    pub(crate) fn copy_from(&self, other: &Self) -> Result<()> {
        let _suspend = ReadOnlySuspendScope::enter();
        let _quiet = EventSuppressionScope::enter();
        for (key, value) in other.entries()? {
            let element = self.attach(key, value)?;
            self.add_element(element)?;
        }
        Ok(())
    }

    /// Same keys mapped to equal values. Order is not compared; collection
    /// keys are positions, so equal key sets already imply equal order.
    pub(crate) fn structural_eq(&self, other: &Self) -> bool {
        let (Ok(mine), Ok(theirs)) = (self.entries(), other.entries()) else {
            return false;
        };
        if mine.len() != theirs.len() {
            return false;
        }
        let lookup: HashMap<&K, &Option<ConfigValue>> =
            theirs.iter().map(|(k, v)| (k, v)).collect();
        mine.iter()
            .all(|(k, v)| lookup.get(k).is_some_and(|theirs| *theirs == v))
    }

    pub(crate) fn is_dirty(&self) -> Result<bool> {
        self.ensure_live()?;
        if !self.element_schema.persistence().saves() {
            return Ok(false);
        }
        if self.structure_dirty.load(Ordering::Acquire) {
            return Ok(true);
        }
        for element in self.snapshot()? {
            if element.value.is_dirty()? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Writes every element, first clearing source sections that no longer
    /// have an element. Keeps going after failures and reports all of them.
    pub(crate) fn save(&self) -> Result<()> {
        self.ensure_live()?;
        if !self.element_schema.persistence().saves() {
            return Ok(());
        }
        let path = self.path();
        let elements = self.snapshot()?;
        log::debug!("saving {} element(s) at `{path}`", elements.len());

        let live: HashSet<String> = elements.iter().map(|e| e.key().to_string()).collect();
        let mut errors = Vec::new();
        for stale in self.source.child_keys(&path) {
            if live.contains(&stale) {
                continue;
            }
            let stale_path = combine([path.as_str(), stale.as_str()]);
            log::trace!("clearing stale section `{stale_path}`");
            if let Err(source) = clear_section(&*self.source, &stale_path) {
                errors.push(ConfigurationError::Source {
                    path: stale_path,
                    source,
                });
            }
        }
        for element in &elements {
            if let Err(err) = element.value.write_value() {
                errors.push(err);
            }
        }
        if errors.is_empty() {
            self.structure_dirty.store(false, Ordering::Release);
        }
        ConfigurationError::collect(errors)
    }

    pub(crate) fn delete(&self) -> Result<()> {
        self.ensure_live()?;
        if !self.element_schema.persistence().saves() {
            return Ok(());
        }
        let path = self.path();
        log::debug!("deleting `{path}`");
        let mut errors = Vec::new();
        for element in self.snapshot()? {
            if let Err(err) = element.value.delete_value() {
                errors.push(err);
            }
        }
        if let Err(source) = clear_section(&*self.source, &path) {
            errors.push(ConfigurationError::Source { path, source });
        }
        self.mark_structure_dirty();
        ConfigurationError::collect(errors)
    }

    pub(crate) fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let removed = {
            let mut items = self.items.write();
            items.by_key.clear();
            core::mem::take(&mut items.ordered)
        };
        for element in removed {
            element.value.dispose();
        }
        self.property_changed.clear();
        self.collection_changed.clear();
    }

    /// Reconciles the elements with the source's child sections.
    ///
    /// Surviving elements reload in place and keep their relative order;
    /// new sections are appended in source order. Unless `initializing`,
    /// one `Removed` and one `Added` event describe the whole reload.
    ///
    /// The source is read without the items lock, so consumers may mutate
    /// the container in the meantime. The outcome is merged into the live
    /// items: elements added meanwhile are kept, elements removed meanwhile
    /// stay removed, and a key taken meanwhile keeps the consumer's element.
    pub(crate) fn load_with(&self, initializing: bool, normalize: Normalize<K>) -> Result<()> {
        self.ensure_live()?;
        if !self.element_schema.persistence().loads() {
            return Ok(());
        }
        let path = self.path();
        let baseline = self.snapshot()?;

        let mut seen = HashSet::new();
        let mut sections = Vec::new();
        for section in self.source.child_keys(&path) {
            let Some(key) = K::from_section(&section) else {
                log::warn!("skipping section `{section}` under `{path}`: not a valid key");
                continue;
            };
            if seen.insert(key.clone()) {
                sections.push(key);
            }
        }

        let mut loaded = Vec::new();
        for key in sections {
            match self.find(&key)? {
                Some(existing) => match existing.value.read_value(initializing) {
                    // Removed by a consumer since the lookup.
                    Err(ConfigurationError::Disposed) if existing.value.is_disposed() => {}
                    other => other?,
                },
                None => {
                    let element = Element::new(key, self);
                    {
                        let _quiet = EventSuppressionScope::enter();
                        element.value.read_value(true)?;
                    }
                    log::trace!("loaded new element `{}`", element.path());
                    loaded.push(element);
                }
            }
        }

        let (added, deleted, dropped) = {
            let mut items = self.items.write();
            self.ensure_live()?;
            let concurrent = items.ordered.len() != baseline.len()
                || items
                    .ordered
                    .iter()
                    .zip(&baseline)
                    .any(|(live, old)| !Arc::ptr_eq(live, old));
            let known: HashSet<*const Element<K>> = baseline.iter().map(Arc::as_ptr).collect();
            let (mut ordered, deleted): (Vec<_>, Vec<_>) =
                items.ordered.iter().cloned().partition(|e| {
                    seen.contains(&e.key()) || !known.contains(&Arc::as_ptr(e))
                });
            let taken: HashSet<K> = ordered.iter().map(|e| e.key()).collect();
            let (added, dropped): (Vec<_>, Vec<_>) = loaded
                .into_iter()
                .partition(|e| !taken.contains(&e.key()));
            ordered.extend(added.iter().cloned());
            let rekeyed = normalize(&mut ordered);
            items.ordered = ordered;
            items.reindex();
            if concurrent {
                self.mark_structure_dirty();
            } else {
                self.structure_dirty.store(rekeyed, Ordering::Release);
            }
            (added, deleted, dropped)
        };
        log::debug!(
            "loaded `{path}`: {} added, {} removed",
            added.len(),
            deleted.len()
        );

        let mut changes = Vec::new();
        if !initializing {
            if !deleted.is_empty() {
                changes.push(CollectionChange::Removed(
                    deleted.iter().map(|e| e.entry()).collect(),
                ));
            }
            if !added.is_empty() {
                changes.push(CollectionChange::Added(
                    added.iter().map(|e| e.entry()).collect(),
                ));
            }
        }
        let result = if changes.is_empty() {
            Ok(())
        } else {
            self.publish(changes, true)
        };
        for element in deleted.iter().chain(&dropped) {
            element.value.dispose();
        }
        result
    }

    /// An element's value changed in place.
    pub(crate) fn element_changed(&self, failures: &mut Vec<BoxError>) {
        self.property_changed
            .dispatch(&PropertyChanged::new(ITEMS_PROPERTY), failures);
        if let Some(parent) = self.parent.upgrade() {
            parent.child_changed(ITEMS_PROPERTY, failures);
        }
    }

    /// Raises `changes`, then the pseudo-property events, then bubbles up.
    pub(crate) fn publish(
        &self,
        changes: Vec<CollectionChange<K>>,
        count_changed: bool,
    ) -> Result<()> {
        let mut failures = Vec::new();
        for change in &changes {
            self.collection_changed.dispatch(change, &mut failures);
        }
        if count_changed {
            self.property_changed
                .dispatch(&PropertyChanged::new(COUNT_PROPERTY), &mut failures);
        }
        self.element_changed(&mut failures);
        AggregateNotificationError::into_result(failures)
    }
}

impl<K: ElementKey> fmt::Debug for KeyedNode<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedNode")
            .field("element", &self.element_schema.implementation())
            .field("read_only", &self.read_only)
            .field("len", &self.items.read().ordered.len())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

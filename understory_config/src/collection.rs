// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Ordered collections.
//!
//! Elements are keyed by position and stored under `path:0`, `path:1`, ...
//! Every mutation keeps the keys contiguous from zero; elements after an
//! insertion or removal point are re-keyed and reported in one
//! [`CollectionChange::Moved`] event.

use std::sync::{Arc, Weak};

use crate::error::{ConfigurationError, Result};
use crate::events::{CollectionChange, ListenerResult, PropertyChanged, SubscriptionId};
use crate::keyed::{Element, Items, KeyedNode};
use crate::node::{ConfigValue, ParentNode};
use crate::schema::PropertySchema;
use crate::source::ConfigurationSource;
use crate::value::Scalar;

/// Sorts loaded elements by index and closes any gaps.
fn normalize_indices(ordered: &mut Vec<Arc<Element<usize>>>) -> bool {
    ordered.sort_by_key(|e| e.key());
    let mut rekeyed = false;
    for (index, element) in ordered.iter().enumerate() {
        if element.key() != index {
            element.set_key(index);
            rekeyed = true;
        }
    }
    rekeyed
}

fn shift(elements: &[Arc<Element<usize>>], up: bool) -> Vec<(usize, usize)> {
    elements
        .iter()
        .map(|e| {
            let from = e.key();
            let to = if up { from + 1 } else { from - 1 };
            e.set_key(to);
            (from, to)
        })
        .collect()
}

impl KeyedNode<usize> {
    fn out_of_range(&self, index: usize, count: usize) -> ConfigurationError {
        ConfigurationError::IndexOutOfRange {
            path: self.path(),
            index,
            count,
        }
    }

    fn push_element(&self, element: Arc<Element<usize>>) -> Result<usize> {
        self.ensure_writable()?;
        let index = {
            let mut items = self.items.write();
            self.ensure_live()?;
            let index = items.ordered.len();
            element.set_key(index);
            items.by_key.insert(index, element.clone());
            items.ordered.push(element.clone());
            index
        };
        self.mark_structure_dirty();
        self.publish(
            vec![CollectionChange::Added(vec![(index, element.value.peek())])],
            true,
        )?;
        Ok(index)
    }

    fn insert_element(&self, index: usize, element: Arc<Element<usize>>) -> Result<()> {
        self.ensure_writable()?;
        let moved = {
            let mut items = self.items.write();
            self.ensure_live()?;
            let count = items.ordered.len();
            if index > count {
                return Err(self.out_of_range(index, count));
            }
            let moved = shift(&items.ordered[index..], true);
            element.set_key(index);
            items.ordered.insert(index, element.clone());
            items.reindex();
            moved
        };
        self.mark_structure_dirty();
        let mut changes = vec![CollectionChange::Added(vec![(index, element.value.peek())])];
        if !moved.is_empty() {
            changes.push(CollectionChange::Moved(moved));
        }
        self.publish(changes, true)
    }

    fn remove_element_at(&self, index: usize) -> Result<Option<ConfigValue>> {
        self.ensure_writable()?;
        let (removed, moved) = {
            let mut items = self.items.write();
            self.ensure_live()?;
            let count = items.ordered.len();
            if index >= count {
                return Err(self.out_of_range(index, count));
            }
            Self::take_at(&mut *items, index)
        };
        self.finish_removal(index, &removed, moved)
    }

    fn remove_element(&self, target: &Arc<Element<usize>>) -> Result<bool> {
        self.ensure_writable()?;
        let (index, removed, moved) = {
            let mut items = self.items.write();
            self.ensure_live()?;
            let Some(index) = items.ordered.iter().position(|e| Arc::ptr_eq(e, target)) else {
                return Ok(false);
            };
            let (removed, moved) = Self::take_at(&mut *items, index);
            (index, removed, moved)
        };
        self.finish_removal(index, &removed, moved).map(|_| true)
    }

    fn take_at(
        items: &mut Items<usize>,
        index: usize,
    ) -> (Arc<Element<usize>>, Vec<(usize, usize)>) {
        let removed = items.ordered.remove(index);
        let moved = shift(&items.ordered[index..], false);
        items.reindex();
        (removed, moved)
    }

    fn finish_removal(
        &self,
        index: usize,
        removed: &Arc<Element<usize>>,
        moved: Vec<(usize, usize)>,
    ) -> Result<Option<ConfigValue>> {
        self.mark_structure_dirty();
        let value = removed.value.peek();
        let mut changes = vec![CollectionChange::Removed(vec![(index, value.clone())])];
        if !moved.is_empty() {
            changes.push(CollectionChange::Moved(moved));
        }
        let result = self.publish(changes, true);
        removed.value.dispose();
        result.map(|()| value)
    }
}

/// An ordered, index-keyed collection of configuration values.
///
/// A handle: clones share the same collection. Values added from outside
/// the tree are copied in, so the collection never aliases another node.
///
/// Removed composite elements are disposed; a value returned by
/// [`ConfigurationCollection::remove_at`] is only usable if it is a scalar.
#[derive(Clone)]
pub struct ConfigurationCollection {
    pub(crate) node: Arc<KeyedNode<usize>>,
}

impl ConfigurationCollection {
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

    /// Returns the number of elements.
    pub fn len(&self) -> Result<usize> {
        self.node.count()
    }

    /// Returns `true` if there are no elements.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Returns `true` if structural mutation is rejected, by declaration or
    /// because an ancestor is read-only.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.node.is_read_only()
    }

    /// Returns the configuration path of the collection.
    #[must_use]
    pub fn path(&self) -> String {
        self.node.path()
    }

    /// Returns the schema shared by every element.
    #[must_use]
    pub fn element_schema(&self) -> &Arc<PropertySchema> {
        &self.node.element_schema
    }

    fn element_at(&self, index: usize) -> Result<Arc<Element<usize>>> {
        self.node.ensure_live()?;
        let items = self.node.items.read();
        items
            .ordered
            .get(index)
            .cloned()
            .ok_or_else(|| self.node.out_of_range(index, items.ordered.len()))
    }

    /// Returns the element at `index`.
    pub fn get(&self, index: usize) -> Result<Option<ConfigValue>> {
        self.element_at(index)?.value.get()
    }

    /// Returns the scalar element at `index` as `T`.
    pub fn get_as<T: Scalar>(&self, index: usize) -> Result<Option<T>> {
        let element = self.element_at(index)?;
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

    /// Replaces the element at `index`.
    pub fn set(&self, index: usize, value: impl Into<ConfigValue>) -> Result<()> {
        self.node.ensure_writable()?;
        let element = self.node.attach(index, Some(value.into()))?;
        self.node.replace_element(element, |items: &Items<usize>| {
            let count = items.ordered.len();
            if index < count {
                Ok(())
            } else {
                Err(self.node.out_of_range(index, count))
            }
        })
    }

    /// Appends `value`.
    pub fn push(&self, value: impl Into<ConfigValue>) -> Result<()> {
        self.node.ensure_writable()?;
        let element = self.node.attach(0, Some(value.into()))?;
        self.node.push_element(element).map(|_| ())
    }

    /// Inserts `value` at `index`, shifting later elements up by one.
    pub fn insert(&self, index: usize, value: impl Into<ConfigValue>) -> Result<()> {
        self.node.ensure_writable()?;
        let element = self.node.attach(index, Some(value.into()))?;
        self.node.insert_element(index, element)
    }

    /// Removes the first element equal to `value`.
    ///
    /// Returns `false` if no element matched.
    pub fn remove(&self, value: &ConfigValue) -> Result<bool> {
        self.node.ensure_writable()?;
        match self.node.position_of(value)? {
            Some(element) => self.node.remove_element(&element),
            None => Ok(false),
        }
    }

    /// Removes the element at `index`, shifting later elements down by one.
    pub fn remove_at(&self, index: usize) -> Result<Option<ConfigValue>> {
        self.node.remove_element_at(index)
    }

    /// Removes every element.
    pub fn clear(&self) -> Result<()> {
        self.node.clear()
    }

    /// Returns `true` if an element equals `value`.
    pub fn contains(&self, value: &ConfigValue) -> Result<bool> {
        Ok(self.index_of(value)?.is_some())
    }

    /// Returns the index of the first element equal to `value`.
    pub fn index_of(&self, value: &ConfigValue) -> Result<Option<usize>> {
        Ok(self.node.position_of(value)?.map(|e| e.key()))
    }

    /// Returns every element in order.
    pub fn to_vec(&self) -> Result<Vec<Option<ConfigValue>>> {
        Ok(self.node.entries()?.into_iter().map(|(_, v)| v).collect())
    }

    /// Clones every element into `target`, starting at `start`.
    pub fn copy_to(&self, target: &mut [Option<ConfigValue>], start: usize) -> Result<()> {
        let values = self.to_vec()?;
        let end = start
            .checked_add(values.len())
            .filter(|end| *end <= target.len())
            .ok_or_else(|| self.node.out_of_range(start, target.len()))?;
        target[start..end].clone_from_slice(&values);
        Ok(())
    }

    /// Appends an element holding the element type's empty value and
    /// returns it.
    ///
    /// For object elements this is a fresh object with declared defaults.
    pub fn add_new(&self) -> Result<Option<ConfigValue>> {
        self.node.ensure_writable()?;
        let element = self.node.attach_default(0)?;
        self.node.push_element(element.clone())?;
        element.value.get()
    }

    /// Appends a deep copy of `value` and returns the copy.
    pub fn add_copy(&self, value: &ConfigValue) -> Result<Option<ConfigValue>> {
        self.node.ensure_writable()?;
        let element = self.node.attach(0, Some(value.clone()))?;
        self.node.push_element(element.clone())?;
        element.value.get()
    }

    /// Returns `true` if the collection differs from what was last loaded
    /// or saved.
    pub fn is_dirty(&self) -> Result<bool> {
        self.node.is_dirty()
    }

    /// Reloads the elements from the source.
    pub fn load(&self) -> Result<()> {
        self.load_with(false)
    }

    pub(crate) fn load_with(&self, initializing: bool) -> Result<()> {
        self.node.load_with(initializing, normalize_indices)
    }

    /// Writes the elements to the source, removing stale indices.
    pub fn save(&self) -> Result<()> {
        self.node.save()
    }

    /// Removes the collection's section from the source.
    pub fn delete(&self) -> Result<()> {
        self.node.delete()
    }

    /// Releases every element. Later access fails with
    /// [`ConfigurationError::Disposed`].
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
        listener: impl Fn(&CollectionChange<usize>) -> ListenerResult + Send + Sync + 'static,
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

impl core::fmt::Debug for ConfigurationCollection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConfigurationCollection")
            .field("path", &self.node.path())
            .field("node", &self.node)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declare::{Declaration, DeclaredConfiguration};
    use crate::registry::SchemaRegistry;
    use crate::schema::TypeShape;
    use crate::error::BoxError;
    use crate::source::{MemorySource, ReloadCallback, ReloadToken};
    use crate::{ConfigurationObject, Value};
    use proptest::prelude::*;
    use std::sync::Mutex;

    struct Ports;

    impl DeclaredConfiguration for Ports {
        const NAME: &'static str = "Ports";

        fn declare(d: &mut Declaration) {
            d.root_path("Net");
            d.collection("Ports", TypeShape::scalar::<i32>());
            d.property(
                "Fixed",
                TypeShape::read_only_collection(TypeShape::scalar::<i32>()),
            );
        }
    }

    fn ports(entries: &[(&str, &str)]) -> (Arc<MemorySource>, ConfigurationObject) {
        let source = Arc::new(MemorySource::from_entries(entries.iter().copied()));
        let object = SchemaRegistry::new()
            .materialize::<Ports>(source.clone())
            .unwrap();
        object.load().unwrap();
        (source, object)
    }

    fn assert_contiguous(c: &ConfigurationCollection) {
        let items = c.node.items.read();
        assert_eq!(items.by_key.len(), items.ordered.len());
        for (i, e) in items.ordered.iter().enumerate() {
            assert_eq!(e.key(), i);
            assert!(Arc::ptr_eq(&items.by_key[&i], e));
        }
    }

    fn ints(c: &ConfigurationCollection) -> Vec<i32> {
        c.to_vec()
            .unwrap()
            .into_iter()
            .map(|v| v.and_then(|v| v.get::<i32>()).unwrap())
            .collect()
    }

    #[test]
    fn load_sorts_and_closes_gaps() {
        let (_, object) = ports(&[
            ("Net:Ports:10", "3"),
            ("Net:Ports:2", "2"),
            ("Net:Ports:0", "1"),
            ("Net:Ports:x", "ignored"),
            ("Net:Ports:01", "ignored"),
        ]);
        let c = object.collection("Ports").unwrap();
        assert_eq!(ints(&c), [1, 2, 3]);
        assert_contiguous(&c);
        // Re-keyed elements have to be written back to close the gaps.
        assert!(c.is_dirty().unwrap());
    }

    #[test]
    fn insert_and_remove_report_moves() {
        let (_, object) = ports(&[("Net:Ports:0", "1"), ("Net:Ports:1", "3")]);
        let c = object.collection("Ports").unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        c.subscribe_collection_changed(move |change| {
            sink.lock().unwrap().push(format!("{change:?}"));
            Ok(())
        })
        .unwrap();

        c.insert(1, 2).unwrap();
        assert_eq!(ints(&c), [1, 2, 3]);
        assert_eq!(c.remove_at(0).unwrap(), Some(ConfigValue::from(1)));
        assert_eq!(ints(&c), [2, 3]);
        assert_contiguous(&c);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 4);
        assert!(events[0].starts_with("Added([(1,"));
        assert_eq!(events[1], "Moved([(1, 2)])");
        assert!(events[2].starts_with("Removed([(0,"));
        assert_eq!(events[3], "Moved([(1, 0), (2, 1)])");
    }

    #[test]
    fn index_of_converts_numeric_needles() {
        let (_, object) = ports(&[("Net:Ports:0", "80"), ("Net:Ports:1", "443")]);
        let c = object.collection("Ports").unwrap();
        assert_eq!(c.index_of(&ConfigValue::from(443_u16)).unwrap(), Some(1));
        assert!(c.contains(&ConfigValue::from(80_i64)).unwrap());
        assert!(!c.contains(&ConfigValue::from("80")).unwrap());

        c.push(8080).unwrap();
        assert_eq!(c.index_of(&ConfigValue::from(8080)).unwrap(), Some(2));
        assert!(c.remove(&ConfigValue::from(80)).unwrap());
        assert!(!c.remove(&ConfigValue::from(80)).unwrap());
        assert_eq!(c.get_as::<i32>(0).unwrap(), Some(443));
    }

    #[test]
    fn out_of_range_and_copy_to() {
        let (_, object) = ports(&[("Net:Ports:0", "1"), ("Net:Ports:1", "2")]);
        let c = object.collection("Ports").unwrap();
        assert!(matches!(
            c.get(2),
            Err(ConfigurationError::IndexOutOfRange {
                index: 2,
                count: 2,
                ..
            })
        ));
        assert!(matches!(
            c.set(5, 1),
            Err(ConfigurationError::IndexOutOfRange { .. })
        ));
        assert!(matches!(
            c.insert(3, 1),
            Err(ConfigurationError::IndexOutOfRange { .. })
        ));

        let mut target = vec![None; 3];
        c.copy_to(&mut target, 1).unwrap();
        assert_eq!(
            target,
            [
                None,
                Some(ConfigValue::Scalar(Value::I32(1))),
                Some(ConfigValue::Scalar(Value::I32(2)))
            ]
        );
        assert!(c.copy_to(&mut target, 2).is_err());
    }

    #[test]
    fn save_clears_stale_indices() {
        let (source, object) = ports(&[
            ("Net:Ports:0", "1"),
            ("Net:Ports:1", "2"),
            ("Net:Ports:2", "3"),
        ]);
        let c = object.collection("Ports").unwrap();
        c.remove_at(0).unwrap();
        assert!(c.is_dirty().unwrap());
        c.save().unwrap();
        assert!(!c.is_dirty().unwrap());
        assert_eq!(source.get("Net:Ports:0").as_deref(), Some("2"));
        assert_eq!(source.get("Net:Ports:1").as_deref(), Some("3"));
        assert_eq!(source.get("Net:Ports:2"), None);
    }

    #[test]
    fn read_only_rejects_mutation() {
        let (_, object) = ports(&[("Net:Fixed:0", "7")]);
        let c = object.collection("Fixed").unwrap();
        assert!(c.is_read_only());
        for result in [
            c.push(1),
            c.insert(0, 1),
            c.set(0, 1),
            c.clear(),
            c.remove_at(0).map(|_| ()),
            c.add_new().map(|_| ()),
            c.remove(&ConfigValue::from(7)).map(|_| ()),
        ] {
            assert!(matches!(result, Err(ConfigurationError::ReadOnly { .. })));
        }
        assert_eq!(ints(&c), [7]);
    }

    #[test]
    fn disposed_collection_rejects_access() {
        let (_, object) = ports(&[("Net:Ports:0", "1")]);
        let c = object.collection("Ports").unwrap();
        object.dispose();
        assert!(c.is_disposed());
        assert!(matches!(c.len(), Err(ConfigurationError::Disposed)));
        assert!(matches!(c.push(2), Err(ConfigurationError::Disposed)));
        assert!(matches!(c.get(0), Err(ConfigurationError::Disposed)));
        assert!(matches!(c.to_vec(), Err(ConfigurationError::Disposed)));
    }

    /// Runs a callback once, right after the child keys of `section` have
    /// been read, to interleave a consumer mutation with a reload.
    struct Interleaved {
        inner: MemorySource,
        section: &'static str,
        hook: parking_lot::Mutex<Option<Box<dyn FnOnce() + Send>>>,
    }

    impl Interleaved {
        fn new(section: &'static str, entries: &[(&str, &str)]) -> Self {
            Self {
                inner: MemorySource::from_entries(entries.iter().copied()),
                section,
                hook: parking_lot::Mutex::new(None),
            }
        }

        fn arm(&self, hook: impl FnOnce() + Send + 'static) {
            *self.hook.lock() = Some(Box::new(hook));
        }
    }

    impl ConfigurationSource for Interleaved {
        fn get(&self, path: &str) -> Option<String> {
            self.inner.get(path)
        }

        fn set(&self, path: &str, value: Option<&str>) -> Result<(), BoxError> {
            self.inner.set(path, value)
        }

        fn child_keys(&self, path: &str) -> Vec<String> {
            let keys = self.inner.child_keys(path);
            if path == self.section {
                let hook = self.hook.lock().take();
                if let Some(hook) = hook {
                    hook();
                }
            }
            keys
        }

        fn register_reload_callback(&self, callback: ReloadCallback) -> ReloadToken {
            self.inner.register_reload_callback(callback)
        }
    }

    fn interleaved(entries: &[(&str, &str)]) -> (Arc<Interleaved>, ConfigurationObject) {
        let source = Arc::new(Interleaved::new("Net:Ports", entries));
        let object = SchemaRegistry::new()
            .materialize::<Ports>(source.clone())
            .unwrap();
        object.load().unwrap();
        (source, object)
    }

    #[test]
    fn reload_keeps_a_concurrent_push() {
        let (source, object) = interleaved(&[("Net:Ports:0", "1"), ("Net:Ports:1", "2")]);
        let c = object.collection("Ports").unwrap();
        let consumer = c.clone();
        source.arm(move || consumer.push(99).unwrap());

        c.load().unwrap();
        assert_eq!(ints(&c), [1, 2, 99]);
        assert_contiguous(&c);
        assert!(c.is_dirty().unwrap());
    }

    #[test]
    fn reload_tolerates_a_concurrent_removal() {
        let (source, object) = interleaved(&[
            ("Net:Ports:0", "1"),
            ("Net:Ports:1", "2"),
            ("Net:Ports:2", "3"),
        ]);
        let c = object.collection("Ports").unwrap();
        let consumer = c.clone();
        source.arm(move || {
            consumer.remove_at(1).unwrap();
        });

        object.load().unwrap();
        assert_eq!(ints(&c), [1, 2, 3]);
        assert_contiguous(&c);
        for element in c.node.snapshot().unwrap() {
            assert!(!element.value.is_disposed());
        }
    }

    #[derive(Clone, Debug)]
    enum Op {
        Push(i32),
        Insert(usize, i32),
        RemoveAt(usize),
        Remove(i32),
        Set(usize, i32),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            any::<i32>().prop_map(Op::Push),
            (0..8_usize, any::<i32>()).prop_map(|(i, v)| Op::Insert(i, v)),
            (0..8_usize).prop_map(Op::RemoveAt),
            (-3..3_i32).prop_map(Op::Remove),
            (0..8_usize, any::<i32>()).prop_map(|(i, v)| Op::Set(i, v)),
        ]
    }

    proptest! {
        #[test]
        fn keys_stay_contiguous(ops in prop::collection::vec(op(), 0..40)) {
            let (_, object) = ports(&[]);
            let c = object.collection("Ports").unwrap();
            let mut model: Vec<i32> = Vec::new();
            for op in ops {
                match op {
                    Op::Push(v) => {
                        c.push(v).unwrap();
                        model.push(v);
                    }
                    Op::Insert(i, v) => {
                        let ok = c.insert(i, v).is_ok();
                        prop_assert_eq!(ok, i <= model.len());
                        if ok {
                            model.insert(i, v);
                        }
                    }
                    Op::RemoveAt(i) => {
                        let ok = c.remove_at(i).is_ok();
                        prop_assert_eq!(ok, i < model.len());
                        if ok {
                            model.remove(i);
                        }
                    }
                    Op::Remove(v) => {
                        let removed = c.remove(&ConfigValue::from(v)).unwrap();
                        let position = model.iter().position(|m| *m == v);
                        prop_assert_eq!(removed, position.is_some());
                        if let Some(p) = position {
                            model.remove(p);
                        }
                    }
                    Op::Set(i, v) => {
                        let ok = c.set(i, v).is_ok();
                        prop_assert_eq!(ok, i < model.len());
                        if ok {
                            model[i] = v;
                        }
                    }
                }
                assert_contiguous(&c);
                prop_assert_eq!(ints(&c), model.clone());
            }
        }
    }
}

// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Configuration objects.
//!
//! A [`ConfigurationObject`] is a materialized instance of a declared type:
//! one [`ValueContainer`] per property, in declaration order. Roots are
//! created by [`SchemaRegistry::materialize`](crate::SchemaRegistry::materialize);
//! nested objects are created on demand by their owning property.
//!
//! ## Persistence
//!
//! - [`ConfigurationObject::load`] stops at the first failing property.
//! - [`ConfigurationObject::save`] and [`ConfigurationObject::delete`] visit
//!   every property and report all failures together.
//!
//! ## Reload
//!
//! [`ConfigurationObject::watch_reload`] re-runs `load` whenever the source
//! signals a reload, with read-only checks suspended so read-only
//! collections can refresh too.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::collection::ConfigurationCollection;
use crate::container::ValueContainer;
use crate::dictionary::ConfigurationDictionary;
use crate::error::{BoxError, ConfigurationError, Result, ValidationError};
use crate::events::{Listeners, ListenerResult, PropertyChanged, SubscriptionId};
use crate::node::{ConfigValue, ParentNode};
use crate::path::compute_path;
use crate::schema::ObjectSchema;
use crate::scope::ReadOnlySuspendScope;
use crate::source::{ConfigurationSource, ReloadToken};
use crate::value::Scalar;

pub(crate) struct ObjectNode {
    schema: Arc<ObjectSchema>,
    /// `None` for roots.
    parent: Option<Weak<dyn ParentNode>>,
    source: Arc<dyn ConfigurationSource>,
    properties: Vec<Arc<ValueContainer>>,
    disposed: AtomicBool,
    property_changed: Listeners<PropertyChanged>,
}

impl ObjectNode {
    fn new(
        schema: Arc<ObjectSchema>,
        parent: Option<Weak<dyn ParentNode>>,
        source: Arc<dyn ConfigurationSource>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| {
            let owner: Weak<dyn ParentNode> = this.clone();
            let properties = schema
                .properties()
                .iter()
                .map(|p| ValueContainer::new(p.clone(), owner.clone(), source.clone()))
                .collect();
            Self {
                schema,
                parent,
                source,
                properties,
                disposed: AtomicBool::new(false),
                property_changed: Listeners::new(),
            }
        })
    }

    fn parent(&self) -> Option<Arc<dyn ParentNode>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }
}

impl ParentNode for ObjectNode {
    fn path(&self) -> String {
        match &self.parent {
            Some(parent) => parent.upgrade().map(|p| p.path()).unwrap_or_default(),
            None => compute_path(None, self.schema.path()),
        }
    }

    fn is_read_only(&self) -> bool {
        self.parent().is_some_and(|p| p.is_read_only())
    }

    fn child_changed(&self, property: &str, failures: &mut Vec<BoxError>) {
        self.property_changed
            .dispatch(&PropertyChanged::new(property), failures);
        if let Some(parent) = self.parent() {
            parent.child_changed(property, failures);
        }
    }
}

/// A materialized configuration object.
///
/// A handle: clones share the same object. Property access is by declared
/// name; scalar reads can be typed with [`ConfigurationObject::value`].
#[derive(Clone)]
pub struct ConfigurationObject {
    node: Arc<ObjectNode>,
}

impl ConfigurationObject {
    /// Creates an unloaded root object of `schema` over `source`.
    #[must_use]
    pub fn new(schema: Arc<ObjectSchema>, source: Arc<dyn ConfigurationSource>) -> Self {
        Self {
            node: ObjectNode::new(schema, None, source),
        }
    }

    pub(crate) fn attached(
        schema: Arc<ObjectSchema>,
        parent: Weak<dyn ParentNode>,
        source: Arc<dyn ConfigurationSource>,
    ) -> Self {
        Self {
            node: ObjectNode::new(schema, Some(parent), source),
        }
    }

    /// Returns the schema of the declared type.
    #[must_use]
    #[inline]
    pub fn schema(&self) -> &Arc<ObjectSchema> {
        &self.node.schema
    }

    /// Returns the object's configuration path.
    ///
    /// Roots use the type's declared path; nested objects share the path of
    /// the property or element holding them.
    #[must_use]
    pub fn path(&self) -> String {
        self.node.path()
    }

    /// Returns `true` if this object is a root of its tree.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.node.parent.is_none()
    }

    /// Returns `true` if an ancestor rejects mutation.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.node.is_read_only()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            Err(ConfigurationError::Disposed)
        } else {
            Ok(())
        }
    }

    fn container(&self, name: &str) -> Result<&Arc<ValueContainer>> {
        self.ensure_live()?;
        self.node
            .schema
            .index_of(name)
            .map(|i| &self.node.properties[i])
            .ok_or_else(|| ConfigurationError::UnknownProperty {
                owner: self.node.schema.name(),
                name: name.to_owned(),
            })
    }

    /// Returns the value of property `name`.
    ///
    /// Composite properties materialize an empty instance on first access.
    pub fn get(&self, name: &str) -> Result<Option<ConfigValue>> {
        self.container(name)?.get()
    }

    /// Returns scalar property `name` as `T`, converting numerics.
    pub fn value<T: Scalar>(&self, name: &str) -> Result<Option<T>> {
        let container = self.container(name)?;
        match container.get()? {
            None => Ok(None),
            Some(value) => value
                .get::<T>()
                .map(Some)
                .ok_or_else(|| ConfigurationError::TypeMismatch {
                    path: container.path(),
                    expected: T::TYPE.to_string(),
                    actual: value.describe(),
                }),
        }
    }

    /// Assigns property `name`.
    ///
    /// Composite values from elsewhere in a tree are deep-copied in.
    pub fn set(&self, name: &str, value: impl Into<ConfigValue>) -> Result<()> {
        self.container(name)?.set(Some(value.into()))
    }

    /// Sets property `name` to "no value".
    ///
    /// Only nullable and composite properties accept this; saving a cleared
    /// composite removes its section.
    pub fn clear(&self, name: &str) -> Result<()> {
        self.container(name)?.set(None)
    }

    fn composite<T>(
        &self,
        name: &str,
        expected: &str,
        pick: impl FnOnce(ConfigValue) -> Option<T>,
    ) -> Result<T> {
        let container = self.container(name)?;
        let value = container.get()?;
        let actual = value
            .as_ref()
            .map_or_else(|| "no value".to_owned(), ConfigValue::describe);
        value
            .and_then(pick)
            .ok_or_else(|| ConfigurationError::TypeMismatch {
                path: container.path(),
                expected: expected.to_owned(),
                actual,
            })
    }

    /// Returns nested object property `name`.
    pub fn object(&self, name: &str) -> Result<Self> {
        self.composite(name, "object", |v| match v {
            ConfigValue::Object(o) => Some(o),
            _ => None,
        })
    }

    /// Returns collection property `name`.
    pub fn collection(&self, name: &str) -> Result<ConfigurationCollection> {
        self.composite(name, "collection", |v| match v {
            ConfigValue::Collection(c) => Some(c),
            _ => None,
        })
    }

    /// Returns dictionary property `name`.
    pub fn dictionary(&self, name: &str) -> Result<ConfigurationDictionary> {
        self.composite(name, "dictionary", |v| match v {
            ConfigValue::Dictionary(d) => Some(d),
            _ => None,
        })
    }

    /// Returns every property name with its current value, in declaration order.
    pub fn properties(&self) -> Result<Vec<(&str, Option<ConfigValue>)>> {
        self.ensure_live()?;
        let mut properties = Vec::with_capacity(self.node.properties.len());
        for container in &self.node.properties {
            properties.push((container.schema().name(), container.get()?));
        }
        Ok(properties)
    }

    /// Returns `true` if any property differs from what was last loaded or saved.
    pub fn is_dirty(&self) -> Result<bool> {
        self.ensure_live()?;
        for container in &self.node.properties {
            if container.is_dirty()? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Returns `true` if property `name` differs from what was last loaded or saved.
    pub fn is_property_dirty(&self, name: &str) -> Result<bool> {
        self.container(name)?.is_dirty()
    }

    /// Reads every loadable property from the source.
    ///
    /// Stops at the first failure; properties loaded before it keep their
    /// new values.
    pub fn load(&self) -> Result<()> {
        self.load_with(false)
    }

    pub(crate) fn load_with(&self, initializing: bool) -> Result<()> {
        self.ensure_live()?;
        log::debug!("loading `{}` from `{}`", self.node.schema.name(), self.path());
        for container in &self.node.properties {
            container.read_value(initializing)?;
        }
        Ok(())
    }

    /// Writes every saveable property to the source.
    pub fn save(&self) -> Result<()> {
        self.ensure_live()?;
        log::debug!("saving `{}` to `{}`", self.node.schema.name(), self.path());
        let errors = self
            .node
            .properties
            .iter()
            .filter_map(|c| c.write_value().err())
            .collect();
        ConfigurationError::collect(errors)
    }

    /// Removes every saveable property from the source.
    ///
    /// In-memory values are kept and count as unsaved.
    pub fn delete(&self) -> Result<()> {
        self.ensure_live()?;
        log::debug!("deleting `{}` at `{}`", self.node.schema.name(), self.path());
        let errors = self
            .node
            .properties
            .iter()
            .filter_map(|c| c.delete_value().err())
            .collect();
        ConfigurationError::collect(errors)
    }

    /// Releases the object and everything below it. Idempotent.
    ///
    /// Later access fails with [`ConfigurationError::Disposed`]. Only roots
    /// can be disposed this way: a nested object belongs to the property
    /// holding it and is released along with its root.
    pub fn dispose(&self) {
        if self.is_root() {
            self.release();
        } else {
            log::debug!("ignoring dispose of nested object at `{}`", self.path());
        }
    }

    pub(crate) fn release(&self) {
        if self.node.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        for container in &self.node.properties {
            container.dispose();
        }
        self.node.property_changed.clear();
    }

    /// Returns `true` once disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.node.disposed.load(Ordering::Acquire)
    }

    /// Registers a listener for property changes on this object and below.
    ///
    /// Changes deep in the tree are reported under the name of the property
    /// of this object that contains them.
    pub fn subscribe_property_changed(
        &self,
        listener: impl Fn(&PropertyChanged) -> ListenerResult + Send + Sync + 'static,
    ) -> Result<SubscriptionId> {
        self.ensure_live()?;
        Ok(self.node.property_changed.subscribe(listener))
    }

    /// Removes a property change listener.
    pub fn unsubscribe_property_changed(&self, id: SubscriptionId) -> bool {
        self.node.property_changed.unsubscribe(id)
    }

    /// Returns every object in the tree below and including `self`, children
    /// before their parents.
    pub fn objects_post_order(&self) -> Result<Vec<Self>> {
        let mut out = Vec::new();
        self.collect_post_order(&mut out)?;
        Ok(out)
    }

    fn collect_post_order(&self, out: &mut Vec<Self>) -> Result<()> {
        self.ensure_live()?;
        for container in &self.node.properties {
            if let Some(value) = container.get()? {
                Self::collect_value(&value, out)?;
            }
        }
        out.push(self.clone());
        Ok(())
    }

    fn collect_value(value: &ConfigValue, out: &mut Vec<Self>) -> Result<()> {
        match value {
            ConfigValue::Scalar(_) => {}
            ConfigValue::Object(object) => object.collect_post_order(out)?,
            ConfigValue::Collection(collection) => {
                for element in collection.to_vec()?.into_iter().flatten() {
                    Self::collect_value(&element, out)?;
                }
            }
            ConfigValue::Dictionary(dictionary) => {
                for element in dictionary.values()?.into_iter().flatten() {
                    Self::collect_value(&element, out)?;
                }
            }
        }
        Ok(())
    }

    /// Runs `validator` on every object in the tree, children first.
    ///
    /// Stops at the first failure.
    pub fn validate_with(&self, validator: &dyn Validator) -> Result<()> {
        for object in self.objects_post_order()? {
            validator.validate(&object)?;
        }
        Ok(())
    }

    /// Reloads this object every time the source signals a reload, until the
    /// returned watch is dropped.
    ///
    /// Reload failures are logged and do not stop the watch.
    pub fn watch_reload(&self) -> Result<ReloadWatch> {
        self.ensure_live()?;
        let state = Arc::new(WatchState {
            object: Arc::downgrade(&self.node),
            source: self.node.source.clone(),
            token: Mutex::new(None),
            active: AtomicBool::new(true),
        });
        WatchState::arm(&state);
        Ok(ReloadWatch { state })
    }

    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }

    /// Same declared type and pairwise equal properties.
    pub(crate) fn structural_eq(&self, other: &Self) -> bool {
        if self.node.schema.type_id() != other.node.schema.type_id() {
            return false;
        }
        self.node
            .properties
            .iter()
            .zip(&other.node.properties)
            .all(|(a, b)| match (a.get(), b.get()) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            })
    }

    /// Copies every property of `from` into this fresh object.
    pub(crate) fn copy_from(&self, from: &Self) -> Result<()> {
        for (to, from) in self.node.properties.iter().zip(&from.node.properties) {
            match from.get()? {
                Some(value) => to.set(Some(value))?,
                None if to.schema().is_nullable() => to.set(None)?,
                None => {}
            }
        }
        Ok(())
    }
}

impl core::fmt::Debug for ConfigurationObject {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConfigurationObject")
            .field("type", &self.node.schema.name())
            .field("path", &self.path())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

/// Checks one object of a tree.
///
/// Implemented for closures, so `validate_with(&|o| ...)` works.
pub trait Validator {
    /// Returns an error if `object` is invalid.
    fn validate(&self, object: &ConfigurationObject) -> Result<(), ValidationError>;
}

impl<F> Validator for F
where
    F: Fn(&ConfigurationObject) -> Result<(), ValidationError>,
{
    fn validate(&self, object: &ConfigurationObject) -> Result<(), ValidationError> {
        self(object)
    }
}

struct WatchState {
    object: Weak<ObjectNode>,
    source: Arc<dyn ConfigurationSource>,
    token: Mutex<Option<ReloadToken>>,
    active: AtomicBool,
}

impl WatchState {
    /// Registers a one-shot callback that reloads and re-arms.
    fn arm(state: &Arc<Self>) {
        let weak = Arc::downgrade(state);
        let token = state.source.register_reload_callback(Box::new(move || {
            if let Some(state) = weak.upgrade() {
                Self::on_reload(&state);
            }
        }));
        *state.token.lock() = Some(token);
    }

    fn on_reload(state: &Arc<Self>) {
        if !state.active.load(Ordering::Acquire) {
            return;
        }
        let Some(node) = state.object.upgrade() else {
            return;
        };
        let object = ConfigurationObject { node };
        if object.is_disposed() {
            return;
        }
        {
            let _suspend = ReadOnlySuspendScope::enter();
            if let Err(err) = object.load_with(false) {
                log::warn!("reload of `{}` failed: {err}", object.path());
            }
        }
        if state.active.load(Ordering::Acquire) {
            Self::arm(state);
        }
    }
}

/// Keeps a [`ConfigurationObject`] in sync with its source's reloads.
///
/// Dropping the watch stops further reloads.
pub struct ReloadWatch {
    state: Arc<WatchState>,
}

impl ReloadWatch {
    /// Returns `true` while the watched object is alive.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.active.load(Ordering::Acquire)
            && self
                .state
                .object
                .upgrade()
                .is_some_and(|node| !node.disposed.load(Ordering::Acquire))
    }
}

impl Drop for ReloadWatch {
    fn drop(&mut self) {
        self.state.active.store(false, Ordering::Release);
        if let Some(token) = self.state.token.lock().take() {
            self.state.source.unregister_reload_callback(token);
        }
    }
}

impl core::fmt::Debug for ReloadWatch {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReloadWatch")
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declare::{Declaration, DeclaredConfiguration};
    use crate::registry::SchemaRegistry;
    use crate::schema::TypeShape;
    use crate::source::MemorySource;

    struct Tls;

    impl DeclaredConfiguration for Tls {
        const NAME: &'static str = "Tls";

        fn declare(d: &mut Declaration) {
            d.scalar::<bool>("Enabled").default(false);
            d.nullable::<String>("Certificate");
        }
    }

    struct Server;

    impl DeclaredConfiguration for Server {
        const NAME: &'static str = "Server";

        fn declare(d: &mut Declaration) {
            d.root_path("Server");
            d.scalar::<u16>("Port").default(80);
            d.object::<Tls>("Tls");
            d.scalar::<String>("Banner").default("hi").read_only();
        }
    }

    fn server(source: &Arc<MemorySource>) -> ConfigurationObject {
        SchemaRegistry::new()
            .materialize::<Server>(source.clone())
            .unwrap()
    }

    #[test]
    fn nested_objects_share_the_property_path() {
        let source = Arc::new(MemorySource::from_entries([
            ("Server:Port", "8080"),
            ("Server:Tls:Enabled", "true"),
        ]));
        let root = server(&source);
        root.load().unwrap();
        assert!(root.is_root());
        assert_eq!(root.path(), "Server");

        let tls = root.object("Tls").unwrap();
        assert!(!tls.is_root());
        assert_eq!(tls.path(), "Server:Tls");
        assert_eq!(tls.value::<bool>("Enabled").unwrap(), Some(true));
        assert_eq!(tls.value::<String>("Certificate").unwrap(), None);
        assert!(!root.is_dirty().unwrap());
    }

    #[test]
    fn unknown_property_and_type_errors() {
        let source = Arc::new(MemorySource::new());
        let root = server(&source);
        assert!(matches!(
            root.get("Nope"),
            Err(ConfigurationError::UnknownProperty { owner: "Server", .. })
        ));
        assert!(matches!(
            root.collection("Tls"),
            Err(ConfigurationError::TypeMismatch { .. })
        ));
        assert!(matches!(
            root.value::<bool>("Port"),
            Err(ConfigurationError::TypeMismatch { .. })
        ));
        assert!(matches!(
            root.set("Banner", "changed"),
            Err(ConfigurationError::ReadOnly { path }) if path == "Server:Banner"
        ));
    }

    #[test]
    fn nested_changes_bubble_under_the_owning_property() {
        let source = Arc::new(MemorySource::new());
        let root = server(&source);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        root.subscribe_property_changed(move |e| {
            sink.lock().push(e.property().to_owned());
            Ok(())
        })
        .unwrap();

        root.set("Port", 81).unwrap();
        root.set("Port", 81).unwrap();
        root.object("Tls").unwrap().set("Enabled", true).unwrap();
        assert_eq!(*seen.lock(), ["Port", "Tls"]);
        assert!(root.is_property_dirty("Tls").unwrap());
    }

    #[test]
    fn save_then_delete() {
        let source = Arc::new(MemorySource::new());
        let root = server(&source);
        root.object("Tls").unwrap().set("Certificate", "pem").unwrap();
        root.save().unwrap();
        assert_eq!(source.get("Server:Port").as_deref(), Some("80"));
        assert_eq!(source.get("Server:Tls:Certificate").as_deref(), Some("pem"));
        assert!(!root.is_dirty().unwrap());

        root.delete().unwrap();
        assert!(source.is_empty());
        assert!(root.is_dirty().unwrap());
    }

    #[test]
    fn clearing_a_nested_object_removes_its_section() {
        let source = Arc::new(MemorySource::from_entries([("Server:Tls:Enabled", "true")]));
        let root = server(&source);
        root.load().unwrap();
        root.clear("Tls").unwrap();
        assert_eq!(root.get("Tls").unwrap(), None);
        root.save().unwrap();
        assert_eq!(source.get("Server:Tls:Enabled"), None);
    }

    #[test]
    fn post_order_lists_children_first() {
        let source = Arc::new(MemorySource::new());
        let root = server(&source);
        let order: Vec<&'static str> = root
            .objects_post_order()
            .unwrap()
            .iter()
            .map(|o| o.schema().name())
            .collect();
        assert_eq!(order, ["Tls", "Server"]);

        let err = root
            .validate_with(&|o: &ConfigurationObject| {
                if o.schema().name() == "Tls" {
                    Err(ValidationError::new(o.path(), "certificate required"))
                } else {
                    Ok(())
                }
            })
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::Validation(ref e) if e.path() == "Server:Tls"
        ));
    }

    #[test]
    fn set_object_copies_instead_of_aliasing() {
        let source = Arc::new(MemorySource::new());
        let a = server(&source);
        let b = server(&source);
        a.object("Tls").unwrap().set("Enabled", true).unwrap();
        b.set("Tls", a.object("Tls").unwrap()).unwrap();

        let copied = b.object("Tls").unwrap();
        assert!(!copied.ptr_eq(&a.object("Tls").unwrap()));
        assert_eq!(copied.value::<bool>("Enabled").unwrap(), Some(true));
        assert_eq!(copied.path(), "Server:Tls");
        assert_eq!(a.get("Tls").unwrap(), b.get("Tls").unwrap());
    }

    #[test]
    fn disposed_objects_reject_access() {
        let source = Arc::new(MemorySource::new());
        let root = server(&source);
        let tls = root.object("Tls").unwrap();
        root.dispose();
        root.dispose();
        assert!(root.is_disposed());
        assert!(matches!(root.get("Port"), Err(ConfigurationError::Disposed)));
        assert!(matches!(tls.load(), Err(ConfigurationError::Disposed)));
    }

    #[test]
    fn nested_objects_are_released_with_their_root() {
        let source = Arc::new(MemorySource::new());
        let root = server(&source);
        let tls = root.object("Tls").unwrap();
        tls.dispose();
        assert!(!tls.is_disposed());
        assert!(root.is_dirty().is_ok());
        root.save().unwrap();
        assert_eq!(source.get("Server:Port").as_deref(), Some("80"));

        root.dispose();
        assert!(tls.is_disposed());
    }

    #[test]
    fn watch_reload_follows_the_source() {
        let source = Arc::new(MemorySource::from_entries([("Server:Port", "1")]));
        let root = server(&source);
        root.load().unwrap();
        let watch = root.watch_reload().unwrap();
        assert!(watch.is_active());

        source.insert("Server:Port", "2");
        source.reload();
        assert_eq!(root.value::<u16>("Port").unwrap(), Some(2));

        source.insert("Server:Port", "bad");
        source.reload();
        assert_eq!(root.value::<u16>("Port").unwrap(), Some(2));

        source.insert("Server:Port", "3");
        source.reload();
        assert_eq!(root.value::<u16>("Port").unwrap(), Some(3));

        drop(watch);
        source.insert("Server:Port", "4");
        source.reload();
        assert_eq!(root.value::<u16>("Port").unwrap(), Some(3));
    }
}

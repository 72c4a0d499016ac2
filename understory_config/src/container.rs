// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-property value holder.
//!
//! Every property of an object and every element of a collection or
//! dictionary is a [`ValueContainer`]. It owns the current and last-saved
//! value and runs the load/save/delete protocol for that one path.
//!
//! The state mutex is never held while calling into another node: nested
//! loads, saves, and change notification all happen after it is released.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};

use crate::collection::ConfigurationCollection;
use crate::dictionary::ConfigurationDictionary;
use crate::error::{AggregateNotificationError, BoxError, ConfigurationError, Result};
use crate::node::{ConfigValue, ParentNode};
use crate::object::ConfigurationObject;
use crate::path::compute_path;
use crate::schema::{ElementImplementation, PropertySchema};
use crate::scope::{EventSuppressionScope, ReadOnlySuspendScope};
use crate::source::{ConfigurationSource, clear_section};
use crate::value::ScalarType;

#[derive(Debug, Default)]
struct ValueState {
    current: Option<ConfigValue>,
    original: Option<ConfigValue>,
    is_saved: bool,
    disposed: bool,
}

/// Scalars compare by value, composites by identity.
fn same_value(a: &Option<ConfigValue>, b: &Option<ConfigValue>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(ConfigValue::Scalar(x)), Some(ConfigValue::Scalar(y))) => x == y,
        (Some(x), Some(y)) => x.same_instance(y),
        _ => false,
    }
}

pub(crate) struct ValueContainer {
    schema: Arc<PropertySchema>,
    parent: Weak<dyn ParentNode>,
    this: Weak<Self>,
    source: Arc<dyn ConfigurationSource>,
    state: Mutex<ValueState>,
}

impl ValueContainer {
    /// Creates an unloaded container holding the declared default.
    pub(crate) fn new(
        schema: Arc<PropertySchema>,
        parent: Weak<dyn ParentNode>,
        source: Arc<dyn ConfigurationSource>,
    ) -> Arc<Self> {
        let seed = schema.default_value().cloned().map(ConfigValue::Scalar);
        Arc::new_cyclic(|this| Self {
            schema,
            parent,
            this: this.clone(),
            source,
            state: Mutex::new(ValueState {
                current: seed.clone(),
                original: seed,
                is_saved: false,
                disposed: false,
            }),
        })
    }

    pub(crate) fn schema(&self) -> &Arc<PropertySchema> {
        &self.schema
    }

    pub(crate) fn path(&self) -> String {
        let parent = self.parent.upgrade().map(|p| p.path());
        compute_path(parent.as_deref(), self.schema.path_fragment())
    }

    fn lock_live(&self) -> Result<MutexGuard<'_, ValueState>> {
        let state = self.state.lock();
        if state.disposed {
            Err(ConfigurationError::Disposed)
        } else {
            Ok(state)
        }
    }

    /// Builds an empty node of this property's composite kind, owned by `self`.
    fn materialize(&self) -> Option<ConfigValue> {
        let parent: Weak<dyn ParentNode> = self.this.clone();
        let source = self.source.clone();
        Some(match self.schema.implementation() {
            ElementImplementation::Naive(_) => return None,
            ElementImplementation::ConfigurationObject(schema) => ConfigValue::Object(
                ConfigurationObject::attached(schema.clone(), parent, source),
            ),
            ElementImplementation::OrderedCollection { element, read_only } => {
                ConfigValue::Collection(ConfigurationCollection::attached(
                    element.clone(),
                    *read_only,
                    parent,
                    source,
                ))
            }
            ElementImplementation::NamedDictionary { element, read_only } => {
                ConfigValue::Dictionary(ConfigurationDictionary::attached(
                    element.clone(),
                    *read_only,
                    parent,
                    source,
                ))
            }
        })
    }

    /// Returns the current value, creating an empty composite on first access.
    pub(crate) fn get(&self) -> Result<Option<ConfigValue>> {
        let mut state = self.lock_live()?;
        if state.current.is_none() && state.original.is_none() && !self.schema.is_nullable() {
            if let Some(fresh) = self.materialize() {
                state.current = Some(fresh.clone());
                state.original = Some(fresh);
            }
        }
        Ok(state.current.clone())
    }

    /// Current value without materializing or checking disposal.
    pub(crate) fn peek(&self) -> Option<ConfigValue> {
        self.state.lock().current.clone()
    }

    fn ensure_writable(&self) -> Result<()> {
        if ReadOnlySuspendScope::is_active() {
            return Ok(());
        }
        let parent_read_only = self.parent.upgrade().is_some_and(|p| p.is_read_only());
        if self.schema.is_read_only() || parent_read_only {
            return Err(ConfigurationError::ReadOnly { path: self.path() });
        }
        Ok(())
    }

    fn mismatch(&self, actual: String) -> ConfigurationError {
        ConfigurationError::TypeMismatch {
            path: self.path(),
            expected: self.schema.implementation().to_string(),
            actual,
        }
    }

    /// Type-checks `value` against the schema.
    ///
    /// Numeric scalars are converted. A composite from elsewhere is copied
    /// into a fresh node owned by this container; the current instance is
    /// kept as is.
    fn coerce(&self, value: Option<ConfigValue>) -> Result<Option<ConfigValue>> {
        let Some(value) = value else {
            if self.schema.implementation().is_naive() && !self.schema.is_nullable() {
                return Err(self.mismatch("no value".to_owned()));
            }
            return Ok(None);
        };
        match (self.schema.implementation(), value) {
            (ElementImplementation::Naive(ty), ConfigValue::Scalar(v)) => match v.convert(*ty) {
                Some(converted) => Ok(Some(ConfigValue::Scalar(converted))),
                None => Err(self.mismatch(v.scalar_type().to_string())),
            },
            (implementation, value) if value.matches(implementation) => {
                let is_current = self
                    .state
                    .lock()
                    .current
                    .as_ref()
                    .is_some_and(|c| c.same_instance(&value));
                if is_current {
                    return Ok(Some(value));
                }
                let fresh = self
                    .materialize()
                    .ok_or_else(|| self.mismatch(value.describe()))?;
                {
                    let _suspend = ReadOnlySuspendScope::enter();
                    let _quiet = EventSuppressionScope::enter();
                    value.copy_into(&fresh)?;
                }
                Ok(Some(fresh))
            }
            (_, value) => Err(self.mismatch(value.describe())),
        }
    }

    fn notify(&self) -> Result<()> {
        let mut failures: Vec<BoxError> = Vec::new();
        if let Some(parent) = self.parent.upgrade() {
            parent.child_changed(self.schema.name(), &mut failures);
        }
        AggregateNotificationError::into_result(failures)
    }

    /// Assigns a new value, notifying the parent if it changed.
    pub(crate) fn set(&self, value: Option<ConfigValue>) -> Result<()> {
        drop(self.lock_live()?);
        self.ensure_writable()?;
        let value = self.coerce(value)?;
        let changed = {
            let mut state = self.lock_live()?;
            if same_value(&state.current, &value) {
                false
            } else {
                state.current = value;
                true
            }
        };
        if changed {
            self.notify()?;
        }
        Ok(())
    }

    /// Installs the initial value of a new collection element.
    ///
    /// The element counts as unsaved, so it reports dirty until saved.
    pub(crate) fn seed(&self, value: Option<ConfigValue>) -> Result<()> {
        let value = self.coerce(value)?;
        let mut state = self.lock_live()?;
        state.current = value.clone();
        state.original = value;
        state.is_saved = false;
        Ok(())
    }

    pub(crate) fn is_dirty(&self) -> Result<bool> {
        if !self.schema.persistence().saves() {
            return Ok(false);
        }
        let (current, original, is_saved) = {
            let state = self.lock_live()?;
            (state.current.clone(), state.original.clone(), state.is_saved)
        };
        if !same_value(&current, &original) {
            return Ok(true);
        }
        match current {
            None => Ok(false),
            Some(ConfigValue::Scalar(v)) => {
                Ok(!is_saved && self.schema.default_value() != Some(&v))
            }
            Some(composite) => composite.is_dirty(),
        }
    }

    /// Loads this property from the source.
    pub(crate) fn read_value(&self, initializing: bool) -> Result<()> {
        drop(self.lock_live()?);
        if !self.schema.persistence().loads() {
            return Ok(());
        }
        let path = self.path();
        let changed = match self.schema.implementation() {
            ElementImplementation::Naive(ty) => {
                let value = self.parse_raw(&path, *ty)?;
                let mut state = self.lock_live()?;
                let changed = !same_value(&state.current, &value);
                state.current = value.clone();
                state.original = value;
                state.is_saved = true;
                changed
            }
            implementation => {
                let existing = self.lock_live()?.current.clone();
                let (instance, fresh) = match existing {
                    Some(v) if v.matches(implementation) => (v, false),
                    _ => match self.materialize() {
                        Some(v) => (v, true),
                        None => return Ok(()),
                    },
                };
                instance.load(initializing || fresh)?;
                let mut state = self.lock_live()?;
                let changed = !state
                    .current
                    .as_ref()
                    .is_some_and(|c| c.same_instance(&instance));
                state.current = Some(instance.clone());
                state.original = Some(instance);
                state.is_saved = true;
                changed
            }
        };
        if changed {
            self.notify()?;
        }
        Ok(())
    }

    fn parse_raw(&self, path: &str, ty: ScalarType) -> Result<Option<ConfigValue>> {
        let Some(raw) = self.source.get(path) else {
            return match self.schema.default_value() {
                Some(default) => Ok(Some(ConfigValue::Scalar(default.clone()))),
                None if self.schema.is_nullable() => Ok(None),
                None => Err(ConfigurationError::MissingValue {
                    path: path.to_owned(),
                }),
            };
        };
        if raw.trim().is_empty() && self.schema.is_nullable() && ty != ScalarType::String {
            return Ok(None);
        }
        match ty.parse(&raw) {
            Some(v) => Ok(Some(ConfigValue::Scalar(v))),
            None => Err(ConfigurationError::ParseFailure {
                path: path.to_owned(),
                raw,
                expected: ty,
            }),
        }
    }

    fn write_raw(&self, path: &str, value: Option<&str>) -> Result<()> {
        self.source
            .set(path, value)
            .map_err(|source| ConfigurationError::Source {
                path: path.to_owned(),
                source,
            })
    }

    /// Writes this property to the source and marks it saved.
    pub(crate) fn write_value(&self) -> Result<()> {
        if !self.schema.persistence().saves() {
            return Ok(());
        }
        let path = self.path();
        let (current, original) = {
            let state = self.lock_live()?;
            (state.current.clone(), state.original.clone())
        };
        match (&current, &original) {
            (Some(ConfigValue::Scalar(v)), _) => {
                self.write_raw(&path, Some(v.to_string().as_str()))?;
            }
            (Some(composite), original) => {
                if let Some(replaced) = original.as_ref().filter(|o| !o.same_instance(composite)) {
                    replaced.delete()?;
                }
                composite.save()?;
            }
            (None, Some(ConfigValue::Scalar(_))) => self.write_raw(&path, None)?,
            (None, Some(removed)) => removed.delete()?,
            (None, None) if self.schema.is_nullable() => self.write_raw(&path, None)?,
            (None, None) => {}
        }
        let mut state = self.lock_live()?;
        state.original = current;
        state.is_saved = true;
        Ok(())
    }

    /// Removes this property from the source.
    ///
    /// The in-memory value is kept but counts as unsaved again.
    pub(crate) fn delete_value(&self) -> Result<()> {
        if !self.schema.persistence().saves() {
            return Ok(());
        }
        let path = self.path();
        let current = self.lock_live()?.current.clone();
        match current {
            _ if self.schema.implementation().is_naive() => self.write_raw(&path, None)?,
            Some(composite) => composite.delete()?,
            None => clear_section(&*self.source, &path).map_err(|source| {
                ConfigurationError::Source {
                    path: path.clone(),
                    source,
                }
            })?,
        }
        self.lock_live()?.is_saved = false;
        Ok(())
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    pub(crate) fn dispose(&self) {
        let (current, original) = {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            (state.current.take(), state.original.take())
        };
        if let Some(original) = &original {
            if !current.as_ref().is_some_and(|c| c.same_instance(original)) {
                original.dispose();
            }
        }
        if let Some(current) = current {
            current.dispose();
        }
    }
}

impl ParentNode for ValueContainer {
    fn path(&self) -> String {
        Self::path(self)
    }

    fn is_read_only(&self) -> bool {
        self.parent.upgrade().is_some_and(|p| p.is_read_only())
    }

    fn child_changed(&self, _property: &str, failures: &mut Vec<BoxError>) {
        if let Some(parent) = self.parent.upgrade() {
            parent.child_changed(self.schema.name(), failures);
        }
    }
}

impl core::fmt::Debug for ValueContainer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ValueContainer")
            .field("name", &self.schema.name())
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::PathFragment;
    use crate::schema::{Persistence, TypeShape};
    use crate::source::MemorySource;
    use crate::value::Value;

    struct Root(String);

    impl ParentNode for Root {
        fn path(&self) -> String {
            self.0.clone()
        }

        fn is_read_only(&self) -> bool {
            false
        }

        fn child_changed(&self, _property: &str, _failures: &mut Vec<BoxError>) {}
    }

    fn schema(
        shape: TypeShape,
        default: Option<Value>,
        persistence: Persistence,
    ) -> Arc<PropertySchema> {
        let TypeShape::Scalar(ty) = *shape.underlying() else {
            panic!("scalar shapes only");
        };
        Arc::new(PropertySchema {
            name: "Port".into(),
            has_default: default.is_some() || shape.is_nullable(),
            declared_type: shape,
            default_value: default,
            read_only: false,
            persistence,
            path_fragment: Some(PathFragment::suffix("Port").unwrap()),
            implementation: ElementImplementation::Naive(ty),
        })
    }

    fn container(
        schema: Arc<PropertySchema>,
        source: &Arc<MemorySource>,
    ) -> (Arc<Root>, Arc<ValueContainer>) {
        let root = Arc::new(Root("Server".into()));
        let parent: Weak<dyn ParentNode> = Arc::downgrade(&root) as Weak<dyn ParentNode>;
        let source: Arc<dyn ConfigurationSource> = source.clone();
        (root, ValueContainer::new(schema, parent, source))
    }

    #[test]
    fn default_is_clean_until_changed() {
        let source = Arc::new(MemorySource::new());
        let (_root, c) = container(
            schema(
                TypeShape::scalar::<i32>(),
                Some(Value::I32(42)),
                Persistence::default(),
            ),
            &source,
        );
        assert_eq!(c.path(), "Server:Port");
        assert_eq!(c.get().unwrap(), Some(ConfigValue::from(42)));
        assert!(!c.is_dirty().unwrap());

        c.set(Some(ConfigValue::from(7_u8))).unwrap();
        assert_eq!(c.get().unwrap(), Some(ConfigValue::from(7)));
        assert!(c.is_dirty().unwrap());

        c.write_value().unwrap();
        assert!(!c.is_dirty().unwrap());
        assert_eq!(source.get("Server:Port").as_deref(), Some("7"));
    }

    #[test]
    fn read_value_reports_missing_and_unparseable() {
        let source = Arc::new(MemorySource::new());
        let (_root, c) = container(
            schema(TypeShape::scalar::<i32>(), None, Persistence::default()),
            &source,
        );
        assert!(matches!(
            c.read_value(false),
            Err(ConfigurationError::MissingValue { path }) if path == "Server:Port"
        ));

        source.insert("Server:Port", "eighty");
        assert!(matches!(
            c.read_value(false),
            Err(ConfigurationError::ParseFailure { raw, expected: ScalarType::I32, .. })
                if raw == "eighty"
        ));

        source.insert("Server:Port", " 80 ");
        c.read_value(false).unwrap();
        assert_eq!(c.get().unwrap(), Some(ConfigValue::from(80)));
        assert!(!c.is_dirty().unwrap());
    }

    #[test]
    fn nullable_blank_reads_as_none_and_clears_on_save() {
        let source = Arc::new(MemorySource::from_entries([("Server:Port", "")]));
        let (_root, c) = container(
            schema(TypeShape::nullable::<u16>(), None, Persistence::default()),
            &source,
        );
        c.read_value(false).unwrap();
        assert_eq!(c.get().unwrap(), None);

        c.set(Some(ConfigValue::from(1))).unwrap();
        c.write_value().unwrap();
        assert_eq!(source.get("Server:Port").as_deref(), Some("1"));

        c.set(None).unwrap();
        assert!(c.is_dirty().unwrap());
        c.write_value().unwrap();
        assert_eq!(source.get("Server:Port"), None);
    }

    #[test]
    fn set_rejects_wrong_types() {
        let source = Arc::new(MemorySource::new());
        let (_root, c) = container(
            schema(TypeShape::scalar::<u8>(), Some(Value::U8(1)), Persistence::default()),
            &source,
        );
        assert!(matches!(
            c.set(Some(ConfigValue::from(300))),
            Err(ConfigurationError::TypeMismatch { .. })
        ));
        assert!(matches!(
            c.set(None),
            Err(ConfigurationError::TypeMismatch { .. })
        ));
        assert_eq!(c.get().unwrap(), Some(ConfigValue::from(1_u8)));
    }

    #[test]
    fn unsaved_properties_are_never_dirty() {
        let source = Arc::new(MemorySource::new());
        let (_root, c) = container(
            schema(TypeShape::scalar::<i32>(), Some(Value::I32(1)), Persistence::LOAD),
            &source,
        );
        c.set(Some(ConfigValue::from(2))).unwrap();
        assert!(!c.is_dirty().unwrap());
        c.write_value().unwrap();
        assert!(source.is_empty());
    }

    #[test]
    fn disposed_container_rejects_access() {
        let source = Arc::new(MemorySource::new());
        let (_root, c) = container(
            schema(TypeShape::scalar::<i32>(), Some(Value::I32(1)), Persistence::default()),
            &source,
        );
        c.dispose();
        c.dispose();
        assert!(matches!(c.get(), Err(ConfigurationError::Disposed)));
        assert!(matches!(
            c.set(Some(ConfigValue::from(1))),
            Err(ConfigurationError::Disposed)
        ));
    }
}

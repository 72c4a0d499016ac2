// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Schema registry.
//!
//! This module provides [`SchemaRegistry`], which turns declared
//! configuration types into cached [`ObjectSchema`]s and materializes root
//! [`ConfigurationObject`]s from them.

use core::any::TypeId;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::declare::{DeclaredConfiguration, DeclaredProperty};
use crate::error::SchemaError;
use crate::object::ConfigurationObject;
use crate::path::PathFragment;
use crate::schema::{
    ElementImplementation, ObjectSchema, ObjectType, Persistence, PropertySchema, TypeShape,
};
use crate::source::ConfigurationSource;

/// Maximum nesting of object types below a root.
pub const MAX_DEPTH: usize = 32;

/// Derives and caches schemas for declared configuration types.
///
/// Schemas are derived once per type and shared afterwards. The registry is
/// safe to use from several threads.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use understory_config::{Declaration, DeclaredConfiguration, MemorySource, SchemaRegistry};
///
/// struct Limits;
///
/// impl DeclaredConfiguration for Limits {
///     const NAME: &'static str = "Limits";
///
///     fn declare(d: &mut Declaration) {
///         d.root_path("Limits");
///         d.scalar::<u32>("MaxConnections").default(64);
///     }
/// }
///
/// let registry = SchemaRegistry::new();
/// let source = Arc::new(MemorySource::from_entries([("Limits:MaxConnections", "128")]));
///
/// let limits = registry.materialize::<Limits>(source).unwrap();
/// limits.load().unwrap();
/// assert_eq!(limits.value::<u32>("MaxConnections").unwrap(), Some(128));
/// assert!(registry.contains::<Limits>());
/// ```
#[derive(Default)]
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<TypeId, Arc<ObjectSchema>>>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the schema of `T`, deriving it on first use.
    pub fn schema_of<T: DeclaredConfiguration>(&self) -> Result<Arc<ObjectSchema>, SchemaError> {
        self.resolve(ObjectType::of::<T>(), 0)
    }

    /// Returns the property schemas of `T` in declaration order.
    pub fn derive_schema<T: DeclaredConfiguration>(
        &self,
    ) -> Result<Vec<Arc<PropertySchema>>, SchemaError> {
        Ok(self.schema_of::<T>()?.properties().to_vec())
    }

    /// Creates an unloaded root object of type `T` over `source`.
    ///
    /// Call [`ConfigurationObject::load`] to populate it.
    pub fn materialize<T: DeclaredConfiguration>(
        &self,
        source: Arc<dyn ConfigurationSource>,
    ) -> Result<ConfigurationObject, SchemaError> {
        Ok(ConfigurationObject::new(self.schema_of::<T>()?, source))
    }

    /// Returns `true` if the schema of `T` has been derived.
    #[must_use]
    pub fn contains<T: DeclaredConfiguration>(&self) -> bool {
        self.schemas.read().contains_key(&TypeId::of::<T>())
    }

    /// Returns the number of cached schemas, nested types included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.read().len()
    }

    /// Returns `true` if no schema has been derived yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.read().is_empty()
    }

    fn resolve(&self, ty: ObjectType, depth: usize) -> Result<Arc<ObjectSchema>, SchemaError> {
        if let Some(schema) = self.schemas.read().get(&ty.type_id()) {
            return Ok(schema.clone());
        }
        if depth > MAX_DEPTH {
            return Err(SchemaError::RecursionLimit {
                owner: ty.name(),
                limit: MAX_DEPTH,
            });
        }

        // Nested types are resolved without holding the cache lock.
        let declaration = ty.declaration();
        let path = declaration
            .path
            .map(|(kind, value)| PathFragment::new(kind, value))
            .transpose()?;

        let mut properties = Vec::with_capacity(declaration.properties.len());
        let mut by_name = HashMap::with_capacity(declaration.properties.len());
        for declared in declaration.properties {
            if by_name.contains_key(&declared.name) {
                return Err(SchemaError::DuplicateProperty {
                    owner: ty.name(),
                    property: declared.name,
                });
            }
            let property = self.build_property(ty.name(), declared, depth)?;
            by_name.insert(property.name.clone(), properties.len());
            properties.push(Arc::new(property));
        }

        let schema = Arc::new(ObjectSchema {
            name: ty.name(),
            type_id: ty.type_id(),
            path,
            properties,
            by_name,
        });
        log::debug!("derived schema for `{}`", ty.name());

        // Another thread may have won the race; keep the first schema.
        Ok(self
            .schemas
            .write()
            .entry(ty.type_id())
            .or_insert(schema)
            .clone())
    }

    fn build_property(
        &self,
        owner: &'static str,
        declared: DeclaredProperty,
        depth: usize,
    ) -> Result<PropertySchema, SchemaError> {
        let DeclaredProperty {
            name,
            shape,
            default,
            persistence,
            read_only,
            path,
        } = declared;

        let fragment = match path {
            Some((kind, value)) => PathFragment::new(kind, value)?,
            None => PathFragment::suffix(name.as_str())?,
        };
        let implementation = self.classify(owner, &name, &shape, persistence, depth)?;

        let default_value = match (&implementation, default) {
            (_, None) => None,
            (ElementImplementation::Naive(ty), Some(value)) => {
                Some(
                    value
                        .convert(*ty)
                        .ok_or_else(|| SchemaError::DefaultTypeMismatch {
                            owner,
                            property: name.clone(),
                            expected: ty.to_string(),
                            actual: value.scalar_type().to_string(),
                        })?,
                )
            }
            (other, Some(value)) => {
                return Err(SchemaError::DefaultTypeMismatch {
                    owner,
                    property: name,
                    expected: other.to_string(),
                    actual: value.scalar_type().to_string(),
                });
            }
        };

        let has_default =
            default_value.is_some() || shape.is_nullable() || !implementation.is_naive();
        if !persistence.loads() && !has_default {
            return Err(SchemaError::InvalidPersistence {
                owner,
                property: name,
            });
        }

        Ok(PropertySchema {
            name,
            declared_type: shape,
            default_value,
            has_default,
            read_only,
            persistence,
            path_fragment: Some(fragment),
            implementation,
        })
    }

    fn classify(
        &self,
        owner: &'static str,
        property: &str,
        shape: &TypeShape,
        persistence: Persistence,
        depth: usize,
    ) -> Result<ElementImplementation, SchemaError> {
        Ok(match shape {
            TypeShape::Nullable(inner) => {
                return self.classify(owner, property, inner, persistence, depth);
            }
            TypeShape::Scalar(ty) => ElementImplementation::Naive(*ty),
            TypeShape::Object(ty) => {
                ElementImplementation::ConfigurationObject(self.resolve(*ty, depth + 1)?)
            }
            TypeShape::Collection { element, read_only } => {
                ElementImplementation::OrderedCollection {
                    element: self.element_schema(owner, property, element, persistence, depth)?,
                    read_only: *read_only,
                }
            }
            TypeShape::Dictionary { element, read_only } => {
                ElementImplementation::NamedDictionary {
                    element: self.element_schema(owner, property, element, persistence, depth)?,
                    read_only: *read_only,
                }
            }
            TypeShape::Array(_) | TypeShape::Map(_) => {
                return Err(SchemaError::UnsupportedShape {
                    owner,
                    property: property.to_owned(),
                    shape: shape.to_string(),
                });
            }
        })
    }

    /// Elements share their container's persistence and have no path of their own.
    fn element_schema(
        &self,
        owner: &'static str,
        property: &str,
        shape: &TypeShape,
        persistence: Persistence,
        depth: usize,
    ) -> Result<Arc<PropertySchema>, SchemaError> {
        let implementation = self.classify(owner, property, shape, persistence, depth)?;
        Ok(Arc::new(PropertySchema {
            name: property.to_owned(),
            declared_type: shape.clone(),
            default_value: None,
            has_default: shape.is_nullable() || !implementation.is_naive(),
            read_only: false,
            persistence,
            path_fragment: None,
            implementation,
        }))
    }
}

impl core::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let schemas = self.schemas.read();
        let mut names: Vec<&str> = schemas.values().map(|s| s.name()).collect();
        names.sort_unstable();
        f.debug_struct("SchemaRegistry")
            .field("schemas", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declare::Declaration;
    use crate::path::PathKind;
    use crate::value::{ScalarType, Value};

    struct Leaf;

    impl DeclaredConfiguration for Leaf {
        const NAME: &'static str = "Leaf";

        fn declare(d: &mut Declaration) {
            d.scalar::<u16>("Port").default(80);
            d.nullable::<String>("Name");
        }
    }

    struct Tree;

    impl DeclaredConfiguration for Tree {
        const NAME: &'static str = "Tree";

        fn declare(d: &mut Declaration) {
            d.root_path("Tree");
            d.object::<Leaf>("Leaf").suffix_path("Primary");
            d.collection("Leaves", TypeShape::object::<Leaf>());
            d.dictionary("Tags", TypeShape::scalar::<String>())
                .persistence(Persistence::LOAD);
        }
    }

    struct Ping;
    struct Pong;

    impl DeclaredConfiguration for Ping {
        const NAME: &'static str = "Ping";

        fn declare(d: &mut Declaration) {
            d.object::<Pong>("Pong");
        }
    }

    impl DeclaredConfiguration for Pong {
        const NAME: &'static str = "Pong";

        fn declare(d: &mut Declaration) {
            d.object::<Ping>("Ping");
        }
    }

    #[test]
    fn derive_schema_keeps_declaration_order() {
        let registry = SchemaRegistry::new();
        let props = registry.derive_schema::<Tree>().unwrap();
        let names: Vec<&str> = props.iter().map(|p| p.name()).collect();
        assert_eq!(names, ["Leaf", "Leaves", "Tags"]);

        assert_eq!(
            props[0].path_fragment().map(PathFragment::value),
            Some("Primary")
        );
        assert!(matches!(
            props[1].implementation(),
            ElementImplementation::OrderedCollection {
                read_only: false,
                ..
            }
        ));
        let ElementImplementation::NamedDictionary { element, .. } = props[2].implementation()
        else {
            panic!("Tags should be a dictionary");
        };
        assert_eq!(element.persistence(), Persistence::LOAD);
        assert!(element.path_fragment().is_none());
    }

    #[test]
    fn nested_schemas_are_cached_once() {
        let registry = SchemaRegistry::new();
        let tree = registry.schema_of::<Tree>().unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains::<Leaf>());

        let leaf = registry.schema_of::<Leaf>().unwrap();
        let ElementImplementation::ConfigurationObject(nested) =
            tree.properties()[0].implementation()
        else {
            panic!("Leaf should be an object");
        };
        assert!(Arc::ptr_eq(nested, &leaf));
        assert_eq!(tree.path().map(PathFragment::kind), Some(PathKind::Root));
    }

    #[test]
    fn defaults_are_converted_to_the_declared_type() {
        let registry = SchemaRegistry::new();
        let leaf = registry.schema_of::<Leaf>().unwrap();
        let port = leaf.property("Port").unwrap();
        assert_eq!(port.default_value(), Some(&Value::U16(80)));
        assert!(port.has_default());

        let name = leaf.property("Name").unwrap();
        assert_eq!(name.default_value(), None);
        assert!(name.has_default());
        assert_eq!(
            name.underlying_type(),
            &TypeShape::Scalar(ScalarType::String)
        );
    }

    #[test]
    fn recursive_types_hit_the_depth_limit() {
        let registry = SchemaRegistry::new();
        let err = registry.schema_of::<Ping>().unwrap_err();
        assert!(matches!(
            err,
            SchemaError::RecursionLimit {
                limit: MAX_DEPTH,
                ..
            }
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn bare_arrays_are_rejected() {
        struct WithArray;

        impl DeclaredConfiguration for WithArray {
            const NAME: &'static str = "WithArray";

            fn declare(d: &mut Declaration) {
                d.property("Hosts", TypeShape::array(TypeShape::scalar::<String>()));
            }
        }

        let err = SchemaRegistry::new().schema_of::<WithArray>().unwrap_err();
        assert_eq!(
            err,
            SchemaError::UnsupportedShape {
                owner: "WithArray",
                property: "Hosts".into(),
                shape: "[String]".into(),
            }
        );
    }

    #[test]
    fn save_only_without_default_is_rejected() {
        struct SaveOnly;

        impl DeclaredConfiguration for SaveOnly {
            const NAME: &'static str = "SaveOnly";

            fn declare(d: &mut Declaration) {
                d.scalar::<i32>("Counter").persistence(Persistence::SAVE);
            }
        }

        struct Ignored;

        impl DeclaredConfiguration for Ignored {
            const NAME: &'static str = "Ignored";

            fn declare(d: &mut Declaration) {
                d.scalar::<i32>("Counter")
                    .persistence(Persistence::IGNORE)
                    .default(1);
            }
        }

        let registry = SchemaRegistry::new();
        assert!(matches!(
            registry.schema_of::<SaveOnly>(),
            Err(SchemaError::InvalidPersistence { .. })
        ));
        assert!(registry.schema_of::<Ignored>().is_ok());
    }

    #[test]
    fn bad_defaults_and_duplicates_are_rejected() {
        struct BadDefault;

        impl DeclaredConfiguration for BadDefault {
            const NAME: &'static str = "BadDefault";

            fn declare(d: &mut Declaration) {
                d.scalar::<u8>("Small").default(1000);
            }
        }

        struct Twice;

        impl DeclaredConfiguration for Twice {
            const NAME: &'static str = "Twice";

            fn declare(d: &mut Declaration) {
                d.scalar::<bool>("Flag");
                d.scalar::<bool>("Flag");
            }
        }

        struct BlankPath;

        impl DeclaredConfiguration for BlankPath {
            const NAME: &'static str = "BlankPath";

            fn declare(d: &mut Declaration) {
                d.scalar::<bool>("Flag").root_path(" ");
            }
        }

        let registry = SchemaRegistry::new();
        assert!(matches!(
            registry.schema_of::<BadDefault>(),
            Err(SchemaError::DefaultTypeMismatch { .. })
        ));
        assert!(matches!(
            registry.schema_of::<Twice>(),
            Err(SchemaError::DuplicateProperty { .. })
        ));
        assert!(matches!(
            registry.schema_of::<BlankPath>(),
            Err(SchemaError::InvalidPath { .. })
        ));
    }
}

// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Property schemas.
//!
//! A [`PropertySchema`] is the immutable description of one declared
//! property. An [`ObjectSchema`] is the ordered list of them for one declared
//! type. Both are produced by the [`SchemaRegistry`](crate::SchemaRegistry)
//! and shared through [`Arc`] for the lifetime of the registry.

use core::any::TypeId;
use core::fmt;
use std::sync::Arc;

use hashbrown::HashMap;

use crate::declare::{DeclaredConfiguration, Declaration};
use crate::path::PathFragment;
use crate::value::{Scalar, ScalarType, Value};

bitflags::bitflags! {
    /// Whether a property is read from and written to the configuration source.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Persistence: u8 {
        /// Read on load.
        const LOAD = 0b0000_0001;
        /// Written on save and delete.
        const SAVE = 0b0000_0010;
        /// Read on load, written on save and delete.
        const LOAD_SAVE = Self::LOAD.bits() | Self::SAVE.bits();
    }
}

impl Persistence {
    /// Neither loaded nor saved.
    pub const IGNORE: Self = Self::empty();

    /// Returns `true` if the property is read on load.
    #[must_use]
    #[inline]
    pub fn loads(self) -> bool {
        self.contains(Self::LOAD)
    }

    /// Returns `true` if the property is written on save and delete.
    #[must_use]
    #[inline]
    pub fn saves(self) -> bool {
        self.contains(Self::SAVE)
    }
}

impl Default for Persistence {
    fn default() -> Self {
        Self::LOAD_SAVE
    }
}

/// A declared configuration type, usable as a nested object shape.
#[derive(Clone, Copy)]
pub struct ObjectType {
    type_id: TypeId,
    name: &'static str,
    declare: fn(&mut Declaration),
}

impl ObjectType {
    /// Returns the shape of `T`.
    #[must_use]
    pub fn of<T: DeclaredConfiguration>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: T::NAME,
            declare: T::declare,
        }
    }

    /// Returns the [`TypeId`] of the declaring Rust type.
    #[must_use]
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the declared type name.
    #[must_use]
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn declaration(&self) -> Declaration {
        let mut declaration = Declaration::new();
        (self.declare)(&mut declaration);
        declaration
    }
}

impl PartialEq for ObjectType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ObjectType {}

impl fmt::Debug for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObjectType").field(&self.name).finish()
    }
}

/// The declared type of a property.
///
/// The registry classifies each shape into an [`ElementImplementation`].
/// [`TypeShape::Array`] and [`TypeShape::Map`] stand for plain `Vec`/`HashMap`
/// style fields; they are rejected in favor of the collection and dictionary
/// shapes, which track changes per element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeShape {
    /// A scalar leaf.
    Scalar(ScalarType),
    /// An optional value of the inner shape.
    Nullable(Box<TypeShape>),
    /// A nested configuration object.
    Object(ObjectType),
    /// An ordered, index-keyed collection.
    Collection {
        /// Element shape.
        element: Box<TypeShape>,
        /// Whether structural mutation is rejected.
        read_only: bool,
    },
    /// A string-keyed dictionary.
    Dictionary {
        /// Element shape.
        element: Box<TypeShape>,
        /// Whether structural mutation is rejected.
        read_only: bool,
    },
    /// A bare array. Unsupported.
    Array(Box<TypeShape>),
    /// A bare map. Unsupported.
    Map(Box<TypeShape>),
}

impl TypeShape {
    /// A scalar of Rust type `T`.
    #[must_use]
    pub fn scalar<T: Scalar>() -> Self {
        Self::Scalar(T::TYPE)
    }

    /// An optional scalar of Rust type `T`.
    #[must_use]
    pub fn nullable<T: Scalar>() -> Self {
        Self::Nullable(Box::new(Self::Scalar(T::TYPE)))
    }

    /// A nested object of declared type `T`.
    #[must_use]
    pub fn object<T: DeclaredConfiguration>() -> Self {
        Self::Object(ObjectType::of::<T>())
    }

    /// A mutable ordered collection.
    #[must_use]
    pub fn collection(element: Self) -> Self {
        Self::Collection {
            element: Box::new(element),
            read_only: false,
        }
    }

    /// A read-only ordered collection.
    #[must_use]
    pub fn read_only_collection(element: Self) -> Self {
        Self::Collection {
            element: Box::new(element),
            read_only: true,
        }
    }

    /// A mutable dictionary.
    #[must_use]
    pub fn dictionary(element: Self) -> Self {
        Self::Dictionary {
            element: Box::new(element),
            read_only: false,
        }
    }

    /// A read-only dictionary.
    #[must_use]
    pub fn read_only_dictionary(element: Self) -> Self {
        Self::Dictionary {
            element: Box::new(element),
            read_only: true,
        }
    }

    /// A bare array.
    #[must_use]
    pub fn array(element: Self) -> Self {
        Self::Array(Box::new(element))
    }

    /// A bare map with string keys.
    #[must_use]
    pub fn map(element: Self) -> Self {
        Self::Map(Box::new(element))
    }

    /// Returns the shape with every [`TypeShape::Nullable`] layer removed.
    #[must_use]
    pub fn underlying(&self) -> &Self {
        let mut shape = self;
        while let Self::Nullable(inner) = shape {
            shape = &**inner;
        }
        shape
    }

    /// Returns `true` if the shape is [`TypeShape::Nullable`].
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        matches!(self, Self::Nullable(_))
    }
}

impl fmt::Display for TypeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(t) => write!(f, "{t}"),
            Self::Nullable(inner) => write!(f, "Option<{inner}>"),
            Self::Object(ty) => f.write_str(ty.name),
            Self::Collection { element, read_only } => {
                let prefix = if *read_only { "ReadOnly" } else { "" };
                write!(f, "{prefix}Collection<{element}>")
            }
            Self::Dictionary { element, read_only } => {
                let prefix = if *read_only { "ReadOnly" } else { "" };
                write!(f, "{prefix}Dictionary<{element}>")
            }
            Self::Array(element) => write!(f, "[{element}]"),
            Self::Map(element) => write!(f, "Map<String, {element}>"),
        }
    }
}

/// How a property's value is materialized.
#[derive(Clone, Debug)]
pub enum ElementImplementation {
    /// A scalar leaf stored as a single string.
    Naive(ScalarType),
    /// A nested configuration object.
    ConfigurationObject(Arc<ObjectSchema>),
    /// An ordered collection keyed `0..count`.
    OrderedCollection {
        /// Schema of each element.
        element: Arc<PropertySchema>,
        /// Whether structural mutation is rejected.
        read_only: bool,
    },
    /// A string-keyed dictionary.
    NamedDictionary {
        /// Schema of each element.
        element: Arc<PropertySchema>,
        /// Whether structural mutation is rejected.
        read_only: bool,
    },
}

impl ElementImplementation {
    /// Returns `true` for [`ElementImplementation::Naive`].
    #[must_use]
    #[inline]
    pub fn is_naive(&self) -> bool {
        matches!(self, Self::Naive(_))
    }

    /// Returns `true` if values of `self` and `other` are interchangeable.
    ///
    /// Objects compare by declared type, containers by read-only flag and
    /// element shape.
    #[must_use]
    pub fn same_shape(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Naive(a), Self::Naive(b)) => a == b,
            (Self::ConfigurationObject(a), Self::ConfigurationObject(b)) => {
                a.type_id == b.type_id
            }
            (
                Self::OrderedCollection {
                    element: a,
                    read_only: ra,
                },
                Self::OrderedCollection {
                    element: b,
                    read_only: rb,
                },
            )
            | (
                Self::NamedDictionary {
                    element: a,
                    read_only: ra,
                },
                Self::NamedDictionary {
                    element: b,
                    read_only: rb,
                },
            ) => ra == rb && a.implementation.same_shape(&b.implementation),
            _ => false,
        }
    }
}

impl fmt::Display for ElementImplementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Naive(t) => write!(f, "{t}"),
            Self::ConfigurationObject(schema) => write!(f, "object `{}`", schema.name),
            Self::OrderedCollection { element, .. } => {
                write!(f, "collection of {}", element.implementation)
            }
            Self::NamedDictionary { element, .. } => {
                write!(f, "dictionary of {}", element.implementation)
            }
        }
    }
}

/// The description of one property.
#[derive(Clone, Debug)]
pub struct PropertySchema {
    pub(crate) name: String,
    pub(crate) declared_type: TypeShape,
    pub(crate) default_value: Option<Value>,
    pub(crate) has_default: bool,
    pub(crate) read_only: bool,
    pub(crate) persistence: Persistence,
    pub(crate) path_fragment: Option<PathFragment>,
    pub(crate) implementation: ElementImplementation,
}

impl PropertySchema {
    /// Returns the property name.
    #[must_use]
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the shape the property was declared with.
    #[must_use]
    #[inline]
    pub fn declared_type(&self) -> &TypeShape {
        &self.declared_type
    }

    /// Returns the declared shape without its nullable wrapper.
    #[must_use]
    #[inline]
    pub fn underlying_type(&self) -> &TypeShape {
        self.declared_type.underlying()
    }

    /// Returns `true` if the property accepts "no value".
    #[must_use]
    #[inline]
    pub fn is_nullable(&self) -> bool {
        self.declared_type.is_nullable()
    }

    /// Returns the declared default, already converted to the property's type.
    #[must_use]
    #[inline]
    pub fn default_value(&self) -> Option<&Value> {
        self.default_value.as_ref()
    }

    /// Returns `true` if the property has a value without loading.
    ///
    /// This holds for declared defaults, nullable properties (whose default is
    /// "no value"), and composite properties (which start out empty).
    #[must_use]
    #[inline]
    pub fn has_default(&self) -> bool {
        self.has_default
    }

    /// Returns `true` if assignment is rejected.
    #[must_use]
    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Returns the persistence policy.
    #[must_use]
    #[inline]
    pub fn persistence(&self) -> Persistence {
        self.persistence
    }

    /// Returns the path fragment, or `None` for collection and dictionary elements.
    #[must_use]
    #[inline]
    pub fn path_fragment(&self) -> Option<&PathFragment> {
        self.path_fragment.as_ref()
    }

    /// Returns how the property's value is materialized.
    #[must_use]
    #[inline]
    pub fn implementation(&self) -> &ElementImplementation {
        &self.implementation
    }
}

/// The ordered property schemas of one declared type.
pub struct ObjectSchema {
    pub(crate) name: &'static str,
    pub(crate) type_id: TypeId,
    pub(crate) path: Option<PathFragment>,
    pub(crate) properties: Vec<Arc<PropertySchema>>,
    pub(crate) by_name: HashMap<String, usize>,
}

impl ObjectSchema {
    /// Returns the declared type name.
    #[must_use]
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the [`TypeId`] of the declaring Rust type.
    #[must_use]
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the type-level path used when the type is materialized as a root.
    #[must_use]
    #[inline]
    pub fn path(&self) -> Option<&PathFragment> {
        self.path.as_ref()
    }

    /// Returns the properties in declaration order.
    #[must_use]
    #[inline]
    pub fn properties(&self) -> &[Arc<PropertySchema>] {
        &self.properties
    }

    /// Returns the position of the property called `name`.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Returns the property called `name`.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Arc<PropertySchema>> {
        self.index_of(name).map(|i| &self.properties[i])
    }
}

impl fmt::Debug for ObjectSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.properties.iter().map(|p| p.name()).collect();
        f.debug_struct("ObjectSchema")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("properties", &names)
            .finish_non_exhaustive()
    }
}

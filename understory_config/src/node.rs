// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Materialized values and the parent links between tree nodes.

use crate::collection::ConfigurationCollection;
use crate::dictionary::ConfigurationDictionary;
use crate::error::{BoxError, ConfigurationError, Result};
use crate::object::ConfigurationObject;
use crate::schema::ElementImplementation;
use crate::value::{Scalar, Value};

/// Upward link from a tree node to its owner.
///
/// Owners hold children strongly; children hold their owner through a
/// `Weak<dyn ParentNode>`. Implementations must not take their own state
/// locks in [`ParentNode::path`].
pub(crate) trait ParentNode: Send + Sync {
    /// Full configuration path of this node.
    fn path(&self) -> String;

    /// Whether this node rejects mutation of its children.
    fn is_read_only(&self) -> bool;

    /// A child named `property` changed. Raise events and keep bubbling,
    /// appending listener failures to `failures`.
    fn child_changed(&self, property: &str, failures: &mut Vec<BoxError>);
}

/// The value of a property or of a collection element.
///
/// Composite variants are handles: cloning one yields another handle to the
/// same node in the tree. Equality is structural, so two objects compare
/// equal when all their properties do.
#[derive(Clone, Debug)]
pub enum ConfigValue {
    /// A scalar leaf.
    Scalar(Value),
    /// A nested object.
    Object(ConfigurationObject),
    /// An ordered collection.
    Collection(ConfigurationCollection),
    /// A string-keyed dictionary.
    Dictionary(ConfigurationDictionary),
}

impl ConfigValue {
    /// Returns the scalar, if this is one.
    #[must_use]
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Self::Scalar(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the object handle, if this is one.
    #[must_use]
    pub fn as_object(&self) -> Option<&ConfigurationObject> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Returns the collection handle, if this is one.
    #[must_use]
    pub fn as_collection(&self) -> Option<&ConfigurationCollection> {
        match self {
            Self::Collection(c) => Some(c),
            _ => None,
        }
    }

    /// Returns the dictionary handle, if this is one.
    #[must_use]
    pub fn as_dictionary(&self) -> Option<&ConfigurationDictionary> {
        match self {
            Self::Dictionary(d) => Some(d),
            _ => None,
        }
    }

    /// Extracts a typed scalar, converting numerics when needed.
    #[must_use]
    pub fn get<T: Scalar>(&self) -> Option<T> {
        self.as_scalar()?.get()
    }

    /// Short description used in type mismatch errors.
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Scalar(v) => v.scalar_type().to_string(),
            Self::Object(o) => format!("object `{}`", o.schema().name()),
            Self::Collection(_) => "collection".to_owned(),
            Self::Dictionary(_) => "dictionary".to_owned(),
        }
    }

    /// Whether this value is an instance of `implementation`.
    pub(crate) fn matches(&self, implementation: &ElementImplementation) -> bool {
        match (self, implementation) {
            (Self::Scalar(v), ElementImplementation::Naive(ty)) => v.scalar_type() == *ty,
            (Self::Object(o), ElementImplementation::ConfigurationObject(schema)) => {
                o.schema().type_id() == schema.type_id()
            }
            (
                Self::Collection(c),
                ElementImplementation::OrderedCollection { element, read_only },
            ) => {
                c.node.read_only == *read_only
                    && c.node
                        .element_schema
                        .implementation()
                        .same_shape(element.implementation())
            }
            (
                Self::Dictionary(d),
                ElementImplementation::NamedDictionary { element, read_only },
            ) => {
                d.node.read_only == *read_only
                    && d.node
                        .element_schema
                        .implementation()
                        .same_shape(element.implementation())
            }
            _ => false,
        }
    }

    /// Whether both handles point at the same node. Scalars never do.
    pub(crate) fn same_instance(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Collection(a), Self::Collection(b)) => a.ptr_eq(b),
            (Self::Dictionary(a), Self::Dictionary(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub(crate) fn is_dirty(&self) -> Result<bool> {
        match self {
            Self::Scalar(_) => Ok(false),
            Self::Object(o) => o.is_dirty(),
            Self::Collection(c) => c.is_dirty(),
            Self::Dictionary(d) => d.is_dirty(),
        }
    }

    pub(crate) fn load(&self, initializing: bool) -> Result<()> {
        match self {
            Self::Scalar(_) => Ok(()),
            Self::Object(o) => o.load_with(initializing),
            Self::Collection(c) => c.load_with(initializing),
            Self::Dictionary(d) => d.load_with(initializing),
        }
    }

    pub(crate) fn save(&self) -> Result<()> {
        match self {
            Self::Scalar(_) => Ok(()),
            Self::Object(o) => o.save(),
            Self::Collection(c) => c.save(),
            Self::Dictionary(d) => d.save(),
        }
    }

    pub(crate) fn delete(&self) -> Result<()> {
        match self {
            Self::Scalar(_) => Ok(()),
            Self::Object(o) => o.delete(),
            Self::Collection(c) => c.delete(),
            Self::Dictionary(d) => d.delete(),
        }
    }

    pub(crate) fn dispose(&self) {
        match self {
            Self::Scalar(_) => {}
            Self::Object(o) => o.release(),
            Self::Collection(c) => c.dispose(),
            Self::Dictionary(d) => d.dispose(),
        }
    }

    /// Copies the contents of `self` into `target`, a fresh node of the same shape.
    pub(crate) fn copy_into(&self, target: &Self) -> Result<()> {
        match (self, target) {
            (Self::Object(from), Self::Object(to)) => to.copy_from(from),
            (Self::Collection(from), Self::Collection(to)) => to.node.copy_from(&from.node),
            (Self::Dictionary(from), Self::Dictionary(to)) => to.node.copy_from(&from.node),
            (from, to) => Err(ConfigurationError::TypeMismatch {
                path: String::new(),
                expected: to.describe(),
                actual: from.describe(),
            }),
        }
    }
}

impl PartialEq for ConfigValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Scalar(a), Self::Scalar(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b) || a.structural_eq(b),
            (Self::Collection(a), Self::Collection(b)) => {
                a.ptr_eq(b) || a.node.structural_eq(&b.node)
            }
            (Self::Dictionary(a), Self::Dictionary(b)) => {
                a.ptr_eq(b) || a.node.structural_eq(&b.node)
            }
            _ => false,
        }
    }
}

impl From<Value> for ConfigValue {
    fn from(value: Value) -> Self {
        Self::Scalar(value)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::Scalar(Value::from(value))
    }
}

impl From<ConfigurationObject> for ConfigValue {
    fn from(value: ConfigurationObject) -> Self {
        Self::Object(value)
    }
}

impl From<ConfigurationCollection> for ConfigValue {
    fn from(value: ConfigurationCollection) -> Self {
        Self::Collection(value)
    }
}

impl From<ConfigurationDictionary> for ConfigValue {
    fn from(value: ConfigurationDictionary) -> Self {
        Self::Dictionary(value)
    }
}

// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Declaring configuration types.
//!
//! A configuration type lists its properties once, in order, through
//! [`DeclaredConfiguration::declare`]. The [`SchemaRegistry`](crate::SchemaRegistry)
//! validates the declaration and turns it into an [`ObjectSchema`](crate::ObjectSchema).

use crate::path::PathKind;
use crate::schema::{Persistence, TypeShape};
use crate::value::{Scalar, Value};

/// A Rust type that describes a configuration object.
///
/// The type itself is never instantiated; it only names the schema.
///
/// # Example
///
/// ```rust
/// use understory_config::{Declaration, DeclaredConfiguration, Persistence, TypeShape};
///
/// struct Endpoint;
///
/// impl DeclaredConfiguration for Endpoint {
///     const NAME: &'static str = "Endpoint";
///
///     fn declare(d: &mut Declaration) {
///         d.scalar::<String>("Host").default("localhost");
///         d.scalar::<u16>("Port").default(8080);
///         d.nullable::<u32>("TimeoutMs");
///     }
/// }
///
/// struct Server;
///
/// impl DeclaredConfiguration for Server {
///     const NAME: &'static str = "Server";
///
///     fn declare(d: &mut Declaration) {
///         d.root_path("Server");
///         d.object::<Endpoint>("Listen");
///         d.collection("Upstreams", TypeShape::object::<Endpoint>());
///         d.dictionary("Labels", TypeShape::scalar::<String>());
///         d.scalar::<bool>("Debug")
///             .default(false)
///             .persistence(Persistence::LOAD);
///     }
/// }
/// ```
pub trait DeclaredConfiguration: 'static {
    /// Type name used in schemas and error messages.
    const NAME: &'static str;

    /// Lists the properties of the type in order.
    fn declare(declaration: &mut Declaration);
}

/// Collects the properties and annotations of a [`DeclaredConfiguration`].
#[derive(Debug, Default)]
pub struct Declaration {
    pub(crate) path: Option<(PathKind, String)>,
    pub(crate) properties: Vec<DeclaredProperty>,
}

impl Declaration {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Places the type at `path` when it is materialized as a root,
    /// regardless of any enclosing path.
    pub fn root_path(&mut self, path: impl Into<String>) -> &mut Self {
        self.path = Some((PathKind::Root, path.into()));
        self
    }

    /// Places the type under `path` when it is materialized as a root.
    pub fn suffix_path(&mut self, path: impl Into<String>) -> &mut Self {
        self.path = Some((PathKind::Suffix, path.into()));
        self
    }

    /// Declares a property of arbitrary shape.
    pub fn property(&mut self, name: impl Into<String>, shape: TypeShape) -> &mut DeclaredProperty {
        self.properties.push(DeclaredProperty {
            name: name.into(),
            shape,
            default: None,
            persistence: Persistence::default(),
            read_only: false,
            path: None,
        });
        let last = self.properties.len() - 1;
        &mut self.properties[last]
    }

    /// Declares a scalar property of Rust type `T`.
    pub fn scalar<T: Scalar>(&mut self, name: impl Into<String>) -> &mut DeclaredProperty {
        self.property(name, TypeShape::scalar::<T>())
    }

    /// Declares an optional scalar property of Rust type `T`.
    pub fn nullable<T: Scalar>(&mut self, name: impl Into<String>) -> &mut DeclaredProperty {
        self.property(name, TypeShape::nullable::<T>())
    }

    /// Declares a nested object property.
    pub fn object<T: DeclaredConfiguration>(
        &mut self,
        name: impl Into<String>,
    ) -> &mut DeclaredProperty {
        self.property(name, TypeShape::object::<T>())
    }

    /// Declares a mutable ordered collection property.
    pub fn collection(
        &mut self,
        name: impl Into<String>,
        element: TypeShape,
    ) -> &mut DeclaredProperty {
        self.property(name, TypeShape::collection(element))
    }

    /// Declares a mutable dictionary property.
    pub fn dictionary(
        &mut self,
        name: impl Into<String>,
        element: TypeShape,
    ) -> &mut DeclaredProperty {
        self.property(name, TypeShape::dictionary(element))
    }
}

/// One declared property and its annotations.
#[derive(Debug)]
pub struct DeclaredProperty {
    pub(crate) name: String,
    pub(crate) shape: TypeShape,
    pub(crate) default: Option<Value>,
    pub(crate) persistence: Persistence,
    pub(crate) read_only: bool,
    pub(crate) path: Option<(PathKind, String)>,
}

impl DeclaredProperty {
    /// Sets the default value, used when the source has none.
    pub fn default(&mut self, value: impl Into<Value>) -> &mut Self {
        self.default = Some(value.into());
        self
    }

    /// Sets the persistence policy. Defaults to [`Persistence::LOAD_SAVE`].
    pub fn persistence(&mut self, persistence: Persistence) -> &mut Self {
        self.persistence = persistence;
        self
    }

    /// Rejects assignment through the materialized object.
    pub fn read_only(&mut self) -> &mut Self {
        self.read_only = true;
        self
    }

    /// Addresses the property at `path`, ignoring the owner's path.
    pub fn root_path(&mut self, path: impl Into<String>) -> &mut Self {
        self.path = Some((PathKind::Root, path.into()));
        self
    }

    /// Addresses the property at `path` below its owner, instead of its name.
    pub fn suffix_path(&mut self, path: impl Into<String>) -> &mut Self {
        self.path = Some((PathKind::Suffix, path.into()));
        self
    }
}

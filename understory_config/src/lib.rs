// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Understory Config: typed, observable configuration trees.
//!
//! This crate materializes declared configuration types over a flat,
//! `:`-path addressed key-value [`ConfigurationSource`]. Each declared type
//! becomes a tree of nodes that load from the source, track changes
//! against what was loaded, raise change events, and write back on save.
//!
//! ## Core Concepts
//!
//! ### Schemas
//!
//! A type implements [`DeclaredConfiguration`] to list its properties on a
//! [`Declaration`]. The [`SchemaRegistry`] turns that into a cached
//! [`ObjectSchema`] of [`PropertySchema`]s, validating defaults, paths, and
//! persistence up front.
//!
//! ### Materialized nodes
//!
//! - [`ConfigurationObject`]: one value per declared property.
//! - [`ConfigurationCollection`]: elements keyed `0..len`, always contiguous.
//! - [`ConfigurationDictionary`]: elements keyed by section name.
//!
//! Scalars are [`Value`]s. Every property or element value is a
//! [`ConfigValue`], which is either a scalar or a handle to a nested node.
//!
//! ### Paths
//!
//! A property's path is its parent's path joined with its own fragment by
//! [`KEY_DELIMITER`]. A [`PathKind::Root`] fragment discards the parent path.
//! Collection and dictionary elements append their key.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use understory_config::{
//!     ConfigValue, ConfigurationSource, Declaration, DeclaredConfiguration, MemorySource,
//!     SchemaRegistry, TypeShape,
//! };
//!
//! struct Server;
//!
//! impl DeclaredConfiguration for Server {
//!     const NAME: &'static str = "Server";
//!
//!     fn declare(d: &mut Declaration) {
//!         d.root_path("Server");
//!         d.scalar::<u16>("Port").default(8080);
//!         d.collection("Hosts", TypeShape::scalar::<String>());
//!     }
//! }
//!
//! let source = Arc::new(MemorySource::from_entries([
//!     ("Server:Hosts:0", "a.example"),
//!     ("Server:Hosts:1", "b.example"),
//! ]));
//! let registry = SchemaRegistry::new();
//! let server = registry.materialize::<Server>(source.clone()).unwrap();
//! server.load().unwrap();
//!
//! // Missing values fall back to the declared default.
//! assert_eq!(server.value::<u16>("Port").unwrap(), Some(8080));
//!
//! let hosts = server.collection("Hosts").unwrap();
//! assert_eq!(hosts.len().unwrap(), 2);
//! hosts.remove_at(0).unwrap();
//! assert_eq!(hosts.get(0).unwrap(), Some(ConfigValue::from("b.example")));
//!
//! assert!(server.is_dirty().unwrap());
//! server.save().unwrap();
//! assert!(!server.is_dirty().unwrap());
//! assert_eq!(source.get("Server:Hosts:0").as_deref(), Some("b.example"));
//! assert_eq!(source.get("Server:Hosts:1"), None);
//! ```
//!
//! ## Thread Safety
//!
//! All node handles are `Send + Sync`. Each node guards its own state, and
//! locks are taken parent before child. Change listeners run after locks are
//! released, on the thread that made the change.
//!
//! ## Errors
//!
//! Declaration problems surface as [`SchemaError`] when a schema is derived.
//! Runtime failures are [`ConfigurationError`]s. `load` stops at the first
//! failure; `save` and `delete` keep going and report every failure as one
//! [`ConfigurationError::Aggregate`].

mod collection;
mod container;
mod declare;
mod dictionary;
mod error;
mod events;
mod keyed;
mod node;
mod object;
mod path;
mod registry;
mod schema;
mod scope;
mod source;
mod value;

pub use collection::ConfigurationCollection;
pub use declare::{Declaration, DeclaredConfiguration, DeclaredProperty};
pub use dictionary::ConfigurationDictionary;
pub use error::{
    AggregateNotificationError, BoxError, ConfigurationError, Result, SchemaError,
    ValidationError,
};
pub use events::{CollectionChange, ListenerResult, PropertyChanged, SubscriptionId};
pub use node::ConfigValue;
pub use object::{ConfigurationObject, ReloadWatch, Validator};
pub use path::{
    KEY_DELIMITER, PathFragment, PathKind, combine, compute_path, parent_path, resolve,
    section_key,
};
pub use registry::{MAX_DEPTH, SchemaRegistry};
pub use schema::{
    ElementImplementation, ObjectSchema, ObjectType, Persistence, PropertySchema, TypeShape,
};
pub use source::{
    ConfigurationSource, MemorySource, ReloadCallback, ReloadToken, clear_section,
};
pub use value::{Scalar, ScalarType, Value};

// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types.
//!
//! [`SchemaError`] is raised once, while a declared configuration type is
//! turned into an [`ObjectSchema`](crate::ObjectSchema). Everything that can
//! go wrong afterwards, while reading, writing, or mutating a materialized
//! tree, is a [`ConfigurationError`].

use std::error::Error;

use crate::value::ScalarType;

/// Boxed error returned by configuration sources and change listeners.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T, E = ConfigurationError> = core::result::Result<T, E>;

/// A declared configuration type could not be turned into a schema.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// The property uses a bare array or map shape.
    ///
    /// Use a collection or dictionary shape instead.
    #[error(
        "`{owner}.{property}` has unsupported shape `{shape}`; declare it as a collection or dictionary"
    )]
    UnsupportedShape {
        /// Declaring type.
        owner: &'static str,
        /// Property name.
        property: String,
        /// Rendered shape.
        shape: String,
    },
    /// The property is never loaded and has no default, so it can never hold a value.
    #[error("`{owner}.{property}` is not loaded from the source and has no default value")]
    InvalidPersistence {
        /// Declaring type.
        owner: &'static str,
        /// Property name.
        property: String,
    },
    /// A path fragment was blank.
    #[error("invalid path fragment `{fragment}`")]
    InvalidPath {
        /// The rejected fragment.
        fragment: String,
    },
    /// A declared default cannot be converted to the property's scalar type.
    #[error("default for `{owner}.{property}` is `{actual}`, expected `{expected}`")]
    DefaultTypeMismatch {
        /// Declaring type.
        owner: &'static str,
        /// Property name.
        property: String,
        /// Type the property was declared with.
        expected: String,
        /// Type of the declared default.
        actual: String,
    },
    /// Two properties of one type share a name.
    #[error("`{owner}` declares `{property}` more than once")]
    DuplicateProperty {
        /// Declaring type.
        owner: &'static str,
        /// Property name.
        property: String,
    },
    /// Nested object types recurse deeper than the registry allows.
    ///
    /// This is what a type that (transitively) contains itself produces.
    #[error("`{owner}` nests deeper than {limit} levels; is the type recursive?")]
    RecursionLimit {
        /// The type whose resolution hit the limit.
        owner: &'static str,
        /// The nesting limit.
        limit: usize,
    },
}

/// Failures raised while using a materialized configuration tree.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    /// Schema derivation failed.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// The source has no value at `path` and the property has no default.
    #[error("no value at `{path}` and no default")]
    MissingValue {
        /// Path that was read.
        path: String,
    },
    /// The raw string at `path` is not a valid `expected`.
    #[error("cannot parse `{raw}` at `{path}` as {expected}")]
    ParseFailure {
        /// Path that was read.
        path: String,
        /// The raw source value.
        raw: String,
        /// The scalar type the property expects.
        expected: ScalarType,
    },
    /// A value of the wrong shape was assigned.
    #[error("`{path}` expects {expected}, got {actual}")]
    TypeMismatch {
        /// Path of the target node.
        path: String,
        /// Expected shape.
        expected: String,
        /// Shape of the rejected value.
        actual: String,
    },
    /// A mutation was attempted against a read-only node.
    #[error("`{path}` is read-only")]
    ReadOnly {
        /// Path of the read-only node.
        path: String,
    },
    /// A dictionary (or collection) already holds `key`.
    #[error("`{path}` already contains key `{key}`")]
    DuplicateKey {
        /// Path of the container.
        path: String,
        /// The duplicate key.
        key: String,
    },
    /// A dictionary lookup missed.
    #[error("`{path}` has no key `{key}`")]
    KeyNotFound {
        /// Path of the container.
        path: String,
        /// The missing key.
        key: String,
    },
    /// A collection index was outside `0..count` (or `0..=count` for inserts).
    #[error("index {index} out of range for `{path}` with {count} items")]
    IndexOutOfRange {
        /// Path of the collection.
        path: String,
        /// Requested index.
        index: usize,
        /// Item count at the time of the request.
        count: usize,
    },
    /// The object's schema has no property with this name.
    #[error("`{owner}` has no property `{name}`")]
    UnknownProperty {
        /// Declaring type.
        owner: &'static str,
        /// The requested name.
        name: String,
    },
    /// The node was disposed.
    #[error("configuration node has been disposed")]
    Disposed,
    /// The configuration source rejected a write.
    #[error("configuration source failed at `{path}`")]
    Source {
        /// Path that was written.
        path: String,
        /// Error reported by the source.
        source: BoxError,
    },
    /// One or more change listeners failed.
    #[error(transparent)]
    Notification(#[from] AggregateNotificationError),
    /// A validator rejected an object.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Several independent failures from one save or delete sweep.
    #[error("{} configuration operations failed", .0.len())]
    Aggregate(Vec<ConfigurationError>),
}

impl ConfigurationError {
    /// Folds the failures of a sweep into a single result.
    ///
    /// A lone failure is returned as is.
    pub(crate) fn collect(mut errors: Vec<Self>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Aggregate(errors)),
        }
    }
}

/// Every failure raised by the listeners of a single change dispatch.
///
/// All listeners run even when earlier ones fail.
#[derive(Debug, thiserror::Error)]
#[error("{} change listener(s) failed", .errors.len())]
pub struct AggregateNotificationError {
    errors: Vec<BoxError>,
}

impl AggregateNotificationError {
    /// Returns the individual listener failures in dispatch order.
    #[must_use]
    pub fn errors(&self) -> &[BoxError] {
        &self.errors
    }

    /// Consumes the aggregate, returning the listener failures.
    #[must_use]
    pub fn into_errors(self) -> Vec<BoxError> {
        self.errors
    }

    pub(crate) fn into_result(errors: Vec<BoxError>) -> Result<()> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Self { errors }.into())
        }
    }
}

/// Returned by a [`Validator`](crate::Validator) that rejects an object.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("validation failed at `{path}`: {message}")]
pub struct ValidationError {
    path: String,
    message: String,
}

impl ValidationError {
    /// Creates a validation failure for the object at `path`.
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Path of the rejected object.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Human-readable reason.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

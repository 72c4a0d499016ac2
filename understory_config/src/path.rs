// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Configuration path composition.
//!
//! Paths are `:`-delimited section keys such as `Server:Endpoints:0:Port`.
//! Every node of a materialized tree derives its path from its parent's path
//! and its own [`PathFragment`].

use smallvec::SmallVec;

use crate::error::SchemaError;

/// Delimiter between path segments.
pub const KEY_DELIMITER: char = ':';

/// How a [`PathFragment`] combines with the path of its ancestors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PathKind {
    /// Discards the ancestor path and starts over at this fragment.
    Root,
    /// Appends to the ancestor path.
    #[default]
    Suffix,
}

/// A validated, non-blank path fragment.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PathFragment {
    kind: PathKind,
    value: String,
}

impl PathFragment {
    /// Creates a fragment, rejecting blank values.
    pub fn new(kind: PathKind, value: impl Into<String>) -> Result<Self, SchemaError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(SchemaError::InvalidPath { fragment: value });
        }
        Ok(Self { kind, value })
    }

    /// Creates a [`PathKind::Root`] fragment.
    pub fn root(value: impl Into<String>) -> Result<Self, SchemaError> {
        Self::new(PathKind::Root, value)
    }

    /// Creates a [`PathKind::Suffix`] fragment.
    pub fn suffix(value: impl Into<String>) -> Result<Self, SchemaError> {
        Self::new(PathKind::Suffix, value)
    }

    /// Returns how this fragment combines with its ancestors.
    #[must_use]
    #[inline]
    pub fn kind(&self) -> PathKind {
        self.kind
    }

    /// Returns the fragment text.
    #[must_use]
    #[inline]
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Joins the non-blank segments with [`KEY_DELIMITER`].
///
/// ```rust
/// use understory_config::combine;
///
/// assert_eq!(combine(["A", "", "B"]), "A:B");
/// assert_eq!(combine(["", "  "]), "");
/// ```
#[must_use]
pub fn combine<'a>(segments: impl IntoIterator<Item = &'a str>) -> String {
    let parts: SmallVec<[&str; 4]> = segments
        .into_iter()
        .filter(|s| !s.trim().is_empty())
        .collect();
    let mut out = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push(KEY_DELIMITER);
        }
        out.push_str(part);
    }
    out
}

/// Computes the path of a node from its parent's path and its own fragment.
///
/// A [`PathKind::Root`] fragment discards `parent`. A node without a fragment
/// (collection elements, nested values) shares its parent's path.
///
/// ```rust
/// use understory_config::{PathFragment, compute_path};
///
/// let port = PathFragment::suffix("Port").unwrap();
/// assert_eq!(compute_path(Some("Server"), Some(&port)), "Server:Port");
///
/// let global = PathFragment::root("Global").unwrap();
/// assert_eq!(compute_path(Some("A:B"), Some(&global)), "Global");
/// ```
#[must_use]
pub fn compute_path(parent: Option<&str>, fragment: Option<&PathFragment>) -> String {
    match fragment {
        Some(f) if f.kind == PathKind::Root => combine([f.value.as_str()]),
        Some(f) => combine([parent.unwrap_or_default(), f.value.as_str()]),
        None => combine([parent.unwrap_or_default()]),
    }
}

/// Folds a chain of fragments, outermost first, into a path.
#[must_use]
pub fn resolve<'a>(fragments: impl IntoIterator<Item = &'a PathFragment>) -> String {
    fragments
        .into_iter()
        .fold(String::new(), |acc, f| compute_path(Some(&acc), Some(f)))
}

/// Returns the last segment of `path`.
#[must_use]
pub fn section_key(path: &str) -> &str {
    path.rsplit(KEY_DELIMITER).next().unwrap_or(path)
}

/// Returns everything before the last segment of `path`, if there is one.
#[must_use]
pub fn parent_path(path: &str) -> Option<&str> {
    path.rfind(KEY_DELIMITER).map(|i| &path[..i])
}

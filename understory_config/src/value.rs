// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Scalar values.
//!
//! Leaf ("naive") properties hold a [`Value`]. A value is stored in the
//! configuration source as its [`Display`](core::fmt::Display) form and read
//! back with [`ScalarType::parse`].

use core::fmt;

/// The scalar types a leaf property can be declared with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarType {
    /// `bool`
    Bool,
    /// `char`
    Char,
    /// `i8`
    I8,
    /// `i16`
    I16,
    /// `i32`
    I32,
    /// `i64`
    I64,
    /// `u8`
    U8,
    /// `u16`
    U16,
    /// `u32`
    U32,
    /// `u64`
    U64,
    /// `f32`
    F32,
    /// `f64`
    F64,
    /// `String`
    String,
}

impl ScalarType {
    /// Returns `true` for the integer and floating point types.
    #[must_use]
    pub fn is_numeric(self) -> bool {
        !matches!(self, Self::Bool | Self::Char | Self::String)
    }

    /// Parses a raw source string as this type.
    ///
    /// Numbers are trimmed before parsing and booleans are matched
    /// case-insensitively. Strings are taken verbatim.
    #[must_use]
    pub fn parse(self, raw: &str) -> Option<Value> {
        let t = raw.trim();
        Some(match self {
            Self::Bool => {
                if t.eq_ignore_ascii_case("true") {
                    Value::Bool(true)
                } else if t.eq_ignore_ascii_case("false") {
                    Value::Bool(false)
                } else {
                    return None;
                }
            }
            Self::Char => {
                let mut chars = raw.chars();
                let c = chars.next()?;
                if chars.next().is_some() {
                    return None;
                }
                Value::Char(c)
            }
            Self::I8 => Value::I8(t.parse().ok()?),
            Self::I16 => Value::I16(t.parse().ok()?),
            Self::I32 => Value::I32(t.parse().ok()?),
            Self::I64 => Value::I64(t.parse().ok()?),
            Self::U8 => Value::U8(t.parse().ok()?),
            Self::U16 => Value::U16(t.parse().ok()?),
            Self::U32 => Value::U32(t.parse().ok()?),
            Self::U64 => Value::U64(t.parse().ok()?),
            Self::F32 => Value::F32(t.parse().ok()?),
            Self::F64 => Value::F64(t.parse().ok()?),
            Self::String => Value::String(raw.to_owned()),
        })
    }

    /// Returns the zero value of this type.
    #[must_use]
    pub fn default_value(self) -> Value {
        match self {
            Self::Bool => Value::Bool(false),
            Self::Char => Value::Char('\0'),
            Self::I8 => Value::I8(0),
            Self::I16 => Value::I16(0),
            Self::I32 => Value::I32(0),
            Self::I64 => Value::I64(0),
            Self::U8 => Value::U8(0),
            Self::U16 => Value::U16(0),
            Self::U32 => Value::U32(0),
            Self::U64 => Value::U64(0),
            Self::F32 => Value::F32(0.0),
            Self::F64 => Value::F64(0.0),
            Self::String => Value::String(String::new()),
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bool => "bool",
            Self::Char => "char",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::String => "String",
        })
    }
}

/// A scalar property value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// `bool`
    Bool(bool),
    /// `char`
    Char(char),
    /// `i8`
    I8(i8),
    /// `i16`
    I16(i16),
    /// `i32`
    I32(i32),
    /// `i64`
    I64(i64),
    /// `u8`
    U8(u8),
    /// `u16`
    U16(u16),
    /// `u32`
    U32(u32),
    /// `u64`
    U64(u64),
    /// `f32`
    F32(f32),
    /// `f64`
    F64(f64),
    /// `String`
    String(String),
}

impl Value {
    /// Returns the type of this value.
    #[must_use]
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Self::Bool(_) => ScalarType::Bool,
            Self::Char(_) => ScalarType::Char,
            Self::I8(_) => ScalarType::I8,
            Self::I16(_) => ScalarType::I16,
            Self::I32(_) => ScalarType::I32,
            Self::I64(_) => ScalarType::I64,
            Self::U8(_) => ScalarType::U8,
            Self::U16(_) => ScalarType::U16,
            Self::U32(_) => ScalarType::U32,
            Self::U64(_) => ScalarType::U64,
            Self::F32(_) => ScalarType::F32,
            Self::F64(_) => ScalarType::F64,
            Self::String(_) => ScalarType::String,
        }
    }

    /// Converts this value to `target`.
    ///
    /// Values of the same type are returned unchanged. Numeric values convert
    /// to any numeric type that can represent them exactly; `300_i32` does
    /// not become a `u8` and `1.5_f64` does not become an integer.
    #[must_use]
    pub fn convert(&self, target: ScalarType) -> Option<Self> {
        let source = self.scalar_type();
        if source == target {
            return Some(self.clone());
        }
        if source.is_numeric() && target.is_numeric() {
            // Display output of every numeric type parses back losslessly.
            return target.parse(&self.to_string());
        }
        None
    }

    /// Extracts a typed scalar, converting numerics when needed.
    #[must_use]
    pub fn get<T: Scalar>(&self) -> Option<T> {
        T::from_value(&self.convert(T::TYPE)?)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => fmt::Display::fmt(v, f),
            Self::Char(v) => fmt::Display::fmt(v, f),
            Self::I8(v) => fmt::Display::fmt(v, f),
            Self::I16(v) => fmt::Display::fmt(v, f),
            Self::I32(v) => fmt::Display::fmt(v, f),
            Self::I64(v) => fmt::Display::fmt(v, f),
            Self::U8(v) => fmt::Display::fmt(v, f),
            Self::U16(v) => fmt::Display::fmt(v, f),
            Self::U32(v) => fmt::Display::fmt(v, f),
            Self::U64(v) => fmt::Display::fmt(v, f),
            Self::F32(v) => fmt::Display::fmt(v, f),
            Self::F64(v) => fmt::Display::fmt(v, f),
            Self::String(v) => f.write_str(v),
        }
    }
}

/// Rust types that map onto a [`ScalarType`].
pub trait Scalar: Sized + 'static {
    /// The scalar type this Rust type is stored as.
    const TYPE: ScalarType;

    /// Wraps `self` in a [`Value`].
    fn into_value(self) -> Value;

    /// Extracts `Self` from a value of exactly [`Self::TYPE`].
    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl Scalar for $ty {
                const TYPE: ScalarType = ScalarType::$variant;

                #[inline]
                fn into_value(self) -> Value {
                    Value::$variant(self)
                }

                #[inline]
                fn from_value(value: &Value) -> Option<Self> {
                    match value {
                        Value::$variant(v) => Some(v.clone()),
                        _ => None,
                    }
                }
            }

            impl From<$ty> for Value {
                #[inline]
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }

            impl From<$ty> for crate::ConfigValue {
                #[inline]
                fn from(value: $ty) -> Self {
                    Self::Scalar(Value::$variant(value))
                }
            }
        )*
    };
}

scalar! {
    bool => Bool,
    char => Char,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    String => String,
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_trims_numbers_and_ignores_bool_case() {
        assert_eq!(ScalarType::I32.parse(" 42 "), Some(Value::I32(42)));
        assert_eq!(ScalarType::Bool.parse("TRUE"), Some(Value::Bool(true)));
        assert_eq!(ScalarType::Bool.parse("yes"), None);
        assert_eq!(ScalarType::U8.parse("256"), None);
        assert_eq!(
            ScalarType::String.parse(" padded "),
            Some(Value::String(" padded ".into()))
        );
        assert_eq!(ScalarType::Char.parse("ab"), None);
    }

    #[test]
    fn convert_is_exact_between_numerics() {
        assert_eq!(Value::I32(7).convert(ScalarType::U16), Some(Value::U16(7)));
        assert_eq!(Value::I32(300).convert(ScalarType::U8), None);
        assert_eq!(Value::I32(-1).convert(ScalarType::U32), None);
        assert_eq!(Value::F64(1.5).convert(ScalarType::I64), None);
        assert_eq!(Value::I64(3).convert(ScalarType::F64), Some(Value::F64(3.0)));
        assert_eq!(Value::Bool(true).convert(ScalarType::I32), None);
        assert_eq!(Value::from("x").convert(ScalarType::Char), None);
    }

    #[test]
    fn display_parses_back() {
        for value in [
            Value::F64(0.1),
            Value::F32(-2.5),
            Value::I64(i64::MIN),
            Value::Bool(false),
            Value::Char(':'),
        ] {
            let raw = value.to_string();
            assert_eq!(value.scalar_type().parse(&raw), Some(value));
        }
    }

    #[test]
    fn typed_get_converts() {
        assert_eq!(Value::U8(9).get::<i64>(), Some(9));
        assert_eq!(Value::from("hi").get::<String>(), Some("hi".to_owned()));
        assert_eq!(Value::from("hi").get::<i32>(), None);
    }
}

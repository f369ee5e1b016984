// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Attribute model shared by all telemetry backends.
//!
//! Call sites describe span tags, event properties, and metric dimensions as
//! [`Attr`] values regardless of which backend is active. The streaming
//! backend keeps native value types on the wire; the flat backend only
//! accepts strings, so values are stringified via [`AttrValue::emit`] — a
//! lossy but deterministic conversion.

use opentelemetry::{KeyValue, Value};

/// A scalar attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl AttrValue {
    /// Deterministic string form, used wherever a backend only accepts
    /// string-valued properties.
    ///
    /// Integers and floats render via `Display`; booleans render as
    /// `"true"`/`"false"`. The original value type is not recoverable.
    pub fn emit(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// A single key-value attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Attr {
    pub key: String,
    pub value: AttrValue,
}

impl Attr {
    /// Create an attribute from any supported scalar.
    pub fn new(key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// String-valued attribute.
    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(key, AttrValue::Str(value.into()))
    }

    /// Integer-valued attribute.
    pub fn int(key: impl Into<String>, value: i64) -> Self {
        Self::new(key, AttrValue::Int(value))
    }

    /// Float-valued attribute.
    pub fn float(key: impl Into<String>, value: f64) -> Self {
        Self::new(key, AttrValue::Float(value))
    }

    /// Boolean-valued attribute.
    pub fn bool(key: impl Into<String>, value: bool) -> Self {
        Self::new(key, AttrValue::Bool(value))
    }
}

impl From<&Attr> for KeyValue {
    fn from(attr: &Attr) -> Self {
        let value = match &attr.value {
            AttrValue::Str(s) => Value::from(s.clone()),
            AttrValue::Int(i) => Value::from(*i),
            AttrValue::Float(f) => Value::from(*f),
            AttrValue::Bool(b) => Value::from(*b),
        };
        KeyValue::new(attr.key.clone(), value)
    }
}

/// Convert a slice of attributes into OpenTelemetry key-values.
pub(crate) fn to_key_values(attrs: &[Attr]) -> Vec<KeyValue> {
    attrs.iter().map(KeyValue::from).collect()
}

/// Stringify a slice of attributes into flat-backend properties.
pub(crate) fn to_properties(attrs: &[Attr]) -> std::collections::HashMap<String, String> {
    attrs
        .iter()
        .map(|a| (a.key.clone(), a.value.emit()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_is_deterministic() {
        assert_eq!(AttrValue::Str("x".into()).emit(), "x");
        assert_eq!(AttrValue::Int(42).emit(), "42");
        assert_eq!(AttrValue::Float(1.5).emit(), "1.5");
        assert_eq!(AttrValue::Bool(true).emit(), "true");
        assert_eq!(AttrValue::Bool(false).emit(), "false");
    }

    #[test]
    fn test_constructors() {
        assert_eq!(
            Attr::string("k", "v"),
            Attr::new("k", AttrValue::Str("v".into()))
        );
        assert_eq!(Attr::int("n", 7).value, AttrValue::Int(7));
        assert_eq!(Attr::bool("b", false).value, AttrValue::Bool(false));
    }

    #[test]
    fn test_to_properties_stringifies() {
        let attrs = vec![Attr::int("count", 3), Attr::bool("ok", true)];
        let props = to_properties(&attrs);
        assert_eq!(props.get("count").map(String::as_str), Some("3"));
        assert_eq!(props.get("ok").map(String::as_str), Some("true"));
    }

    #[test]
    fn test_to_key_values_keeps_types() {
        let attrs = vec![Attr::int("n", 9)];
        let kvs = to_key_values(&attrs);
        assert_eq!(kvs.len(), 1);
        assert_eq!(kvs[0].key.as_str(), "n");
        assert_eq!(kvs[0].value, opentelemetry::Value::from(9i64));
    }
}

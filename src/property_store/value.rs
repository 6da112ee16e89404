//! The closed set of value kinds a property store can hold.
//!
//! A [`ValueType`] is declared once per property. Every [`PropertyValue`] written to the store is
//! checked against it; there is no coercion between kinds.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// The kind tag of a [`ValueType`] or [`PropertyValue`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Boolean,
    Int,
    Float,
    Double,
    Enum,
    Object,
}

impl Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ValueKind::Boolean => "boolean",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Double => "double",
            ValueKind::Enum => "enum",
            ValueKind::Object => "object",
        };
        f.write_str(name)
    }
}

/// A closed, small set of named variants. Values of an enumerated property are stored as the
/// ordinal of the variant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumType {
    name: String,
    variants: Vec<String>,
}

impl EnumType {
    pub fn new<S: Into<String>>(name: impl Into<String>, variants: impl IntoIterator<Item = S>) -> Self {
        EnumType {
            name: name.into(),
            variants: variants.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn variant_count(&self) -> usize {
        self.variants.len()
    }

    /// Returns the value for the named variant, or `None` if there is no such variant.
    #[must_use]
    pub fn value(&self, variant: &str) -> Option<PropertyValue> {
        self.variants
            .iter()
            .position(|v| v == variant)
            .and_then(|ordinal| u16::try_from(ordinal).ok())
            .map(PropertyValue::Enum)
    }

    #[must_use]
    pub fn variant_name(&self, ordinal: u16) -> Option<&str> {
        self.variants.get(usize::from(ordinal)).map(String::as_str)
    }
}

/// The declared value type of a property.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Boolean,
    /// Signed integers up to 64 bits. Storage width adapts to the values actually written.
    Int,
    Float,
    Double,
    Enum(EnumType),
    /// Opaque structured data, carried as plain JSON-like values.
    Object,
}

impl ValueType {
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            ValueType::Boolean => ValueKind::Boolean,
            ValueType::Int => ValueKind::Int,
            ValueType::Float => ValueKind::Float,
            ValueType::Double => ValueKind::Double,
            ValueType::Enum(_) => ValueKind::Enum,
            ValueType::Object => ValueKind::Object,
        }
    }
}

/// A single property value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyValue {
    Boolean(bool),
    Int(i64),
    Float(f32),
    Double(f64),
    /// The ordinal of a variant of the property's [`EnumType`].
    Enum(u16),
    Object(serde_json::Value),
}

impl PropertyValue {
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            PropertyValue::Boolean(_) => ValueKind::Boolean,
            PropertyValue::Int(_) => ValueKind::Int,
            PropertyValue::Float(_) => ValueKind::Float,
            PropertyValue::Double(_) => ValueKind::Double,
            PropertyValue::Enum(_) => ValueKind::Enum,
            PropertyValue::Object(_) => ValueKind::Object,
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Boolean(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Int(i64::from(value))
    }
}

impl From<f32> for PropertyValue {
    fn from(value: f32) -> Self {
        PropertyValue::Float(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Double(value)
    }
}

impl From<serde_json::Value> for PropertyValue {
    fn from(value: serde_json::Value) -> Self {
        PropertyValue::Object(value)
    }
}

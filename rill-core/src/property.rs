//! Typed, validated, named configuration for processors.
//!
//! A [`PropertyMap`] is declared at processor construction (names,
//! descriptions, required flags) and populated through [`PropertyMap::set`]
//! before the processor starts. Values are dynamically typed; the typed
//! accessors on [`Property`] are the source of truth for conversions.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::PropertyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    String,
    Int,
    Float,
    Bool,
    Bytes,
    Map,
}

impl ValueKind {
    fn name(self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Int => "integer",
            ValueKind::Float => "float",
            ValueKind::Bool => "bool",
            ValueKind::Bytes => "bytes",
            ValueKind::Map => "nested configuration",
        }
    }
}

/// A single property value.
///
/// Serialized untagged, so the wire form is a plain JSON scalar, byte array,
/// or nested map — self-describing on both ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Map(PropertyMap),
    Bytes(Vec<u8>),
}

impl PropertyValue {
    fn kind(&self) -> ValueKind {
        match self {
            PropertyValue::Bool(_) => ValueKind::Bool,
            PropertyValue::Int(_) => ValueKind::Int,
            PropertyValue::Float(_) => ValueKind::Float,
            PropertyValue::String(_) => ValueKind::String,
            PropertyValue::Map(_) => ValueKind::Map,
            PropertyValue::Bytes(_) => ValueKind::Bytes,
        }
    }

    /// Attempt to convert into `kind`.
    ///
    /// Numeric strings parse to integers/floats, integers widen to floats,
    /// scalars render to strings, and `true/1/yes` / `false/0/no` strings
    /// parse to bools. Anything else is not convertible.
    fn coerce_to(&self, kind: ValueKind) -> Option<PropertyValue> {
        if self.kind() == kind {
            return Some(self.clone());
        }
        match (self, kind) {
            (PropertyValue::String(s), ValueKind::Int) => {
                s.trim().parse().ok().map(PropertyValue::Int)
            }
            (PropertyValue::String(s), ValueKind::Float) => {
                s.trim().parse().ok().map(PropertyValue::Float)
            }
            (PropertyValue::String(s), ValueKind::Bool) => match s.to_lowercase().as_str() {
                "true" | "1" | "yes" => Some(PropertyValue::Bool(true)),
                "false" | "0" | "no" => Some(PropertyValue::Bool(false)),
                _ => None,
            },
            (PropertyValue::String(s), ValueKind::Bytes) => {
                Some(PropertyValue::Bytes(s.clone().into_bytes()))
            }
            (PropertyValue::Int(i), ValueKind::Float) => Some(PropertyValue::Float(*i as f64)),
            (PropertyValue::Int(i), ValueKind::String) => {
                Some(PropertyValue::String(i.to_string()))
            }
            (PropertyValue::Float(f), ValueKind::String) => {
                Some(PropertyValue::String(f.to_string()))
            }
            (PropertyValue::Bool(b), ValueKind::String) => {
                Some(PropertyValue::String(b.to_string()))
            }
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Int(value.into())
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<Vec<u8>> for PropertyValue {
    fn from(value: Vec<u8>) -> Self {
        PropertyValue::Bytes(value)
    }
}

impl From<PropertyMap> for PropertyValue {
    fn from(value: PropertyMap) -> Self {
        PropertyValue::Map(value)
    }
}

/// A named, described configuration slot with an optional current value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    name: String,
    description: String,
    required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<PropertyValue>,
}

impl Property {
    pub fn new(name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required,
            value: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn required(&self) -> bool {
        self.required
    }

    pub fn value(&self) -> Option<&PropertyValue> {
        self.value.as_ref()
    }

    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }

    fn coerced(&self, kind: ValueKind) -> Result<PropertyValue, PropertyError> {
        self.value
            .as_ref()
            .and_then(|v| v.coerce_to(kind))
            .ok_or_else(|| PropertyError::WrongPropertyType {
                name: self.name.clone(),
                expected: kind.name(),
            })
    }

    /// The value as a string, rendering scalars if needed.
    pub fn as_str(&self) -> Result<String, PropertyError> {
        match self.coerced(ValueKind::String)? {
            PropertyValue::String(s) => Ok(s),
            _ => unreachable!("coerce_to returned a non-string"),
        }
    }

    /// The value as an integer; numeric strings parse.
    pub fn as_int(&self) -> Result<i64, PropertyError> {
        match self.coerced(ValueKind::Int)? {
            PropertyValue::Int(i) => Ok(i),
            _ => unreachable!("coerce_to returned a non-integer"),
        }
    }

    /// The value as a float; integers widen, numeric strings parse.
    pub fn as_float(&self) -> Result<f64, PropertyError> {
        match self.coerced(ValueKind::Float)? {
            PropertyValue::Float(f) => Ok(f),
            _ => unreachable!("coerce_to returned a non-float"),
        }
    }

    /// The value as a bool; `true/1/yes` and `false/0/no` strings parse.
    pub fn as_bool(&self) -> Result<bool, PropertyError> {
        match self.coerced(ValueKind::Bool)? {
            PropertyValue::Bool(b) => Ok(b),
            _ => unreachable!("coerce_to returned a non-bool"),
        }
    }

    /// The value as raw bytes; strings convert to their UTF-8 bytes.
    pub fn as_bytes(&self) -> Result<Vec<u8>, PropertyError> {
        match self.coerced(ValueKind::Bytes)? {
            PropertyValue::Bytes(b) => Ok(b),
            _ => unreachable!("coerce_to returned non-bytes"),
        }
    }

    /// The value as a nested configuration map. Never coerces.
    pub fn as_map(&self) -> Result<&PropertyMap, PropertyError> {
        match &self.value {
            Some(PropertyValue::Map(map)) => Ok(map),
            _ => Err(PropertyError::WrongPropertyType {
                name: self.name.clone(),
                expected: ValueKind::Map.name(),
            }),
        }
    }
}

/// An ordered mapping from name to [`Property`].
///
/// Serializes to a self-describing `{name → {name, description, required,
/// value}}` object so a whole map can be marshalled and restored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyMap {
    entries: IndexMap<String, Property>,
}

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a property. Re-declaring a name replaces its structure and
    /// drops any previously set value.
    pub fn add(&mut self, name: &str, description: &str, required: bool) -> &mut Self {
        self.entries
            .insert(name.to_string(), Property::new(name, description, required));
        self
    }

    /// Assign a value to a declared property.
    ///
    /// # Errors
    ///
    /// `NoSuchProperty` when the name was never declared;
    /// `WrongPropertyType` when the value cannot convert to the type of the
    /// current non-nil value.
    pub fn set(
        &mut self,
        name: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<(), PropertyError> {
        let property = self
            .entries
            .get_mut(name)
            .ok_or_else(|| PropertyError::NoSuchProperty(name.to_string()))?;
        let value = value.into();
        match &property.value {
            Some(current) => {
                let kind = current.kind();
                let coerced =
                    value
                        .coerce_to(kind)
                        .ok_or_else(|| PropertyError::WrongPropertyType {
                            name: name.to_string(),
                            expected: kind.name(),
                        })?;
                property.value = Some(coerced);
            }
            None => property.value = Some(value),
        }
        Ok(())
    }

    /// Unset the value of a declared property.
    pub fn clear(&mut self, name: &str) -> Result<(), PropertyError> {
        let property = self
            .entries
            .get_mut(name)
            .ok_or_else(|| PropertyError::NoSuchProperty(name.to_string()))?;
        property.value = None;
        Ok(())
    }

    /// Look up a property. `None` is the absent sentinel; this never fails.
    pub fn get(&self, name: &str) -> Option<&Property> {
        self.entries.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Property> {
        self.entries.shift_remove(name)
    }

    /// Check that every required property has a value.
    ///
    /// # Errors
    ///
    /// `RequiredPropertiesNotFulfilled` listing every missing name.
    pub fn validate(&self) -> Result<(), PropertyError> {
        let missing: Vec<String> = self
            .entries
            .values()
            .filter(|p| p.required && p.value.is_none())
            .map(|p| p.name.clone())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PropertyError::RequiredPropertiesNotFulfilled(missing))
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

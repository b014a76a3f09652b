//! Attribute values and attribute sets.
//!
//! Directory attributes are multi-valued and loosely typed. [`AttributeValue`]
//! is the typed view the rest of the crate works with; [`AttributeSet`] maps
//! attribute names to values with case-insensitive lookup, matching how
//! directories compare attribute descriptions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::large_integer::LargeInteger;

/// A value for an attribute, which may be single or multi-valued.
///
/// Deserialization tries variants in declaration order, so a JSON array is
/// always read as [`AttributeValue::Array`]. Binary values serialize as an
/// array of byte values and come back as an array of integers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// No value (absence).
    Null,
    /// A single string value.
    String(String),
    /// A single integer value.
    Integer(i64),
    /// A single boolean value.
    Boolean(bool),
    /// Multiple values.
    Array(Vec<AttributeValue>),
    /// A 64-bit value in its two-half form.
    LargeInteger(LargeInteger),
    /// Binary data.
    Binary(Vec<u8>),
}

impl AttributeValue {
    /// Create a null value.
    pub fn null() -> Self {
        AttributeValue::Null
    }

    /// Check if this is a null value.
    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// Get as a string if this is a single string value.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as an integer if this is an integer value.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            AttributeValue::Integer(i) => Some(*i),
            AttributeValue::LargeInteger(v) => Some(v.value()),
            _ => None,
        }
    }

    /// Get as a boolean if this is a boolean value.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            AttributeValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as an array if this is multi-valued.
    pub fn as_array(&self) -> Option<&Vec<AttributeValue>> {
        match self {
            AttributeValue::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Check if this is multi-valued.
    pub fn is_multi_valued(&self) -> bool {
        matches!(self, AttributeValue::Array(_))
    }

    /// Uniform sequence view: null is empty, a scalar is one element,
    /// an array is its elements.
    pub fn values(&self) -> Vec<&AttributeValue> {
        match self {
            AttributeValue::Null => Vec::new(),
            AttributeValue::Array(arr) => arr.iter().filter(|v| !v.is_null()).collect(),
            scalar => vec![scalar],
        }
    }

    /// Directory-native wire form, one byte string per value.
    ///
    /// Booleans use the LDAP `TRUE`/`FALSE` syntax and integers their
    /// base-10 text. Null encodes to no values.
    pub fn to_wire(&self) -> Vec<Vec<u8>> {
        match self {
            AttributeValue::Null => Vec::new(),
            AttributeValue::String(s) => vec![s.as_bytes().to_vec()],
            AttributeValue::Integer(i) => vec![i.to_string().into_bytes()],
            AttributeValue::Boolean(b) => vec![if *b { "TRUE" } else { "FALSE" }.as_bytes().to_vec()],
            AttributeValue::LargeInteger(v) => vec![v.value().to_string().into_bytes()],
            AttributeValue::Binary(b) => vec![b.clone()],
            AttributeValue::Array(arr) => arr.iter().flat_map(AttributeValue::to_wire).collect(),
        }
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Integer(i)
    }
}

impl From<i32> for AttributeValue {
    fn from(i: i32) -> Self {
        AttributeValue::Integer(i64::from(i))
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Boolean(b)
    }
}

impl From<LargeInteger> for AttributeValue {
    fn from(v: LargeInteger) -> Self {
        AttributeValue::LargeInteger(v)
    }
}

impl From<Vec<u8>> for AttributeValue {
    fn from(b: Vec<u8>) -> Self {
        AttributeValue::Binary(b)
    }
}

impl<T: Into<AttributeValue>> From<Option<T>> for AttributeValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(AttributeValue::Null, Into::into)
    }
}

/// A set of attributes read from, or destined for, one directory entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeSet {
    #[serde(flatten)]
    attributes: BTreeMap<String, AttributeValue>,
}

impl AttributeSet {
    /// Create a new empty attribute set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an attribute value, replacing any entry whose name differs only in case.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        let name = name.into();
        if let Some(existing) = self.key_of(&name).map(str::to_string) {
            self.attributes.remove(&existing);
        }
        self.attributes.insert(name, value.into());
    }

    /// Set an attribute using builder pattern.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Get an attribute value (case-insensitive name match).
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name).or_else(|| {
            self.attributes
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value)
        })
    }

    /// Get a single-valued string attribute.
    pub fn get_string(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(AttributeValue::as_string)
    }

    /// Check if an attribute exists.
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove an attribute.
    pub fn remove(&mut self, name: &str) -> Option<AttributeValue> {
        let key = self.key_of(name)?.to_string();
        self.attributes.remove(&key)
    }

    /// The stored spelling of an attribute name.
    pub fn key_of(&self, name: &str) -> Option<&str> {
        self.attributes
            .keys()
            .find(|key| key.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }

    /// Get all attribute names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    /// Get the number of attributes.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Iterate over all attributes.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.attributes.iter()
    }
}

impl FromIterator<(String, AttributeValue)> for AttributeSet {
    fn from_iter<T: IntoIterator<Item = (String, AttributeValue)>>(iter: T) -> Self {
        let mut set = AttributeSet::new();
        for (name, value) in iter {
            set.set(name, value);
        }
        set
    }
}

impl IntoIterator for AttributeSet {
    type Item = (String, AttributeValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, AttributeValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.attributes.into_iter()
    }
}

/// Result of a decode that may hit a single- or multi-valued attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    /// Flatten into an ordered sequence.
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(v) => vec![v],
            OneOrMany::Many(v) => v,
        }
    }

    /// The single value, if this is not a collection.
    pub fn single(self) -> Option<T> {
        match self {
            OneOrMany::One(v) => Some(v),
            OneOrMany::Many(_) => None,
        }
    }
}

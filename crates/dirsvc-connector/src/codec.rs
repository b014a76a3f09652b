//! Attribute codec.
//!
//! Encodes typed attribute descriptors into directory-native values and
//! decodes native values (multi-valued collections, large integers,
//! FILETIME timestamps) back into typed results.

use std::collections::HashMap;

use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::attribute::{AttributeDataType, AttributeDescriptor, DirectoryMapped};
use crate::error::{DirectoryError, DirectoryResult};
use crate::large_integer::{filetime_to_datetime, LargeInteger};
use crate::value::{AttributeSet, AttributeValue, OneOrMany};

/// Attributes the directory stores as 64-bit large integers.
pub const LARGE_INTEGER_ATTRIBUTES: [&str; 9] = [
    "accountExpires",
    "pwdLastSet",
    "lastLogon",
    "lastLogonTimestamp",
    "lastLogoff",
    "badPasswordTime",
    "lockoutTime",
    "uSNChanged",
    "uSNCreated",
];

/// Whether `name` is a known large-integer attribute.
pub fn is_large_integer_attribute(name: &str) -> bool {
    LARGE_INTEGER_ATTRIBUTES
        .iter()
        .any(|known| known.eq_ignore_ascii_case(name))
}

// ============================================================================
// Encoding
// ============================================================================

/// Encode one descriptor into a native value.
///
/// | type      | empty value | otherwise                         |
/// |-----------|-------------|-----------------------------------|
/// | String    | Null        | the string                        |
/// | Int       | 0           | base-10 32-bit integer            |
/// | Boolean   | Null        | `true` / `false`, any case        |
/// | JSONArray | Null        | JSON array flattened to scalars   |
///
/// Any other declared type fails with `UnsupportedType`.
pub fn encode(descriptor: &AttributeDescriptor) -> DirectoryResult<AttributeValue> {
    let name = descriptor.native_name();
    let raw = descriptor.value.as_str();

    match descriptor.resolved_type()? {
        AttributeDataType::String => {
            if raw.is_empty() {
                Ok(AttributeValue::Null)
            } else {
                Ok(AttributeValue::String(raw.to_string()))
            }
        }
        AttributeDataType::Int => {
            if raw.is_empty() {
                return Ok(AttributeValue::Integer(0));
            }
            raw.trim()
                .parse::<i32>()
                .map(|i| AttributeValue::Integer(i64::from(i)))
                .map_err(|e| DirectoryError::InvalidValue {
                    attribute: name.to_string(),
                    message: format!("'{raw}' is not a 32-bit integer: {e}"),
                })
        }
        AttributeDataType::Boolean => {
            if raw.is_empty() {
                return Ok(AttributeValue::Null);
            }
            match raw.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(AttributeValue::Boolean(true)),
                "false" => Ok(AttributeValue::Boolean(false)),
                _ => Err(DirectoryError::InvalidValue {
                    attribute: name.to_string(),
                    message: format!("'{raw}' is not a boolean"),
                }),
            }
        }
        AttributeDataType::JsonArray => {
            if raw.trim().is_empty() {
                return Ok(AttributeValue::Null);
            }
            encode_json_array(name, raw)
        }
    }
}

fn encode_json_array(name: &str, raw: &str) -> DirectoryResult<AttributeValue> {
    let parsed: Value = serde_json::from_str(raw).map_err(|e| DirectoryError::InvalidValue {
        attribute: name.to_string(),
        message: format!("invalid JSON: {e}"),
    })?;

    let Value::Array(items) = parsed else {
        return Err(DirectoryError::InvalidValue {
            attribute: name.to_string(),
            message: "expected a JSON array".to_string(),
        });
    };

    let mut values = Vec::with_capacity(items.len());
    for item in items {
        let value = match item {
            Value::Null => continue,
            Value::String(s) => AttributeValue::String(s),
            Value::Bool(b) => AttributeValue::Boolean(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => AttributeValue::Integer(i),
                None => AttributeValue::String(n.to_string()),
            },
            Value::Array(_) | Value::Object(_) => {
                return Err(DirectoryError::InvalidValue {
                    attribute: name.to_string(),
                    message: "JSON array elements must be scalars".to_string(),
                })
            }
        };
        values.push(value);
    }

    Ok(AttributeValue::Array(values))
}

/// Build the attribute dictionary for a mutation.
///
/// Structured fields go in first; descriptors are applied after and win on
/// (case-insensitive) name collision. Encoding errors abort the build.
pub fn build_attribute_map(
    mapped: Option<&dyn DirectoryMapped>,
    descriptors: &[AttributeDescriptor],
) -> DirectoryResult<AttributeSet> {
    let mut attributes = AttributeSet::new();

    if let Some(mapped) = mapped {
        for (name, value) in mapped.directory_attributes() {
            attributes.set(name, value);
        }
    }

    for descriptor in descriptors {
        attributes.set(descriptor.native_name(), encode(descriptor)?);
    }

    Ok(attributes)
}

// ============================================================================
// Decoding
// ============================================================================

/// Uniform sequence view of an attribute; absent attributes are empty.
pub fn decode_many<'a>(attributes: &'a AttributeSet, name: &str) -> Vec<&'a AttributeValue> {
    attributes
        .get(name)
        .map(AttributeValue::values)
        .unwrap_or_default()
}

/// Decode a large-integer attribute.
///
/// Multi-valued attributes decode element by element. An absent attribute is
/// [`DirectoryError::MissingAttribute`], never zero.
pub fn decode_large_integer(
    attributes: &AttributeSet,
    name: &str,
) -> DirectoryResult<OneOrMany<i64>> {
    let value = attributes
        .get(name)
        .filter(|v| !v.values().is_empty())
        .ok_or_else(|| DirectoryError::MissingAttribute {
            attribute: name.to_string(),
        })?;

    match value {
        AttributeValue::Array(items) => items
            .iter()
            .filter(|v| !v.is_null())
            .map(|item| numeric_value(name, item))
            .collect::<DirectoryResult<Vec<_>>>()
            .map(OneOrMany::Many),
        scalar => numeric_value(name, scalar).map(OneOrMany::One),
    }
}

fn numeric_value(name: &str, value: &AttributeValue) -> DirectoryResult<i64> {
    match value {
        AttributeValue::LargeInteger(v) => Ok(v.value()),
        AttributeValue::Integer(i) => Ok(*i),
        AttributeValue::String(s) => {
            s.trim()
                .parse::<i64>()
                .map_err(|_| DirectoryError::NonNumericAttribute {
                    attribute: name.to_string(),
                    detail: format!("'{s}' is not an integer"),
                })
        }
        other => Err(DirectoryError::NonNumericAttribute {
            attribute: name.to_string(),
            detail: format!("{} value", kind_name(other)),
        }),
    }
}

fn kind_name(value: &AttributeValue) -> &'static str {
    match value {
        AttributeValue::Null => "null",
        AttributeValue::String(_) => "string",
        AttributeValue::Integer(_) => "integer",
        AttributeValue::Boolean(_) => "boolean",
        AttributeValue::LargeInteger(_) => "large integer",
        AttributeValue::Binary(_) => "binary",
        AttributeValue::Array(_) => "multi-valued",
    }
}

/// Decode a large-integer attribute as FILETIME timestamps.
///
/// Values beyond the timestamp range (such as the "never expires" pattern)
/// become the maximum timestamp.
pub fn decode_timestamp(
    attributes: &AttributeSet,
    name: &str,
) -> DirectoryResult<OneOrMany<DateTime<Utc>>> {
    let decoded = decode_large_integer(attributes, name).map_err(|e| match e {
        DirectoryError::NonNumericAttribute { attribute, detail } => {
            DirectoryError::NonNumericAttribute {
                attribute,
                detail: format!("only numeric attributes can be converted to a timestamp ({detail})"),
            }
        }
        other => other,
    })?;

    match decoded {
        OneOrMany::One(ticks) => filetime_to_datetime(name, ticks).map(OneOrMany::One),
        OneOrMany::Many(all) => all
            .into_iter()
            .map(|ticks| filetime_to_datetime(name, ticks))
            .collect::<DirectoryResult<Vec<_>>>()
            .map(OneOrMany::Many),
    }
}

/// First value of an attribute as a string, or `None` when absent or empty.
pub fn first_as_string(attributes: &AttributeSet, name: &str) -> Option<String> {
    decode_many(attributes, name).first().map(|v| value_to_string(v))
}

/// Every value of an attribute as strings; empty when absent.
pub fn all_as_strings(attributes: &AttributeSet, name: &str) -> Vec<String> {
    decode_many(attributes, name)
        .into_iter()
        .map(value_to_string)
        .collect()
}

/// Render a scalar value as text. Binary values are base64 encoded.
pub fn value_to_string(value: &AttributeValue) -> String {
    match value {
        AttributeValue::Null => String::new(),
        AttributeValue::String(s) => s.clone(),
        AttributeValue::Integer(i) => i.to_string(),
        AttributeValue::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        AttributeValue::LargeInteger(v) => v.value().to_string(),
        AttributeValue::Binary(b) => base64::engine::general_purpose::STANDARD.encode(b),
        AttributeValue::Array(items) => items
            .iter()
            .map(value_to_string)
            .collect::<Vec<_>>()
            .join(";"),
    }
}

// ============================================================================
// Wire conversion
// ============================================================================

/// Convert wire-level attribute maps into a typed attribute set.
///
/// Known large-integer attributes whose text is a base-10 `i64` become
/// [`AttributeValue::LargeInteger`]; everything else stays textual or binary.
pub fn attributes_from_wire(
    attrs: &HashMap<String, Vec<String>>,
    bin_attrs: &HashMap<String, Vec<Vec<u8>>>,
) -> AttributeSet {
    let mut set = AttributeSet::new();

    for (name, values) in attrs {
        let large = is_large_integer_attribute(name);
        let mut converted: Vec<AttributeValue> = values
            .iter()
            .map(|text| match text.trim().parse::<i64>() {
                Ok(v) if large => AttributeValue::LargeInteger(LargeInteger::from_i64(v)),
                _ => AttributeValue::String(text.clone()),
            })
            .collect();
        match converted.len() {
            0 => {}
            1 => set.set(name.clone(), converted.remove(0)),
            _ => set.set(name.clone(), AttributeValue::Array(converted)),
        }
    }

    for (name, values) in bin_attrs {
        let mut converted: Vec<AttributeValue> =
            values.iter().cloned().map(AttributeValue::Binary).collect();
        match converted.len() {
            0 => {}
            1 => set.set(name.clone(), converted.remove(0)),
            _ => set.set(name.clone(), AttributeValue::Array(converted)),
        }
    }

    set
}

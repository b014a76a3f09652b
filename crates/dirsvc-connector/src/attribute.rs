//! Attribute descriptors and the user-schema attribute name table.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DirectoryError, DirectoryResult};
use crate::value::AttributeValue;

/// Declared type of an attribute descriptor's string value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AttributeDataType {
    #[default]
    String,
    Int,
    Boolean,
    #[serde(rename = "JSONArray", alias = "JsonArray")]
    JsonArray,
}

impl AttributeDataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeDataType::String => "String",
            AttributeDataType::Int => "Int",
            AttributeDataType::Boolean => "Boolean",
            AttributeDataType::JsonArray => "JSONArray",
        }
    }

    /// Resolve a numeric type code (0 string, 1 int, 3 boolean, 4 JSON array).
    pub fn from_code(attribute: &str, code: i32) -> DirectoryResult<Self> {
        match code {
            0 => Ok(AttributeDataType::String),
            1 => Ok(AttributeDataType::Int),
            3 => Ok(AttributeDataType::Boolean),
            4 => Ok(AttributeDataType::JsonArray),
            other => Err(DirectoryError::UnsupportedType {
                attribute: attribute.to_string(),
                data_type: other.to_string(),
            }),
        }
    }

    /// Resolve a type by name. Unknown names are an error, never coerced.
    pub fn parse(attribute: &str, name: &str) -> DirectoryResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "string" => Ok(AttributeDataType::String),
            "int" | "integer" => Ok(AttributeDataType::Int),
            "boolean" | "bool" => Ok(AttributeDataType::Boolean),
            "jsonarray" => Ok(AttributeDataType::JsonArray),
            _ => Err(DirectoryError::UnsupportedType {
                attribute: attribute.to_string(),
                data_type: name.to_string(),
            }),
        }
    }
}

/// A data type as submitted, by name or numeric code.
///
/// Kept unresolved so an unknown type surfaces as
/// [`DirectoryError::UnsupportedType`] when the descriptor is encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeclaredType {
    Code(i32),
    Name(String),
}

impl DeclaredType {
    pub fn resolve(&self, attribute: &str) -> DirectoryResult<AttributeDataType> {
        match self {
            DeclaredType::Code(code) => AttributeDataType::from_code(attribute, *code),
            DeclaredType::Name(name) => AttributeDataType::parse(attribute, name),
        }
    }
}

impl Default for DeclaredType {
    fn default() -> Self {
        AttributeDataType::default().into()
    }
}

impl From<AttributeDataType> for DeclaredType {
    fn from(data_type: AttributeDataType) -> Self {
        DeclaredType::Name(data_type.as_str().to_string())
    }
}

impl fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclaredType::Code(code) => write!(f, "{code}"),
            DeclaredType::Name(name) => f.write_str(name),
        }
    }
}

/// Well-known user attributes and their native directory names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum AdUserAttribute {
    samAccountName,
    cn,
    userPassword,
    givenName,
    sn,
    initials,
    displayName,
    description,
    physicalDeliveryOfficeName,
    telephoneNumber,
    mail,
    streetAddress,
    postOfficeBox,
    l,
    st,
    postalCode,
    co,
    homePhone,
    mobile,
    facsimileTelephoneNumber,
    title,
    department,
    company,
}

const AD_USER_ATTRIBUTES: [(AdUserAttribute, &str); 23] = [
    (AdUserAttribute::samAccountName, "samAccountName"),
    (AdUserAttribute::cn, "cn"),
    (AdUserAttribute::userPassword, "userPassword"),
    (AdUserAttribute::givenName, "givenName"),
    (AdUserAttribute::sn, "sn"),
    (AdUserAttribute::initials, "initials"),
    (AdUserAttribute::displayName, "displayName"),
    (AdUserAttribute::description, "description"),
    (
        AdUserAttribute::physicalDeliveryOfficeName,
        "physicalDeliveryOfficeName",
    ),
    (AdUserAttribute::telephoneNumber, "telephoneNumber"),
    (AdUserAttribute::mail, "mail"),
    (AdUserAttribute::streetAddress, "streetAddress"),
    (AdUserAttribute::postOfficeBox, "postOfficeBox"),
    (AdUserAttribute::l, "l"),
    (AdUserAttribute::st, "st"),
    (AdUserAttribute::postalCode, "postalCode"),
    (AdUserAttribute::co, "co"),
    (AdUserAttribute::homePhone, "homePhone"),
    (AdUserAttribute::mobile, "mobile"),
    (
        AdUserAttribute::facsimileTelephoneNumber,
        "facsimileTelephoneNumber",
    ),
    (AdUserAttribute::title, "title"),
    (AdUserAttribute::department, "department"),
    (AdUserAttribute::company, "company"),
];

impl AdUserAttribute {
    /// Native directory attribute name.
    pub fn native_name(self) -> &'static str {
        AD_USER_ATTRIBUTES
            .iter()
            .find(|(attr, _)| *attr == self)
            .map_or("", |(_, name)| name)
    }

    /// Look up a well-known attribute by its native name (case-insensitive).
    pub fn from_native_name(name: &str) -> Option<Self> {
        AD_USER_ATTRIBUTES
            .iter()
            .find(|(_, native)| native.eq_ignore_ascii_case(name))
            .map(|(attr, _)| *attr)
    }

    /// All well-known attributes, in table order.
    pub fn all() -> impl Iterator<Item = AdUserAttribute> {
        AD_USER_ATTRIBUTES.iter().map(|(attr, _)| *attr)
    }
}

/// The logical name of a descriptor: a table entry or an opaque custom name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeName {
    Known(AdUserAttribute),
    Custom(String),
}

impl AttributeName {
    /// Native directory attribute name.
    pub fn native_name(&self) -> &str {
        match self {
            AttributeName::Known(attr) => attr.native_name(),
            AttributeName::Custom(name) => name,
        }
    }
}

impl From<AdUserAttribute> for AttributeName {
    fn from(attr: AdUserAttribute) -> Self {
        AttributeName::Known(attr)
    }
}

impl From<&str> for AttributeName {
    fn from(name: &str) -> Self {
        AttributeName::Custom(name.to_string())
    }
}

impl From<String> for AttributeName {
    fn from(name: String) -> Self {
        AttributeName::Custom(name)
    }
}

impl fmt::Display for AttributeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.native_name())
    }
}

impl FromStr for AttributeName {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(AdUserAttribute::from_native_name(s)
            .map_or_else(|| AttributeName::Custom(s.to_string()), AttributeName::Known))
    }
}

/// Mutation input: a named attribute with a string-encoded value and its declared type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    pub name: AttributeName,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub data_type: DeclaredType,
}

impl AttributeDescriptor {
    pub fn new(
        name: impl Into<AttributeName>,
        value: impl Into<String>,
        data_type: AttributeDataType,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            data_type: data_type.into(),
        }
    }

    /// A string-typed descriptor.
    pub fn string(name: impl Into<AttributeName>, value: impl Into<String>) -> Self {
        Self::new(name, value, AttributeDataType::String)
    }

    pub fn native_name(&self) -> &str {
        self.name.native_name()
    }

    /// The declared type, or `UnsupportedType` when it is not recognised.
    pub fn resolved_type(&self) -> DirectoryResult<AttributeDataType> {
        self.data_type.resolve(self.native_name())
    }
}

/// Structured input whose fields map onto directory attributes.
///
/// The mutator merges these with free-form descriptors; descriptors win on
/// name collision.
pub trait DirectoryMapped {
    /// Attribute name/value pairs for the populated fields.
    fn directory_attributes(&self) -> Vec<(String, AttributeValue)>;
}

/// Check that a name is a valid LDAP attribute description.
///
/// Accepts a descriptor (`ALPHA *(ALPHA / DIGIT / "-")`) or a numeric OID,
/// optionally followed by `;options`.
pub fn validate_attribute_name(name: &str) -> DirectoryResult<()> {
    let base = name.split(';').next().unwrap_or_default();
    let valid_descr = base
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic())
        && base.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    let valid_oid = !base.is_empty()
        && base
            .split('.')
            .all(|arc| !arc.is_empty() && arc.chars().all(|c| c.is_ascii_digit()));

    if valid_descr || valid_oid {
        Ok(())
    } else {
        Err(DirectoryError::SchemaMismatch {
            attributes: name.to_string(),
            message: "not a valid attribute description".to_string(),
        })
    }
}

//! Search filter builder.
//!
//! Callers mostly pass raw filter strings; the mutator builds its lookups
//! through [`Filter`] so user-supplied values are escaped per RFC 4515.

use serde::{Deserialize, Serialize};

/// A search filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Filter {
    /// Match entries where attribute equals value.
    Equals { attribute: String, value: String },

    /// Match entries where attribute exists.
    Present { attribute: String },

    /// Logical AND of multiple filters.
    And { filters: Vec<Filter> },

    /// Logical OR of multiple filters.
    Or { filters: Vec<Filter> },

    /// Logical NOT of a filter.
    Not { filter: Box<Filter> },

    /// A filter string passed through unchanged.
    Raw { filter: String },
}

impl Filter {
    /// Create an equals filter.
    pub fn eq(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Create a present (attribute exists) filter.
    pub fn present(attribute: impl Into<String>) -> Self {
        Filter::Present {
            attribute: attribute.into(),
        }
    }

    /// Create an AND filter.
    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And { filters }
    }

    /// Create an OR filter.
    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or { filters }
    }

    /// Create a NOT filter (negation).
    pub fn negate(filter: Filter) -> Self {
        Filter::Not {
            filter: Box::new(filter),
        }
    }

    /// Wrap an already-formed filter string.
    pub fn raw(filter: impl Into<String>) -> Self {
        Filter::Raw {
            filter: filter.into(),
        }
    }

    /// `(&(objectClass=<class>)(cn=<cn>))`, the lookup used by delete and rename.
    pub fn class_and_cn(object_class: &str, cn: &str) -> Self {
        Filter::and(vec![Filter::eq("objectClass", object_class), Filter::eq("cn", cn)])
    }

    /// Render as an LDAP filter string.
    pub fn to_ldap_string(&self) -> String {
        match self {
            Filter::Equals { attribute, value } => {
                format!("({}={})", attribute, escape_filter_value(value))
            }
            Filter::Present { attribute } => format!("({attribute}=*)"),
            Filter::And { filters } => {
                let inner: String = filters.iter().map(Filter::to_ldap_string).collect();
                format!("(&{inner})")
            }
            Filter::Or { filters } => {
                let inner: String = filters.iter().map(Filter::to_ldap_string).collect();
                format!("(|{inner})")
            }
            Filter::Not { filter } => format!("(!{})", filter.to_ldap_string()),
            Filter::Raw { filter } => filter.clone(),
        }
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_ldap_string())
    }
}

/// Escape special characters in filter values (RFC 4515).
pub fn escape_filter_value(value: &str) -> String {
    value
        .replace('\\', "\\5c")
        .replace('*', "\\2a")
        .replace('(', "\\28")
        .replace(')', "\\29")
        .replace('\0', "\\00")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equals() {
        assert_eq!(Filter::eq("cn", "John Doe").to_ldap_string(), "(cn=John Doe)");
    }

    #[test]
    fn test_class_and_cn() {
        assert_eq!(
            Filter::class_and_cn("user", "MattiMeikalainen").to_ldap_string(),
            "(&(objectClass=user)(cn=MattiMeikalainen))"
        );
    }

    #[test]
    fn test_or_not_present() {
        let filter = Filter::or(vec![
            Filter::negate(Filter::present("mail")),
            Filter::eq("cn", "Jane"),
        ]);
        assert_eq!(filter.to_ldap_string(), "(|(!(mail=*))(cn=Jane))");
    }

    #[test]
    fn test_raw_passes_through() {
        let raw = "(&(objectClass=user)(sAMAccountName=Test*))";
        assert_eq!(Filter::raw(raw).to_string(), raw);
    }

    #[test]
    fn test_escape_filter_value() {
        assert_eq!(escape_filter_value("John Doe"), "John Doe");
        assert_eq!(escape_filter_value("John*"), "John\\2a");
        assert_eq!(escape_filter_value("(admin)"), "\\28admin\\29");
        assert_eq!(escape_filter_value("a\\b"), "a\\5cb");
    }

    #[test]
    fn test_injection_is_neutralised() {
        let filter = Filter::class_and_cn("user", "*)(objectClass=*");
        assert_eq!(
            filter.to_ldap_string(),
            "(&(objectClass=user)(cn=\\2a\\29\\28objectClass=\\2a))"
        );
    }
}

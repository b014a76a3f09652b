//! Directory client error types
//!
//! Error definitions with transient/permanent classification. Nothing in this
//! crate retries on its own; the classification is for callers that do.

use thiserror::Error;

/// Hint appended to every attribute-assignment failure.
pub const SCHEMA_HINT: &str =
    "check that the key exists in the object's schema and that its spelling and case are right";

/// Error that can occur during directory operations.
#[derive(Debug, Error)]
pub enum DirectoryError {
    // Lookup errors
    /// Zero matches where exactly one or at least one was required.
    #[error("did not find any entries matching filter {filter} from {root}")]
    NotFound { filter: String, root: String },

    /// More than one match where exactly one was required.
    #[error("found {count} entries matching filter {filter} from {root}, expected exactly one")]
    Ambiguous {
        filter: String,
        root: String,
        count: usize,
    },

    /// A search could not be executed (bad filter syntax, unreachable root).
    #[error("search with filter {filter} under {root} failed: {source}")]
    SearchFailed {
        filter: String,
        root: String,
        #[source]
        source: Box<DirectoryError>,
    },

    // Attribute and codec errors
    /// The attribute key(s) are not valid for the object's schema.
    #[error("setting attribute(s) '{attributes}' failed: {message}; {hint}", hint = SCHEMA_HINT)]
    SchemaMismatch { attributes: String, message: String },

    /// An attribute descriptor declares a type the codec cannot encode.
    #[error("unsupported data type '{data_type}' for attribute '{attribute}'")]
    UnsupportedType { attribute: String, data_type: String },

    /// A strict decode was requested on an attribute the entry does not have.
    #[error("attribute '{attribute}' not found")]
    MissingAttribute { attribute: String },

    /// Numeric decode requested on non-numeric data.
    #[error("attribute '{attribute}' is not numeric: {detail}")]
    NonNumericAttribute { attribute: String, detail: String },

    /// A descriptor value could not be parsed as its declared type.
    #[error("invalid value for attribute '{attribute}': {message}")]
    InvalidValue { attribute: String, message: String },

    // Remote errors
    /// The directory rejected an operation.
    #[error("{}", remote_fault_message(.message, .code, .diagnostic))]
    RemoteFault {
        message: String,
        /// Native result code, when the backend reports one.
        code: Option<u32>,
        /// Extended diagnostic text from the server.
        diagnostic: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An entry with the same DN already exists.
    #[error("entry already exists: {dn}")]
    AlreadyExists { dn: String },

    /// A per-group membership change failed.
    #[error("group membership change for '{target}' in group '{group}' failed: {source}")]
    GroupMembership {
        target: String,
        group: String,
        #[source]
        source: Box<DirectoryError>,
    },

    /// Password could not be set. Carries the accumulated operation log.
    #[error("password could not be set. Log: {log}")]
    PasswordFailed {
        log: String,
        #[source]
        source: Box<DirectoryError>,
    },

    // Connection errors
    /// Failed to establish a connection to the directory.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Invalid credentials provided.
    #[error("authentication failed: invalid credentials")]
    AuthenticationFailed,

    /// Connection parameters are invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },
}

fn remote_fault_message(message: &str, code: &Option<u32>, diagnostic: &Option<String>) -> String {
    let mut text = format!("directory operation failed: {message}");
    if let Some(code) = code {
        text.push_str(&format!(" (result code {code})"));
    }
    if let Some(diagnostic) = diagnostic.as_deref().filter(|d| !d.is_empty()) {
        text.push(' ');
        text.push_str(diagnostic);
    }
    text
}

/// Result codes the directory uses to reject an attribute against the schema.
const SCHEMA_RESULT_CODES: [u32; 4] = [16, 17, 21, 65];

impl DirectoryError {
    /// Check if this error is transient and the operation may succeed if retried.
    ///
    /// Only connection-level failures qualify. Retrying is always the caller's decision.
    pub fn is_transient(&self) -> bool {
        match self {
            DirectoryError::ConnectionFailed { .. } => true,
            // busy (51) and unavailable (52)
            DirectoryError::RemoteFault { code, .. } => matches!(code, Some(51) | Some(52)),
            DirectoryError::SearchFailed { source, .. }
            | DirectoryError::GroupMembership { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Check if this error is permanent and retry won't help.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Whether the directory rejected an attribute against the object's schema.
    pub fn is_schema_violation(&self) -> bool {
        matches!(
            self,
            DirectoryError::RemoteFault { code: Some(code), .. } if SCHEMA_RESULT_CODES.contains(code)
        )
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            DirectoryError::NotFound { .. } => "NOT_FOUND",
            DirectoryError::Ambiguous { .. } => "AMBIGUOUS",
            DirectoryError::SearchFailed { .. } => "SEARCH_FAILED",
            DirectoryError::SchemaMismatch { .. } => "SCHEMA_MISMATCH",
            DirectoryError::UnsupportedType { .. } => "UNSUPPORTED_TYPE",
            DirectoryError::MissingAttribute { .. } => "MISSING_ATTRIBUTE",
            DirectoryError::NonNumericAttribute { .. } => "NON_NUMERIC_ATTRIBUTE",
            DirectoryError::InvalidValue { .. } => "INVALID_VALUE",
            DirectoryError::RemoteFault { .. } => "REMOTE_FAULT",
            DirectoryError::AlreadyExists { .. } => "ALREADY_EXISTS",
            DirectoryError::GroupMembership { .. } => "GROUP_MEMBERSHIP_FAILED",
            DirectoryError::PasswordFailed { .. } => "PASSWORD_FAILED",
            DirectoryError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            DirectoryError::AuthenticationFailed => "AUTH_FAILED",
            DirectoryError::InvalidConfiguration { .. } => "INVALID_CONFIG",
        }
    }

    // Convenience constructors

    /// Create a remote fault from a native result code and diagnostic text.
    pub fn remote(message: impl Into<String>, code: u32, diagnostic: impl Into<String>) -> Self {
        DirectoryError::RemoteFault {
            message: message.into(),
            code: Some(code),
            diagnostic: Some(diagnostic.into()),
            source: None,
        }
    }

    /// Create a remote fault wrapping a client library error.
    pub fn remote_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        DirectoryError::RemoteFault {
            message: message.into(),
            code: None,
            diagnostic: None,
            source: Some(Box::new(source)),
        }
    }

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        DirectoryError::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection failed error with source.
    pub fn connection_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        DirectoryError::ConnectionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        DirectoryError::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Wrap a failed search with its filter and root.
    pub fn search_failed(filter: impl Into<String>, root: impl Into<String>, source: Self) -> Self {
        DirectoryError::SearchFailed {
            filter: filter.into(),
            root: root.into(),
            source: Box::new(source),
        }
    }
}

/// Result type for directory operations.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        let transient_errors = vec![
            DirectoryError::connection_failed("test"),
            DirectoryError::remote("modify", 51, "busy"),
            DirectoryError::search_failed(
                "(cn=x)",
                "DC=test",
                DirectoryError::connection_failed("reset"),
            ),
        ];

        for err in transient_errors {
            assert!(
                err.is_transient(),
                "Expected {} to be transient",
                err.error_code()
            );
            assert!(!err.is_permanent());
        }
    }

    #[test]
    fn test_permanent_errors() {
        let permanent_errors = vec![
            DirectoryError::AuthenticationFailed,
            DirectoryError::NotFound {
                filter: "(cn=x)".to_string(),
                root: "DC=test".to_string(),
            },
            DirectoryError::remote("modify", 50, "insufficient access"),
            DirectoryError::invalid_configuration("test"),
        ];

        for err in permanent_errors {
            assert!(
                err.is_permanent(),
                "Expected {} to be permanent",
                err.error_code()
            );
        }
    }

    #[test]
    fn test_not_found_names_filter_and_root() {
        let err = DirectoryError::NotFound {
            filter: "(&(objectClass=user)(cn=Matti))".to_string(),
            root: "OU=Users,DC=test,DC=net".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("(&(objectClass=user)(cn=Matti))"));
        assert!(message.contains("OU=Users,DC=test,DC=net"));
    }

    #[test]
    fn test_remote_fault_includes_diagnostic() {
        let err = DirectoryError::remote(
            "modify CN=x",
            50,
            "00002098: SecErr: DSID-03150F94, problem 4003 (INSUFF_ACCESS_RIGHTS)",
        );
        let message = err.to_string();
        assert!(message.contains("result code 50"));
        assert!(message.contains("INSUFF_ACCESS_RIGHTS"));
    }

    #[test]
    fn test_schema_mismatch_carries_hint() {
        let err = DirectoryError::SchemaMismatch {
            attributes: "GivenName".to_string(),
            message: "undefined attribute type".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("GivenName"));
        assert!(message.contains("case"));
    }

    #[test]
    fn test_schema_violation_codes() {
        assert!(DirectoryError::remote("modify", 17, "").is_schema_violation());
        assert!(DirectoryError::remote("modify", 65, "").is_schema_violation());
        assert!(!DirectoryError::remote("modify", 50, "").is_schema_violation());
        assert!(!DirectoryError::AuthenticationFailed.is_schema_violation());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(DirectoryError::AuthenticationFailed.error_code(), "AUTH_FAILED");
        assert_eq!(
            DirectoryError::MissingAttribute {
                attribute: "accountExpires".to_string()
            }
            .error_code(),
            "MISSING_ATTRIBUTE"
        );
    }
}

//! # LDAP Backend
//!
//! `ldap3` implementation of the `dirsvc-connector` capability traits.
//!
//! ## Features
//!
//! - LDAP v3 over plain, StartTLS or LDAPS transports
//! - Server-side paged search with continuation-reference chasing
//! - Active Directory tree delete, with a leaf-first fallback
//! - `unicodePwd` password contexts
//!
//! ## Example
//!
//! ```ignore
//! use dirsvc_connector::prelude::*;
//! use dirsvc_connector_ldap::{LdapConnector, LdapSettings};
//!
//! let connector = LdapConnector::new(LdapSettings::default().with_operation_timeout(30));
//! let connection = DirectoryConnection::new(
//!     "ldap://dc01.example.com/DC=example,DC=com",
//!     "CN=svc,DC=example,DC=com",
//!     password,
//! )
//! .with_authentication(AuthenticationType::SecureSocketsLayer);
//!
//! let ops = DirectoryOperations::new(connector, connection)?;
//! let output = ops.fetch("OU=Users,DC=example,DC=com", "(sn=Doe)").await?;
//! ```

pub mod config;
pub mod connector;
pub mod password;

// Re-exports
pub use config::LdapSettings;
pub use connector::{LdapBackend, LdapConnector};
pub use password::{encode_ad_password, LdapPasswordContext, LdapPasswordContextProvider};

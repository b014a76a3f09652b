//! # Directory Service Connector
//!
//! Backend-independent core for working with LDAP / Active Directory style
//! directories: typed attribute marshaling, filtered and paged search,
//! entry mutation, and idempotent group membership reconciliation.
//!
//! ## Architecture
//!
//! Everything runs through a [`DirectorySession`](session::DirectorySession),
//! which owns exactly one backend connection for a batch of operations:
//!
//! - [`SearchEngine`](search::SearchEngine) - fetch (live entries) and search (detached records)
//! - [`EntryMutator`](mutator::EntryMutator) - create, update, delete, rename, move
//! - [`GroupReconciler`](groups::GroupReconciler) - add to / remove from groups
//!
//! The wire is reached only through the capability traits in [`traits`];
//! `dirsvc-connector-ldap` implements them on `ldap3`.
//!
//! ## Example
//!
//! ```ignore
//! use dirsvc_connector::prelude::*;
//!
//! let connection = DirectoryConnection::new(
//!     "ldaps://dc01.example.com/DC=example,DC=com",
//!     "CN=svc,DC=example,DC=com",
//!     password,
//! );
//! let ops = DirectoryOperations::new(connector, connection)?;
//!
//! let found = ops
//!     .search(&SearchSpecification::new("OU=Users,DC=example,DC=com", "(sn=Doe)")
//!         .with_properties(["cn", "accountExpires"])
//!         .with_page_size(500))
//!     .await?;
//! for record in found.entries {
//!     println!("{} expires {}", record.dn, record.account_expires()?);
//! }
//! ```
//!
//! ## Crate Organization
//!
//! - [`error`] - Error types with transient/permanent classification
//! - [`value`] / [`large_integer`] / [`codec`] - Attribute values and their encoding
//! - [`attribute`] / [`flags`] - Mutation inputs and account-control toggles
//! - [`filter`] / [`dn`] - Filter and DN construction with escaping
//! - [`config`] - Connection parameters
//! - [`password`] - Password setting through a credential context
//! - [`operations`] - One-call-per-session facade for hosts

pub mod attribute;
pub mod codec;
pub mod config;
pub mod dn;
pub mod error;
pub mod filter;
pub mod flags;
pub mod groups;
pub mod large_integer;
pub mod mutator;
pub mod operations;
pub mod password;
pub mod search;
pub mod session;
pub mod traits;
pub mod value;

/// Prelude module for convenient imports.
///
/// ```
/// use dirsvc_connector::prelude::*;
/// ```
pub mod prelude {
    // Error handling
    pub use crate::error::{DirectoryError, DirectoryResult};

    // Values and codec
    pub use crate::large_integer::LargeInteger;
    pub use crate::value::{AttributeSet, AttributeValue, OneOrMany};

    // Mutation inputs
    pub use crate::attribute::{
        AdUserAttribute, AttributeDataType, AttributeDescriptor, AttributeName, DeclaredType,
        DirectoryMapped,
    };
    pub use crate::flags::{AdFlag, AdFlagType};

    // Configuration
    pub use crate::config::{AuthenticationFlag, AuthenticationType, DirectoryConnection};

    // Traits
    pub use crate::traits::{
        DirectoryBackend, DirectoryConnector, GroupMembershipOps, Modification, RawEntry,
        SearchScope,
    };

    // Sessions and components
    pub use crate::groups::{GroupReconciler, MembershipOutcome};
    pub use crate::mutator::{CreateRequest, EntryMutator, UpdateRequest};
    pub use crate::search::{SearchEngine, SearchRecord, SearchSpecification};
    pub use crate::session::{ApplySemantics, BoundEntry, DirectorySession, EntrySnapshot};

    // Password
    pub use crate::password::{
        set_user_password, ContextOption, ContextOptionFlag, PasswordContext,
        PasswordContextProvider, PasswordOutput, PasswordParameters,
    };

    // Facade
    pub use crate::operations::{
        CreateEntry, DirectoryOperations, EntriesOutput, EntryOutput, MembershipOutput,
        MoveObject, OperationOutput, UpdateEntry,
    };
}

// Re-export async_trait for backend implementors
pub use async_trait::async_trait;

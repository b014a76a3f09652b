//! Backend capability traits.
//!
//! A backend is one open connection to a directory. The core never talks to
//! a client library directly; it goes through these traits, which carry
//! exactly the operations the search engine, mutator and group reconciler
//! need.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::DirectoryConnection;
use crate::error::DirectoryResult;

/// Search scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// The base entry only.
    Base,
    /// Immediate children of the base.
    OneLevel,
    /// The base and everything beneath it.
    Subtree,
}

/// An entry as it comes off the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEntry {
    pub dn: String,
    /// Textual attributes.
    pub attrs: HashMap<String, Vec<String>>,
    /// Attributes whose values are not valid UTF-8.
    pub bin_attrs: HashMap<String, Vec<Vec<u8>>>,
}

/// One change in a modify request. Values are wire-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modification {
    /// Add values to an attribute.
    Add(String, Vec<Vec<u8>>),
    /// Remove the listed values, or the whole attribute when empty.
    Delete(String, Vec<Vec<u8>>),
    /// Replace all values; an empty list clears the attribute.
    Replace(String, Vec<Vec<u8>>),
}

impl Modification {
    /// Attribute the change targets.
    pub fn attribute(&self) -> &str {
        match self {
            Modification::Add(name, _)
            | Modification::Delete(name, _)
            | Modification::Replace(name, _) => name,
        }
    }
}

/// Core directory operations over one connection.
#[async_trait]
pub trait DirectoryBackend: Send + Sync {
    /// Search beneath `base`.
    ///
    /// An empty `attributes` list loads every attribute. `page_size > 0`
    /// enables server-side paging. Zero matches is an empty result.
    async fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[String],
        page_size: u32,
    ) -> DirectoryResult<Vec<RawEntry>>;

    /// Add a new entry.
    async fn add(&self, dn: &str, attributes: Vec<(String, Vec<Vec<u8>>)>) -> DirectoryResult<()>;

    /// Apply modifications to an entry atomically.
    async fn modify(&self, dn: &str, modifications: Vec<Modification>) -> DirectoryResult<()>;

    /// Delete an entry and everything beneath it.
    async fn delete_tree(&self, dn: &str) -> DirectoryResult<()>;

    /// Rename an entry, optionally moving it under `new_parent`.
    async fn rename(&self, dn: &str, new_rdn: &str, new_parent: Option<&str>)
        -> DirectoryResult<()>;

    /// Release the connection. Calling it again is a no-op.
    async fn close(&self) -> DirectoryResult<()>;
}

/// Group membership operations used by the reconciler.
#[async_trait]
pub trait GroupMembershipOps: DirectoryBackend {
    /// Whether `member_dn` is a direct member of `group_dn`.
    async fn is_member(&self, group_dn: &str, member_dn: &str) -> DirectoryResult<bool>;

    /// Add `member_dn` to `group_dn`.
    async fn add_member(&self, group_dn: &str, member_dn: &str) -> DirectoryResult<()>;

    /// Remove `member_dn` from `group_dn`.
    async fn remove_member(&self, group_dn: &str, member_dn: &str) -> DirectoryResult<()>;
}

/// Opens backends.
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    type Backend: GroupMembershipOps;

    /// Open and authenticate one connection.
    async fn connect(&self, connection: &DirectoryConnection) -> DirectoryResult<Self::Backend>;
}

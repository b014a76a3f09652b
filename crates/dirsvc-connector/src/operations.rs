//! Host-facing operations.
//!
//! Each call opens one session, runs a single operation through it and
//! closes the session on every exit path. Results are detached snapshots,
//! so nothing returned here holds a connection.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::attribute::{AttributeDescriptor, DirectoryMapped};
use crate::codec::build_attribute_map;
use crate::config::DirectoryConnection;
use crate::error::{DirectoryError, DirectoryResult};
use crate::flags::AdFlag;
use crate::groups::{GroupReconciler, MembershipOutcome};
use crate::mutator::{CreateRequest, EntryMutator, UpdateRequest, USER_CLASS};
use crate::password::{
    set_entry_password, ContextOption, ContextOptions, ContextRequest, PasswordContextProvider,
};
use crate::search::{SearchEngine, SearchRecord, SearchSpecification};
use crate::session::{BoundEntry, DirectorySession, EntrySnapshot};
use crate::traits::DirectoryConnector;

/// Entry to create under a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateEntry {
    pub cn: String,
    /// Parent container DN; empty means the connection root.
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_object_class")]
    pub object_class: String,
    #[serde(default)]
    pub attributes: Vec<AttributeDescriptor>,
    #[serde(default)]
    pub flags: Vec<AdFlag>,
}

fn default_object_class() -> String {
    USER_CLASS.to_string()
}

impl CreateEntry {
    pub fn new(cn: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            cn: cn.into(),
            path: path.into(),
            object_class: default_object_class(),
            attributes: Vec::new(),
            flags: Vec::new(),
        }
    }
}

/// Changes to an existing entry, addressed by fully qualified DN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateEntry {
    pub dn: String,
    #[serde(default)]
    pub attributes: Vec<AttributeDescriptor>,
    #[serde(default)]
    pub flags: Vec<AdFlag>,
}

/// Source and destination of a move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveObject {
    pub cn: String,
    /// Container the entry is in now.
    pub path: String,
    /// Container to move it to.
    pub new_path: String,
}

/// Result of an operation without a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OperationOutput {
    pub operation_successful: bool,
}

/// Result carrying one entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryOutput {
    pub operation_successful: bool,
    pub entry: EntrySnapshot,
}

/// Result carrying a list of entries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntriesOutput {
    pub operation_successful: bool,
    pub entries: Vec<SearchRecord>,
}

/// Result of a group reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MembershipOutput {
    pub operation_successful: bool,
    #[serde(flatten)]
    pub outcome: MembershipOutcome,
}

/// Operations against one directory.
pub struct DirectoryOperations<C: DirectoryConnector> {
    connector: C,
    connection: DirectoryConnection,
}

impl<C: DirectoryConnector> DirectoryOperations<C> {
    /// Validate the connection and wrap the connector.
    pub fn new(connector: C, connection: DirectoryConnection) -> DirectoryResult<Self> {
        connection.validate()?;
        Ok(Self {
            connector,
            connection,
        })
    }

    pub fn connection(&self) -> &DirectoryConnection {
        &self.connection
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Open a session rooted at the connection's base DN.
    pub async fn open_session(&self) -> DirectoryResult<DirectorySession<C::Backend>> {
        let endpoint = self.connection.endpoint()?;
        let backend = self.connector.connect(&self.connection).await?;
        info!(
            server = %endpoint.server_url(),
            root = %endpoint.base_dn,
            "Directory session opened"
        );
        Ok(DirectorySession::new(
            backend,
            endpoint.base_dn.clone(),
            endpoint.server_url(),
        ))
    }

    /// Subtree search returning every attribute of every match.
    #[instrument(skip(self))]
    pub async fn fetch(&self, path: &str, filter: &str) -> DirectoryResult<EntriesOutput> {
        let session = self.open_session().await?;
        let result = async {
            let entries = SearchEngine::new(&session)
                .fetch_by_filter(path, filter)
                .await?;
            Ok::<_, DirectoryError>(
                entries
                    .into_iter()
                    .map(BoundEntry::into_snapshot)
                    .collect::<Vec<_>>(),
            )
        }
        .await;
        let entries = session.finish(result).await?;
        Ok(EntriesOutput {
            operation_successful: true,
            entries,
        })
    }

    /// Subtree search with optional projection and paging.
    #[instrument(skip(self, spec), fields(path = %spec.path, filter = %spec.filter))]
    pub async fn search(&self, spec: &SearchSpecification) -> DirectoryResult<EntriesOutput> {
        let session = self.open_session().await?;
        let result = SearchEngine::new(&session).search_by_filter(spec).await;
        let entries = session.finish(result).await?;
        Ok(EntriesOutput {
            operation_successful: true,
            entries,
        })
    }

    /// Create an entry from structured fields and descriptors.
    #[instrument(skip(self, entry, mapped), fields(cn = %entry.cn, path = %entry.path))]
    pub async fn create(
        &self,
        entry: &CreateEntry,
        mapped: Option<&(dyn DirectoryMapped + Sync)>,
    ) -> DirectoryResult<EntryOutput> {
        let request = create_request(entry, mapped)?;
        let session = self.open_session().await?;
        let result = async {
            let created = EntryMutator::new(&session).create(&request).await?;
            Ok::<_, DirectoryError>(created.into_snapshot())
        }
        .await;
        let entry = session.finish(result).await?;
        Ok(EntryOutput {
            operation_successful: true,
            entry,
        })
    }

    /// Create an entry, then set its initial password through `provider`.
    ///
    /// The password context binds with the connection's own credentials,
    /// scoped to the new entry's container.
    #[instrument(skip(self, entry, mapped, provider, new_password), fields(cn = %entry.cn))]
    pub async fn create_with_password<P: PasswordContextProvider>(
        &self,
        entry: &CreateEntry,
        mapped: Option<&(dyn DirectoryMapped + Sync)>,
        provider: &P,
        new_password: &str,
    ) -> DirectoryResult<EntryOutput> {
        let request = create_request(entry, mapped)?;
        let session = self.open_session().await?;
        let result = async {
            let created = EntryMutator::new(&session)
                .create(&request)
                .await?
                .into_snapshot();
            let context = self.password_context(&entry.path, session.root())?;
            set_entry_password(provider, &context, &created.dn, new_password).await?;
            Ok::<_, DirectoryError>(created)
        }
        .await;
        let entry = session.finish(result).await?;
        Ok(EntryOutput {
            operation_successful: true,
            entry,
        })
    }

    /// Update an entry by DN. Empty descriptor values clear attributes.
    #[instrument(skip(self, entry, mapped), fields(dn = %entry.dn))]
    pub async fn update(
        &self,
        entry: &UpdateEntry,
        mapped: Option<&(dyn DirectoryMapped + Sync)>,
    ) -> DirectoryResult<EntryOutput> {
        let request = UpdateRequest {
            dn: entry.dn.clone(),
            attributes: build_attribute_map(
                mapped.map(|m| m as &dyn DirectoryMapped),
                &entry.attributes,
            )?,
            flags: entry.flags.clone(),
        };
        let session = self.open_session().await?;
        let result = async {
            let updated = EntryMutator::new(&session).update(&request).await?;
            Ok::<_, DirectoryError>(updated.into_snapshot())
        }
        .await;
        let entry = session.finish(result).await?;
        Ok(EntryOutput {
            operation_successful: true,
            entry,
        })
    }

    /// Delete the user named `cn` under `path`, with its subtree.
    #[instrument(skip(self))]
    pub async fn delete(&self, path: &str, cn: &str) -> DirectoryResult<OperationOutput> {
        let session = self.open_session().await?;
        let result = EntryMutator::new(&session).delete(path, cn).await;
        session.finish(result).await?;
        Ok(OperationOutput {
            operation_successful: true,
        })
    }

    /// Rename the user named `cn` under `path`.
    #[instrument(skip(self))]
    pub async fn rename(&self, path: &str, cn: &str, new_cn: &str) -> DirectoryResult<EntryOutput> {
        let session = self.open_session().await?;
        let result = async {
            let renamed = EntryMutator::new(&session).rename(path, cn, new_cn).await?;
            Ok::<_, DirectoryError>(renamed.into_snapshot())
        }
        .await;
        let entry = session.finish(result).await?;
        Ok(EntryOutput {
            operation_successful: true,
            entry,
        })
    }

    /// Move an entry to another container.
    #[instrument(skip(self, request), fields(cn = %request.cn))]
    pub async fn move_object(&self, request: &MoveObject) -> DirectoryResult<EntryOutput> {
        let session = self.open_session().await?;
        let result = async {
            let moved = EntryMutator::new(&session)
                .move_entry(&request.cn, &request.path, &request.new_path)
                .await?;
            Ok::<_, DirectoryError>(moved.into_snapshot())
        }
        .await;
        let entry = session.finish(result).await?;
        Ok(EntryOutput {
            operation_successful: true,
            entry,
        })
    }

    /// Add `dn` to each group not already containing it.
    #[instrument(skip(self, groups))]
    pub async fn add_to_groups(&self, dn: &str, groups: &[String]) -> DirectoryResult<MembershipOutput> {
        let session = self.open_session().await?;
        let result = GroupReconciler::new(&session).add_to_groups(dn, groups).await;
        let outcome = session.finish(result).await?;
        Ok(MembershipOutput {
            operation_successful: true,
            outcome,
        })
    }

    /// Remove `dn` from each group currently containing it.
    #[instrument(skip(self, groups))]
    pub async fn remove_from_groups(
        &self,
        dn: &str,
        groups: &[String],
    ) -> DirectoryResult<MembershipOutput> {
        let session = self.open_session().await?;
        let result = GroupReconciler::new(&session)
            .remove_from_groups(dn, groups)
            .await;
        let outcome = session.finish(result).await?;
        Ok(MembershipOutput {
            operation_successful: true,
            outcome,
        })
    }

    fn password_context(&self, path: &str, root: &str) -> DirectoryResult<ContextRequest> {
        let endpoint = self.connection.endpoint()?;
        let server = match endpoint.port {
            Some(port) => format!("{}:{port}", endpoint.host),
            None => endpoint.host,
        };
        let container = if path.is_empty() { root } else { path };
        let options = if endpoint.secure {
            ContextOptions::from_options(&[
                ContextOption::SimpleBind,
                ContextOption::SecureSocketLayer,
            ])
        } else {
            ContextOptions::resolve(&[])
        };
        Ok(ContextRequest {
            server,
            container: container.to_string(),
            username: self.connection.username.clone(),
            password: self.connection.password.clone(),
            options,
        })
    }
}

fn create_request(
    entry: &CreateEntry,
    mapped: Option<&(dyn DirectoryMapped + Sync)>,
) -> DirectoryResult<CreateRequest> {
    Ok(CreateRequest {
        cn: entry.cn.clone(),
        path: entry.path.clone(),
        object_class: entry.object_class.clone(),
        attributes: build_attribute_map(
            mapped.map(|m| m as &dyn DirectoryMapped),
            &entry.attributes,
        )?,
        flags: entry.flags.clone(),
    })
}

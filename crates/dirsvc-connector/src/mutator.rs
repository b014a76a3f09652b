//! Create, update, delete, rename and move.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::dn;
use crate::error::{DirectoryError, DirectoryResult};
use crate::filter::Filter;
use crate::flags::AdFlag;
use crate::search::SearchEngine;
use crate::session::{ApplySemantics, BoundEntry, DirectorySession};
use crate::traits::DirectoryBackend;
use crate::value::AttributeSet;

/// Object class delete and rename look entries up by.
pub const USER_CLASS: &str = "user";

/// Input for [`EntryMutator::create`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    /// Common name, with or without a `CN=` prefix.
    pub cn: String,
    /// Parent container DN. Empty creates directly under the session root.
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_object_class")]
    pub object_class: String,
    #[serde(default)]
    pub attributes: AttributeSet,
    #[serde(default)]
    pub flags: Vec<AdFlag>,
}

fn default_object_class() -> String {
    USER_CLASS.to_string()
}

impl CreateRequest {
    pub fn new(cn: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            cn: cn.into(),
            path: path.into(),
            object_class: default_object_class(),
            attributes: AttributeSet::new(),
            flags: Vec::new(),
        }
    }
}

/// Input for [`EntryMutator::update`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRequest {
    /// Fully qualified DN of the entry.
    pub dn: String,
    #[serde(default)]
    pub attributes: AttributeSet,
    #[serde(default)]
    pub flags: Vec<AdFlag>,
}

/// Applies changes through a session.
pub struct EntryMutator<'s, B: DirectoryBackend> {
    session: &'s DirectorySession<B>,
}

impl<'s, B: DirectoryBackend> EntryMutator<'s, B> {
    pub fn new(session: &'s DirectorySession<B>) -> Self {
        Self { session }
    }

    async fn resolve(&self, target_dn: &str) -> DirectoryResult<BoundEntry<'s, B>> {
        let raw = self.session.require_path(target_dn).await?;
        Ok(self.session.bind(raw))
    }

    /// Create a child entry and apply its attributes, then its flags.
    ///
    /// Flags are applied in a second commit once the entry exists.
    #[instrument(skip(self, request), fields(cn = %request.cn, path = %request.path))]
    pub async fn create(&self, request: &CreateRequest) -> DirectoryResult<BoundEntry<'s, B>> {
        let parent_dn = if request.path.is_empty() {
            self.session.root().to_string()
        } else {
            self.resolve(&request.path).await?.dn().to_string()
        };

        let entry_dn = dn::join(&dn::cn_rdn(&request.cn), &parent_dn);
        let mut entry = self.session.new_entry(entry_dn, &request.object_class);
        entry.apply_attributes(&request.attributes, ApplySemantics::Create)?;
        entry.commit().await?;

        if !request.flags.is_empty() {
            entry.set_account_flags(&request.flags)?;
            entry.commit().await?;
            entry.refresh().await?;
        }

        Ok(entry)
    }

    /// Update an existing entry by DN.
    ///
    /// Empty descriptor values clear attributes here, unlike create.
    #[instrument(skip(self, request), fields(dn = %request.dn))]
    pub async fn update(&self, request: &UpdateRequest) -> DirectoryResult<BoundEntry<'s, B>> {
        let mut entry = self.resolve(&request.dn).await?;
        entry.apply_attributes(&request.attributes, ApplySemantics::Update)?;
        entry.set_account_flags(&request.flags)?;
        entry.commit().await?;
        entry.refresh().await?;
        Ok(entry)
    }

    /// Delete the one user named `cn` under `path`, with everything beneath it.
    #[instrument(skip(self))]
    pub async fn delete(&self, path: &str, cn: &str) -> DirectoryResult<()> {
        let filter = Filter::class_and_cn(USER_CLASS, dn::cn_value(cn)).to_ldap_string();
        let entry = SearchEngine::new(self.session).fetch_one(path, &filter).await?;
        let target = entry.into_snapshot().dn;

        self.session.backend().delete_tree(&target).await?;
        info!(dn = %target, "Entry deleted");
        Ok(())
    }

    /// Rename the one user named `cn` under `path` to `new_cn`.
    #[instrument(skip(self))]
    pub async fn rename(
        &self,
        path: &str,
        cn: &str,
        new_cn: &str,
    ) -> DirectoryResult<BoundEntry<'s, B>> {
        let filter = Filter::class_and_cn(USER_CLASS, dn::cn_value(cn)).to_ldap_string();
        let entry = SearchEngine::new(self.session).fetch_one(path, &filter).await?;
        let old_dn = entry.into_snapshot().dn;

        let new_rdn = dn::cn_rdn(new_cn);
        self.session.backend().rename(&old_dn, &new_rdn, None).await?;

        let (_, parent) = dn::split_first(&old_dn);
        let new_dn = dn::join(&new_rdn, parent);
        info!(from = %old_dn, to = %new_dn, "Entry renamed");
        self.reread(&new_dn).await
    }

    /// Move `cn` from container `path` into container `new_path`.
    ///
    /// The returned entry is a fresh lookup at the new location.
    #[instrument(skip(self))]
    pub async fn move_entry(
        &self,
        cn: &str,
        path: &str,
        new_path: &str,
    ) -> DirectoryResult<BoundEntry<'s, B>> {
        let source_dn = dn::join(&dn::cn_rdn(cn), path);
        let source = self.resolve(&source_dn).await?.into_snapshot();
        let destination = self.resolve(new_path).await?.into_snapshot();

        let (rdn, _) = dn::split_first(&source.dn);
        self.session
            .backend()
            .rename(&source.dn, rdn, Some(&destination.dn))
            .await?;

        let moved_dn = dn::join(rdn, &destination.dn);
        info!(from = %source.dn, to = %moved_dn, "Entry moved");
        self.reread(&moved_dn).await
    }

    async fn reread(&self, entry_dn: &str) -> DirectoryResult<BoundEntry<'s, B>> {
        let raw = self
            .session
            .read(entry_dn)
            .await?
            .ok_or_else(|| DirectoryError::NotFound {
                filter: "(objectClass=*)".to_string(),
                root: entry_dn.to_string(),
            })?;
        Ok(self.session.bind(raw))
    }
}

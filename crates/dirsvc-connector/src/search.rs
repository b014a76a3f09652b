//! Filtered search and fetch.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{DirectoryError, DirectoryResult};
use crate::session::{BoundEntry, DirectorySession, EntrySnapshot};
use crate::traits::{DirectoryBackend, SearchScope};

/// Detached projection record returned by [`SearchEngine::search_by_filter`].
pub type SearchRecord = EntrySnapshot;

/// What to search for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSpecification {
    /// Subtree root. Empty means the session root.
    #[serde(default)]
    pub path: String,

    /// LDAP filter string.
    pub filter: String,

    /// Attributes to load. Empty loads all.
    #[serde(default)]
    pub properties_to_load: Vec<String>,

    /// Page size; 0 disables paging.
    #[serde(default)]
    pub page_size: u32,
}

impl SearchSpecification {
    pub fn new(path: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            filter: filter.into(),
            ..Default::default()
        }
    }

    /// Restrict the attributes transferred.
    #[must_use]
    pub fn with_properties<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties_to_load = properties.into_iter().map(Into::into).collect();
        self
    }

    /// Enable paging.
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }
}

/// Runs searches through a session.
pub struct SearchEngine<'s, B: DirectoryBackend> {
    session: &'s DirectorySession<B>,
}

impl<'s, B: DirectoryBackend> SearchEngine<'s, B> {
    pub fn new(session: &'s DirectorySession<B>) -> Self {
        Self { session }
    }

    fn resolve_root<'a>(&'a self, path: &'a str) -> &'a str {
        if path.is_empty() {
            self.session.root()
        } else {
            path
        }
    }

    /// Subtree search returning live, mutable entries.
    ///
    /// Every attribute of every match is loaded. Zero matches is an empty list.
    #[instrument(skip(self))]
    pub async fn fetch_by_filter(
        &self,
        path: &str,
        filter: &str,
    ) -> DirectoryResult<Vec<BoundEntry<'s, B>>> {
        let root = self.resolve_root(path).to_string();
        let entries = self
            .session
            .backend()
            .search(&root, SearchScope::Subtree, filter, &[], 0)
            .await
            .map_err(|e| DirectoryError::search_failed(filter, &root, e))?;

        debug!(root = %root, filter = %filter, count = entries.len(), "Fetched entries");
        let session = self.session;
        Ok(entries.into_iter().map(|e| session.bind(e)).collect())
    }

    /// Subtree search returning detached records.
    ///
    /// A non-empty projection transfers only those attributes; the record's
    /// `dn` and `path` are always present.
    #[instrument(skip(self), fields(root = %spec.path, filter = %spec.filter))]
    pub async fn search_by_filter(
        &self,
        spec: &SearchSpecification,
    ) -> DirectoryResult<Vec<SearchRecord>> {
        let root = self.resolve_root(&spec.path).to_string();
        let entries = self
            .session
            .backend()
            .search(
                &root,
                SearchScope::Subtree,
                &spec.filter,
                &spec.properties_to_load,
                spec.page_size,
            )
            .await
            .map_err(|e| DirectoryError::search_failed(&spec.filter, &root, e))?;

        debug!(count = entries.len(), paged = spec.page_size > 0, "Search complete");
        Ok(entries
            .into_iter()
            .map(|e| self.session.snapshot(e))
            .collect())
    }

    /// Fetch the single match of `filter`, failing on zero or several.
    #[instrument(skip(self))]
    pub async fn fetch_one(&self, path: &str, filter: &str) -> DirectoryResult<BoundEntry<'s, B>> {
        let root = self.resolve_root(path).to_string();
        let mut entries = self.fetch_by_filter(&root, filter).await?;
        match entries.len() {
            0 => Err(DirectoryError::NotFound {
                filter: filter.to_string(),
                root,
            }),
            1 => Ok(entries.remove(0)),
            count => Err(DirectoryError::Ambiguous {
                filter: filter.to_string(),
                root,
                count,
            }),
        }
    }
}

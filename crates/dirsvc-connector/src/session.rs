//! Directory sessions and bound entries.
//!
//! A [`DirectorySession`] owns the one backend connection for a batch of
//! operations. [`BoundEntry`] is a live entry borrowed from the session:
//! changes accumulate locally and reach the directory on [`BoundEntry::commit`].
//! Because entries borrow the session, they cannot outlive it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::attribute::validate_attribute_name;
use crate::codec;
use crate::error::{DirectoryError, DirectoryResult};
use crate::filter::Filter;
use crate::flags::{apply_flags, current_mask, AdFlag, USER_ACCOUNT_CONTROL};
use crate::traits::{DirectoryBackend, Modification, RawEntry, SearchScope};
use crate::value::{AttributeSet, AttributeValue, OneOrMany};

/// Filter used for base-scope reads.
const ANY_OBJECT: &str = "(objectClass=*)";

/// How null values are treated when applying attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplySemantics {
    /// Null means "omit".
    Create,
    /// Null means "clear the attribute".
    Update,
}

/// One open connection plus the root the batch operates under.
pub struct DirectorySession<B: DirectoryBackend> {
    backend: B,
    root: String,
    server_url: String,
    closed: bool,
}

impl<B: DirectoryBackend> DirectorySession<B> {
    /// Wrap an open backend.
    ///
    /// `server_url` (`scheme://host[:port]`) prefixes entry paths on results.
    pub fn new(backend: B, root: impl Into<String>, server_url: impl Into<String>) -> Self {
        Self {
            backend,
            root: root.into(),
            server_url: server_url.into(),
            closed: false,
        }
    }

    /// The session root DN.
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// `scheme://host[:port]/<dn>`.
    pub fn entry_path(&self, dn: &str) -> String {
        format!("{}/{dn}", self.server_url)
    }

    /// Close the underlying connection.
    pub async fn close(mut self) -> DirectoryResult<()> {
        self.closed = true;
        debug!(root = %self.root, "Closing directory session");
        self.backend.close().await
    }

    /// Close the session, then hand back `result`.
    ///
    /// The connection is released whether or not `result` is an error. A
    /// close failure only surfaces when the operation itself succeeded.
    pub async fn finish<T>(self, result: DirectoryResult<T>) -> DirectoryResult<T> {
        let closed = self.close().await;
        match (result, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(close_err)) => Err(close_err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(close_err)) => {
                warn!(error = %close_err, "Failed to close session after error");
                Err(err)
            }
        }
    }

    /// Read one entry by DN; `None` when it does not exist.
    pub async fn read(&self, dn: &str) -> DirectoryResult<Option<RawEntry>> {
        self.read_matching(dn, ANY_OBJECT).await
    }

    /// Read one entry by DN if it also matches `filter`.
    #[instrument(skip(self))]
    pub async fn read_matching(&self, dn: &str, filter: &str) -> DirectoryResult<Option<RawEntry>> {
        match self
            .backend
            .search(dn, SearchScope::Base, filter, &[], 0)
            .await
        {
            Ok(entries) => Ok(entries.into_iter().next()),
            Err(DirectoryError::RemoteFault { code: Some(32), .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Find an entry by its distinguished name beneath `search_root`.
    #[instrument(skip(self))]
    pub async fn find_path(&self, search_root: &str, dn: &str) -> DirectoryResult<Option<RawEntry>> {
        let filter = distinguished_name_filter(dn);
        let entries = self
            .backend
            .search(search_root, SearchScope::Subtree, &filter, &[], 0)
            .await
            .map_err(|e| DirectoryError::search_failed(&filter, search_root, e))?;
        Ok(entries.into_iter().next())
    }

    /// Like [`find_path`](Self::find_path) under the session root, but absence is
    /// [`DirectoryError::NotFound`]. Without a root the DN is read directly.
    pub async fn require_path(&self, dn: &str) -> DirectoryResult<RawEntry> {
        if self.root.is_empty() {
            return self
                .read(dn)
                .await?
                .ok_or_else(|| DirectoryError::NotFound {
                    filter: ANY_OBJECT.to_string(),
                    root: dn.to_string(),
                });
        }
        self.find_path(&self.root, dn)
            .await?
            .ok_or_else(|| DirectoryError::NotFound {
                filter: distinguished_name_filter(dn),
                root: self.root.clone(),
            })
    }

    /// Bind a fetched entry for mutation.
    pub fn bind(&self, entry: RawEntry) -> BoundEntry<'_, B> {
        BoundEntry {
            session: self,
            attributes: codec::attributes_from_wire(&entry.attrs, &entry.bin_attrs),
            dn: entry.dn,
            state: EntryState::Persisted,
            pending: Vec::new(),
        }
    }

    /// Start a new, not yet committed child entry.
    pub fn new_entry(&self, dn: impl Into<String>, object_class: impl Into<String>) -> BoundEntry<'_, B> {
        BoundEntry {
            session: self,
            dn: dn.into(),
            attributes: AttributeSet::new(),
            state: EntryState::New {
                object_class: object_class.into(),
            },
            pending: Vec::new(),
        }
    }

    /// Detached snapshot of a fetched entry.
    pub fn snapshot(&self, entry: RawEntry) -> EntrySnapshot {
        EntrySnapshot {
            path: self.entry_path(&entry.dn),
            attributes: codec::attributes_from_wire(&entry.attrs, &entry.bin_attrs),
            dn: entry.dn,
        }
    }
}

impl<B: DirectoryBackend> Drop for DirectorySession<B> {
    fn drop(&mut self) {
        if !self.closed {
            warn!(root = %self.root, "Directory session dropped without close");
        }
    }
}

pub(crate) fn distinguished_name_filter(dn: &str) -> String {
    Filter::eq("distinguishedName", dn).to_ldap_string()
}

#[derive(Debug)]
enum EntryState {
    New { object_class: String },
    Persisted,
}

/// A live, mutable entry. Changes are lost unless committed.
pub struct BoundEntry<'s, B: DirectoryBackend> {
    session: &'s DirectorySession<B>,
    dn: String,
    attributes: AttributeSet,
    state: EntryState,
    pending: Vec<Modification>,
}

impl<'s, B: DirectoryBackend> BoundEntry<'s, B> {
    pub fn dn(&self) -> &str {
        &self.dn
    }

    /// Attribute snapshot, including uncommitted local changes.
    pub fn attributes(&self) -> &AttributeSet {
        &self.attributes
    }

    /// Whether the entry exists in the directory yet.
    pub fn is_new(&self) -> bool {
        matches!(self.state, EntryState::New { .. })
    }

    /// Whether there are uncommitted changes.
    pub fn is_dirty(&self) -> bool {
        self.is_new() || !self.pending.is_empty()
    }

    /// Set one attribute.
    ///
    /// Under [`ApplySemantics::Create`] a null value is skipped; under
    /// [`ApplySemantics::Update`] it clears the attribute.
    pub fn set_attribute(
        &mut self,
        name: &str,
        value: AttributeValue,
        semantics: ApplySemantics,
    ) -> DirectoryResult<()> {
        validate_attribute_name(name)?;

        let clear = value.values().is_empty();
        if clear && (semantics == ApplySemantics::Create || self.is_new()) {
            return Ok(());
        }

        if !self.is_new() {
            let wire = if clear { Vec::new() } else { value.to_wire() };
            self.pending.retain(|m| !m.attribute().eq_ignore_ascii_case(name));
            self.pending.push(Modification::Replace(name.to_string(), wire));
        }

        if clear {
            self.attributes.remove(name);
        } else {
            self.attributes.set(name, value);
        }
        Ok(())
    }

    /// Apply every attribute of a dictionary.
    pub fn apply_attributes(
        &mut self,
        attributes: &AttributeSet,
        semantics: ApplySemantics,
    ) -> DirectoryResult<()> {
        for (name, value) in attributes.iter() {
            self.set_attribute(name, value.clone(), semantics)?;
        }
        Ok(())
    }

    /// Toggle account-control bits against the current `userAccountControl`.
    pub fn set_account_flags(&mut self, flags: &[AdFlag]) -> DirectoryResult<()> {
        if flags.is_empty() {
            return Ok(());
        }
        let current = current_mask(self.attributes.get(USER_ACCOUNT_CONTROL))?;
        let updated = apply_flags(current, flags);
        debug!(dn = %self.dn, current, updated, "Applying account flags");
        // stored as a signed 32-bit integer
        self.set_attribute(
            USER_ACCOUNT_CONTROL,
            AttributeValue::Integer(i64::from(updated as i32)),
            ApplySemantics::Update,
        )
    }

    /// Write local changes to the directory.
    ///
    /// A new entry is added (and re-read, so server-assigned attributes are
    /// visible); an existing one gets a single batched modify.
    #[instrument(skip(self), fields(dn = %self.dn))]
    pub async fn commit(&mut self) -> DirectoryResult<()> {
        let backend = self.session.backend();

        if let EntryState::New { object_class } = &self.state {
            let mut wire = vec![(
                "objectClass".to_string(),
                vec![object_class.as_bytes().to_vec()],
            )];
            let mut keys = Vec::new();
            for (name, value) in self.attributes.iter() {
                if !value.values().is_empty() {
                    keys.push(name.clone());
                    wire.push((name.clone(), value.to_wire()));
                }
            }

            backend
                .add(&self.dn, wire)
                .await
                .map_err(|e| wrap_assignment_error(e, &keys))?;
            info!(dn = %self.dn, "Entry created");

            self.state = EntryState::Persisted;
            return self.refresh().await;
        }

        if self.pending.is_empty() {
            return Ok(());
        }

        let keys: Vec<String> = self
            .pending
            .iter()
            .map(|m| m.attribute().to_string())
            .collect();
        backend
            .modify(&self.dn, self.pending.clone())
            .await
            .map_err(|e| wrap_assignment_error(e, &keys))?;
        self.pending.clear();
        info!(dn = %self.dn, attributes = ?keys, "Entry updated");
        Ok(())
    }

    /// Re-read the entry from the directory, replacing the local snapshot.
    pub async fn refresh(&mut self) -> DirectoryResult<()> {
        if !self.pending.is_empty() {
            warn!(dn = %self.dn, "Refreshing entry with uncommitted changes; they are kept");
        }
        let entry = self
            .session
            .read(&self.dn)
            .await?
            .ok_or_else(|| DirectoryError::NotFound {
                filter: ANY_OBJECT.to_string(),
                root: self.dn.clone(),
            })?;
        self.attributes = codec::attributes_from_wire(&entry.attrs, &entry.bin_attrs);
        Ok(())
    }

    /// Detach into an owned snapshot, discarding uncommitted changes.
    pub fn into_snapshot(mut self) -> EntrySnapshot {
        self.pending.clear();
        self.state = EntryState::Persisted;
        EntrySnapshot {
            path: self.session.entry_path(&self.dn),
            dn: std::mem::take(&mut self.dn),
            attributes: std::mem::take(&mut self.attributes),
        }
    }
}

impl<B: DirectoryBackend> Drop for BoundEntry<'_, B> {
    fn drop(&mut self) {
        if self.is_dirty() {
            warn!(dn = %self.dn, "Bound entry dropped with uncommitted changes");
        }
    }
}

fn wrap_assignment_error(err: DirectoryError, keys: &[String]) -> DirectoryError {
    if err.is_schema_violation() {
        DirectoryError::SchemaMismatch {
            attributes: rejected_attributes(&err, keys),
            message: err.to_string(),
        }
    } else {
        err
    }
}

/// The pending keys the server's diagnostic names, or every key when it
/// names none of them.
fn rejected_attributes(err: &DirectoryError, keys: &[String]) -> String {
    let DirectoryError::RemoteFault {
        message,
        diagnostic,
        ..
    } = err
    else {
        return keys.join(", ");
    };

    let named: Vec<&str> = keys
        .iter()
        .filter(|key| {
            [Some(message.as_str()), diagnostic.as_deref()]
                .into_iter()
                .flatten()
                .any(|text| mentions(text, key))
        })
        .map(String::as_str)
        .collect();

    if named.is_empty() {
        keys.join(", ")
    } else {
        named.join(", ")
    }
}

fn mentions(text: &str, attribute: &str) -> bool {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == ';'))
        .any(|word| word.eq_ignore_ascii_case(attribute))
}

/// A detached, read-only copy of an entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntrySnapshot {
    pub dn: String,
    /// `scheme://host[:port]/<dn>`; present regardless of projection.
    pub path: String,
    pub attributes: AttributeSet,
}

impl EntrySnapshot {
    /// All values of an attribute as a sequence (empty when absent).
    pub fn property(&self, name: &str) -> Vec<AttributeValue> {
        codec::decode_many(&self.attributes, name)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Strict large-integer decode.
    pub fn property_large_integer(&self, name: &str) -> DirectoryResult<OneOrMany<i64>> {
        codec::decode_large_integer(&self.attributes, name)
    }

    /// Strict FILETIME timestamp decode.
    pub fn property_timestamp(&self, name: &str) -> DirectoryResult<OneOrMany<DateTime<Utc>>> {
        codec::decode_timestamp(&self.attributes, name)
    }

    /// `accountExpires` as a timestamp.
    pub fn account_expires(&self) -> DirectoryResult<DateTime<Utc>> {
        let decoded = self.property_timestamp("accountExpires")?;
        decoded
            .into_vec()
            .into_iter()
            .next()
            .ok_or_else(|| DirectoryError::MissingAttribute {
                attribute: "accountExpires".to_string(),
            })
    }

    /// First value as a string, `None` when absent.
    pub fn first_string(&self, name: &str) -> Option<String> {
        codec::first_as_string(&self.attributes, name)
    }

    /// Every value as a string, empty when absent.
    pub fn strings(&self, name: &str) -> Vec<String> {
        codec::all_as_strings(&self.attributes, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> Vec<String> {
        vec!["title".to_string(), "favouriteColour".to_string()]
    }

    #[test]
    fn test_schema_mismatch_names_attribute_from_diagnostic() {
        let err = DirectoryError::remote(
            "undefined attribute type",
            17,
            "00000057: LdapErr: DSID-0C090D8A, comment: FAVOURITECOLOUR not in schema",
        );

        match wrap_assignment_error(err, &keys()) {
            DirectoryError::SchemaMismatch { attributes, .. } => {
                assert_eq!(attributes, "favouriteColour");
            }
            other => panic!("expected SchemaMismatch, got {other}"),
        }
    }

    #[test]
    fn test_schema_mismatch_without_name_lists_pending_keys() {
        let err = DirectoryError::remote(
            "invalid attribute syntax",
            21,
            "00002082: AtrErr: DSID-03151904, #1",
        );

        match wrap_assignment_error(err, &keys()) {
            DirectoryError::SchemaMismatch { attributes, .. } => {
                assert_eq!(attributes, "title, favouriteColour");
            }
            other => panic!("expected SchemaMismatch, got {other}"),
        }
    }

    #[test]
    fn test_other_faults_pass_through() {
        let err = DirectoryError::remote("busy", 51, "");
        assert!(matches!(
            wrap_assignment_error(err, &keys()),
            DirectoryError::RemoteFault { code: Some(51), .. }
        ));
    }
}

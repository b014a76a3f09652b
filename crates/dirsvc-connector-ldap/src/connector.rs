//! `ldap3` implementation of the directory capability traits.

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use ldap3::adapters::{Adapter, PagedResults};
use ldap3::controls::RawControl;
use ldap3::{
    Ldap, LdapConnAsync, LdapConnSettings, LdapError, LdapResult, Mod, ResultEntry, Scope,
    SearchEntry, SearchResult,
};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use url::Url;

use dirsvc_connector::config::{AuthenticationType, DirectoryConnection, Endpoint};
use dirsvc_connector::error::{DirectoryError, DirectoryResult};
use dirsvc_connector::traits::{
    DirectoryBackend, DirectoryConnector, GroupMembershipOps, Modification, RawEntry, SearchScope,
};

use crate::config::LdapSettings;

/// Active Directory tree delete control.
const TREE_DELETE_OID: &str = "1.2.840.113556.1.4.805";

// Result codes handled specially.
const COMPARE_FALSE: u32 = 5;
const COMPARE_TRUE: u32 = 6;
const REFERRAL: u32 = 10;
const UNAVAILABLE_CRITICAL_EXTENSION: u32 = 12;
const NO_SUCH_ATTRIBUTE: u32 = 16;
const INVALID_CREDENTIALS: u32 = 49;
const ENTRY_ALREADY_EXISTS: u32 = 68;
const FILTER_ERROR: u32 = 87;

/// Authentication options that need an integrated (SASL) bind.
const INTEGRATED_AUTH: [AuthenticationType; 4] = [
    AuthenticationType::Secure,
    AuthenticationType::Signing,
    AuthenticationType::Sealing,
    AuthenticationType::Delegation,
];

/// Opens [`LdapBackend`] connections.
#[derive(Debug, Clone, Default)]
pub struct LdapConnector {
    settings: LdapSettings,
}

impl LdapConnector {
    pub fn new(settings: LdapSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &LdapSettings {
        &self.settings
    }
}

#[async_trait]
impl DirectoryConnector for LdapConnector {
    type Backend = LdapBackend;

    #[instrument(skip(self, connection), fields(uri = %connection.uri))]
    async fn connect(&self, connection: &DirectoryConnection) -> DirectoryResult<LdapBackend> {
        let endpoint = connection.endpoint()?;
        let transport = TransportOptions::from_connection(connection)?;
        let url = transport.server_url(&endpoint);

        let mut ldap = open_transport(&url, &self.settings).await?;
        let credentials = Credentials {
            username: connection.username.clone(),
            password: connection.password.clone(),
            anonymous: !transport.bind,
        };
        credentials.bind(&mut ldap).await?;

        info!(url = %url, anonymous = credentials.anonymous, "LDAP connection established");

        Ok(LdapBackend {
            connection: Mutex::new(Some(ldap)),
            url,
            credentials,
            settings: self.settings.clone(),
        })
    }
}

/// Transport choices derived from the connection's authentication options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TransportOptions {
    /// Connect over `ldaps://`.
    pub secure: bool,
    /// Perform a simple bind after connecting.
    pub bind: bool,
}

impl TransportOptions {
    pub(crate) fn from_connection(connection: &DirectoryConnection) -> DirectoryResult<Self> {
        let endpoint = connection.endpoint()?;
        let types = connection.authentication_types();

        if let Some(option) = INTEGRATED_AUTH.iter().find(|t| types.contains(**t)) {
            return Err(DirectoryError::invalid_configuration(format!(
                "authentication option {option:?} requires an integrated bind, \
                 which the LDAP transport does not support"
            )));
        }

        Ok(Self {
            secure: endpoint.secure
                || types.contains(AuthenticationType::SecureSocketsLayer)
                || types.contains(AuthenticationType::Encryption),
            bind: !types.contains(AuthenticationType::Anonymous),
        })
    }

    pub(crate) fn server_url(&self, endpoint: &Endpoint) -> String {
        Endpoint {
            secure: self.secure,
            ..endpoint.clone()
        }
        .server_url()
    }
}

/// Bind identity, kept for referral chasing.
#[derive(Clone)]
struct Credentials {
    username: String,
    password: String,
    anonymous: bool,
}

impl Credentials {
    async fn bind(&self, ldap: &mut Ldap) -> DirectoryResult<()> {
        if self.anonymous {
            debug!("Anonymous connection, skipping bind");
            return Ok(());
        }
        simple_bind(ldap, &self.username, &self.password).await
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***REDACTED***")
            .field("anonymous", &self.anonymous)
            .finish()
    }
}

/// Connect to `url` and spawn the connection driver.
pub(crate) async fn open_transport(url: &str, settings: &LdapSettings) -> DirectoryResult<Ldap> {
    debug!(url = %url, "Connecting to LDAP server");

    let conn_settings = LdapConnSettings::new()
        .set_conn_timeout(settings.conn_timeout())
        .set_starttls(settings.starttls && !url.starts_with("ldaps://"))
        .set_no_tls_verify(settings.no_tls_verify);

    let (conn, ldap) = LdapConnAsync::with_settings(conn_settings, url)
        .await
        .map_err(|e| {
            DirectoryError::connection_failed_with_source(
                format!("Failed to connect to LDAP server at {url}"),
                e,
            )
        })?;

    tokio::spawn(async move {
        if let Err(e) = conn.drive().await {
            warn!(error = %e, "LDAP connection driver error");
        }
    });

    Ok(ldap)
}

/// Simple bind; invalid credentials map to [`DirectoryError::AuthenticationFailed`].
pub(crate) async fn simple_bind(
    ldap: &mut Ldap,
    username: &str,
    password: &str,
) -> DirectoryResult<()> {
    debug!(bind_dn = %username, "Performing LDAP bind");

    let result = ldap.simple_bind(username, password).await.map_err(|e| {
        DirectoryError::connection_failed_with_source(format!("LDAP bind failed for {username}"), e)
    })?;

    match result.rc {
        0 => Ok(()),
        INVALID_CREDENTIALS => Err(DirectoryError::AuthenticationFailed),
        rc => Err(DirectoryError::connection_failed(format!(
            "LDAP bind failed with code {rc}: {}",
            result.text
        ))),
    }
}

/// Map an `ldap3` client error raised by `operation` on `target`.
pub(crate) fn map_ldap_error(operation: &str, target: &str, err: LdapError) -> DirectoryError {
    match err {
        LdapError::LdapResult { result } => result_error(operation, target, result),
        LdapError::FilterParsing => DirectoryError::remote(
            format!("{operation} '{target}'"),
            FILTER_ERROR,
            "malformed search filter",
        ),
        err @ (LdapError::Io { .. } | LdapError::Timeout { .. } | LdapError::EndOfStream) => {
            DirectoryError::connection_failed_with_source(format!("{operation} '{target}'"), err)
        }
        other => DirectoryError::remote_with_source(format!("{operation} '{target}'"), other),
    }
}

/// Map a non-success result. The native code and diagnostic text are kept.
pub(crate) fn result_error(operation: &str, target: &str, result: LdapResult) -> DirectoryError {
    match result.rc {
        INVALID_CREDENTIALS => DirectoryError::AuthenticationFailed,
        ENTRY_ALREADY_EXISTS => DirectoryError::AlreadyExists {
            dn: target.to_string(),
        },
        rc => DirectoryError::remote(format!("{operation} '{target}'"), rc, result.text),
    }
}

fn check(operation: &str, target: &str, result: LdapResult) -> DirectoryResult<()> {
    if result.rc == 0 {
        Ok(())
    } else {
        Err(result_error(operation, target, result))
    }
}

fn ldap_scope(scope: SearchScope) -> Scope {
    match scope {
        SearchScope::Base => Scope::Base,
        SearchScope::OneLevel => Scope::OneLevel,
        SearchScope::Subtree => Scope::Subtree,
    }
}

/// Requested attributes; an empty list asks for every user attribute.
fn attribute_list(attributes: &[String]) -> Vec<String> {
    if attributes.is_empty() {
        vec!["*".to_string()]
    } else {
        attributes.to_vec()
    }
}

fn raw_entry(entry: SearchEntry) -> RawEntry {
    RawEntry {
        dn: entry.dn,
        attrs: entry.attrs,
        bin_attrs: entry.bin_attrs,
    }
}

fn into_mod(modification: Modification) -> Mod<Vec<u8>> {
    match modification {
        Modification::Add(name, values) => Mod::Add(name.into_bytes(), values.into_iter().collect()),
        Modification::Delete(name, values) => {
            Mod::Delete(name.into_bytes(), values.into_iter().collect())
        }
        Modification::Replace(name, values) => {
            Mod::Replace(name.into_bytes(), values.into_iter().collect())
        }
    }
}

fn member_mod(member_dn: &str) -> (Vec<u8>, HashSet<Vec<u8>>) {
    (
        b"member".to_vec(),
        HashSet::from([member_dn.as_bytes().to_vec()]),
    )
}

/// Entries and continuation references collected from one search.
#[derive(Debug, Default)]
pub(crate) struct SearchOutcome {
    pub entries: Vec<RawEntry>,
    pub referrals: Vec<String>,
}

impl SearchOutcome {
    fn push(&mut self, entry: ResultEntry) {
        if entry.is_ref() {
            self.referrals.extend(ldap3::parse_refs(entry.0));
        } else if !entry.is_intermediate() {
            self.entries.push(raw_entry(SearchEntry::construct(entry)));
        }
    }

    /// Fold in the final search result. A referral result carries its
    /// targets in the result itself.
    fn finish(&mut self, base: &str, result: LdapResult) -> DirectoryResult<()> {
        match result.rc {
            0 => Ok(()),
            REFERRAL => {
                self.referrals.extend(result.refs);
                Ok(())
            }
            _ => Err(result_error("search", base, result)),
        }
    }
}

/// One search on one connection, paged when `page_size > 0`.
pub(crate) async fn run_search(
    ldap: &mut Ldap,
    base: &str,
    scope: Scope,
    filter: &str,
    attributes: Vec<String>,
    page_size: u32,
) -> DirectoryResult<SearchOutcome> {
    let mut outcome = SearchOutcome::default();

    if page_size == 0 {
        let SearchResult(entries, result) = ldap
            .search(base, scope, filter, attributes)
            .await
            .map_err(|e| map_ldap_error("search", base, e))?;
        for entry in entries {
            outcome.push(entry);
        }
        outcome.finish(base, result)?;
        return Ok(outcome);
    }

    let size = i32::try_from(page_size).unwrap_or(i32::MAX);
    let adapters: Vec<Box<dyn Adapter<_, _>>> = vec![Box::new(PagedResults::new(size))];
    let mut stream = ldap
        .streaming_search_with(adapters, base, scope, filter, attributes)
        .await
        .map_err(|e| map_ldap_error("search", base, e))?;

    while let Some(entry) = stream
        .next()
        .await
        .map_err(|e| map_ldap_error("search", base, e))?
    {
        outcome.push(entry);
    }
    let result = stream.finish().await;
    outcome.finish(base, result)?;
    Ok(outcome)
}

/// Where a continuation reference points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReferralTarget {
    /// `scheme://host[:port]`
    pub server: String,
    pub base: String,
}

impl ReferralTarget {
    pub(crate) fn parse(reference: &str) -> DirectoryResult<Self> {
        let url = Url::parse(reference).map_err(|e| {
            DirectoryError::invalid_configuration(format!("invalid referral '{reference}': {e}"))
        })?;
        if !matches!(url.scheme(), "ldap" | "ldaps") {
            return Err(DirectoryError::invalid_configuration(format!(
                "referral '{reference}' is not an LDAP url"
            )));
        }
        let host = url.host_str().filter(|h| !h.is_empty()).ok_or_else(|| {
            DirectoryError::invalid_configuration(format!("referral '{reference}' has no host"))
        })?;

        let server = match url.port() {
            Some(port) => format!("{}://{host}:{port}", url.scheme()),
            None => format!("{}://{host}", url.scheme()),
        };
        let params =
            ldap3::get_url_params(&url).map_err(|e| map_ldap_error("parse referral", reference, e))?;

        Ok(Self {
            server,
            base: params.base.to_string(),
        })
    }
}

/// One authenticated LDAP connection.
///
/// Each call clones the `ldap3` handle, so requests are multiplexed over
/// the same socket. The session above issues them one at a time.
pub struct LdapBackend {
    connection: Mutex<Option<Ldap>>,
    url: String,
    credentials: Credentials,
    settings: LdapSettings,
}

impl LdapBackend {
    /// Server url the backend is connected to.
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn handle(&self) -> DirectoryResult<Ldap> {
        let guard = self.connection.lock().await;
        let mut ldap = guard
            .as_ref()
            .cloned()
            .ok_or_else(|| DirectoryError::connection_failed("LDAP connection already closed"))?;
        if let Some(timeout) = self.settings.operation_timeout() {
            ldap.with_timeout(timeout);
        }
        Ok(ldap)
    }

    /// Follow continuation references breadth-first up to the hop limit.
    async fn chase_referrals(
        &self,
        referrals: Vec<String>,
        filter: &str,
        attributes: &[String],
        page_size: u32,
        entries: &mut Vec<RawEntry>,
    ) {
        let mut queue: VecDeque<(String, u32)> = referrals.into_iter().map(|r| (r, 1)).collect();
        let mut seen = HashSet::new();

        while let Some((reference, hop)) = queue.pop_front() {
            if hop > self.settings.max_referral_hops {
                warn!(referral = %reference, hop, "Referral hop limit reached, skipping");
                continue;
            }
            if !seen.insert(reference.clone()) {
                continue;
            }
            match self
                .follow_referral(&reference, filter, attributes, page_size)
                .await
            {
                Ok(outcome) => {
                    debug!(referral = %reference, entries = outcome.entries.len(), "Chased referral");
                    entries.extend(outcome.entries);
                    queue.extend(outcome.referrals.into_iter().map(|r| (r, hop + 1)));
                }
                Err(e) => warn!(referral = %reference, error = %e, "Could not chase referral, skipping"),
            }
        }
    }

    async fn follow_referral(
        &self,
        reference: &str,
        filter: &str,
        attributes: &[String],
        page_size: u32,
    ) -> DirectoryResult<SearchOutcome> {
        let target = ReferralTarget::parse(reference)?;
        let mut ldap = open_transport(&target.server, &self.settings).await?;
        self.credentials.bind(&mut ldap).await?;

        let outcome = run_search(
            &mut ldap,
            &target.base,
            Scope::Subtree,
            filter,
            attributes.to_vec(),
            page_size,
        )
        .await;

        if let Err(e) = ldap.unbind().await {
            warn!(error = %e, server = %target.server, "Error during LDAP unbind");
        }
        outcome
    }

    /// Delete leaf-first when the server does not know the tree delete control.
    async fn delete_leaf_first(&self, dn: &str) -> DirectoryResult<()> {
        let mut ldap = self.handle().await?;
        let outcome = run_search(
            &mut ldap,
            dn,
            Scope::Subtree,
            "(objectClass=*)",
            vec!["1.1".to_string()],
            self.settings.page_size(0),
        )
        .await?;

        // a descendant's DN always ends with its ancestor's
        let mut dns: Vec<String> = outcome.entries.into_iter().map(|e| e.dn).collect();
        dns.sort_by_key(|d| std::cmp::Reverse(d.len()));

        for entry_dn in dns {
            let result = ldap
                .delete(&entry_dn)
                .await
                .map_err(|e| map_ldap_error("delete", &entry_dn, e))?;
            check("delete", &entry_dn, result)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for LdapBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapBackend")
            .field("url", &self.url)
            .field("credentials", &self.credentials)
            .field("settings", &self.settings)
            .finish()
    }
}

#[async_trait]
impl DirectoryBackend for LdapBackend {
    #[instrument(skip(self, attributes), fields(url = %self.url))]
    async fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[String],
        page_size: u32,
    ) -> DirectoryResult<Vec<RawEntry>> {
        let mut ldap = self.handle().await?;
        let attributes = attribute_list(attributes);
        let page_size = self.settings.page_size(page_size);

        let outcome = run_search(
            &mut ldap,
            base,
            ldap_scope(scope),
            filter,
            attributes.clone(),
            page_size,
        )
        .await?;

        let mut entries = outcome.entries;
        if !outcome.referrals.is_empty() {
            if self.settings.follow_referrals && scope == SearchScope::Subtree {
                self.chase_referrals(outcome.referrals, filter, &attributes, page_size, &mut entries)
                    .await;
            } else {
                debug!(count = outcome.referrals.len(), "Ignoring referrals");
            }
        }

        debug!(count = entries.len(), "LDAP search completed");
        Ok(entries)
    }

    #[instrument(skip(self, attributes))]
    async fn add(&self, dn: &str, attributes: Vec<(String, Vec<Vec<u8>>)>) -> DirectoryResult<()> {
        let mut ldap = self.handle().await?;
        let attrs: Vec<(Vec<u8>, HashSet<Vec<u8>>)> = attributes
            .into_iter()
            .map(|(name, values)| (name.into_bytes(), values.into_iter().collect()))
            .collect();

        let result = ldap
            .add(dn, attrs)
            .await
            .map_err(|e| map_ldap_error("add", dn, e))?;
        check("add", dn, result)?;

        info!(dn = %dn, "LDAP entry added");
        Ok(())
    }

    #[instrument(skip(self, modifications), fields(changes = modifications.len()))]
    async fn modify(&self, dn: &str, modifications: Vec<Modification>) -> DirectoryResult<()> {
        let mut ldap = self.handle().await?;
        let mods: Vec<Mod<Vec<u8>>> = modifications.into_iter().map(into_mod).collect();

        let result = ldap
            .modify(dn, mods)
            .await
            .map_err(|e| map_ldap_error("modify", dn, e))?;
        check("modify", dn, result)?;

        info!(dn = %dn, "LDAP entry modified");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_tree(&self, dn: &str) -> DirectoryResult<()> {
        let mut ldap = self.handle().await?;
        let control = RawControl {
            ctype: TREE_DELETE_OID.to_string(),
            crit: true,
            val: None,
        };

        let result = ldap
            .with_controls(vec![control])
            .delete(dn)
            .await
            .map_err(|e| map_ldap_error("delete", dn, e))?;

        if result.rc == UNAVAILABLE_CRITICAL_EXTENSION {
            debug!(dn = %dn, "Tree delete control unavailable, deleting leaf-first");
            self.delete_leaf_first(dn).await?;
        } else {
            check("delete", dn, result)?;
        }

        info!(dn = %dn, "LDAP subtree deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn rename(
        &self,
        dn: &str,
        new_rdn: &str,
        new_parent: Option<&str>,
    ) -> DirectoryResult<()> {
        let mut ldap = self.handle().await?;

        let result = ldap
            .modifydn(dn, new_rdn, true, new_parent)
            .await
            .map_err(|e| map_ldap_error("rename", dn, e))?;
        check("rename", dn, result)?;

        info!(dn = %dn, new_rdn = %new_rdn, new_parent = ?new_parent, "LDAP entry renamed");
        Ok(())
    }

    async fn close(&self) -> DirectoryResult<()> {
        let mut guard = self.connection.lock().await;
        if let Some(mut ldap) = guard.take() {
            if let Err(e) = ldap.unbind().await {
                warn!(error = %e, url = %self.url, "Error during LDAP unbind");
            }
            debug!(url = %self.url, "LDAP connection closed");
        }
        Ok(())
    }
}

#[async_trait]
impl GroupMembershipOps for LdapBackend {
    #[instrument(skip(self))]
    async fn is_member(&self, group_dn: &str, member_dn: &str) -> DirectoryResult<bool> {
        let mut ldap = self.handle().await?;
        let result = ldap
            .compare(group_dn, "member", member_dn)
            .await
            .map_err(|e| map_ldap_error("compare", group_dn, e))?;

        // a group without any member has no value to compare against
        match result.0.rc {
            COMPARE_TRUE => Ok(true),
            COMPARE_FALSE | NO_SUCH_ATTRIBUTE => Ok(false),
            _ => Err(result_error("compare", group_dn, result.0)),
        }
    }

    #[instrument(skip(self))]
    async fn add_member(&self, group_dn: &str, member_dn: &str) -> DirectoryResult<()> {
        let (name, values) = member_mod(member_dn);
        let mut ldap = self.handle().await?;
        let result = ldap
            .modify(group_dn, vec![Mod::Add(name, values)])
            .await
            .map_err(|e| map_ldap_error("add member", group_dn, e))?;
        check("add member", group_dn, result)
    }

    #[instrument(skip(self))]
    async fn remove_member(&self, group_dn: &str, member_dn: &str) -> DirectoryResult<()> {
        let (name, values) = member_mod(member_dn);
        let mut ldap = self.handle().await?;
        let result = ldap
            .modify(group_dn, vec![Mod::Delete(name, values)])
            .await
            .map_err(|e| map_ldap_error("remove member", group_dn, e))?;
        check("remove member", group_dn, result)
    }
}

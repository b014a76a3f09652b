//! Common test utilities for dirsvc-connector integration tests.
//!
//! [`MemoryDirectory`] is an in-memory directory implementing the backend
//! capability traits, with a small filter evaluator and mutation counters.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dirsvc_connector::async_trait;
use dirsvc_connector::dn;
use dirsvc_connector::prelude::*;

/// Root DN of the seeded directory.
pub const ROOT: &str = "DC=test,DC=net";
pub const USERS: &str = "OU=Users,DC=test,DC=net";
pub const GROUPS: &str = "OU=Groups,DC=test,DC=net";
pub const ARCHIVE: &str = "OU=Archive,DC=test,DC=net";

/// `accountExpires` for accounts that never expire.
pub const NEVER: &str = "9223372036854775807";

/// Connection pointing at the seeded root.
pub fn connection() -> DirectoryConnection {
    DirectoryConnection::new("ldap://dc01.test.net:389/DC=test,DC=net", "admin", "secret")
}

#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub dn: String,
    pub attrs: BTreeMap<String, Vec<String>>,
}

impl StoredEntry {
    fn get(&self, name: &str) -> Option<&Vec<String>> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    fn key(&self, name: &str) -> String {
        self.attrs
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    fn remove(&mut self, name: &str) {
        let key = self.key(name);
        self.attrs.remove(&key);
    }
}

#[derive(Debug, Default)]
pub struct DirectoryState {
    entries: BTreeMap<String, StoredEntry>,
    /// Attribute names the "schema" rejects.
    pub rejected_attributes: Vec<String>,
    pub mutations: usize,
    pub membership_mutations: usize,
    /// Page size passed to each search, in call order.
    pub page_sizes: Vec<u32>,
    pub opened: usize,
    pub closed: usize,
}

impl DirectoryState {
    fn lookup(&self, dn: &str) -> Option<&StoredEntry> {
        self.entries.get(&dn.to_ascii_lowercase())
    }

    fn lookup_mut(&mut self, dn: &str) -> DirectoryResult<&mut StoredEntry> {
        self.entries
            .get_mut(&dn.to_ascii_lowercase())
            .ok_or_else(|| no_such_object(dn))
    }

    fn check_schema<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> DirectoryResult<()> {
        for name in names {
            if self
                .rejected_attributes
                .iter()
                .any(|r| r.eq_ignore_ascii_case(name))
            {
                return Err(DirectoryError::remote(
                    "undefined attribute type",
                    17,
                    format!("00000057: LdapErr: DSID-0C090D8A, comment: {name} not in schema"),
                ));
            }
        }
        Ok(())
    }
}

fn no_such_object(dn: &str) -> DirectoryError {
    DirectoryError::remote(
        format!("no such object: {dn}"),
        32,
        "0000208D: NameErr: DSID-03100241, problem 2001 (NO_OBJECT)",
    )
}

/// Shared in-memory directory; clones see the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    state: Arc<Mutex<DirectoryState>>,
}

impl MemoryDirectory {
    /// Empty directory with just the root.
    pub fn new() -> Self {
        let directory = Self::default();
        directory.add_entry(ROOT, &[("objectClass", &["domain"])]);
        directory
    }

    /// Root, three containers, two users and two groups.
    pub fn seeded() -> Self {
        let directory = Self::new();
        directory.add_ou(USERS);
        directory.add_ou(GROUPS);
        directory.add_ou(ARCHIVE);
        directory.add_user("Jane Doe", USERS);
        directory.add_user("John Smith", USERS);
        directory.add_group("Admins", GROUPS);
        directory.add_group("Staff", ROOT);
        directory
    }

    pub fn state(&self) -> MutexGuard<'_, DirectoryState> {
        self.state.lock().unwrap()
    }

    pub fn add_entry(&self, dn: &str, attrs: &[(&str, &[&str])]) {
        let mut map: BTreeMap<String, Vec<String>> = attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect();
        map.insert("distinguishedName".to_string(), vec![dn.to_string()]);
        self.state().entries.insert(
            dn.to_ascii_lowercase(),
            StoredEntry {
                dn: dn.to_string(),
                attrs: map,
            },
        );
    }

    pub fn add_ou(&self, dn: &str) {
        self.add_entry(dn, &[("objectClass", &["organizationalUnit"])]);
    }

    /// Add a user `CN=<cn>,<parent>` and return its DN.
    pub fn add_user(&self, cn: &str, parent: &str) -> String {
        let entry_dn = dn::join(&dn::cn_rdn(cn), parent);
        self.add_entry(
            &entry_dn,
            &[
                ("objectClass", &["top", "person", "user"]),
                ("cn", &[cn]),
                ("userAccountControl", &["546"]),
                ("accountExpires", &[NEVER]),
            ],
        );
        entry_dn
    }

    /// Add a group `CN=<cn>,<parent>` and return its DN.
    pub fn add_group(&self, cn: &str, parent: &str) -> String {
        let entry_dn = dn::join(&dn::cn_rdn(cn), parent);
        self.add_entry(&entry_dn, &[("objectClass", &["top", "group"]), ("cn", &[cn])]);
        entry_dn
    }

    pub fn exists(&self, dn: &str) -> bool {
        self.state().lookup(dn).is_some()
    }

    pub fn attribute(&self, dn: &str, name: &str) -> Option<Vec<String>> {
        self.state().lookup(dn).and_then(|e| e.get(name).cloned())
    }

    pub fn set_attribute(&self, dn: &str, name: &str, values: &[&str]) {
        let mut state = self.state();
        if let Ok(entry) = state.lookup_mut(dn) {
            let key = entry.key(name);
            entry
                .attrs
                .insert(key, values.iter().map(|s| s.to_string()).collect());
        }
    }

    pub fn members(&self, group_dn: &str) -> Vec<String> {
        self.attribute(group_dn, "member").unwrap_or_default()
    }

    pub fn reject_attribute(&self, name: &str) {
        self.state().rejected_attributes.push(name.to_string());
    }

    pub fn mutations(&self) -> usize {
        self.state().mutations
    }

    pub fn membership_mutations(&self) -> usize {
        self.state().membership_mutations
    }

    pub fn page_sizes(&self) -> Vec<u32> {
        self.state().page_sizes.clone()
    }

    pub fn opened(&self) -> usize {
        self.state().opened
    }

    pub fn closed(&self) -> usize {
        self.state().closed
    }
}

#[async_trait]
impl DirectoryConnector for MemoryDirectory {
    type Backend = MemoryBackend;

    async fn connect(&self, connection: &DirectoryConnection) -> DirectoryResult<MemoryBackend> {
        connection.validate()?;
        if connection.password != "secret" {
            return Err(DirectoryError::AuthenticationFailed);
        }
        self.state().opened += 1;
        Ok(MemoryBackend {
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        })
    }
}

/// One "connection" to a [`MemoryDirectory`].
pub struct MemoryBackend {
    state: Arc<Mutex<DirectoryState>>,
    closed: AtomicBool,
}

impl MemoryBackend {
    fn state(&self) -> DirectoryResult<MutexGuard<'_, DirectoryState>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DirectoryError::connection_failed("connection closed"));
        }
        Ok(self.state.lock().unwrap())
    }
}

fn project(entry: &StoredEntry, attributes: &[String]) -> RawEntry {
    let attrs: HashMap<String, Vec<String>> = entry
        .attrs
        .iter()
        .filter(|(k, _)| attributes.is_empty() || attributes.iter().any(|a| a.eq_ignore_ascii_case(k)))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    RawEntry {
        dn: entry.dn.clone(),
        attrs,
        bin_attrs: HashMap::new(),
    }
}

fn text(values: &[Vec<u8>]) -> Vec<String> {
    values
        .iter()
        .map(|v| String::from_utf8_lossy(v).into_owned())
        .collect()
}

#[async_trait]
impl DirectoryBackend for MemoryBackend {
    async fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[String],
        page_size: u32,
    ) -> DirectoryResult<Vec<RawEntry>> {
        let parsed = parse_filter(filter)
            .map_err(|e| DirectoryError::remote(format!("bad search filter {filter}: {e}"), 87, ""))?;
        let mut state = self.state()?;
        state.page_sizes.push(page_size);
        if !base.is_empty() && state.lookup(base).is_none() {
            return Err(no_such_object(base));
        }

        Ok(state
            .entries
            .values()
            .filter(|e| match scope {
                SearchScope::Base => e.dn.eq_ignore_ascii_case(base),
                SearchScope::OneLevel => dn::split_first(&e.dn).1.eq_ignore_ascii_case(base),
                SearchScope::Subtree => dn::is_within(&e.dn, base),
            })
            .filter(|e| parsed.matches(e))
            .map(|e| project(e, attributes))
            .collect())
    }

    async fn add(&self, dn: &str, attributes: Vec<(String, Vec<Vec<u8>>)>) -> DirectoryResult<()> {
        let mut state = self.state()?;
        state.check_schema(attributes.iter().map(|(k, _)| k.as_str()))?;
        if state.lookup(dn).is_some() {
            return Err(DirectoryError::AlreadyExists { dn: dn.to_string() });
        }
        let (rdn, parent) = dn::split_first(dn);
        if state.lookup(parent).is_none() {
            return Err(no_such_object(parent));
        }

        let mut attrs: BTreeMap<String, Vec<String>> = attributes
            .iter()
            .map(|(k, v)| (k.clone(), text(v)))
            .collect();
        attrs.insert("distinguishedName".to_string(), vec![dn.to_string()]);
        let rdn_value = rdn.split_once('=').map_or(rdn, |(_, v)| v).to_string();
        attrs.entry("cn".to_string()).or_insert_with(|| vec![rdn_value]);
        let is_user = attrs
            .get("objectClass")
            .is_some_and(|c| c.iter().any(|v| v.eq_ignore_ascii_case("user")));
        if is_user {
            attrs
                .entry("userAccountControl".to_string())
                .or_insert_with(|| vec!["546".to_string()]);
            attrs
                .entry("accountExpires".to_string())
                .or_insert_with(|| vec![NEVER.to_string()]);
        }

        state.entries.insert(
            dn.to_ascii_lowercase(),
            StoredEntry {
                dn: dn.to_string(),
                attrs,
            },
        );
        state.mutations += 1;
        Ok(())
    }

    async fn modify(&self, dn: &str, modifications: Vec<Modification>) -> DirectoryResult<()> {
        let mut state = self.state()?;
        state.check_schema(modifications.iter().map(Modification::attribute))?;

        // Apply to a copy so a failed modification leaves the entry untouched.
        let mut entry = state.lookup_mut(dn)?.clone();
        for modification in modifications {
            match modification {
                Modification::Replace(name, values) if values.is_empty() => entry.remove(&name),
                Modification::Replace(name, values) => {
                    let key = entry.key(&name);
                    entry.attrs.insert(key, text(&values));
                }
                Modification::Add(name, values) => {
                    let key = entry.key(&name);
                    let current = entry.attrs.entry(key).or_default();
                    for value in text(&values) {
                        if current.iter().any(|v| v.eq_ignore_ascii_case(&value)) {
                            return Err(DirectoryError::remote("value exists", 20, ""));
                        }
                        current.push(value);
                    }
                }
                Modification::Delete(name, values) if values.is_empty() => entry.remove(&name),
                Modification::Delete(name, values) => {
                    let key = entry.key(&name);
                    let current = entry
                        .attrs
                        .get_mut(&key)
                        .ok_or_else(|| DirectoryError::remote("no such attribute", 16, ""))?;
                    for value in text(&values) {
                        let before = current.len();
                        current.retain(|v| !v.eq_ignore_ascii_case(&value));
                        if current.len() == before {
                            return Err(DirectoryError::remote("no such value", 16, ""));
                        }
                    }
                    if current.is_empty() {
                        entry.attrs.remove(&key);
                    }
                }
            }
        }

        *state.lookup_mut(dn)? = entry;
        state.mutations += 1;
        Ok(())
    }

    async fn delete_tree(&self, dn: &str) -> DirectoryResult<()> {
        let mut state = self.state()?;
        let target = state.lookup(dn).ok_or_else(|| no_such_object(dn))?.dn.clone();
        state.entries.retain(|_, e| !dn::is_within(&e.dn, &target));
        state.mutations += 1;
        Ok(())
    }

    async fn rename(&self, dn: &str, new_rdn: &str, new_parent: Option<&str>) -> DirectoryResult<()> {
        let mut state = self.state()?;
        let old_dn = state.lookup(dn).ok_or_else(|| no_such_object(dn))?.dn.clone();
        let (_, old_parent) = dn::split_first(&old_dn);
        let parent = new_parent.unwrap_or(old_parent).to_string();
        if state.lookup(&parent).is_none() {
            return Err(no_such_object(&parent));
        }
        let new_dn = dn::join(new_rdn, &parent);
        if state.lookup(&new_dn).is_some() {
            return Err(DirectoryError::AlreadyExists { dn: new_dn });
        }

        let moved: Vec<StoredEntry> = state
            .entries
            .values()
            .filter(|e| dn::is_within(&e.dn, &old_dn))
            .cloned()
            .collect();
        for mut entry in moved {
            state.entries.remove(&entry.dn.to_ascii_lowercase());
            let suffix_len = entry.dn.len() - old_dn.len();
            entry.dn = format!("{}{}", &entry.dn[..suffix_len], new_dn);
            if entry.dn.eq_ignore_ascii_case(&new_dn) {
                let value = new_rdn.split_once('=').map_or(new_rdn, |(_, v)| v);
                entry.attrs.insert(entry.key("cn"), vec![value.to_string()]);
            }
            entry
                .attrs
                .insert("distinguishedName".to_string(), vec![entry.dn.clone()]);
            state.entries.insert(entry.dn.to_ascii_lowercase(), entry);
        }
        state.mutations += 1;
        Ok(())
    }

    async fn close(&self) -> DirectoryResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.lock().unwrap().closed += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl GroupMembershipOps for MemoryBackend {
    async fn is_member(&self, group_dn: &str, member_dn: &str) -> DirectoryResult<bool> {
        let state = self.state()?;
        let group = state.lookup(group_dn).ok_or_else(|| no_such_object(group_dn))?;
        Ok(group
            .get("member")
            .is_some_and(|m| m.iter().any(|v| v.eq_ignore_ascii_case(member_dn))))
    }

    async fn add_member(&self, group_dn: &str, member_dn: &str) -> DirectoryResult<()> {
        self.modify(
            group_dn,
            vec![Modification::Add(
                "member".to_string(),
                vec![member_dn.as_bytes().to_vec()],
            )],
        )
        .await?;
        self.state()?.membership_mutations += 1;
        Ok(())
    }

    async fn remove_member(&self, group_dn: &str, member_dn: &str) -> DirectoryResult<()> {
        self.modify(
            group_dn,
            vec![Modification::Delete(
                "member".to_string(),
                vec![member_dn.as_bytes().to_vec()],
            )],
        )
        .await?;
        self.state()?.membership_mutations += 1;
        Ok(())
    }
}

// ============================================================================
// Filter evaluation
// ============================================================================

#[derive(Debug)]
enum Expr {
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Present(String),
    Equals(String, String),
    Substring(String, Vec<String>),
}

impl Expr {
    fn matches(&self, entry: &StoredEntry) -> bool {
        match self {
            Expr::And(all) => all.iter().all(|e| e.matches(entry)),
            Expr::Or(any) => any.iter().any(|e| e.matches(entry)),
            Expr::Not(inner) => !inner.matches(entry),
            Expr::Present(attr) => entry.get(attr).is_some(),
            Expr::Equals(attr, value) => entry
                .get(attr)
                .is_some_and(|vs| vs.iter().any(|v| v.eq_ignore_ascii_case(value))),
            Expr::Substring(attr, parts) => entry
                .get(attr)
                .is_some_and(|vs| vs.iter().any(|v| substring_match(&v.to_lowercase(), parts))),
        }
    }
}

fn substring_match(value: &str, parts: &[String]) -> bool {
    let last = parts.len() - 1;
    let mut rest = value;
    for (i, part) in parts.iter().enumerate() {
        let part = part.to_lowercase();
        if i == 0 {
            match rest.strip_prefix(part.as_str()) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == last {
            return rest.ends_with(part.as_str());
        } else {
            match rest.find(part.as_str()) {
                Some(at) => rest = &rest[at + part.len()..],
                None => return false,
            }
        }
    }
    true
}

fn parse_filter(filter: &str) -> Result<Expr, String> {
    let chars: Vec<char> = filter.trim().chars().collect();
    let mut pos = 0;
    let expr = parse_expr(&chars, &mut pos)?;
    if pos != chars.len() {
        return Err(format!("trailing input at {pos}"));
    }
    Ok(expr)
}

fn parse_expr(chars: &[char], pos: &mut usize) -> Result<Expr, String> {
    if chars.get(*pos) != Some(&'(') {
        return Err(format!("expected '(' at {pos}", pos = *pos));
    }
    *pos += 1;
    let expr = match chars.get(*pos) {
        Some('&') => {
            *pos += 1;
            Expr::And(parse_list(chars, pos)?)
        }
        Some('|') => {
            *pos += 1;
            Expr::Or(parse_list(chars, pos)?)
        }
        Some('!') => {
            *pos += 1;
            Expr::Not(Box::new(parse_expr(chars, pos)?))
        }
        Some(_) => parse_item(chars, pos)?,
        None => return Err("unexpected end".to_string()),
    };
    if chars.get(*pos) != Some(&')') {
        return Err(format!("expected ')' at {pos}", pos = *pos));
    }
    *pos += 1;
    Ok(expr)
}

fn parse_list(chars: &[char], pos: &mut usize) -> Result<Vec<Expr>, String> {
    let mut items = Vec::new();
    while chars.get(*pos) == Some(&'(') {
        items.push(parse_expr(chars, pos)?);
    }
    Ok(items)
}

fn parse_item(chars: &[char], pos: &mut usize) -> Result<Expr, String> {
    let start = *pos;
    while chars.get(*pos).is_some_and(|c| *c != ')' && *c != '(') {
        *pos += 1;
    }
    let item: String = chars[start..*pos].iter().collect();
    let (attr, raw) = item
        .split_once('=')
        .ok_or_else(|| format!("missing '=' in '{item}'"))?;
    if attr.is_empty() {
        return Err(format!("missing attribute in '{item}'"));
    }
    if raw == "*" {
        return Ok(Expr::Present(attr.to_string()));
    }
    if raw.contains('*') {
        let parts = raw.split('*').map(unescape).collect::<Result<Vec<_>, _>>()?;
        return Ok(Expr::Substring(attr.to_string(), parts));
    }
    Ok(Expr::Equals(attr.to_string(), unescape(raw)?))
}

fn unescape(raw: &str) -> Result<String, String> {
    let mut bytes = Vec::with_capacity(raw.len());
    let mut iter = raw.bytes();
    while let Some(b) = iter.next() {
        if b == b'\\' {
            let hex: String = iter.by_ref().take(2).map(char::from).collect();
            let byte = u8::from_str_radix(&hex, 16).map_err(|_| format!("bad escape '\\{hex}'"))?;
            bytes.push(byte);
        } else {
            bytes.push(b);
        }
    }
    String::from_utf8(bytes).map_err(|e| e.to_string())
}

/// Install a test subscriber once; repeated calls are harmless.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dirsvc_connector=debug")
        .with_test_writer()
        .try_init();
}

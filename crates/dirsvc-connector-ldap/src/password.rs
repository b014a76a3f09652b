//! Password contexts writing Active Directory's `unicodePwd`.
//!
//! The directory only accepts `unicodePwd` writes over an encrypted channel,
//! as a replace of the double-quoted password encoded as UTF-16LE.

use async_trait::async_trait;
use ldap3::{Ldap, Mod, Scope};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use dirsvc_connector::error::{DirectoryError, DirectoryResult};
use dirsvc_connector::filter::Filter;
use dirsvc_connector::password::{
    ContextOption, ContextOptions, ContextRequest, PasswordContext, PasswordContextProvider,
};

use crate::config::LdapSettings;
use crate::connector::{map_ldap_error, open_transport, result_error, run_search, simple_bind};

/// Attribute holding the encoded password.
pub const UNICODE_PWD: &str = "unicodePwd";

/// Context options that need an integrated (SASL) bind.
const INTEGRATED_OPTIONS: [ContextOption; 3] = [
    ContextOption::Negotiate,
    ContextOption::Signing,
    ContextOption::Sealing,
];

/// Encode a plaintext password for `unicodePwd`: surrounded by double
/// quotes, then UTF-16LE.
#[instrument(skip(password))]
pub fn encode_ad_password(password: &str) -> DirectoryResult<Vec<u8>> {
    if password.is_empty() {
        return Err(DirectoryError::invalid_configuration(
            "Password cannot be empty",
        ));
    }

    let quoted = format!("\"{password}\"");
    Ok(quoted.encode_utf16().flat_map(u16::to_le_bytes).collect())
}

/// Server url for a password context.
///
/// `SecureSocketLayer` connects over `ldaps://`. Otherwise the plain
/// connection is upgraded with StartTLS, so the channel is encrypted either way.
pub(crate) fn context_url(request: &ContextRequest) -> DirectoryResult<(String, bool)> {
    if let Some(option) = INTEGRATED_OPTIONS
        .iter()
        .find(|o| request.options.contains(**o))
    {
        return Err(DirectoryError::invalid_configuration(format!(
            "context option {option:?} requires an integrated bind, \
             which the LDAP transport does not support"
        )));
    }
    if request.server.trim().is_empty() {
        return Err(DirectoryError::invalid_configuration(
            "password context requires a server",
        ));
    }

    Ok(if request.options.contains(ContextOption::SecureSocketLayer) {
        (format!("ldaps://{}", request.server), false)
    } else {
        (format!("ldap://{}", request.server), true)
    })
}

/// Opens [`LdapPasswordContext`]s.
#[derive(Debug, Clone, Default)]
pub struct LdapPasswordContextProvider {
    settings: LdapSettings,
}

impl LdapPasswordContextProvider {
    pub fn new(settings: LdapSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl PasswordContextProvider for LdapPasswordContextProvider {
    type Context = LdapPasswordContext;

    #[instrument(skip(self, request), fields(server = %request.server))]
    async fn open(&self, request: &ContextRequest) -> DirectoryResult<LdapPasswordContext> {
        let (url, starttls) = context_url(request)?;
        let settings = LdapSettings {
            starttls,
            ..self.settings.clone()
        };

        let mut ldap = open_transport(&url, &settings).await?;
        simple_bind(&mut ldap, &request.username, &request.password).await?;
        info!(url = %url, container = %request.container, "Password context opened");

        Ok(LdapPasswordContext {
            connection: Mutex::new(Some(ldap)),
            server: request.server.clone(),
            container: request.container.clone(),
            username: request.username.clone(),
            options: request.options,
        })
    }
}

/// A bound, encrypted connection scoped to one container.
pub struct LdapPasswordContext {
    connection: Mutex<Option<Ldap>>,
    server: String,
    container: String,
    username: String,
    options: ContextOptions,
}

impl LdapPasswordContext {
    async fn handle(&self) -> DirectoryResult<Ldap> {
        self.connection
            .lock()
            .await
            .as_ref()
            .cloned()
            .ok_or_else(|| DirectoryError::connection_failed("password context already released"))
    }
}

impl std::fmt::Debug for LdapPasswordContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapPasswordContext")
            .field("server", &self.server)
            .field("container", &self.container)
            .field("username", &self.username)
            .field("options", &self.options)
            .finish()
    }
}

#[async_trait]
impl PasswordContext for LdapPasswordContext {
    fn describe(&self) -> String {
        format!(
            "Server: {} Container: {} Context type: Domain UserName: {} Options: {}",
            self.server, self.container, self.username, self.options
        )
    }

    #[instrument(skip(self))]
    async fn find_user_by_upn(&self, user_principal_name: &str) -> DirectoryResult<Option<String>> {
        let mut ldap = self.handle().await?;
        let filter = Filter::eq("userPrincipalName", user_principal_name).to_ldap_string();

        let outcome = run_search(
            &mut ldap,
            &self.container,
            Scope::Subtree,
            &filter,
            vec!["1.1".to_string()],
            0,
        )
        .await?;

        match outcome.entries.len() {
            0 => Ok(None),
            1 => {
                let dn = outcome.entries.into_iter().next().map(|e| e.dn);
                debug!(dn = ?dn, "Found user by principal name");
                Ok(dn)
            }
            count => Err(DirectoryError::Ambiguous {
                filter,
                root: self.container.clone(),
                count,
            }),
        }
    }

    #[instrument(skip(self, new_password))]
    async fn set_password(&self, dn: &str, new_password: &str) -> DirectoryResult<()> {
        let encoded = encode_ad_password(new_password)?;
        let mut ldap = self.handle().await?;

        let result = ldap
            .modify(
                dn,
                vec![Mod::Replace(
                    UNICODE_PWD.as_bytes().to_vec(),
                    [encoded].into_iter().collect(),
                )],
            )
            .await
            .map_err(|e| map_ldap_error("set password", dn, e))?;
        if result.rc != 0 {
            return Err(result_error("set password", dn, result));
        }

        info!(dn = %dn, "Password set");
        Ok(())
    }

    async fn release(&self) -> DirectoryResult<()> {
        if let Some(mut ldap) = self.connection.lock().await.take() {
            ldap.unbind()
                .await
                .map_err(|e| map_ldap_error("unbind", &self.server, e))?;
        }
        Ok(())
    }
}

impl Drop for LdapPasswordContext {
    fn drop(&mut self) {
        if self.connection.get_mut().is_some() {
            warn!(server = %self.server, "Password context dropped without release");
        }
    }
}

//! Password setting through a credential context.
//!
//! Password writes need a bound, encrypted context that is separate from
//! the directory session. The context itself comes from a
//! [`PasswordContextProvider`]; this module resolves the context options,
//! drives the lookup and write, and keeps the step log callers get back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::error::{DirectoryError, DirectoryResult};
use crate::filter::Filter;

/// Context binding option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContextOption {
    Negotiate,
    SimpleBind,
    SecureSocketLayer,
    Signing,
    Sealing,
    ServerBind,
}

impl ContextOption {
    pub fn bit(self) -> u32 {
        match self {
            ContextOption::Negotiate => 1,
            ContextOption::SimpleBind => 2,
            ContextOption::SecureSocketLayer => 4,
            ContextOption::Signing => 8,
            ContextOption::Sealing => 16,
            ContextOption::ServerBind => 32,
        }
    }

    const ALL: [ContextOption; 6] = [
        ContextOption::Negotiate,
        ContextOption::SimpleBind,
        ContextOption::SecureSocketLayer,
        ContextOption::Signing,
        ContextOption::Sealing,
        ContextOption::ServerBind,
    ];
}

/// A context option and whether it is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextOptionFlag {
    pub option: ContextOption,
    pub value: bool,
}

/// Resolved set of context options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContextOptions(u32);

impl ContextOptions {
    /// Resolve requested flags into an option set.
    ///
    /// Without any requested option the context uses a simple bind. Once
    /// other options are requested, simple bind is only included when it is
    /// requested too.
    pub fn resolve(flags: &[ContextOptionFlag]) -> Self {
        let bits = flags
            .iter()
            .filter(|f| f.value)
            .fold(0, |bits, f| bits | f.option.bit());
        if bits == 0 {
            Self(ContextOption::SimpleBind.bit())
        } else {
            Self(bits)
        }
    }

    pub fn from_options(options: &[ContextOption]) -> Self {
        Self(options.iter().fold(0, |bits, o| bits | o.bit()))
    }

    pub fn contains(&self, option: ContextOption) -> bool {
        self.0 & option.bit() != 0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ContextOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = ContextOption::ALL
            .iter()
            .filter(|o| self.contains(**o))
            .map(|o| format!("{o:?}"))
            .collect();
        f.write_str(&names.join(", "))
    }
}

/// Where and as whom a password context binds.
#[derive(Clone)]
pub struct ContextRequest {
    /// Server host, without scheme.
    pub server: String,
    /// Container DN the context is scoped to.
    pub container: String,
    pub username: String,
    pub password: String,
    pub options: ContextOptions,
}

impl std::fmt::Debug for ContextRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextRequest")
            .field("server", &self.server)
            .field("container", &self.container)
            .field("username", &self.username)
            .field("password", &"***REDACTED***")
            .field("options", &self.options)
            .finish()
    }
}

/// Strip a `ldap://` or `ldaps://` prefix (any case) and any trailing path.
pub fn server_name(address: &str) -> String {
    let address = address.trim();
    let lower = address.to_ascii_lowercase();
    let rest = ["ldaps://", "ldap://"]
        .iter()
        .find_map(|scheme| lower.strip_prefix(scheme).map(|_| &address[scheme.len()..]))
        .unwrap_or(address);
    rest.split('/').next().unwrap_or_default().to_string()
}

/// Input for [`set_user_password`].
#[derive(Clone, Serialize, Deserialize)]
pub struct PasswordParameters {
    /// Server name or address, with or without a scheme.
    pub ad_server: String,
    pub ad_container: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// `userPrincipalName` of the account to update.
    pub user_principal_name: String,
    #[serde(skip_serializing)]
    pub new_password: String,
    #[serde(default)]
    pub context_option_flags: Vec<ContextOptionFlag>,
}

impl std::fmt::Debug for PasswordParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordParameters")
            .field("ad_server", &self.ad_server)
            .field("ad_container", &self.ad_container)
            .field("username", &self.username)
            .field("password", &"***REDACTED***")
            .field("user_principal_name", &self.user_principal_name)
            .field("new_password", &"***REDACTED***")
            .field("context_option_flags", &self.context_option_flags)
            .finish()
    }
}

impl PasswordParameters {
    pub fn context_request(&self) -> ContextRequest {
        ContextRequest {
            server: server_name(&self.ad_server),
            container: self.ad_container.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            options: ContextOptions::resolve(&self.context_option_flags),
        }
    }
}

/// Result of [`set_user_password`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PasswordOutput {
    pub operation_successful: bool,
    pub user_principal_name: Option<String>,
    /// Steps taken, in order.
    pub log: String,
}

/// An open credential context.
#[async_trait]
pub trait PasswordContext: Send + Sync {
    /// One-line description of the bound context for the step log.
    fn describe(&self) -> String;

    /// DN of the user with this `userPrincipalName`, if any.
    async fn find_user_by_upn(&self, user_principal_name: &str) -> DirectoryResult<Option<String>>;

    /// Set a user's password.
    async fn set_password(&self, dn: &str, new_password: &str) -> DirectoryResult<()>;

    /// Release the context. Calling it again is a no-op.
    async fn release(&self) -> DirectoryResult<()>;
}

/// Opens credential contexts.
#[async_trait]
pub trait PasswordContextProvider: Send + Sync {
    type Context: PasswordContext;

    async fn open(&self, request: &ContextRequest) -> DirectoryResult<Self::Context>;
}

/// Look up a user by principal name and set its password.
///
/// The context is released on every path. On failure the error carries the
/// step log accumulated so far.
#[instrument(skip(provider, params), fields(upn = %params.user_principal_name))]
pub async fn set_user_password<P: PasswordContextProvider>(
    provider: &P,
    params: &PasswordParameters,
) -> DirectoryResult<PasswordOutput> {
    let mut output = PasswordOutput::default();
    output.log.push_str("Attempting to connect to server.");

    let request = params.context_request();
    let context = match provider.open(&request).await {
        Ok(context) => context,
        Err(e) => {
            return Err(DirectoryError::PasswordFailed {
                log: output.log,
                source: Box::new(e),
            })
        }
    };
    output.log.push_str(&format!(
        "Context created and connection formed. {};",
        context.describe()
    ));

    let result = locate_and_set(&context, params, &mut output.log).await;
    release(&context).await;

    match result {
        Ok(()) => {
            output.operation_successful = true;
            output.user_principal_name = Some(params.user_principal_name.clone());
            info!("Password set");
            Ok(output)
        }
        Err(e) => Err(DirectoryError::PasswordFailed {
            log: output.log,
            source: Box::new(e),
        }),
    }
}

async fn locate_and_set<C: PasswordContext>(
    context: &C,
    params: &PasswordParameters,
    log: &mut String,
) -> DirectoryResult<()> {
    let upn = &params.user_principal_name;
    let Some(dn) = context.find_user_by_upn(upn).await? else {
        log.push_str(&format!("User {upn} not found."));
        return Err(DirectoryError::NotFound {
            filter: Filter::eq("userPrincipalName", upn.as_str()).to_ldap_string(),
            root: params.ad_container.clone(),
        });
    };
    log.push_str(&format!("User found: {dn};"));

    context.set_password(&dn, &params.new_password).await?;
    log.push_str("Password set;");
    Ok(())
}

/// Set the password of a known entry through a fresh context.
#[instrument(skip(provider, request, new_password), fields(server = %request.server))]
pub async fn set_entry_password<P: PasswordContextProvider>(
    provider: &P,
    request: &ContextRequest,
    dn: &str,
    new_password: &str,
) -> DirectoryResult<()> {
    let context = provider.open(request).await?;
    let result = context.set_password(dn, new_password).await;
    release(&context).await;
    result
}

async fn release<C: PasswordContext>(context: &C) {
    if let Err(e) = context.release().await {
        warn!(error = %e, "Failed to release password context");
    }
}

//! Connection configuration.
//!
//! A [`DirectoryConnection`] names the directory (uri with optional base-DN
//! path suffix), the credentials, and the authentication options passed
//! through to the transport.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DirectoryError, DirectoryResult};

/// Binding option understood by directory transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthenticationType {
    None,
    Secure,
    Encryption,
    SecureSocketsLayer,
    ReadonlyServer,
    Anonymous,
    FastBind,
    Signing,
    Sealing,
    Delegation,
    ServerBind,
}

impl AuthenticationType {
    /// Bit value of the option.
    pub fn bit(self) -> u32 {
        match self {
            AuthenticationType::None => 0,
            AuthenticationType::Secure => 0x1,
            AuthenticationType::Encryption | AuthenticationType::SecureSocketsLayer => 0x2,
            AuthenticationType::ReadonlyServer => 0x4,
            AuthenticationType::Anonymous => 0x10,
            AuthenticationType::FastBind => 0x20,
            AuthenticationType::Signing => 0x40,
            AuthenticationType::Sealing => 0x80,
            AuthenticationType::Delegation => 0x100,
            AuthenticationType::ServerBind => 0x200,
        }
    }
}

/// A named authentication option and whether it is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationFlag {
    pub flag: AuthenticationType,
    pub value: bool,
}

impl AuthenticationFlag {
    pub fn enabled(flag: AuthenticationType) -> Self {
        Self { flag, value: true }
    }
}

/// Set of enabled authentication options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuthenticationTypes(u32);

impl AuthenticationTypes {
    /// OR together every enabled flag.
    pub fn from_flags(flags: &[AuthenticationFlag]) -> Self {
        Self(
            flags
                .iter()
                .filter(|f| f.value)
                .fold(0, |bits, f| bits | f.flag.bit()),
        )
    }

    pub fn contains(&self, flag: AuthenticationType) -> bool {
        let bit = flag.bit();
        bit != 0 && self.0 & bit == bit
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

/// Host, port and base DN derived from a connection uri.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// `ldaps` scheme in the uri.
    pub secure: bool,
    pub host: String,
    pub port: Option<u16>,
    /// Path suffix of the uri, the session root. May be empty.
    pub base_dn: String,
}

impl Endpoint {
    /// `scheme://host[:port]`, without the base DN.
    pub fn server_url(&self) -> String {
        let scheme = if self.secure { "ldaps" } else { "ldap" };
        match self.port {
            Some(port) => format!("{scheme}://{}:{port}", self.host),
            None => format!("{scheme}://{}", self.host),
        }
    }
}

/// Connection parameters for one session.
#[derive(Clone, Serialize, Deserialize)]
pub struct DirectoryConnection {
    /// `ldap://host[:port][/base-dn]` (scheme is case-insensitive).
    pub uri: String,

    /// Bind identity.
    #[serde(default)]
    pub username: String,

    /// Bind password.
    #[serde(default, skip_serializing)]
    pub password: String,

    /// Authentication options passed through to the transport.
    #[serde(default)]
    pub authentication: Vec<AuthenticationFlag>,
}

impl std::fmt::Debug for DirectoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryConnection")
            .field("uri", &self.uri)
            .field("username", &self.username)
            .field("password", &"***REDACTED***")
            .field("authentication", &self.authentication)
            .finish()
    }
}

impl DirectoryConnection {
    /// Create a connection with required fields.
    pub fn new(
        uri: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            username: username.into(),
            password: password.into(),
            authentication: Vec::new(),
        }
    }

    /// Enable an authentication option.
    #[must_use]
    pub fn with_authentication(mut self, flag: AuthenticationType) -> Self {
        self.authentication.push(AuthenticationFlag::enabled(flag));
        self
    }

    /// Enabled authentication options.
    pub fn authentication_types(&self) -> AuthenticationTypes {
        AuthenticationTypes::from_flags(&self.authentication)
    }

    /// Copy of this connection rooted at `path` instead of the uri's own path.
    /// An empty path keeps the current root.
    #[must_use]
    pub fn scoped_to(&self, path: &str) -> Self {
        let path = path.trim_matches('/');
        if path.is_empty() {
            return self.clone();
        }
        let (server, _) = split_uri(&self.uri);
        Self {
            uri: format!("{server}/{path}"),
            ..self.clone()
        }
    }

    /// Validate the connection parameters.
    pub fn validate(&self) -> DirectoryResult<()> {
        self.endpoint().map(|_| ())
    }

    /// Parse the uri into host, port and base DN.
    pub fn endpoint(&self) -> DirectoryResult<Endpoint> {
        if self.uri.trim().is_empty() {
            return Err(DirectoryError::invalid_configuration("uri is required"));
        }

        let (server, base_dn) = split_uri(&self.uri);
        let url = Url::parse(server).map_err(|e| {
            DirectoryError::invalid_configuration(format!("invalid uri '{}': {e}", self.uri))
        })?;

        let secure = match url.scheme() {
            "ldap" => false,
            "ldaps" => true,
            other => {
                return Err(DirectoryError::invalid_configuration(format!(
                    "unsupported uri scheme '{other}', expected ldap or ldaps"
                )))
            }
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| {
                DirectoryError::invalid_configuration(format!("uri '{}' has no host", self.uri))
            })?
            .to_string();

        Ok(Endpoint {
            secure,
            host,
            port: url.port(),
            base_dn: base_dn.to_string(),
        })
    }
}

/// Split `scheme://authority/path` into (`scheme://authority`, `path`).
fn split_uri(uri: &str) -> (&str, &str) {
    let uri = uri.trim();
    let authority_start = uri.find("://").map_or(0, |i| i + 3);
    match uri[authority_start..].find('/') {
        Some(slash) => {
            let at = authority_start + slash;
            (&uri[..at], uri[at + 1..].trim_matches('/'))
        }
        None => (uri, ""),
    }
}

//! LDAP transport settings.
//!
//! These are the knobs of the `ldap3` transport itself. What to connect to
//! and as whom comes from [`DirectoryConnection`](dirsvc_connector::config::DirectoryConnection).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Transport settings shared by every connection a connector opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LdapSettings {
    /// Connection timeout in seconds.
    #[serde(default = "default_conn_timeout_secs")]
    pub conn_timeout_secs: u64,

    /// Per-operation timeout in seconds. `None` waits indefinitely.
    #[serde(default)]
    pub operation_timeout_secs: Option<u64>,

    /// Upgrade plain `ldap://` connections with StartTLS.
    #[serde(default)]
    pub starttls: bool,

    /// Skip server certificate verification (test directories only).
    #[serde(default)]
    pub no_tls_verify: bool,

    /// Chase continuation references returned by subtree searches.
    #[serde(default = "default_follow_referrals")]
    pub follow_referrals: bool,

    /// Maximum referral depth followed from the original server.
    #[serde(default = "default_max_referral_hops")]
    pub max_referral_hops: u32,

    /// Page size for searches that do not request paging. Directories cap
    /// unpaged result sets at their own size limit; 0 sends them unpaged.
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
}

fn default_conn_timeout_secs() -> u64 {
    30
}

fn default_follow_referrals() -> bool {
    true
}

fn default_max_referral_hops() -> u32 {
    5
}

fn default_page_size() -> u32 {
    1000
}

impl Default for LdapSettings {
    fn default() -> Self {
        Self {
            conn_timeout_secs: default_conn_timeout_secs(),
            operation_timeout_secs: None,
            starttls: false,
            no_tls_verify: false,
            follow_referrals: default_follow_referrals(),
            max_referral_hops: default_max_referral_hops(),
            default_page_size: default_page_size(),
        }
    }
}

impl LdapSettings {
    /// Set the per-operation timeout.
    #[must_use]
    pub fn with_operation_timeout(mut self, secs: u64) -> Self {
        self.operation_timeout_secs = Some(secs);
        self
    }

    /// Enable StartTLS on plain connections.
    #[must_use]
    pub fn with_starttls(mut self) -> Self {
        self.starttls = true;
        self
    }

    /// Disable referral chasing.
    #[must_use]
    pub fn without_referrals(mut self) -> Self {
        self.follow_referrals = false;
        self
    }

    pub fn conn_timeout(&self) -> Duration {
        Duration::from_secs(self.conn_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_secs.map(Duration::from_secs)
    }

    /// Effective page size for a request. Zero means unpaged.
    pub fn page_size(&self, requested: u32) -> u32 {
        let size = if requested == 0 {
            self.default_page_size
        } else {
            requested
        };
        size.min(i32::MAX as u32)
    }
}

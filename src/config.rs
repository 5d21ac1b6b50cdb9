//! Directory backend configuration.
//!
//! A [`DirectoryConfig`] describes one backend: where to dial, the base DN
//! all operations are scoped to, and the administrative bind identity.
//! The address is a URI whose scheme picks plaintext (`ldap`) or TLS
//! (`ldaps`) transport; host-only addresses get the protocol's standard
//! port (389 or 636).

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DirectoryError, DirectoryResult};

/// Default page size for paged searches.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Default pool size for the managed connection provider.
pub const DEFAULT_POOL_SIZE: usize = 10;

/// Configuration for one directory backend.
#[derive(Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Server address, e.g. `ldap.example.org`, `ldap://host:389`,
    /// `ldaps://host`.
    pub addr: String,

    /// Base DN for all operations, e.g. `dc=example,dc=org`.
    pub base: String,

    /// Administrative bind DN.
    #[serde(default)]
    pub bind_dn: String,

    /// Administrative bind password.
    #[serde(skip_serializing, default)]
    pub bind_password: String,

    /// Domain suffix for userPrincipalName binds against Active Directory,
    /// e.g. `example.org`.
    #[serde(default)]
    pub domain: String,

    /// Page size for paged search operations.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Skip TLS certificate verification on `ldaps` connections.
    #[serde(default)]
    pub no_tls_verify: bool,
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl std::fmt::Debug for DirectoryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryConfig")
            .field("addr", &self.addr)
            .field("base", &self.base)
            .field("bind_dn", &self.bind_dn)
            .field(
                "bind_password",
                &if self.bind_password.is_empty() {
                    ""
                } else {
                    "***REDACTED***"
                },
            )
            .field("domain", &self.domain)
            .field("page_size", &self.page_size)
            .field("no_tls_verify", &self.no_tls_verify)
            .finish()
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            addr: String::new(),
            base: String::new(),
            bind_dn: String::new(),
            bind_password: String::new(),
            domain: String::new(),
            page_size: DEFAULT_PAGE_SIZE,
            no_tls_verify: false,
        }
    }
}

impl DirectoryConfig {
    /// Create a config with the required fields.
    pub fn new(addr: impl Into<String>, base: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            base: base.into(),
            ..Self::default()
        }
    }

    /// Set the administrative bind identity.
    #[must_use]
    pub fn with_bind(mut self, dn: impl Into<String>, password: impl Into<String>) -> Self {
        self.bind_dn = dn.into();
        self.bind_password = password.into();
        self
    }

    /// Set the userPrincipalName domain.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Load a config from the environment.
    ///
    /// Reads `LDAP_HOSTS`, `LDAP_BASE`, `LDAP_DOMAIN`, `LDAP_BIND_DN` and
    /// `LDAP_PASSWD`, falling back to a localhost development setup.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            addr: env_or("LDAP_HOSTS", "localhost"),
            base: env_or("LDAP_BASE", "dc=example,dc=org"),
            domain: env_or("LDAP_DOMAIN", "example.org"),
            bind_dn: env_or("LDAP_BIND_DN", ""),
            bind_password: env_or("LDAP_PASSWD", ""),
            page_size: DEFAULT_PAGE_SIZE,
            no_tls_verify: false,
        }
    }

    /// Overlay the non-empty fields of `other` onto this config.
    pub fn merge_from(&mut self, other: &DirectoryConfig) {
        if !other.addr.is_empty() {
            self.addr = other.addr.clone();
        }
        if !other.base.is_empty() {
            self.base = other.base.clone();
        }
        if !other.domain.is_empty() {
            self.domain = other.domain.clone();
        }
        if !other.bind_dn.is_empty() {
            self.bind_dn = other.bind_dn.clone();
        }
        if !other.bind_password.is_empty() {
            self.bind_password = other.bind_password.clone();
        }
    }

    /// Validate the fields every backend needs.
    pub fn validate(&self) -> DirectoryResult<()> {
        if self.base.is_empty() {
            return Err(DirectoryError::EmptyBase);
        }
        ServerAddress::parse(&self.addr)?;
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

/// A parsed server address: host, port and transport security.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl ServerAddress {
    /// Parse an address string.
    ///
    /// Accepts bare hostnames (`ldap.example.org`), host:port pairs and
    /// full URIs. The `ldaps` scheme selects TLS; any other scheme than
    /// `ldap`/`ldaps` is rejected. Missing ports default to 389 or 636.
    pub fn parse(addr: &str) -> DirectoryResult<Self> {
        if addr.is_empty() {
            return Err(DirectoryError::invalid_config("directory address is empty"));
        }

        let with_scheme = if addr.contains("://") {
            addr.to_string()
        } else {
            format!("ldap://{addr}")
        };

        let url = Url::parse(&with_scheme)
            .map_err(|e| DirectoryError::invalid_config(format!("parse address {addr:?}: {e}")))?;

        let use_tls = match url.scheme() {
            "ldap" => false,
            "ldaps" => true,
            other => {
                return Err(DirectoryError::invalid_config(format!(
                    "unsupported scheme {other:?} in address {addr:?}"
                )))
            }
        };

        let host = url
            .host_str()
            .ok_or_else(|| {
                DirectoryError::invalid_config(format!("no host in address {addr:?}"))
            })?
            .to_string();

        let port = url.port().unwrap_or(if use_tls { 636 } else { 389 });

        Ok(Self {
            host,
            port,
            use_tls,
        })
    }

    /// The connection URL, e.g. `ldaps://host:636`.
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.use_tls { "ldaps" } else { "ldap" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    /// The `host:port` pair.
    #[must_use]
    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

//! Transport seams: the protocol handle and the pooled-connection provider.
//!
//! The core decides *what* requests to build and in what order to try
//! them; everything wire-level lives behind [`DirectoryHandle`]. Handles
//! are dealt out by a [`ConnectionProvider`] already connected but not yet
//! authenticated, and must be handed back on every exit path.
//!
//! Request values are plain data so tests can assert on exactly what the
//! core would send.

use async_trait::async_trait;
use ldap3::SearchEntry;

use crate::error::DirectoryResult;

/// A search scoped to a base DN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    /// Search base DN. Single-entry lookups pass the entry DN itself.
    pub base: String,
    /// RFC 4515 filter string.
    pub filter: String,
    /// Attributes to return.
    pub attrs: Vec<String>,
    /// Page size for paged result retrieval; `None` disables paging.
    pub page_size: Option<u32>,
}

impl SearchRequest {
    /// Build a subtree search under `base`.
    pub fn new(base: impl Into<String>, filter: impl Into<String>, attrs: &[&str]) -> Self {
        Self {
            base: base.into(),
            filter: filter.into(),
            attrs: attrs.iter().map(|a| (*a).to_string()).collect(),
            page_size: None,
        }
    }

    /// Enable paged retrieval with the given page size.
    #[must_use]
    pub fn paged(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }
}

/// An add of a new entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddRequest {
    pub dn: String,
    /// Attribute name/value pairs, in emission order.
    pub attrs: Vec<(String, Vec<String>)>,
}

impl AddRequest {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attrs: Vec::new(),
        }
    }

    /// Append an attribute with its values.
    pub fn attr(&mut self, name: &str, values: Vec<String>) {
        self.attrs.push((name.to_string(), values));
    }

    /// The values of a named attribute, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }
}

/// A modify of an existing entry. Only replace operations are emitted:
/// updates are computed as desired-state diffs, not incremental edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyRequest {
    pub dn: String,
    /// Attribute replacements, in emission order.
    pub replaces: Vec<(String, Vec<String>)>,
}

impl ModifyRequest {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            replaces: Vec::new(),
        }
    }

    /// Append a replace operation.
    pub fn replace(&mut self, name: &str, values: Vec<String>) {
        self.replaces.push((name.to_string(), values));
    }

    /// Whether any attribute other than the named ones is replaced.
    #[must_use]
    pub fn replaces_other_than(&self, names: &[&str]) -> bool {
        self.replaces.iter().any(|(n, _)| !names.contains(&n.as_str()))
    }

    /// The replacement values for a named attribute, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.replaces
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }
}

/// A rename-in-place (modify-DN) of an existing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyDnRequest {
    pub dn: String,
    /// New relative DN, e.g. `uid=doe2`.
    pub new_rdn: String,
    /// Remove the old RDN attribute value.
    pub delete_old_rdn: bool,
}

/// A password-modify extended operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordModifyRequest {
    /// DN of the account whose password changes.
    pub user_dn: String,
    /// Current password; empty for an administrative reset.
    pub old_password: String,
    /// New password.
    pub new_password: String,
}

/// A connected, not-yet-authenticated protocol handle.
///
/// The handle carries whatever bind state the caller establishes; the
/// core always binds explicitly before other operations.
#[async_trait]
pub trait DirectoryHandle: Send {
    /// Authenticate the connection as `dn`.
    async fn simple_bind(&mut self, dn: &str, password: &str) -> DirectoryResult<()>;

    /// Run a subtree search and collect the matching entries.
    async fn search(&mut self, req: &SearchRequest) -> DirectoryResult<Vec<SearchEntry>>;

    /// Add a new entry.
    async fn add(&mut self, req: &AddRequest) -> DirectoryResult<()>;

    /// Apply attribute replacements to an entry.
    async fn modify(&mut self, req: &ModifyRequest) -> DirectoryResult<()>;

    /// Rename an entry in place.
    async fn modify_dn(&mut self, req: &ModifyDnRequest) -> DirectoryResult<()>;

    /// Delete an entry by DN.
    async fn delete(&mut self, dn: &str) -> DirectoryResult<()>;

    /// Run the password-modify extended operation.
    async fn password_modify(&mut self, req: &PasswordModifyRequest) -> DirectoryResult<()>;
}

/// Point-in-time counters for a connection provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections currently held by the provider, busy or idle.
    pub total: usize,
    /// Connections sitting idle in the provider.
    pub idle: usize,
    /// Handles handed out over the provider's lifetime.
    pub hits: usize,
    /// Acquire calls that had to establish a fresh connection.
    pub misses: usize,
}

/// Hands out connected protocol handles and takes them back.
///
/// Sizing, idle reaping and connection age are provider configuration;
/// the core only acquires, uses and releases.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Acquire a handle, establishing a connection if none is idle.
    async fn acquire(&self) -> DirectoryResult<Box<dyn DirectoryHandle>>;

    /// Return a handle to the provider.
    async fn release(&self, handle: Box<dyn DirectoryHandle>);

    /// Close the provider and drop its connections.
    async fn close(&self);

    /// Connections currently held by the provider.
    fn len(&self) -> usize;

    /// Whether the provider currently holds no connections.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Connections sitting idle.
    fn idle_len(&self) -> usize;

    /// Counter snapshot.
    fn stats(&self) -> PoolStats;
}

//! One configured directory backend.
//!
//! A [`Source`] owns the pooled connections to a single server, knows its
//! base DN and administrative bind identity, and learns its schema
//! dialect (standard vs Active Directory) once, on the first readiness
//! probe. All operations acquire a handle, bind explicitly, run, and
//! release the handle on every exit path.

mod groups;
mod password;
mod persist;

pub use groups::{AD_ADMIN_GROUP_NAME, ADMIN_GROUP_NAME};

use std::sync::OnceLock;

use ldap3::{ldap_escape, SearchEntry};
use tracing::{debug, instrument, warn};

use crate::config::{DirectoryConfig, DEFAULT_PAGE_SIZE};
use crate::entry::{split_dc, EntryType, AD_USER, BASE, PARENT, PERSON};
use crate::error::{DirectoryError, DirectoryResult};
use crate::mapper::entry_to_person;
use crate::model::{Person, Spec};
use crate::pool::LdapPool;
use crate::transport::{
    AddRequest, ConnectionProvider, DirectoryHandle, PoolStats, SearchRequest,
};

/// Readiness name for the root entry.
pub const READY_BASE: &str = "base";

/// One backend directory server.
pub struct Source {
    addr: String,
    base: String,
    domain: String,
    bind_dn: String,
    bind_password: String,
    page_size: u32,
    provider: Box<dyn ConnectionProvider>,
    /// Dialect flag, written at most once by the first base readiness
    /// probe.
    ad: OnceLock<bool>,
}

impl Source {
    /// Build a source with the production connection provider.
    pub fn new(config: &DirectoryConfig) -> DirectoryResult<Self> {
        config.validate()?;
        let provider = Box::new(LdapPool::new(config)?);
        Ok(Self::with_provider(config, provider))
    }

    /// Build a source over an explicit connection provider.
    pub fn with_provider(config: &DirectoryConfig, provider: Box<dyn ConnectionProvider>) -> Self {
        Self {
            addr: config.addr.clone(),
            base: config.base.clone(),
            domain: config.domain.clone(),
            bind_dn: config.bind_dn.clone(),
            bind_password: config.bind_password.clone(),
            page_size: if config.page_size > 0 {
                config.page_size
            } else {
                DEFAULT_PAGE_SIZE
            },
            provider,
            ad: OnceLock::new(),
        }
    }

    /// The configured server address.
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// The base DN this source is scoped to.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Whether the backend was detected as Active Directory. False until
    /// the first base readiness probe has run.
    #[must_use]
    pub fn is_ad(&self) -> bool {
        self.ad.get().copied().unwrap_or(false)
    }

    pub(crate) fn person_type(&self) -> &'static EntryType {
        if self.is_ad() {
            &AD_USER
        } else {
            &PERSON
        }
    }

    /// Canonical DN of a person entry for this source's dialect.
    #[must_use]
    pub fn user_dn(&self, uid: &str) -> String {
        self.person_type().dn(uid, &self.base)
    }

    /// Close the underlying connection provider.
    pub async fn close(&self) {
        self.provider.close().await;
    }

    /// Provider counter snapshot.
    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.provider.stats()
    }

    // ---- connection helpers ----

    /// Acquire a handle and bind it as `dn`. The handle is released here
    /// on failure; on success the caller must release it.
    pub(crate) async fn bound_handle(
        &self,
        dn: &str,
        password: &str,
    ) -> DirectoryResult<Box<dyn DirectoryHandle>> {
        if dn.is_empty() {
            return Err(DirectoryError::EmptyDn);
        }
        if password.is_empty() {
            return Err(DirectoryError::EmptyPassword);
        }
        let mut handle = self.provider.acquire().await.map_err(|e| {
            warn!(addr = %self.addr, error = %e, "acquire connection failed");
            e
        })?;
        match handle.simple_bind(dn, password).await {
            Ok(()) => Ok(handle),
            Err(e) => {
                self.provider.release(handle).await;
                warn!(addr = %self.addr, bind_dn = %dn, error = %e, "bind failed");
                Err(e)
            }
        }
    }

    /// Acquire a handle bound with the administrative identity. Never
    /// falls back to an anonymous bind.
    pub(crate) async fn admin_handle(&self) -> DirectoryResult<Box<dyn DirectoryHandle>> {
        self.bound_handle(&self.bind_dn, &self.bind_password).await
    }

    pub(crate) async fn release(&self, handle: Box<dyn DirectoryHandle>) {
        self.provider.release(handle).await;
    }

    /// Map an entry to a person, logging degraded-parse warnings.
    pub(crate) fn map_person(&self, entry: &SearchEntry) -> Person {
        let (person, warnings) = entry_to_person(entry);
        for w in &warnings {
            debug!(addr = %self.addr, warning = %w, "degraded attribute parse");
        }
        person
    }

    // ---- readiness ----

    /// Ensure the named containers exist.
    ///
    /// `"base"` ensures the root entry, creating it from the first domain
    /// component when absent, and detects the backend dialect exactly
    /// once. Any other name ensures an organizational unit under the
    /// base, skipped entirely when the backend is Active Directory.
    /// Empty names are ignored.
    #[instrument(skip(self), fields(addr = %self.addr))]
    pub async fn ready(&self, names: &[&str]) -> DirectoryResult<()> {
        let mut handle = self.admin_handle().await?;
        let result = self.ready_inner(handle.as_mut(), names).await;
        self.release(handle).await;
        result
    }

    async fn ready_inner(
        &self,
        handle: &mut dyn DirectoryHandle,
        names: &[&str],
    ) -> DirectoryResult<()> {
        for name in names {
            if name.is_empty() {
                continue;
            }
            if *name == READY_BASE {
                let existing =
                    ensure_entry(handle, &BASE, split_dc(&self.base), &self.base).await?;
                let detected = match &existing {
                    Some(entry) => !crate::mapper::attr_first(entry, "instanceType").is_empty(),
                    // A root we just created cannot be an AD domain head.
                    None => false,
                };
                if self.ad.set(detected).is_ok() && detected {
                    debug!(addr = %self.addr, "backend is Active Directory");
                }
            } else if !self.is_ad() {
                ensure_entry(handle, &PARENT, name, &self.base).await?;
            }
        }
        Ok(())
    }

    // ---- reads ----

    /// Fetch one entry with the administrative context.
    pub(crate) async fn get_entry(
        &self,
        dn: &str,
        filter: &str,
        attrs: &[&str],
    ) -> DirectoryResult<SearchEntry> {
        let mut handle = self.admin_handle().await?;
        let result = find_one(handle.as_mut(), dn, filter, attrs).await;
        self.release(handle).await;
        result
    }

    /// Look up a person by uid at its canonical DN.
    #[instrument(skip(self), fields(addr = %self.addr))]
    pub async fn get_person(&self, uid: &str) -> DirectoryResult<Person> {
        let et = self.person_type();
        let dn = self.user_dn(uid);
        let entry = self.get_entry(&dn, et.filter, et.attributes).await?;
        Ok(self.map_person(&entry))
    }

    /// Look up a person by explicit DN. The DN is checked for well-formed
    /// syntax before any search is issued.
    #[instrument(skip(self), fields(addr = %self.addr))]
    pub async fn get_by_dn(&self, dn: &str) -> DirectoryResult<Person> {
        validate_dn(dn)?;
        let et = self.person_type();
        let entry = self.get_entry(dn, et.filter, et.attributes).await?;
        Ok(self.map_person(&entry))
    }

    /// Page through people matching `spec`. Errors are logged and an
    /// empty page returned.
    #[instrument(skip(self, spec), fields(addr = %self.addr))]
    pub async fn list(&self, spec: &Spec) -> Vec<Person> {
        match self.search_people(spec).await {
            Ok(people) => people,
            Err(e) => {
                warn!(addr = %self.addr, error = %e, "list people failed");
                Vec::new()
            }
        }
    }

    async fn search_people(&self, spec: &Spec) -> DirectoryResult<Vec<Person>> {
        let et = self.person_type();
        let filter = spec_filter(et, spec);
        let limit = if spec.limit > 0 {
            spec.limit
        } else {
            self.page_size
        };
        let req = SearchRequest::new(&self.base, filter, et.attributes).paged(limit);

        let mut handle = self.admin_handle().await?;
        let result = handle.search(&req).await;
        self.release(handle).await;

        Ok(result?
            .iter()
            .map(|entry| self.map_person(entry))
            .collect())
    }

    // ---- authentication ----

    /// Authenticate a person, trying bind strategies in fixed order.
    ///
    /// 1. Bind the uid's canonical DN and read the entry under it.
    /// 2. On Active Directory with a configured domain, bind
    ///    `uid@domain` and search by userPrincipalName, then by
    ///    sAMAccountName.
    /// 3. Search for the entry with the administrative context and bind
    ///    its actual DN, covering entries whose DN no longer matches the
    ///    uid.
    ///
    /// A later strategy runs only when the previous one failed with
    /// not-found or the normalized login failure; any other error aborts
    /// the cascade. Failures never reveal whether the account exists.
    #[instrument(skip(self, password), fields(addr = %self.addr))]
    pub async fn authenticate(&self, uid: &str, password: &str) -> DirectoryResult<Person> {
        let dn = self.user_dn(uid);
        match self.bind_entry(uid, &dn, password, false).await {
            Ok(entry) => return Ok(self.map_person(&entry)),
            Err(e) if cascade_continues(&e) => {
                debug!(addr = %self.addr, dn = %dn, "canonical bind did not resolve the account");
            }
            Err(e) => return Err(e),
        }

        if self.is_ad() && !self.domain.is_empty() && !uid.contains('@') {
            let principal = format!("{uid}@{}", self.domain);
            match self.bind_entry(uid, &principal, password, true).await {
                Ok(entry) => return Ok(self.map_person(&entry)),
                Err(e) if cascade_continues(&e) => {
                    debug!(addr = %self.addr, principal = %principal, "principal bind did not resolve the account");
                }
                Err(e) => return Err(e),
            }
        }

        match self.authenticate_by_lookup(uid, password).await {
            Ok(entry) => Ok(self.map_person(&entry)),
            // Unknown accounts and bad passwords are indistinguishable to
            // the caller.
            Err(e) if e.is_not_found() => Err(DirectoryError::Login),
            Err(e) => Err(e),
        }
    }

    /// Bind as `dn` and read back the bound account's entry.
    ///
    /// With `is_upn` set the bind DN is a userPrincipalName and the entry
    /// is located by principal, falling back to the account name.
    async fn bind_entry(
        &self,
        uid: &str,
        dn: &str,
        password: &str,
        is_upn: bool,
    ) -> DirectoryResult<SearchEntry> {
        let et = self.person_type();
        let mut handle = match self.bound_handle(dn, password).await {
            Ok(handle) => handle,
            Err(e) => return Err(e.normalize_bind_failure()),
        };

        let result = async {
            if is_upn {
                let by_principal = format!("(userPrincipalName={})", ldap_escape(dn));
                match find_one(handle.as_mut(), &self.base, &by_principal, et.attributes).await {
                    Err(e) if e.is_not_found() => {
                        let by_account = format!("(sAMAccountName={})", ldap_escape(uid));
                        find_one(handle.as_mut(), &self.base, &by_account, et.attributes).await
                    }
                    other => other,
                }
            } else {
                find_one(handle.as_mut(), dn, et.filter, et.attributes).await
            }
        }
        .await;

        self.release(handle).await;
        result
    }

    /// Strategy 3: resolve the account's actual DN with the
    /// administrative context, then bind it.
    async fn authenticate_by_lookup(
        &self,
        uid: &str,
        password: &str,
    ) -> DirectoryResult<SearchEntry> {
        let et = self.person_type();
        let entry = self
            .get_entry(&self.base, &et.one_filter(uid), et.attributes)
            .await?;
        self.bind_entry(uid, &entry.dn, password, false).await
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("addr", &self.addr)
            .field("base", &self.base)
            .field("domain", &self.domain)
            .field("bind_dn", &self.bind_dn)
            .field("is_ad", &self.is_ad())
            .finish()
    }
}

/// Whether the authentication cascade moves on after this failure.
fn cascade_continues(err: &DirectoryError) -> bool {
    err.is_not_found() || err.is_login_failure()
}

/// Search under `base` and return the first matching entry, mapping both
/// empty results and noSuchObject to not-found.
pub(crate) async fn find_one(
    handle: &mut dyn DirectoryHandle,
    base: &str,
    filter: &str,
    attrs: &[&str],
) -> DirectoryResult<SearchEntry> {
    let req = SearchRequest::new(base, filter, attrs);
    match handle.search(&req).await {
        Ok(entries) => entries.into_iter().next().ok_or(DirectoryError::NotFound),
        Err(e) if e.is_not_found() => Err(DirectoryError::NotFound),
        Err(e) => {
            warn!(base = %base, filter = %filter, error = %e, "search failed");
            Err(e)
        }
    }
}

/// Ensure an entry of the given type exists, creating it when absent.
/// Returns the pre-existing entry, or `None` when one was created.
pub(crate) async fn ensure_entry(
    handle: &mut dyn DirectoryHandle,
    et: &EntryType,
    name: &str,
    base: &str,
) -> DirectoryResult<Option<SearchEntry>> {
    let dn = et.dn(name, base);
    match find_one(handle, &dn, et.filter, et.attributes).await {
        Ok(entry) => Ok(Some(entry)),
        Err(e) if e.is_not_found() => {
            let mut ar = AddRequest::new(&dn);
            et.prepare_add(name, &mut ar);
            handle.add(&ar).await?;
            debug!(dn = %dn, "created missing entry");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Syntactic DN check: every comma-separated component must be an
/// `attr=value` pair with a non-empty attribute name.
fn validate_dn(dn: &str) -> DirectoryResult<()> {
    let well_formed = !dn.is_empty()
        && dn.split(',').all(|component| {
            let component = component.trim();
            match component.split_once('=') {
                Some((attr, _)) => !attr.is_empty(),
                None => false,
            }
        });
    if well_formed {
        Ok(())
    } else {
        Err(DirectoryError::InvalidDn { dn: dn.to_string() })
    }
}

/// Build the list filter for a query, in fixed precedence: uids, name,
/// email, mobile. Values are escaped so they cannot alter the filter.
fn spec_filter(et: &EntryType, spec: &Spec) -> String {
    if !spec.uids.is_empty() {
        let mut filter = String::from("(&");
        filter.push_str(et.filter);
        filter.push_str("(|");
        for uid in &spec.uids {
            filter.push_str(&format!("(uid={})", ldap_escape(uid)));
        }
        filter.push_str("))");
        return filter;
    }
    if !spec.name.is_empty() {
        return format!("(&{}(cn={}))", et.filter, ldap_escape(&spec.name));
    }
    if !spec.email.is_empty() {
        return format!("(&{}(mail={}))", et.filter, ldap_escape(&spec.email));
    }
    if !spec.mobile.is_empty() {
        return format!("(&{}(mobile={}))", et.filter, ldap_escape(&spec.mobile));
    }
    et.filter.to_string()
}

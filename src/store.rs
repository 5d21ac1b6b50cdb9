//! The multi-source person/group store.
//!
//! A [`Store`] holds an ordered, non-empty list of [`Source`]s that share
//! logically the same directory content (replicas, or a primary with
//! standbys). Reads fall back through the sources in order and take the
//! first success; writes apply to every source in order and stop at the
//! first error. Writes are not transactional: a failure partway through
//! leaves earlier sources already modified, and reconciliation is the
//! caller's concern.

use tracing::{debug, info, instrument, warn};

use crate::config::DirectoryConfig;
use crate::error::{DirectoryError, DirectoryResult};
use crate::model::{validate_uid, Group, Person, Spec};
use crate::source::Source;
use crate::transport::PoolStats;

/// Containers ensured by default on [`Store::ready`].
const DEFAULT_READY_NAMES: &[&str] = &["base", "people", "groups"];

/// Ordered collection of directory backends behind one operation surface.
pub struct Store {
    sources: Vec<Source>,
}

impl Store {
    /// Build a store from a config, one source per comma-separated
    /// address.
    pub fn new(config: &DirectoryConfig) -> DirectoryResult<Self> {
        if config.base.is_empty() {
            return Err(DirectoryError::EmptyBase);
        }
        let mut sources = Vec::new();
        for addr in config.addr.split(',') {
            let addr = addr.trim();
            if addr.is_empty() {
                continue;
            }
            let mut source_config = config.clone();
            source_config.addr = addr.to_string();
            sources.push(Source::new(&source_config)?);
        }
        Self::with_sources(sources)
    }

    /// Build a store over pre-constructed sources.
    pub fn with_sources(sources: Vec<Source>) -> DirectoryResult<Self> {
        if sources.is_empty() {
            return Err(DirectoryError::invalid_config("no directory sources"));
        }
        info!(sources = sources.len(), "directory store ready");
        Ok(Self { sources })
    }

    /// The configured sources, in fallback order.
    #[must_use]
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Ensure the base entry and containers exist on every source.
    /// Defaults to the base plus the people and groups containers.
    #[instrument(skip(self))]
    pub async fn ready(&self, names: &[&str]) -> DirectoryResult<()> {
        let names = if names.is_empty() {
            DEFAULT_READY_NAMES
        } else {
            names
        };
        for source in &self.sources {
            source.ready(names).await?;
        }
        Ok(())
    }

    /// Close every source's connection provider.
    pub async fn close(&self) {
        for source in &self.sources {
            source.close().await;
        }
    }

    /// Pool counters, one snapshot per source.
    #[must_use]
    pub fn pool_stats(&self) -> Vec<PoolStats> {
        self.sources.iter().map(Source::pool_stats).collect()
    }

    // ---- people ----

    /// Page through people matching `spec`. The first source returning a
    /// non-empty page wins.
    pub async fn all(&self, spec: &Spec) -> Vec<Person> {
        for source in &self.sources {
            let page = source.list(spec).await;
            if !page.is_empty() {
                return page;
            }
        }
        Vec::new()
    }

    /// Fetch a person by uid, falling back through the sources.
    pub async fn get(&self, uid: &str) -> DirectoryResult<Person> {
        let mut last_err = None;
        for source in &self.sources {
            match source.get_person(uid).await {
                Ok(person) => return Ok(person),
                Err(e) => {
                    debug!(addr = %source.addr(), uid = %uid, error = %e, "get person missed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(DirectoryError::NotFound))
    }

    /// Fetch a person by DN, falling back through the sources.
    pub async fn get_by_dn(&self, dn: &str) -> DirectoryResult<Person> {
        let mut last_err = None;
        for source in &self.sources {
            match source.get_by_dn(dn).await {
                Ok(person) => return Ok(person),
                Err(e) => {
                    debug!(addr = %source.addr(), dn = %dn, error = %e, "get by DN missed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(DirectoryError::NotFound))
    }

    /// Create or update a person on every source. Returns whether the
    /// record was newly created.
    ///
    /// The record is validated before any source is touched: the uid must
    /// match the identifier pattern and a usable common name must exist.
    pub async fn save(&self, person: &Person) -> DirectoryResult<bool> {
        validate_uid(&person.uid)?;
        if person.canonical_common_name().trim().is_empty() {
            return Err(DirectoryError::EmptyCn);
        }

        let mut is_new = false;
        for source in &self.sources {
            is_new = source.save_person(person).await.map_err(|e| {
                warn!(addr = %source.addr(), uid = %person.uid, error = %e, "save failed");
                e
            })?;
        }
        Ok(is_new)
    }

    /// Delete a person on every source.
    pub async fn delete(&self, uid: &str) -> DirectoryResult<()> {
        for source in &self.sources {
            source.delete_person(uid).await?;
        }
        Ok(())
    }

    /// Update a person's own record on every source, bound with their
    /// credentials.
    pub async fn modify_by_self(
        &self,
        uid: &str,
        password: &str,
        person: &Person,
    ) -> DirectoryResult<()> {
        for source in &self.sources {
            source.modify_by_self(uid, password, person).await?;
        }
        Ok(())
    }

    /// Rename a person on every source.
    pub async fn rename(&self, old_uid: &str, new_uid: &str) -> DirectoryResult<()> {
        for source in &self.sources {
            source.rename(old_uid, new_uid).await?;
        }
        Ok(())
    }

    // ---- passwords ----

    /// Self-service password change on every source.
    pub async fn password_change(
        &self,
        uid: &str,
        old_password: &str,
        new_password: &str,
    ) -> DirectoryResult<()> {
        for source in &self.sources {
            source
                .password_change(uid, old_password, new_password)
                .await?;
        }
        Ok(())
    }

    /// Administrative password reset on every source.
    pub async fn password_reset(&self, uid: &str, new_password: &str) -> DirectoryResult<()> {
        for source in &self.sources {
            source.password_reset(uid, new_password).await?;
        }
        Ok(())
    }

    /// Authenticate against the sources in order, returning the first
    /// success. Failures are uniformly reported as the login error by
    /// the sources themselves.
    pub async fn authenticate(&self, uid: &str, password: &str) -> DirectoryResult<Person> {
        let mut last_err = None;
        for source in &self.sources {
            match source.authenticate(uid, password).await {
                Ok(person) => return Ok(person),
                Err(e) => {
                    debug!(addr = %source.addr(), uid = %uid, error = %e, "authenticate missed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(DirectoryError::Login))
    }

    // ---- groups ----

    /// List every group, falling back through the sources.
    pub async fn all_group(&self) -> DirectoryResult<Vec<Group>> {
        let mut last_err = None;
        for source in &self.sources {
            match source.search_group("").await {
                Ok(groups) => return Ok(groups),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or(DirectoryError::NotFound))
    }

    /// Fetch a group by name, falling back through the sources.
    pub async fn get_group(&self, name: &str) -> DirectoryResult<Group> {
        let mut last_err = None;
        for source in &self.sources {
            match source.get_group(name).await {
                Ok(group) => return Ok(group),
                Err(e) => {
                    debug!(addr = %source.addr(), name = %name, error = %e, "get group missed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(DirectoryError::NotFound))
    }

    /// Create or update a group on every source.
    pub async fn save_group(&self, group: &Group) -> DirectoryResult<()> {
        for source in &self.sources {
            source.save_group(group).await?;
        }
        Ok(())
    }

    /// Delete a group on every source.
    pub async fn erase_group(&self, name: &str) -> DirectoryResult<()> {
        for source in &self.sources {
            source.erase_group(name).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("sources", &self.sources)
            .finish()
    }
}

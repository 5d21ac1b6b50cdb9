//! Production transport: `ldap3` connections managed by a deadpool pool.
//!
//! The manager dials per the configured address scheme (`ldap` plaintext,
//! `ldaps` TLS) and spawns the connection driver; handles come back to
//! the pool on release still carrying whatever bind state the caller
//! established, so every operation binds explicitly first.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool::managed::{Manager, Metrics, Object, Pool, RecycleResult};
use ldap3::exop::PasswordModify;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError, Mod, Scope, SearchEntry};
use tracing::{debug, warn};

use crate::config::{DirectoryConfig, ServerAddress, DEFAULT_POOL_SIZE};
use crate::error::{DirectoryError, DirectoryResult};
use crate::transport::{
    AddRequest, ConnectionProvider, DirectoryHandle, ModifyDnRequest, ModifyRequest,
    PasswordModifyRequest, PoolStats, SearchRequest,
};

/// Default timeout for establishing a connection.
const CONN_TIMEOUT: Duration = Duration::from_secs(10);

fn map_ldap_err(err: LdapError) -> DirectoryError {
    match err {
        LdapError::LdapResult { result } => DirectoryError::protocol(result.rc, result.text),
        other => DirectoryError::transport(other.to_string()),
    }
}

/// deadpool manager dialing fresh `ldap3` connections.
pub struct LdapConnectionManager {
    address: ServerAddress,
    no_tls_verify: bool,
    created: Arc<AtomicUsize>,
}

impl LdapConnectionManager {
    pub fn new(address: ServerAddress, no_tls_verify: bool) -> Self {
        Self {
            address,
            no_tls_verify,
            created: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Manager for LdapConnectionManager {
    type Type = Ldap;
    type Error = DirectoryError;

    async fn create(&self) -> Result<Ldap, DirectoryError> {
        let url = self.address.url();
        debug!(url = %url, "dialing directory server");

        let settings = LdapConnSettings::new()
            .set_conn_timeout(CONN_TIMEOUT)
            .set_no_tls_verify(self.no_tls_verify);

        let (conn, ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(map_ldap_err)?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "directory connection driver error");
            }
        });

        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(ldap)
    }

    async fn recycle(&self, _conn: &mut Ldap, _metrics: &Metrics) -> RecycleResult<DirectoryError> {
        Ok(())
    }
}

/// One pooled `ldap3` connection.
pub struct LdapHandle {
    conn: Object<LdapConnectionManager>,
}

#[async_trait]
impl DirectoryHandle for LdapHandle {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> DirectoryResult<()> {
        self.conn
            .simple_bind(dn, password)
            .await
            .map_err(map_ldap_err)?
            .success()
            .map_err(map_ldap_err)?;
        Ok(())
    }

    async fn search(&mut self, req: &SearchRequest) -> DirectoryResult<Vec<SearchEntry>> {
        let attrs: Vec<&str> = req.attrs.iter().map(String::as_str).collect();

        let (results, _res) = self
            .conn
            .search(&req.base, Scope::Subtree, &req.filter, attrs)
            .await
            .map_err(map_ldap_err)?
            .success()
            .map_err(map_ldap_err)?;

        let mut entries: Vec<SearchEntry> =
            results.into_iter().map(SearchEntry::construct).collect();
        if let Some(page_size) = req.page_size {
            entries.truncate(page_size as usize);
        }
        Ok(entries)
    }

    async fn add(&mut self, req: &AddRequest) -> DirectoryResult<()> {
        let attrs: Vec<(String, HashSet<String>)> = req
            .attrs
            .iter()
            .map(|(name, values)| (name.clone(), values.iter().cloned().collect()))
            .collect();

        self.conn
            .add(&req.dn, attrs)
            .await
            .map_err(map_ldap_err)?
            .success()
            .map_err(map_ldap_err)?;
        Ok(())
    }

    async fn modify(&mut self, req: &ModifyRequest) -> DirectoryResult<()> {
        let mods: Vec<Mod<String>> = req
            .replaces
            .iter()
            .map(|(name, values)| Mod::Replace(name.clone(), values.iter().cloned().collect()))
            .collect();

        self.conn
            .modify(&req.dn, mods)
            .await
            .map_err(map_ldap_err)?
            .success()
            .map_err(map_ldap_err)?;
        Ok(())
    }

    async fn modify_dn(&mut self, req: &ModifyDnRequest) -> DirectoryResult<()> {
        self.conn
            .modifydn(&req.dn, &req.new_rdn, req.delete_old_rdn, None)
            .await
            .map_err(map_ldap_err)?
            .success()
            .map_err(map_ldap_err)?;
        Ok(())
    }

    async fn delete(&mut self, dn: &str) -> DirectoryResult<()> {
        self.conn
            .delete(dn)
            .await
            .map_err(map_ldap_err)?
            .success()
            .map_err(map_ldap_err)?;
        Ok(())
    }

    async fn password_modify(&mut self, req: &PasswordModifyRequest) -> DirectoryResult<()> {
        let exop = PasswordModify {
            user_id: Some(&req.user_dn),
            old_pass: if req.old_password.is_empty() {
                None
            } else {
                Some(&req.old_password)
            },
            new_pass: Some(&req.new_password),
        };

        self.conn
            .extended(exop)
            .await
            .map_err(map_ldap_err)?
            .success()
            .map_err(map_ldap_err)?;
        Ok(())
    }
}

/// Pooled connection provider backed by deadpool.
pub struct LdapPool {
    pool: Pool<LdapConnectionManager>,
    acquired: AtomicUsize,
    created: Arc<AtomicUsize>,
}

impl LdapPool {
    /// Build a provider for the configured backend with the default pool
    /// size.
    pub fn new(config: &DirectoryConfig) -> DirectoryResult<Self> {
        Self::with_size(config, DEFAULT_POOL_SIZE)
    }

    /// Build a provider with an explicit pool size.
    pub fn with_size(config: &DirectoryConfig, pool_size: usize) -> DirectoryResult<Self> {
        let address = ServerAddress::parse(&config.addr)?;
        let manager = LdapConnectionManager::new(address, config.no_tls_verify);
        let created = Arc::clone(&manager.created);

        let pool = Pool::builder(manager)
            .max_size(pool_size)
            .build()
            .map_err(|e| DirectoryError::pool(e.to_string()))?;

        Ok(Self {
            pool,
            acquired: AtomicUsize::new(0),
            created,
        })
    }
}

#[async_trait]
impl ConnectionProvider for LdapPool {
    async fn acquire(&self) -> DirectoryResult<Box<dyn DirectoryHandle>> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| DirectoryError::pool(e.to_string()))?;
        self.acquired.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(LdapHandle { conn }))
    }

    async fn release(&self, handle: Box<dyn DirectoryHandle>) {
        // Dropping the deadpool object puts the connection back.
        drop(handle);
    }

    async fn close(&self) {
        self.pool.close();
    }

    fn len(&self) -> usize {
        self.pool.status().size
    }

    fn idle_len(&self) -> usize {
        self.pool.status().available
    }

    fn stats(&self) -> PoolStats {
        let status = self.pool.status();
        PoolStats {
            total: status.size,
            idle: status.available,
            hits: self.acquired.load(Ordering::Relaxed),
            misses: self.created.load(Ordering::Relaxed),
        }
    }
}

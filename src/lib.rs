//! # staffdir
//!
//! A person/group store over one or more LDAP-style directory backends.
//!
//! The crate presents a uniform operation surface (authenticate, person
//! and group CRUD, paged search, password management) while hiding which
//! schema dialect the backend speaks: a standards-compliant directory
//! keeps people and groups as `inetOrgPerson`/`groupOfNames` under
//! `ou=people`/`ou=groups`, while an Active Directory backend uses
//! `CN=Users`/`CN=Builtin` containers with its own attribute names. The
//! dialect is detected once per backend on the first readiness probe.
//!
//! A [`Store`] fans operations out over its ordered [`Source`]s: reads
//! fall back to the next source on failure, writes replicate in order
//! and stop at the first error.
//!
//! ## Example
//!
//! ```ignore
//! use staffdir::{DirectoryConfig, Store};
//!
//! let config = DirectoryConfig::new("ldaps://ldap.example.org", "dc=example,dc=org")
//!     .with_bind("cn=admin,dc=example,dc=org", "secret");
//!
//! let store = Store::new(&config)?;
//! store.ready(&[]).await?;
//!
//! let person = store.authenticate("doe", "secret").await?;
//! println!("hello {}", person.name());
//! ```

pub mod config;
pub mod entry;
pub mod error;
pub mod mapper;
pub mod model;
pub mod pool;
pub mod source;
pub mod store;
pub mod transport;

pub use config::{DirectoryConfig, ServerAddress};
pub use error::{DirectoryError, DirectoryResult};
pub use model::{validate_uid, Group, Person, Spec};
pub use pool::LdapPool;
pub use source::Source;
pub use store::Store;
pub use transport::{ConnectionProvider, DirectoryHandle, PoolStats};

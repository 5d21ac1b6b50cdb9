//! In-memory directory fake for integration tests.
//!
//! Implements just enough of the protocol surface the crate drives: bind
//! against an admin identity, entry DNs or userPrincipalName values;
//! subtree search with a small RFC 4515 filter evaluator; add, modify
//! (replace only), modify-DN, delete and the password-modify operation.
//! Result codes mirror a real server where the crate branches on them
//! (32 noSuchObject, 49 invalidCredentials, 68 entryAlreadyExists).

// Each test binary exercises a different subset of this module.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ldap3::SearchEntry;

use staffdir::error::{DirectoryError, DirectoryResult};
use staffdir::transport::{
    AddRequest, ConnectionProvider, DirectoryHandle, ModifyDnRequest, ModifyRequest,
    PasswordModifyRequest, PoolStats, SearchRequest,
};

#[derive(Debug, Clone)]
struct MemEntry {
    dn: String,
    attrs: BTreeMap<String, Vec<String>>,
}

impl MemEntry {
    fn values(&self, name: &str) -> &[String] {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map_or(&[], |(_, v)| v.as_slice())
    }

    fn first(&self, name: &str) -> &str {
        self.values(name).first().map_or("", String::as_str)
    }

    fn set(&mut self, name: &str, values: Vec<String>) {
        let key = self
            .attrs
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned()
            .unwrap_or_else(|| name.to_string());
        if values.is_empty() {
            self.attrs.remove(&key);
        } else {
            self.attrs.insert(key, values);
        }
    }
}

struct State {
    entries: Vec<MemEntry>,
    admin_dn: String,
    admin_password: String,
}

impl State {
    fn find(&self, dn: &str) -> Option<&MemEntry> {
        self.entries.iter().find(|e| e.dn.eq_ignore_ascii_case(dn))
    }

    fn find_mut(&mut self, dn: &str) -> Option<&mut MemEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.dn.eq_ignore_ascii_case(dn))
    }
}

/// Shared in-memory directory; clone to hand the same content to several
/// providers.
#[derive(Clone)]
pub struct MemoryDirectory {
    state: Arc<Mutex<State>>,
    acquired: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl MemoryDirectory {
    pub fn new(admin_dn: &str, admin_password: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                entries: Vec::new(),
                admin_dn: admin_dn.to_string(),
                admin_password: admin_password.to_string(),
            })),
            acquired: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A connection provider over this directory.
    pub fn provider(&self) -> Box<dyn ConnectionProvider> {
        Box::new(MemoryProvider(self.clone()))
    }

    /// Insert an entry directly, bypassing the protocol surface.
    pub fn seed(&self, dn: &str, attrs: &[(&str, &[&str])]) {
        let mut state = self.state.lock().unwrap();
        state.entries.push(MemEntry {
            dn: dn.to_string(),
            attrs: attrs
                .iter()
                .map(|(k, vals)| {
                    (
                        (*k).to_string(),
                        vals.iter().map(|v| (*v).to_string()).collect(),
                    )
                })
                .collect(),
        });
    }

    pub fn has_entry(&self, dn: &str) -> bool {
        self.state.lock().unwrap().find(dn).is_some()
    }

    /// Handles acquired but not yet released.
    pub fn outstanding(&self) -> usize {
        self.acquired.load(Ordering::SeqCst) - self.released.load(Ordering::SeqCst)
    }
}

struct MemoryProvider(MemoryDirectory);

#[async_trait]
impl ConnectionProvider for MemoryProvider {
    async fn acquire(&self) -> DirectoryResult<Box<dyn DirectoryHandle>> {
        self.0.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryHandle {
            dir: self.0.clone(),
            bound: None,
        }))
    }

    async fn release(&self, handle: Box<dyn DirectoryHandle>) {
        self.0.released.fetch_add(1, Ordering::SeqCst);
        drop(handle);
    }

    async fn close(&self) {}

    fn len(&self) -> usize {
        self.0.outstanding()
    }

    fn idle_len(&self) -> usize {
        0
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            total: self.0.outstanding(),
            idle: 0,
            hits: self.0.acquired.load(Ordering::SeqCst),
            misses: 0,
        }
    }
}

struct MemoryHandle {
    dir: MemoryDirectory,
    /// DN this handle is bound as; the admin DN marks the admin context.
    bound: Option<String>,
}

impl MemoryHandle {
    fn require_bound(&self) -> DirectoryResult<()> {
        if self.bound.is_none() {
            return Err(DirectoryError::protocol(50, "not bound"));
        }
        Ok(())
    }

    fn is_admin(&self) -> bool {
        let state = self.dir.state.lock().unwrap();
        self.bound
            .as_deref()
            .is_some_and(|dn| dn.eq_ignore_ascii_case(&state.admin_dn))
    }
}

fn dn_under(entry_dn: &str, base: &str) -> bool {
    let entry_dn = entry_dn.to_ascii_lowercase();
    let base = base.to_ascii_lowercase();
    entry_dn == base || entry_dn.ends_with(&format!(",{base}"))
}

#[async_trait]
impl DirectoryHandle for MemoryHandle {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> DirectoryResult<()> {
        let state = self.dir.state.lock().unwrap();
        if dn.eq_ignore_ascii_case(&state.admin_dn) && password == state.admin_password {
            self.bound = Some(state.admin_dn.clone());
            return Ok(());
        }
        if let Some(entry) = state.find(dn) {
            if entry.values("userPassword").iter().any(|p| p == password) {
                let bound = entry.dn.clone();
                drop(state);
                self.bound = Some(bound);
                return Ok(());
            }
            return Err(DirectoryError::protocol(49, "invalid credentials"));
        }
        // userPrincipalName binds, as Active Directory accepts.
        if let Some(entry) = state.entries.iter().find(|e| {
            e.values("userPrincipalName")
                .iter()
                .any(|v| v.eq_ignore_ascii_case(dn))
        }) {
            if entry.values("userPassword").iter().any(|p| p == password) {
                let bound = entry.dn.clone();
                drop(state);
                self.bound = Some(bound);
                return Ok(());
            }
        }
        Err(DirectoryError::protocol(49, "invalid credentials"))
    }

    async fn search(&mut self, req: &SearchRequest) -> DirectoryResult<Vec<SearchEntry>> {
        self.require_bound()?;
        let filter = parse_filter(&req.filter)
            .ok_or_else(|| DirectoryError::protocol(87, format!("bad filter {:?}", req.filter)))?;

        let state = self.dir.state.lock().unwrap();
        let mut matches: Vec<&MemEntry> = state
            .entries
            .iter()
            .filter(|e| dn_under(&e.dn, &req.base) && filter.matches(e))
            .collect();
        // The base entry itself sorts first, as servers return it before
        // its subtree.
        matches.sort_by_key(|e| usize::from(!e.dn.eq_ignore_ascii_case(&req.base)));

        if let Some(page) = req.page_size {
            matches.truncate(page as usize);
        }

        Ok(matches
            .into_iter()
            .map(|e| SearchEntry {
                dn: e.dn.clone(),
                attrs: e
                    .attrs
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<HashMap<_, _>>(),
                bin_attrs: HashMap::new(),
            })
            .collect())
    }

    async fn add(&mut self, req: &AddRequest) -> DirectoryResult<()> {
        self.require_bound()?;
        let mut state = self.dir.state.lock().unwrap();
        if state.find(&req.dn).is_some() {
            return Err(DirectoryError::protocol(68, "entry already exists"));
        }
        let mut entry = MemEntry {
            dn: req.dn.clone(),
            attrs: BTreeMap::new(),
        };
        for (name, values) in &req.attrs {
            entry.set(name, values.clone());
        }
        state.entries.push(entry);
        Ok(())
    }

    async fn modify(&mut self, req: &ModifyRequest) -> DirectoryResult<()> {
        self.require_bound()?;
        let mut state = self.dir.state.lock().unwrap();
        let entry = state
            .find_mut(&req.dn)
            .ok_or_else(|| DirectoryError::protocol(32, "no such object"))?;
        for (name, values) in &req.replaces {
            entry.set(name, values.clone());
        }
        Ok(())
    }

    async fn modify_dn(&mut self, req: &ModifyDnRequest) -> DirectoryResult<()> {
        self.require_bound()?;
        let (rdn_attr, rdn_value) = req
            .new_rdn
            .split_once('=')
            .ok_or_else(|| DirectoryError::protocol(34, "invalid DN syntax"))?;

        let mut state = self.dir.state.lock().unwrap();
        let parent = match req.dn.split_once(',') {
            Some((_, parent)) => parent.to_string(),
            None => return Err(DirectoryError::protocol(34, "invalid DN syntax")),
        };
        let new_dn = format!("{},{}", req.new_rdn, parent);
        if state.find(&new_dn).is_some() {
            return Err(DirectoryError::protocol(68, "entry already exists"));
        }
        let entry = state
            .find_mut(&req.dn)
            .ok_or_else(|| DirectoryError::protocol(32, "no such object"))?;

        entry.dn = new_dn;
        if req.delete_old_rdn {
            entry.set(rdn_attr, vec![rdn_value.to_string()]);
        } else {
            let mut values = entry.values(rdn_attr).to_vec();
            values.push(rdn_value.to_string());
            entry.set(rdn_attr, values);
        }
        Ok(())
    }

    async fn delete(&mut self, dn: &str) -> DirectoryResult<()> {
        self.require_bound()?;
        let mut state = self.dir.state.lock().unwrap();
        let before = state.entries.len();
        state.entries.retain(|e| !e.dn.eq_ignore_ascii_case(dn));
        if state.entries.len() == before {
            return Err(DirectoryError::protocol(32, "no such object"));
        }
        Ok(())
    }

    async fn password_modify(&mut self, req: &PasswordModifyRequest) -> DirectoryResult<()> {
        if req.old_password.is_empty() && !self.is_admin() {
            return Err(DirectoryError::protocol(50, "insufficient access"));
        }
        let mut state = self.dir.state.lock().unwrap();
        let entry = state
            .find_mut(&req.user_dn)
            .ok_or_else(|| DirectoryError::protocol(32, "no such object"))?;
        if !req.old_password.is_empty() && entry.first("userPassword") != req.old_password {
            return Err(DirectoryError::protocol(49, "invalid credentials"));
        }
        entry.set("userPassword", vec![req.new_password.clone()]);
        Ok(())
    }
}

// ---- filter evaluation ----

enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Present(String),
    Eq(String, String),
}

impl Filter {
    fn matches(&self, entry: &MemEntry) -> bool {
        match self {
            Filter::And(items) => items.iter().all(|f| f.matches(entry)),
            Filter::Or(items) => items.iter().any(|f| f.matches(entry)),
            Filter::Not(inner) => !inner.matches(entry),
            Filter::Present(attr) => !entry.values(attr).is_empty(),
            Filter::Eq(attr, value) => entry
                .values(attr)
                .iter()
                .any(|v| v.eq_ignore_ascii_case(value)),
        }
    }
}

fn parse_filter(s: &str) -> Option<Filter> {
    let (filter, rest) = parse_one(s)?;
    rest.is_empty().then_some(filter)
}

fn parse_one(s: &str) -> Option<(Filter, &str)> {
    let s = s.strip_prefix('(')?;
    match s.chars().next()? {
        '&' => {
            let (items, rest) = parse_list(&s[1..])?;
            Some((Filter::And(items), rest.strip_prefix(')')?))
        }
        '|' => {
            let (items, rest) = parse_list(&s[1..])?;
            Some((Filter::Or(items), rest.strip_prefix(')')?))
        }
        '!' => {
            let (inner, rest) = parse_one(&s[1..])?;
            Some((Filter::Not(Box::new(inner)), rest.strip_prefix(')')?))
        }
        _ => {
            let end = s.find(')')?;
            let (attr, value) = s[..end].split_once('=')?;
            let filter = if value == "*" {
                Filter::Present(attr.to_string())
            } else {
                Filter::Eq(attr.to_string(), unescape(value))
            };
            Some((filter, &s[end + 1..]))
        }
    }
}

fn parse_list(mut s: &str) -> Option<(Vec<Filter>, &str)> {
    let mut items = Vec::new();
    while s.starts_with('(') {
        let (filter, rest) = parse_one(s)?;
        items.push(filter);
        s = rest;
    }
    (!items.is_empty()).then_some((items, s))
}

/// Decode RFC 4515 hex escapes, e.g. `\2a` back to `*`.
fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            if let Some(hex) = value.get(i + 1..i + 3) {
                if let Ok(code) = u8::from_str_radix(hex, 16) {
                    out.push(code as char);
                    i += 3;
                    continue;
                }
            }
            out.push('\\');
            i += 1;
        } else {
            out.push(bytes[i] as char);
            i += 1;
        }
    }
    out
}

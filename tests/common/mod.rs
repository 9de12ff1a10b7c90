//! Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use identity_cache_req::{
    backend::{BackendClient, BackendError, BackendReply, BackendResult},
    cache_req::{data::canonical_certificate, DomainKey, EntityFamily, OptLevel},
    config::{
        DomainConfig, LoggingConfig, ResponderConfig, ServerConfig, ServiceConfig, StorageConfig,
    },
    context::AppContext,
    domain::DomainInfo,
    error::{LookupError, LookupResult},
    ncache::MemoryNegativeCache,
    store::{IdentityRecord, LocalStore, PersistRecord, SqliteStore, StoreHit, StoredRecord},
};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted in-process backend
///
/// Holds a directory of records per domain and answers every key shape
/// from it the way a real data provider would.
#[derive(Default)]
pub struct FakeBackend {
    directory: Mutex<HashMap<String, Vec<IdentityRecord>>>,
    calls: Mutex<HashMap<String, usize>>,
    failing: Mutex<HashSet<String>>,
    delay_ms: AtomicUsize,
    no_modstamp: AtomicBool,
    pings: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add or replace a record (matched by family and name)
    pub fn put(&self, domain: &str, record: IdentityRecord) {
        let mut directory = self.directory.lock().unwrap();
        let records = directory.entry(domain.to_string()).or_default();
        records.retain(|r| !(r.family == record.family && r.name == record.name));
        records.push(record);
    }

    pub fn remove(&self, domain: &str, family: EntityFamily, name: &str) {
        if let Some(records) = self.directory.lock().unwrap().get_mut(domain) {
            records.retain(|r| !(r.family == family && r.name == name));
        }
    }

    pub fn fail_domain(&self, domain: &str, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert(domain.to_string());
        } else {
            set.remove(domain);
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn set_supports_modstamp(&self, supported: bool) {
        self.no_modstamp.store(!supported, Ordering::SeqCst);
    }

    /// Refresh and enumeration calls made against a domain
    pub fn calls(&self, domain: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(domain)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    async fn begin(&self, domain: &DomainInfo) -> BackendResult<Vec<IdentityRecord>> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(domain.name.clone())
            .or_default() += 1;

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }

        if self.failing.lock().unwrap().contains(&domain.name) {
            return Err(BackendError::Unavailable(format!(
                "{} is unreachable",
                domain.name
            )));
        }

        Ok(self
            .directory
            .lock()
            .unwrap()
            .get(&domain.name)
            .cloned()
            .unwrap_or_default())
    }

    fn reply(&self, records: Vec<IdentityRecord>) -> BackendReply {
        BackendReply::found(records, !self.no_modstamp.load(Ordering::SeqCst))
    }
}

fn glob(pattern: &str, name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => pattern == name,
    }
}

#[async_trait]
impl BackendClient for FakeBackend {
    async fn refresh(&self, domain: &DomainInfo, key: &DomainKey) -> BackendResult<BackendReply> {
        let directory = self.begin(domain).await?;
        let name_is = |r: &IdentityRecord, name: &str| domain.normalize(&r.name) == name;
        let upn_is = |r: &IdentityRecord, upn: &str| {
            r.upn.as_deref().map(str::to_lowercase).as_deref() == Some(upn)
        };

        let matches: Vec<IdentityRecord> = match key {
            DomainKey::Name { family, name } => directory
                .into_iter()
                .filter(|r| r.family == *family && name_is(r, name))
                .collect(),
            DomainKey::Upn { upn } => directory
                .into_iter()
                .filter(|r| r.family == EntityFamily::User && upn_is(r, upn))
                .collect(),
            DomainKey::Id { family, id } => directory
                .into_iter()
                .filter(|r| r.family == *family && r.id == Some(*id))
                .collect(),
            DomainKey::Cert { cert } => directory
                .into_iter()
                .filter(|r| {
                    r.certificate
                        .as_deref()
                        .and_then(|c| canonical_certificate(c).ok())
                        .as_deref()
                        == Some(cert.as_str())
                })
                .collect(),
            DomainKey::Sid { sid } => directory
                .into_iter()
                .filter(|r| r.sid.as_deref() == Some(sid.as_str()))
                .collect(),
            DomainKey::Filter { family, pattern } => directory
                .into_iter()
                .filter(|r| r.family == *family && glob(pattern, &domain.normalize(&r.name)))
                .collect(),
            DomainKey::Initgroups { .. } | DomainKey::InitgroupsByUpn { .. } => {
                let user = directory.iter().find(|r| {
                    r.family == EntityFamily::User
                        && match key {
                            DomainKey::Initgroups { name } => name_is(r, name),
                            DomainKey::InitgroupsByUpn { upn } => upn_is(r, upn),
                            _ => false,
                        }
                });
                match user {
                    None => Vec::new(),
                    Some(user) => {
                        let mut out = vec![user.clone()];
                        out.extend(directory.iter().filter(|g| {
                            g.family == EntityFamily::Group
                                && user.member_of.iter().any(|m| m == &g.name)
                        }).cloned());
                        out
                    }
                }
            }
            DomainKey::Enumerate { family } => directory
                .into_iter()
                .filter(|r| r.family == *family)
                .collect(),
        };

        Ok(self.reply(matches))
    }

    async fn enumerate(
        &self,
        domain: &DomainInfo,
        family: EntityFamily,
    ) -> BackendResult<BackendReply> {
        let directory = self.begin(domain).await?;
        let records = directory.into_iter().filter(|r| r.family == family).collect();
        Ok(BackendReply {
            found: true,
            ..self.reply(records)
        })
    }

    async fn ping(&self, domain: &DomainInfo) -> BackendResult<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(&domain.name) {
            return Err(BackendError::Unavailable("down".to_string()));
        }
        Ok(())
    }
}

/// Real SQLite store with call counters and lookup fault injection
pub struct CountingStore {
    pub inner: SqliteStore,
    lookups: AtomicUsize,
    writes: AtomicUsize,
    fail_lookups: AtomicUsize,
}

impl CountingStore {
    pub async fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteStore::connect_in_memory().await.unwrap(),
            lookups: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            fail_lookups: AtomicUsize::new(0),
        })
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make the next `n` lookups fail
    pub fn fail_next_lookups(&self, n: usize) {
        self.fail_lookups.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl LocalStore for CountingStore {
    async fn lookup(&self, domain: &DomainInfo, key: &DomainKey) -> LookupResult<Option<StoreHit>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_lookups
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(LookupError::Store("injected fault".to_string()));
        }
        self.inner.lookup(domain, key).await
    }

    async fn fetch(
        &self,
        domain: &DomainInfo,
        family: EntityFamily,
        name: &str,
    ) -> LookupResult<Option<StoredRecord>> {
        self.inner.fetch(domain, family, name).await
    }

    async fn write_through(
        &self,
        domain: &DomainInfo,
        key: &DomainKey,
        records: &[PersistRecord],
    ) -> LookupResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write_through(domain, key, records).await
    }

    async fn invalidate(&self, domain: &DomainInfo, key: &DomainKey) -> LookupResult<u64> {
        self.inner.invalidate(domain, key).await
    }

    async fn cleanup_expired(&self, cutoff: DateTime<Utc>) -> LookupResult<u64> {
        self.inner.cleanup_expired(cutoff).await
    }

    async fn ping(&self) -> LookupResult<()> {
        self.inner.ping().await
    }
}

/// Domain with test-friendly defaults
pub fn domain(name: &str) -> DomainConfig {
    DomainConfig::new(name, &format!("http://backend.test/{}", name))
}

pub fn responder() -> ResponderConfig {
    ResponderConfig {
        cache_refresh_percent: 0,
        negative_ttl: 30,
        optimization_level: OptLevel::CompareModifyStamp,
        backend_timeout: 5,
        enumerate: true,
    }
}

pub fn server_config(domains: Vec<DomainConfig>, responder: ResponderConfig) -> ServerConfig {
    ServerConfig {
        service: ServiceConfig {
            hostname: "127.0.0.1".to_string(),
            port: 8086,
            version: "test".to_string(),
        },
        storage: StorageConfig {
            cache_db: PathBuf::from(":memory:"),
        },
        responder,
        domains,
        logging: LoggingConfig {
            level: "debug".to_string(),
        },
    }
}

/// Everything a test needs, wired through the real application context
pub struct Harness {
    pub ctx: AppContext,
    pub backend: Arc<FakeBackend>,
    pub store: Arc<CountingStore>,
    pub ncache: Arc<MemoryNegativeCache>,
}

impl Harness {
    pub async fn new(domains: Vec<DomainConfig>) -> Self {
        Self::with_responder(domains, responder()).await
    }

    pub async fn with_responder(domains: Vec<DomainConfig>, responder: ResponderConfig) -> Self {
        let backend = FakeBackend::new();
        let store = CountingStore::new().await;
        let ncache = Arc::new(MemoryNegativeCache::new());

        let ctx = AppContext::from_parts(
            server_config(domains, responder),
            store.clone(),
            ncache.clone(),
            backend.clone(),
        );

        Self {
            ctx,
            backend,
            store,
            ncache,
        }
    }

    pub fn domain(&self, name: &str) -> Arc<DomainInfo> {
        self.ctx.registry.get(name).unwrap()
    }
}

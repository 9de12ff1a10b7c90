/// Cache request state machine
///
/// One request walks its candidate domains. Per domain it consults the
/// negative cache, then the local store, and refreshes from the backend
/// when the cached data is missing or expired. Records are always read
/// back from the store after a refresh so callers see store-normalised data.
use super::inflight::{InflightRefreshes, PendingRefresh, RefreshOutcome};
use super::policy::{self, Freshness, RefreshPolicy};
use super::{CacheReqData, CacheRequestResult, DomainKey, LookupKey, OptLevel};
use crate::backend::BackendClient;
use crate::domain::{DomainInfo, DomainRegistry, DomainSelector};
use crate::error::{LookupError, LookupResult};
use crate::metrics;
use crate::ncache::NegativeCache;
use crate::store::{IdentityRecord, LocalStore, PersistRecord};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

/// Per-request options supplied by the caller
#[derive(Debug, Clone, Default)]
pub struct ReqOptions {
    /// Restrict the request to one configured domain
    pub domain: Option<String>,
    /// Percentage of a record's lifetime after which it is refreshed in
    /// the background; domains may override it
    pub cache_refresh_percent: u8,
    /// Keep visiting domains after the first match
    pub all_domains: bool,
}

impl ReqOptions {
    pub fn with_domain(mut self, domain: Option<&str>) -> Self {
        self.domain = domain.map(str::to_string);
        self
    }

    pub fn with_all_domains(mut self, all_domains: bool) -> Self {
        self.all_domains = all_domains;
        self
    }
}

/// How one domain ended
#[derive(Debug)]
enum Failure {
    /// Backend unreachable; other domains are still visited
    Soft(String),
    /// Local store fault after a refresh
    Hard(LookupError),
}

#[derive(Debug)]
struct DomainVisit {
    result: CacheRequestResult,
    failure: Option<Failure>,
}

impl DomainVisit {
    fn records(domain: &DomainInfo, records: Vec<IdentityRecord>, lookup_name: Option<String>) -> Self {
        Self {
            result: CacheRequestResult::new(&domain.name, records, lookup_name),
            failure: None,
        }
    }

    fn empty(domain: &DomainInfo, lookup_name: Option<String>) -> Self {
        Self::records(domain, Vec::new(), lookup_name)
    }

    fn failed(domain: &DomainInfo, lookup_name: Option<String>, failure: Failure) -> Self {
        Self {
            failure: Some(failure),
            ..Self::empty(domain, lookup_name)
        }
    }
}

/// Walk state of one request
struct RequestState {
    data: CacheReqData,
    opts: ReqOptions,
    results: Vec<CacheRequestResult>,
    visited: usize,
    soft_failures: Vec<String>,
    hard_failure: Option<LookupError>,
}

impl RequestState {
    fn new(data: CacheReqData, opts: ReqOptions) -> Self {
        Self {
            data,
            opts,
            results: Vec::new(),
            visited: 0,
            soft_failures: Vec::new(),
            hard_failure: None,
        }
    }

    /// Whether every domain's result is kept, not just the first match
    fn is_multi(&self) -> bool {
        self.opts.all_domains || self.data.req_type().is_multi_domain()
    }

    /// Fold one domain's visit in; returns true when the walk can stop
    fn absorb(&mut self, visit: DomainVisit) -> bool {
        self.visited += 1;
        match visit.failure {
            Some(Failure::Soft(reason)) => {
                self.soft_failures.push(format!("{}: {}", visit.result.domain, reason))
            }
            Some(Failure::Hard(e)) => {
                if self.hard_failure.is_none() {
                    self.hard_failure = Some(e);
                }
            }
            None => {}
        }

        let found = !visit.result.is_empty();
        if self.is_multi() {
            self.results.push(visit.result);
            false
        } else {
            if found {
                self.results.push(visit.result);
            }
            found
        }
    }

    fn finish(self) -> LookupResult<Vec<CacheRequestResult>> {
        if self.results.iter().any(|r| !r.is_empty()) {
            return Ok(self.results);
        }

        if let Some(e) = self.hard_failure {
            return Err(e);
        }

        if self.visited > 0 && self.soft_failures.len() == self.visited {
            return Err(LookupError::BackendUnavailable(self.soft_failures.join("; ")));
        }

        if self.data.req_type().is_enumeration() {
            return Ok(self.results);
        }

        Err(LookupError::NotFound(describe(&self.data)))
    }
}

/// Backend refresh of one (domain, key), run on its own task
struct RefreshTask {
    domain: Arc<DomainInfo>,
    key: DomainKey,
    opt_level: OptLevel,
    mark_negative: bool,
    negative_ttl: u64,
    store: Arc<dyn LocalStore>,
    ncache: Arc<dyn NegativeCache>,
    backend: Arc<dyn BackendClient>,
    policy: Arc<RefreshPolicy>,
}

impl RefreshTask {
    fn kind(&self) -> &'static str {
        if self.key.is_enumeration() {
            "enumerate"
        } else {
            "refresh"
        }
    }

    async fn run(self) -> RefreshOutcome {
        let domain = &self.domain;
        let reply = match &self.key {
            DomainKey::Enumerate { family } => self.backend.enumerate(domain, *family).await,
            key => self.backend.refresh(domain, key).await,
        };

        let reply = match reply {
            Ok(reply) => {
                domain.set_online(true);
                reply
            }
            Err(e) => {
                if e.is_offline() {
                    domain.set_online(false);
                }
                warn!(domain = %domain.name, key = %self.key, error = %e, "Backend refresh failed");
                metrics::record_backend_refresh(self.kind(), "unavailable");
                return RefreshOutcome::Unavailable(e.to_string());
            }
        };

        if !reply.found || (reply.records.is_empty() && !self.key.is_enumeration()) {
            debug!(domain = %domain.name, key = %self.key, "Backend reports not found");
            metrics::record_backend_refresh(self.kind(), "not_found");
            self.forget().await;
            return RefreshOutcome::NotFound;
        }

        if self.policy.observe_backend(&domain.name, reply.supports_modstamp) {
            metrics::record_opt_downgrade();
        }
        let level = self.policy.effective_level(&domain.name, self.opt_level);

        let mut persist = Vec::with_capacity(reply.records.len());
        for record in reply.records {
            let stored = match self.store.fetch(domain, record.family, &record.name).await {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(domain = %domain.name, error = %e, "Cannot read stored record, rewriting");
                    None
                }
            };
            let plan = policy::persist_plan(level, &record, stored.as_ref());
            persist.push(PersistRecord { record, plan });
        }

        let count = persist.len();
        match self.store.write_through(domain, &self.key, &persist).await {
            Ok(()) => {
                debug!(domain = %domain.name, key = %self.key, count, level = ?level, "Backend results written through");
                metrics::record_backend_refresh(self.kind(), "found");
                RefreshOutcome::Found(count)
            }
            Err(e) => {
                warn!(domain = %domain.name, key = %self.key, error = %e, "Write-through failed");
                metrics::record_backend_refresh(self.kind(), "store_error");
                RefreshOutcome::StoreFault(e.to_string())
            }
        }
    }

    /// Remember the key as absent and drop what the store still holds for it
    async fn forget(&self) {
        let ttl = self.domain.negative_ttl(self.negative_ttl);
        if self.mark_negative && ttl > 0 {
            let key = self.key.to_string();
            if let Err(e) = self.ncache.mark(&self.domain.name, &key, Duration::from_secs(ttl)) {
                warn!(domain = %self.domain.name, key = %key, error = %e, "Cannot mark negative cache");
            }
        }

        match self.store.invalidate(&self.domain, &self.key).await {
            Ok(0) => {}
            Ok(n) => debug!(domain = %self.domain.name, key = %self.key, removed = n, "Invalidated cached records"),
            Err(e) => warn!(domain = %self.domain.name, key = %self.key, error = %e, "Cannot invalidate cached records"),
        }
    }
}

/// Cache request engine shared by every lookup
pub struct CacheReq {
    registry: Arc<DomainRegistry>,
    store: Arc<dyn LocalStore>,
    ncache: Arc<dyn NegativeCache>,
    backend: Arc<dyn BackendClient>,
    policy: Arc<RefreshPolicy>,
    inflight: Arc<InflightRefreshes>,
    /// Responder-wide negative cache TTL in seconds
    negative_ttl: u64,
}

impl CacheReq {
    pub fn new(
        registry: Arc<DomainRegistry>,
        store: Arc<dyn LocalStore>,
        ncache: Arc<dyn NegativeCache>,
        backend: Arc<dyn BackendClient>,
        negative_ttl: u64,
    ) -> Self {
        Self {
            registry,
            store,
            ncache,
            backend,
            policy: Arc::new(RefreshPolicy::new()),
            inflight: Arc::new(InflightRefreshes::new()),
            negative_ttl,
        }
    }

    pub fn registry(&self) -> &Arc<DomainRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> &Arc<RefreshPolicy> {
        &self.policy
    }

    pub fn inflight(&self) -> &Arc<InflightRefreshes> {
        &self.inflight
    }

    /// Run a request, returning every retained per-domain result
    ///
    /// First-match requests return only the matching domain's result.
    pub async fn send(
        &self,
        data: CacheReqData,
        opts: ReqOptions,
    ) -> LookupResult<Vec<CacheRequestResult>> {
        let req_type = data.req_type();
        let started = Instant::now();
        let span = info_span!(
            "cache_req",
            request_id = %Uuid::new_v4(),
            req_type = req_type.as_str()
        );

        let outcome = self.run(data, opts).instrument(span).await;

        let label = match &outcome {
            Ok(_) => "success",
            Err(e) if e.is_not_found() => "not_found",
            Err(_) => "error",
        };
        metrics::record_cache_request(req_type.as_str(), label, started.elapsed().as_secs_f64());

        outcome
    }

    /// Run a request and return the first domain that produced records
    pub async fn send_single(
        &self,
        data: CacheReqData,
        opts: ReqOptions,
    ) -> LookupResult<CacheRequestResult> {
        let description = describe(&data);
        self.send(data, opts)
            .await?
            .into_iter()
            .find(|r| !r.is_empty())
            .ok_or(LookupError::NotFound(description))
    }

    async fn run(&self, data: CacheReqData, opts: ReqOptions) -> LookupResult<Vec<CacheRequestResult>> {
        let selector = DomainSelector::new(&self.registry, opts.domain.as_deref())?;
        debug!(candidates = selector.len(), "Selected domains");

        let mut state = RequestState::new(data, opts);

        if state.data.req_type().is_enumeration() {
            // Domains refresh concurrently; results keep selector order
            let visits = join_all(
                selector.map(|domain| self.process_domain(&state.data, &state.opts, domain)),
            )
            .await;
            for visit in visits {
                state.absorb(visit);
            }
        } else {
            for domain in selector {
                let visit = self.process_domain(&state.data, &state.opts, domain).await;
                if state.absorb(visit) {
                    break;
                }
            }
        }

        state.finish()
    }

    async fn process_domain(
        &self,
        data: &CacheReqData,
        opts: &ReqOptions,
        domain: Arc<DomainInfo>,
    ) -> DomainVisit {
        let key = data.domain_key(&domain);
        let lookup_name = data.lookup_name(&domain);
        let uses_ncache = data.req_type().uses_negative_cache();

        if uses_ncache {
            match self.ncache.is_marked(&domain.name, &key.to_string()) {
                Ok(true) => {
                    debug!(domain = %domain.name, key = %key, "Negative cache hit");
                    metrics::record_negative_hit();
                    return DomainVisit::empty(&domain, lookup_name);
                }
                Ok(false) => {}
                Err(e) => warn!(domain = %domain.name, error = %e, "Negative cache fault, ignoring"),
            }
        }

        let hit = match self.store.lookup(&domain, &key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(domain = %domain.name, key = %key, error = %e, "Local store fault, treating as miss");
                None
            }
        };

        let freshness = policy::freshness(
            &domain,
            hit.as_ref().map(|h| h.last_refresh),
            opts.cache_refresh_percent,
            Utc::now(),
        );
        metrics::record_store_state(freshness.as_str());
        debug!(domain = %domain.name, key = %key, state = freshness.as_str(), "Local store checked");

        // A glob match in the cache may miss entries only the backend knows
        if let (Some(hit), true) = (hit, freshness.is_usable() && !key.bypasses_cache()) {
            if freshness == Freshness::Midpoint {
                let (_, joined) = self.refresh(data, &domain, &key);
                debug!(domain = %domain.name, key = %key, joined, "Background refresh started");
            }
            return DomainVisit::records(&domain, project(data, hit.records), lookup_name);
        }

        let (pending, joined) = self.refresh(data, &domain, &key);
        debug!(domain = %domain.name, key = %key, joined, "Awaiting backend refresh");

        match pending.await {
            RefreshOutcome::Found(_) => {}
            RefreshOutcome::NotFound => return DomainVisit::empty(&domain, lookup_name),
            RefreshOutcome::Unavailable(reason) => {
                return DomainVisit::failed(&domain, lookup_name, Failure::Soft(reason))
            }
            RefreshOutcome::StoreFault(reason) => {
                return DomainVisit::failed(
                    &domain,
                    lookup_name,
                    Failure::Hard(LookupError::Store(reason)),
                )
            }
        }

        match self.store.lookup(&domain, &key).await {
            Ok(Some(hit)) => DomainVisit::records(&domain, project(data, hit.records), lookup_name),
            Ok(None) => DomainVisit::empty(&domain, lookup_name),
            Err(e) => {
                warn!(domain = %domain.name, key = %key, error = %e, "Local store fault after refresh");
                DomainVisit::failed(&domain, lookup_name, Failure::Hard(e))
            }
        }
    }

    /// Join or start the single backend refresh for (domain, key)
    fn refresh(
        &self,
        data: &CacheReqData,
        domain: &Arc<DomainInfo>,
        key: &DomainKey,
    ) -> (PendingRefresh, bool) {
        let task = RefreshTask {
            domain: Arc::clone(domain),
            key: key.clone(),
            opt_level: data.opt_level(),
            mark_negative: data.req_type().uses_negative_cache(),
            negative_ttl: self.negative_ttl,
            store: Arc::clone(&self.store),
            ncache: Arc::clone(&self.ncache),
            backend: Arc::clone(&self.backend),
            policy: Arc::clone(&self.policy),
        };

        let inflight_key = format!("{}/{}", domain.name, key);
        let (pending, joined) = self.inflight.join_or_start(inflight_key, task.run());
        if joined {
            metrics::record_inflight_join();
        }
        (pending, joined)
    }
}

fn project(data: &CacheReqData, records: Vec<IdentityRecord>) -> Vec<IdentityRecord> {
    let attrs = data.requested_attrs();
    if attrs.is_empty() {
        return records;
    }
    records.iter().map(|r| r.project(attrs)).collect()
}

/// Human-readable key for NotFound messages
fn describe(data: &CacheReqData) -> String {
    let key = match data.key() {
        LookupKey::Name(name) => name.clone(),
        LookupKey::Id(id) => id.to_string(),
        LookupKey::Cert(_) => "certificate".to_string(),
        LookupKey::Sid { sid, .. } => sid.clone(),
        LookupKey::Filter(filter) => filter.clone(),
        LookupKey::Enumeration => "all".to_string(),
    };
    format!("{} {}", data.req_type().as_str(), key)
}

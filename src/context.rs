/// Application context and dependency injection
use crate::{
    backend::{BackendClient, HttpBackend},
    cache_req::{CacheReq, LookupDefaults, Plugins},
    config::ServerConfig,
    domain::DomainRegistry,
    error::LookupResult,
    ncache::{MemoryNegativeCache, NegativeCache},
    store::{LocalStore, SqliteStore},
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<DomainRegistry>,
    pub store: Arc<dyn LocalStore>,
    pub ncache: Arc<dyn NegativeCache>,
    pub backend: Arc<dyn BackendClient>,
    pub cache_req: Arc<CacheReq>,
    pub plugins: Arc<Plugins>,
    pub started_at: Instant,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> LookupResult<Self> {
        // Validate configuration
        config.validate()?;

        // Open the local cache
        let store = SqliteStore::connect(&config.storage.cache_db).await?;
        store.ping().await?;

        // Backend client shared by every domain
        let backend = HttpBackend::new(Duration::from_secs(config.responder.backend_timeout))?;

        tracing::info!(
            domains = config.domains.len(),
            cache_db = %config.storage.cache_db.display(),
            "Identity cache initialised"
        );

        Ok(Self::from_parts(
            config,
            Arc::new(store),
            Arc::new(MemoryNegativeCache::new()),
            Arc::new(backend),
        ))
    }

    /// Wire a context from already built collaborators
    pub fn from_parts(
        config: ServerConfig,
        store: Arc<dyn LocalStore>,
        ncache: Arc<dyn NegativeCache>,
        backend: Arc<dyn BackendClient>,
    ) -> Self {
        let registry = Arc::new(DomainRegistry::new(&config.domains));

        let cache_req = Arc::new(CacheReq::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            Arc::clone(&ncache),
            Arc::clone(&backend),
            config.responder.negative_ttl,
        ));

        let plugins = Arc::new(Plugins::new(
            Arc::clone(&cache_req),
            LookupDefaults::from(&config.responder),
        ));

        Self {
            config: Arc::new(config),
            registry,
            store,
            ncache,
            backend,
            cache_req,
            plugins,
            started_at: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

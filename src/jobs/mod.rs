use crate::{context::AppContext, metrics};
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

pub mod tasks;

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");

        // Spawn cleanup tasks
        tokio::spawn(Self::negative_cache_purge_job(Arc::clone(&self)));
        tokio::spawn(Self::store_cleanup_job(Arc::clone(&self)));

        // Spawn monitoring tasks
        tokio::spawn(Self::domain_probe_job(Arc::clone(&self)));
        tokio::spawn(Self::uptime_job(Arc::clone(&self)));

        info!("Background jobs started");
    }

    /// Purge expired negative cache entries (runs every minute)
    async fn negative_cache_purge_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(60));

        loop {
            interval.tick().await;

            let purged = tasks::purge_negative_cache(&scheduler.context);
            if purged > 0 {
                debug!("Purged {} expired negative cache entries", purged);
            }
            metrics::record_background_job("ncache_purge", "success");
        }
    }

    /// Delete records nobody refreshed for a long time (runs every 30 minutes)
    async fn store_cleanup_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(1800));

        loop {
            interval.tick().await;
            info!("Running local store cleanup");

            match tasks::cleanup_store(&scheduler.context).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Removed {} expired cache records", count);
                    }
                    metrics::record_background_job("store_cleanup", "success");
                }
                Err(e) => {
                    error!("Failed to clean up local store: {}", e);
                    metrics::record_background_job("store_cleanup", "failure");
                }
            }
        }
    }

    /// Probe every domain's backend (runs every 5 minutes)
    async fn domain_probe_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(300));

        loop {
            interval.tick().await;

            let offline = tasks::probe_domains(&scheduler.context).await;
            if offline.is_empty() {
                metrics::record_background_job("domain_probe", "success");
            } else {
                warn!("Domains offline: {}", offline.join(", "));
                metrics::record_background_job("domain_probe", "degraded");
            }
        }
    }

    /// Keep the uptime gauge current (runs every 15 seconds)
    async fn uptime_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(15));

        loop {
            interval.tick().await;
            tasks::update_uptime(&scheduler.context);
        }
    }
}

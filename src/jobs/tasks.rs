/// Background task implementations
use crate::{context::AppContext, error::LookupResult, metrics};
use chrono::{Duration, Utc};

/// Records older than this many entry lifetimes are dropped
const RETENTION_LIFETIMES: i64 = 4;

/// Drop expired negative cache entries
pub fn purge_negative_cache(ctx: &AppContext) -> usize {
    let purged = ctx.ncache.purge_expired();
    metrics::NEGATIVE_CACHE_ENTRIES.set(ctx.ncache.len() as i64);
    purged
}

/// Delete records not refreshed within the retention window
///
/// The window is the longest configured entry lifetime times four, so a
/// record stays available (and refreshable) well past its expiry.
pub async fn cleanup_store(ctx: &AppContext) -> LookupResult<u64> {
    let longest = ctx
        .registry
        .all()
        .iter()
        .map(|d| d.entry_cache_timeout)
        .max()
        .unwrap_or(0);
    let longest = i64::try_from(longest).unwrap_or(i64::MAX / RETENTION_LIFETIMES);

    let cutoff = Utc::now() - Duration::seconds(longest.saturating_mul(RETENTION_LIFETIMES));
    ctx.store.cleanup_expired(cutoff).await
}

/// Ping every enabled domain and update its online flag
///
/// Returns the names of the domains found offline.
pub async fn probe_domains(ctx: &AppContext) -> Vec<String> {
    let mut offline = Vec::new();

    for domain in ctx.registry.enabled() {
        match ctx.backend.ping(&domain).await {
            Ok(()) => domain.set_online(true),
            Err(e) => {
                tracing::debug!(domain = %domain.name, error = %e, "Backend ping failed");
                domain.set_online(false);
                offline.push(domain.name.clone());
            }
        }
    }

    let online = ctx.registry.enabled().iter().filter(|d| d.is_online()).count();
    metrics::DOMAINS_ONLINE.set(online as i64);
    offline
}

pub fn update_uptime(ctx: &AppContext) {
    metrics::UPTIME_SECONDS.set(ctx.uptime().as_secs_f64());
}

/// Liveness, readiness and component health of the responder
///
/// Readiness only depends on the local store. With every backend offline
/// the responder keeps answering for records still inside their cache
/// timeout; expired or uncached keys fail as backend unavailable. Offline
/// domains therefore degrade the detailed status rather than readiness.

use crate::{context::AppContext, error::LookupResult, metrics};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Body of `/health/detailed`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// "healthy", "degraded" or "unhealthy"; the worst component wins
    pub status: String,
    pub version: String,
    pub uptime_seconds: f64,
    pub checks: Vec<ComponentHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One checked component (store, domains, negative cache)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Build health check routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/health", get(health_basic))
        .route("/health/live", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
        .route("/health/detailed", get(health_detailed))
        .route("/metrics", get(metrics_handler))
}

/// Basic health check
pub async fn health_basic() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Liveness probe: if we can respond, we're alive
pub async fn liveness_probe() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "alive",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Readiness probe
///
/// Ready as long as the local store answers; offline backends only
/// degrade service, cached data is still served.
pub async fn readiness_probe(
    State(ctx): State<AppContext>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if let Err(e) = check_store(&ctx).await {
        tracing::warn!(error = %e, "readiness_probe_failed: store check failed");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(Json(serde_json::json!({
        "status": "ready",
        "version": env!("CARGO_PKG_VERSION")
    })))
}

/// Store, domain and negative cache status in one report
pub async fn health_detailed(State(ctx): State<AppContext>) -> (StatusCode, Json<HealthStatus>) {
    let start = Instant::now();

    let checks = vec![
        check_store_detailed(&ctx).await,
        check_domains_detailed(&ctx),
        check_negative_cache_detailed(&ctx),
    ];

    let overall_status = determine_overall_status(&checks);

    let health = HealthStatus {
        status: overall_status.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: ctx.uptime().as_secs_f64(),
        checks,
        message: if overall_status == "healthy" {
            None
        } else {
            Some("Some components need attention".to_string())
        },
    };

    let status_code = match overall_status.as_str() {
        "healthy" | "degraded" => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };

    tracing::info!(
        status = %overall_status,
        duration_ms = start.elapsed().as_millis(),
        "Detailed health check finished"
    );

    (status_code, Json(health))
}

/// Prometheus scrape endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render_metrics(),
    )
}

async fn check_store(ctx: &AppContext) -> LookupResult<()> {
    ctx.store.ping().await
}

async fn check_store_detailed(ctx: &AppContext) -> ComponentHealth {
    let start = Instant::now();

    match check_store(ctx).await {
        Ok(()) => ComponentHealth {
            name: "local_store".to_string(),
            status: "healthy".to_string(),
            response_time_ms: Some(start.elapsed().as_millis() as u64),
            error: None,
            details: Some(serde_json::json!({ "type": "sqlite" })),
        },
        Err(e) => ComponentHealth {
            name: "local_store".to_string(),
            status: "unhealthy".to_string(),
            response_time_ms: Some(start.elapsed().as_millis() as u64),
            error: Some(e.to_string()),
            details: None,
        },
    }
}

fn check_domains_detailed(ctx: &AppContext) -> ComponentHealth {
    let enabled = ctx.registry.enabled();
    let offline: Vec<String> = enabled
        .iter()
        .filter(|d| !d.is_online())
        .map(|d| d.name.clone())
        .collect();

    let status = if offline.is_empty() {
        "healthy"
    } else {
        // Cached records are still served while backends are away
        "degraded"
    };

    ComponentHealth {
        name: "domains".to_string(),
        status: status.to_string(),
        response_time_ms: None,
        error: if offline.is_empty() {
            None
        } else {
            Some(format!("Offline: {}", offline.join(", ")))
        },
        details: Some(serde_json::json!({
            "enabled": enabled.len(),
            "offline": offline.len(),
        })),
    }
}

fn check_negative_cache_detailed(ctx: &AppContext) -> ComponentHealth {
    ComponentHealth {
        name: "negative_cache".to_string(),
        status: "healthy".to_string(),
        response_time_ms: None,
        error: None,
        details: Some(serde_json::json!({ "entries": ctx.ncache.len() })),
    }
}

/// Worst component status wins
fn determine_overall_status(checks: &[ComponentHealth]) -> String {
    if checks.iter().any(|c| c.status == "unhealthy") {
        "unhealthy".to_string()
    } else if checks.iter().any(|c| c.status == "degraded") {
        "degraded".to_string()
    } else {
        "healthy".to_string()
    }
}

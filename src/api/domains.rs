/// Domain listing and status endpoints
use crate::{context::AppContext, error::LookupResult};
use axum::{
    extract::{Path, State},
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainSummary {
    pub name: String,
    pub enabled: bool,
    pub online: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainList {
    pub domains: Vec<DomainSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainStatus {
    pub name: String,
    pub online: bool,
}

/// Build domain routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/v1/domains", get(list_domains))
        .route("/v1/domains/:name/status", get(domain_status))
}

/// Configured domains in priority order
async fn list_domains(State(ctx): State<AppContext>) -> Json<DomainList> {
    let domains = ctx
        .registry
        .all()
        .iter()
        .map(|d| DomainSummary {
            name: d.name.clone(),
            enabled: d.enabled,
            online: d.is_online(),
        })
        .collect();

    Json(DomainList { domains })
}

async fn domain_status(
    State(ctx): State<AppContext>,
    Path(name): Path<String>,
) -> LookupResult<Json<DomainStatus>> {
    let online = ctx.registry.is_online(&name)?;
    let name = ctx
        .registry
        .get(&name)
        .map(|d| d.name.clone())
        .unwrap_or(name);

    Ok(Json(DomainStatus { name, online }))
}

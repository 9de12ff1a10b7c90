/// Lookup endpoints (users, groups, initgroups, objects)
use crate::{
    cache_req::{page, CacheRequestResult, LimitedResult},
    context::AppContext,
    error::LookupResult,
    store::IdentityRecord,
};
use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

/// One domain's records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupResponse {
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookup_name: Option<String>,
    pub count: usize,
    pub records: Vec<IdentityRecord>,
}

impl From<CacheRequestResult> for LookupResponse {
    fn from(result: CacheRequestResult) -> Self {
        Self {
            count: result.count(),
            domain: result.domain,
            lookup_name: result.lookup_name,
            records: result.records,
        }
    }
}

impl From<LimitedResult<'_>> for LookupResponse {
    fn from(view: LimitedResult<'_>) -> Self {
        view.to_owned_result().into()
    }
}

/// Records from several domains, in domain order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiLookupResponse {
    /// Records across every domain before paging
    pub total: usize,
    pub start: usize,
    pub count: usize,
    pub results: Vec<LookupResponse>,
}

impl MultiLookupResponse {
    pub fn paged(results: &[CacheRequestResult], start: usize, limit: usize) -> Self {
        let total = results.iter().map(|r| r.count()).sum();
        let results: Vec<LookupResponse> = page(results, start, limit)
            .into_iter()
            .map(LookupResponse::from)
            .collect();

        Self {
            total,
            start,
            count: results.iter().map(|r| r.count).sum(),
            results,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LookupQuery {
    pub domain: Option<String>,
    #[serde(default)]
    pub all_domains: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub domain: Option<String>,
    #[serde(default)]
    pub start: usize,
    /// 0 means no limit
    #[serde(default)]
    pub limit: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct SidQuery {
    pub domain: Option<String>,
    /// Comma-separated attribute names
    pub attrs: Option<String>,
}

/// Build lookup routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/v1/users", get(enum_users))
        .route("/v1/users/name/:name", get(user_by_name))
        .route("/v1/users/upn/:upn", get(user_by_upn))
        .route("/v1/users/id/:id", get(user_by_id))
        .route("/v1/users/cert", post(user_by_cert))
        .route("/v1/users/filter/:filter", get(user_by_filter))
        .route("/v1/groups", get(enum_groups))
        .route("/v1/groups/name/:name", get(group_by_name))
        .route("/v1/groups/id/:id", get(group_by_id))
        .route("/v1/groups/filter/:filter", get(group_by_filter))
        .route("/v1/initgroups/:name", get(initgroups_by_name))
        .route("/v1/initgroups/upn/:upn", get(initgroups_by_upn))
        .route("/v1/objects/sid/:sid", get(object_by_sid))
}

fn single(result: CacheRequestResult) -> Response {
    Json(LookupResponse::from(result)).into_response()
}

fn multi(results: &[CacheRequestResult], start: usize, limit: usize) -> Response {
    Json(MultiLookupResponse::paged(results, start, limit)).into_response()
}

async fn user_by_name(
    State(ctx): State<AppContext>,
    Path(name): Path<String>,
    Query(query): Query<LookupQuery>,
) -> LookupResult<Response> {
    let domain = query.domain.as_deref();
    if query.all_domains {
        let results = ctx.plugins.user_by_name_all(&name, domain).await?;
        return Ok(multi(&results, 0, 0));
    }
    Ok(single(ctx.plugins.user_by_name(&name, domain).await?))
}

async fn user_by_upn(
    State(ctx): State<AppContext>,
    Path(upn): Path<String>,
    Query(query): Query<LookupQuery>,
) -> LookupResult<Response> {
    Ok(single(
        ctx.plugins.user_by_upn(&upn, query.domain.as_deref()).await?,
    ))
}

async fn user_by_id(
    State(ctx): State<AppContext>,
    Path(uid): Path<u32>,
    Query(query): Query<LookupQuery>,
) -> LookupResult<Response> {
    let domain = query.domain.as_deref();
    if query.all_domains {
        let results = ctx.plugins.user_by_id_all(uid, domain).await?;
        return Ok(multi(&results, 0, 0));
    }
    Ok(single(ctx.plugins.user_by_id(uid, domain).await?))
}

/// Certificate in the body, PEM or bare base64
async fn user_by_cert(
    State(ctx): State<AppContext>,
    Query(query): Query<LookupQuery>,
    body: String,
) -> LookupResult<Response> {
    Ok(single(
        ctx.plugins.user_by_cert(&body, query.domain.as_deref()).await?,
    ))
}

async fn user_by_filter(
    State(ctx): State<AppContext>,
    Path(filter): Path<String>,
    Query(query): Query<PageQuery>,
) -> LookupResult<Response> {
    let results = ctx
        .plugins
        .user_by_filter(&filter, query.domain.as_deref())
        .await?;
    Ok(multi(&results, query.start, query.limit))
}

async fn enum_users(
    State(ctx): State<AppContext>,
    Query(query): Query<PageQuery>,
) -> LookupResult<Response> {
    let results = ctx.plugins.enum_users(query.domain.as_deref()).await?;
    Ok(multi(&results, query.start, query.limit))
}

async fn group_by_name(
    State(ctx): State<AppContext>,
    Path(name): Path<String>,
    Query(query): Query<LookupQuery>,
) -> LookupResult<Response> {
    let domain = query.domain.as_deref();
    if query.all_domains {
        let results = ctx.plugins.group_by_name_all(&name, domain).await?;
        return Ok(multi(&results, 0, 0));
    }
    Ok(single(ctx.plugins.group_by_name(&name, domain).await?))
}

async fn group_by_id(
    State(ctx): State<AppContext>,
    Path(gid): Path<u32>,
    Query(query): Query<LookupQuery>,
) -> LookupResult<Response> {
    let domain = query.domain.as_deref();
    if query.all_domains {
        let results = ctx.plugins.group_by_id_all(gid, domain).await?;
        return Ok(multi(&results, 0, 0));
    }
    Ok(single(ctx.plugins.group_by_id(gid, domain).await?))
}

async fn group_by_filter(
    State(ctx): State<AppContext>,
    Path(filter): Path<String>,
    Query(query): Query<PageQuery>,
) -> LookupResult<Response> {
    let results = ctx
        .plugins
        .group_by_filter(&filter, query.domain.as_deref())
        .await?;
    Ok(multi(&results, query.start, query.limit))
}

async fn enum_groups(
    State(ctx): State<AppContext>,
    Query(query): Query<PageQuery>,
) -> LookupResult<Response> {
    let results = ctx.plugins.enum_groups(query.domain.as_deref()).await?;
    Ok(multi(&results, query.start, query.limit))
}

async fn initgroups_by_name(
    State(ctx): State<AppContext>,
    Path(name): Path<String>,
    Query(query): Query<LookupQuery>,
) -> LookupResult<Response> {
    Ok(single(
        ctx.plugins
            .initgroups_by_name(&name, query.domain.as_deref())
            .await?,
    ))
}

async fn initgroups_by_upn(
    State(ctx): State<AppContext>,
    Path(upn): Path<String>,
    Query(query): Query<LookupQuery>,
) -> LookupResult<Response> {
    Ok(single(
        ctx.plugins
            .initgroups_by_upn(&upn, query.domain.as_deref())
            .await?,
    ))
}

async fn object_by_sid(
    State(ctx): State<AppContext>,
    Path(sid): Path<String>,
    Query(query): Query<SidQuery>,
) -> LookupResult<Response> {
    let attrs: Vec<&str> = query
        .attrs
        .as_deref()
        .map(|a| a.split(',').collect())
        .unwrap_or_default();

    Ok(single(
        ctx.plugins
            .object_by_sid(&sid, &attrs, query.domain.as_deref())
            .await?,
    ))
}

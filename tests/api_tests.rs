/// HTTP surface tests driven through the router without a socket
mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use common::{domain, Harness};
use identity_cache_req::{server::build_router, store::IdentityRecord};
use serde_json::Value;
use tower::ServiceExt;

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn app_with_users() -> (Harness, Router) {
    let h = Harness::new(vec![domain("d1"), domain("d2")]).await;
    h.backend.put(
        "d1",
        IdentityRecord::user("alice", 1000)
            .with_upn("alice@example.org")
            .with_sid("S-1-5-21-7-1000")
            .with_attr("mail", "alice@example.org")
            .with_attr("shell", "/bin/sh")
            .with_certificate("AAECAwQF"),
    );
    h.backend.put("d1", IdentityRecord::user("bob", 1001));
    h.backend.put("d2", IdentityRecord::user("carl", 2000));
    h.backend.put("d2", IdentityRecord::group("staff", 50));

    let app = build_router(h.ctx.clone());
    (h, app)
}

#[tokio::test]
async fn test_user_by_name_endpoint() {
    let (_h, app) = app_with_users().await;

    let (status, body) = get(&app, "/v1/users/name/alice").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["domain"], "d1");
    assert_eq!(body["count"], 1);
    assert_eq!(body["records"][0]["id"], 1000);
}

#[tokio::test]
async fn test_missing_user_is_404() {
    let (_h, app) = app_with_users().await;

    let (status, body) = get(&app, "/v1/users/name/nobody").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NotFound");
}

#[tokio::test]
async fn test_unknown_domain_is_404() {
    let (h, app) = app_with_users().await;

    let (status, body) = get(&app, "/v1/users/id/1000?domain=d9").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "DomainNotFound");
    assert_eq!(h.backend.total_calls(), 0);
}

#[tokio::test]
async fn test_bad_filter_is_400() {
    let (_h, app) = app_with_users().await;

    let (status, body) = get(&app, "/v1/users/filter/a%25b").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InvalidInput");
}

#[tokio::test]
async fn test_unreachable_backends_are_503() {
    let (h, app) = app_with_users().await;
    h.backend.fail_domain("d1", true);
    h.backend.fail_domain("d2", true);

    let (status, body) = get(&app, "/v1/groups/name/staff").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "BackendUnavailable");
}

#[tokio::test]
async fn test_lookup_variants() {
    let (_h, app) = app_with_users().await;

    let (status, body) = get(&app, "/v1/users/upn/ALICE@example.org").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["records"][0]["name"], "alice");

    let (status, body) = get(&app, "/v1/groups/id/50").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["domain"], "d2");

    let (status, body) = get(&app, "/v1/objects/sid/S-1-5-21-7-1000?attrs=mail").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["records"][0]["attributes"]["mail"][0], "alice@example.org");
    assert!(body["records"][0]["attributes"].get("shell").is_none());

    let request = Request::builder()
        .method("POST")
        .uri("/v1/users/cert")
        .body(Body::from("-----BEGIN CERTIFICATE-----\nAAECAwQF\n-----END CERTIFICATE-----\n"))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["records"][0]["name"], "alice");
}

#[tokio::test]
async fn test_enumeration_is_paged_across_domains() {
    let (_h, app) = app_with_users().await;

    let (status, body) = get(&app, "/v1/users?start=1&limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    assert_eq!(body["count"], 2);
    assert_eq!(body["results"][0]["records"][0]["name"], "bob");
    assert_eq!(body["results"][1]["records"][0]["name"], "carl");
}

#[tokio::test]
async fn test_all_domains_query() {
    let (h, app) = app_with_users().await;
    h.backend.put("d2", IdentityRecord::user("alice", 2001));

    let (status, body) = get(&app, "/v1/users/name/alice?all_domains=true").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["results"][1]["domain"], "d2");
}

#[tokio::test]
async fn test_domain_endpoints() {
    let (h, app) = app_with_users().await;
    h.domain("d2").set_online(false);

    let (status, body) = get(&app, "/v1/domains").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["domains"][0]["name"], "d1");
    assert_eq!(body["domains"][1]["online"], false);

    let (status, body) = get(&app, "/v1/domains/D1/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "d1");
    assert_eq!(body["online"], true);

    let (status, _) = get(&app, "/v1/domains/nowhere/status").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_and_metrics() {
    let (h, app) = app_with_users().await;

    let (status, body) = get(&app, "/health/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");

    h.domain("d1").set_online(false);
    let (status, body) = get(&app, "/health/detailed").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");

    let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_route_falls_back() {
    let (_h, app) = app_with_users().await;

    let (status, body) = get(&app, "/v2/anything").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Endpoint not found");
}

/// End-to-end tests: router → coalescer / profile resolver → mock Mojang
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use mojang_api_proxy::{
    config::ServerConfig, context::AppContext, rate_limit::CLIENT_IP_HEADER, server::build_router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use tower::ServiceExt;
use wiremock::{
    matchers::{body_json, method, path},
    Mock, MockServer, ResponseTemplate,
};

const NOTCH_RAW: &str = "069a79f444e94726a5befca90e38aaf6";
const NOTCH_ID: &str = "069a79f4-44e9-4726-a5be-fca90e38aaf6";

fn test_config(server: &MockServer, extra: &[(&str, &str)]) -> ServerConfig {
    let mut vars: HashMap<String, String> = HashMap::from([
        (
            "UPSTREAM_BATCH_URLS".to_string(),
            format!("{}/profiles/minecraft", server.uri()),
        ),
        (
            "UPSTREAM_PROFILE_URL".to_string(),
            format!("{}/session/minecraft/profile/{{id}}", server.uri()),
        ),
        ("BATCH_INTERVAL_MS".to_string(), "50".to_string()),
        ("REQUEST_TIMEOUT_SECS".to_string(), "5".to_string()),
    ]);
    for (key, value) in extra {
        vars.insert(key.to_string(), value.to_string());
    }

    ServerConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

async fn create_app(server: &MockServer, extra: &[(&str, &str)]) -> (Router, AppContext) {
    let ctx = AppContext::new(test_config(server, extra)).unwrap();
    (build_router(ctx.clone()), ctx)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Option<String>, Value) {
    let request = Request::builder()
        .uri(uri)
        .header(CLIENT_IP_HEADER, "198.51.100.7")
        .body(Body::empty())
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let cache_control = response
        .headers()
        .get(header::CACHE_CONTROL)
        .map(|value| value.to_str().unwrap().to_string());
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    (status, cache_control, body)
}

#[tokio::test]
async fn test_uuid_lookup_end_to_end() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/profiles/minecraft"))
        .and(body_json(json!(["Notch"])))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{ "id": NOTCH_RAW, "name": "Notch" }])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (app, ctx) = create_app(&server, &[]).await;

    let (status, cache_control, body) = get(&app, "/mojang/uuid/Notch").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache_control.as_deref(), Some("public, max-age=900"));
    assert_eq!(body, json!({ "exists": true, "uuid": NOTCH_ID }));

    // Served from cache, so the mock still sees exactly one call
    let (status, _, body) = get(&app, "/mojang/uuid/NOTCH").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["uuid"], NOTCH_ID);

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_unknown_name_is_negative_cached() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/profiles/minecraft"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let (app, ctx) = create_app(&server, &[]).await;

    for _ in 0..2 {
        let (status, _, body) = get(&app, "/mojang/uuid/nobody_here").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "exists": false, "uuid": null }));
    }

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_invalid_username_is_rejected_locally() {
    let server = MockServer::start().await;
    let (app, ctx) = create_app(&server, &[]).await;

    let (status, _, body) = get(&app, "/mojang/uuid/this_name_is_far_too_long").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "INVALID_NAME" }));

    let (status, _, _) = get(&app, "/mojang/uuid/bad%20name").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(server.received_requests().await.unwrap().is_empty());
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_upstream_failure_maps_to_internal_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let (app, ctx) = create_app(&server, &[]).await;

    let (status, _, body) = get(&app, "/mojang/uuid/Notch").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "INTERNAL_ERROR" }));

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_skin_lookup_end_to_end() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("/session/minecraft/profile/{}", NOTCH_RAW)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": NOTCH_RAW,
            "name": "Notch",
            "properties": [
                { "name": "textures", "value": "dGV4dHVyZXM=", "signature": "c2ln" }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (app, ctx) = create_app(&server, &[]).await;

    let (status, cache_control, body) = get(&app, &format!("/mojang/skin/{}", NOTCH_ID)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(cache_control.is_some());
    assert_eq!(
        body,
        json!({
            "exists": true,
            "skinProperty": { "value": "dGV4dHVyZXM=", "signature": "c2ln" }
        })
    );

    // Undashed form hits the same cache entry
    let (status, _, _) = get(&app, &format!("/mojang/skin/{}", NOTCH_RAW)).await;
    assert_eq!(status, StatusCode::OK);

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_invalid_uuid_is_rejected() {
    let server = MockServer::start().await;
    let (app, ctx) = create_app(&server, &[]).await;

    let (status, _, body) = get(&app, "/mojang/skin/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "INVALID_UUID" }));

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_health_metrics_and_fallback() {
    let server = MockServer::start().await;
    let (app, ctx) = create_app(&server, &[]).await;

    let (status, _, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "UP" }));

    let (status, _, _) = get(&app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = get(&app, "/").await;
    assert!(status.is_redirection());

    let (status, _, body) = get(&app, "/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "error": "Not Found" }));

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_rate_limit_per_client() {
    let server = MockServer::start().await;
    let (app, ctx) = create_app(&server, &[("RATE_LIMIT_PER_MINUTE", "2")]).await;

    assert_eq!(get(&app, "/health").await.0, StatusCode::OK);
    assert_eq!(get(&app, "/health").await.0, StatusCode::OK);

    let (status, _, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body, json!({ "error": "RATE_LIMITED" }));

    // A different client address has its own quota
    let request = Request::builder()
        .uri("/health")
        .header(CLIENT_IP_HEADER, "203.0.113.99")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    ctx.shutdown().await;
}

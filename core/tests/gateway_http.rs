//! HTTP-surface behavior: authentication, rate limiting, request ids, and
//! the health endpoint.

mod common;

use common::AppBuilder;
use common::parse_json;
use common::send;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;
use wiremock::matchers::path;

async fn ollama_with_tags() -> MockServer {
    let ollama = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "models": [] })))
        .mount(&ollama)
        .await;
    ollama
}

#[tokio::test]
async fn missing_api_key_is_401() {
    let ollama = ollama_with_tags().await;
    let app = AppBuilder::new(&ollama.uri()).api_key("secret").build();

    let (status, _, bytes) = send(&app, "GET", "/v1/models", &[], None).await;
    assert_eq!(status, 401);
    let body = parse_json(&bytes);
    assert_eq!(body["error"]["type"], json!("invalid_request_error"));
    assert!(body["error"]["request_id"].as_str().is_some());
}

#[tokio::test]
async fn x_api_key_and_bearer_both_authenticate() {
    let ollama = ollama_with_tags().await;
    let app = AppBuilder::new(&ollama.uri()).api_key("secret").build();

    let (status, _, _) = send(&app, "GET", "/v1/models", &[("x-api-key", "secret")], None).await;
    assert_eq!(status, 200);

    let (status, _, _) = send(
        &app,
        "GET",
        "/v1/models",
        &[("authorization", "Bearer secret")],
        None,
    )
    .await;
    assert_eq!(status, 200);

    let (status, _, _) = send(&app, "GET", "/v1/models", &[("x-api-key", "wrong")], None).await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn health_bypasses_authentication() {
    let ollama = ollama_with_tags().await;
    let app = AppBuilder::new(&ollama.uri()).api_key("secret").build();

    let (status, _, bytes) = send(&app, "GET", "/health", &[], None).await;
    assert_eq!(status, 200);
    assert_eq!(parse_json(&bytes)["status"], json!("healthy"));
}

#[tokio::test]
async fn health_reports_unreachable_upstream() {
    // Point at a wiremock with no /api/tags mock: it answers 404.
    let ollama = MockServer::start().await;
    let app = AppBuilder::new(&ollama.uri()).build();

    let (status, _, bytes) = send(&app, "GET", "/health", &[], None).await;
    assert_eq!(status, 503);
    let body = parse_json(&bytes);
    assert_eq!(body["status"], json!("unhealthy"));
    assert!(body["error"].as_str().is_some());
    assert_eq!(body["ollama_host"], json!(ollama.uri()));
}

#[tokio::test]
async fn second_request_within_the_second_is_rate_limited() {
    let ollama = ollama_with_tags().await;
    let app = AppBuilder::new(&ollama.uri()).rate_limit(1.0).build();

    let (status, _, _) = send(&app, "GET", "/v1/models", &[], None).await;
    assert_eq!(status, 200);

    let (status, headers, bytes) = send(&app, "GET", "/v1/models", &[], None).await;
    assert_eq!(status, 429);
    let retry_after: u64 = headers
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .expect("retry-after header");
    assert!(retry_after >= 1);
    let body = parse_json(&bytes);
    assert_eq!(body["error"]["type"], json!("rate_limit_error"));
    assert!(!body["error"]["request_id"].as_str().expect("request id").is_empty());
}

#[tokio::test]
async fn health_is_exempt_from_rate_limiting() {
    let ollama = ollama_with_tags().await;
    let app = AppBuilder::new(&ollama.uri()).rate_limit(1.0).build();

    for _ in 0..5 {
        let (status, _, _) = send(&app, "GET", "/health", &[], None).await;
        assert_eq!(status, 200);
    }
}

#[tokio::test]
async fn inbound_request_id_is_echoed() {
    let ollama = ollama_with_tags().await;
    let app = AppBuilder::new(&ollama.uri()).build();

    let (_, headers, _) = send(
        &app,
        "GET",
        "/v1/models",
        &[("x-request-id", "req-abc-123")],
        None,
    )
    .await;
    assert_eq!(
        headers.get("x-request-id").and_then(|value| value.to_str().ok()),
        Some("req-abc-123")
    );
}

#[tokio::test]
async fn generated_request_id_is_returned_when_absent() {
    let ollama = ollama_with_tags().await;
    let app = AppBuilder::new(&ollama.uri()).build();

    let (_, headers, _) = send(&app, "GET", "/v1/models", &[], None).await;
    let id = headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .expect("generated id");
    assert!(!id.is_empty());
}

#[tokio::test]
async fn mcp_endpoints_answer_503_when_disabled() {
    let ollama = ollama_with_tags().await;
    let app = AppBuilder::new(&ollama.uri()).build();

    for uri in [
        "/v1/mcp/servers",
        "/v1/mcp/servers/health",
        "/v1/mcp/servers/some/tools",
    ] {
        let (status, _, bytes) = send(&app, "GET", uri, &[], None).await;
        assert_eq!(status, 503, "{uri}");
        assert_eq!(parse_json(&bytes)["error"]["type"], json!("server_error"));
    }

    let (status, _, _) = send(
        &app,
        "POST",
        "/v1/mcp/execute",
        &[],
        Some(json!({ "server": "s", "tool": "t" })),
    )
    .await;
    assert_eq!(status, 503);
}
